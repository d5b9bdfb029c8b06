//! Frame pacing tests
//!
//! Drives the render scheduler with arbitrary sequences of damage, vblank
//! and timer events, acting on its decisions the way the session does.

use proptest::prelude::*;
use std::time::{Duration, Instant};

use lucent::renderer::{RenderDecision, RenderScheduler};

#[derive(Debug, Clone)]
enum Event {
    Damage,
    /// A vblank; `finished` tells whether the frame in flight is done.
    Vblank { finished: bool },
    Timer,
    Sleep(u64),
}

fn event() -> impl Strategy<Value = Event> {
    prop_oneof![
        3 => Just(Event::Damage),
        3 => any::<bool>().prop_map(|finished| Event::Vblank { finished }),
        1 => Just(Event::Timer),
        2 => (0u64..20_000).prop_map(Event::Sleep),
    ]
}

/// Scheduler plus the state of the pretend backend.
struct Harness {
    scheduler: RenderScheduler,
    now: Instant,
    in_flight: bool,
    renders: usize,
}

impl Harness {
    fn new(frame_pacing: bool) -> Self {
        // A short render time window so pacing kicks in quickly.
        let mut scheduler = RenderScheduler::with_window(frame_pacing, 4);
        scheduler.set_redirected(true);
        Self {
            scheduler,
            now: Instant::now(),
            in_flight: false,
            renders: 0,
        }
    }

    fn act_on(&mut self, decision: RenderDecision) {
        if decision == RenderDecision::RenderNow {
            assert!(!self.in_flight, "render started while another is in flight");
            self.scheduler.render_started(self.now);
            self.in_flight = true;
            self.renders += 1;
        }
    }

    fn handle(&mut self, event: &Event) {
        match *event {
            Event::Damage => {
                let decision = self.scheduler.queue_redraw(self.now);
                self.act_on(decision);
            }
            Event::Vblank { finished } => {
                let in_flight = &mut self.in_flight;
                let decision = self.scheduler.on_vblank(self.now, || {
                    if finished {
                        *in_flight = false;
                        Some(Duration::from_micros(3_000))
                    } else {
                        None
                    }
                });
                self.act_on(decision);
            }
            Event::Timer => {
                if self.scheduler.timer_deadline().is_some_and(|d| d <= self.now) {
                    let decision = self.scheduler.on_timer(self.now);
                    self.act_on(decision);
                }
            }
            Event::Sleep(us) => self.now += Duration::from_micros(us),
        }
    }

    fn check(&self) {
        assert_eq!(self.scheduler.is_backend_busy(), self.in_flight);
        if self.scheduler.is_render_queued() {
            assert!(
                self.scheduler.timer_deadline().is_some() || self.in_flight,
                "a queued redraw has nothing that will start it"
            );
        }
    }
}

proptest! {
    #[test]
    fn prop_one_render_in_flight(
        frame_pacing in any::<bool>(),
        events in prop::collection::vec(event(), 0..200),
    ) {
        let mut harness = Harness::new(frame_pacing);
        for event in &events {
            harness.handle(event);
            harness.check();
        }
    }
}

/// Test that damage arriving while a frame is in flight is rendered right
/// after the frame finishes
#[test]
fn test_damage_during_render_is_not_lost() {
    let mut harness = Harness::new(false);
    harness.handle(&Event::Damage);
    assert_eq!(harness.renders, 1);

    harness.handle(&Event::Damage);
    harness.handle(&Event::Damage);
    assert_eq!(harness.renders, 1);

    harness.handle(&Event::Vblank { finished: false });
    assert_eq!(harness.renders, 1);
    harness.handle(&Event::Vblank { finished: true });
    assert_eq!(harness.renders, 2);
    assert!(!harness.scheduler.is_render_queued());
}

/// Test that a paced render is delayed toward the next vblank once render
/// times are known
#[test]
fn test_paced_render_waits_for_timer() {
    let mut harness = Harness::new(true);
    // Settle the vblank interval at 16 ms with 3 ms renders.
    for _ in 0..30 {
        harness.handle(&Event::Damage);
        harness.handle(&Event::Sleep(16_000));
        harness.handle(&Event::Timer);
        harness.handle(&Event::Vblank { finished: true });
    }
    assert!(!harness.in_flight);
    assert!(!harness.scheduler.is_render_queued());

    let renders = harness.renders;
    harness.handle(&Event::Damage);
    assert_eq!(harness.renders, renders);
    let deadline = harness.scheduler.timer_deadline().unwrap();
    assert!(deadline > harness.now);
    assert!(deadline < harness.now + Duration::from_millis(16));

    harness.now = deadline;
    harness.handle(&Event::Timer);
    assert_eq!(harness.renders, renders + 1);
}
