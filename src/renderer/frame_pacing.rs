//! Frame pacing
//!
//! Decides when to start rendering a frame. Rendering as soon as damage
//! arrives wastes the time between the end of rendering and the next
//! vblank, during which newer damage piles up. With frame pacing the render
//! starts as late as possible while still finishing before a vblank.
//!
//! # Features
//!
//! - **Render budget**: the 98th percentile of recent render times, so a
//!   slow frame now and then does not miss its vblank
//! - **Vblank estimate**: mean vblank interval, reset when the refresh
//!   rate changes
//! - **Single render in flight**: a new frame only starts once the
//!   backend finished the previous one
//!
//! # Usage
//!
//! [`RenderScheduler`] is a pure state machine. The event loop feeds it
//! redraw requests, timer expirations and vblanks, and acts on the
//! returned [`RenderDecision`]:
//!
//! ```
//! use lucent::renderer::frame_pacing::{RenderDecision, RenderScheduler};
//! use std::time::Instant;
//!
//! let mut scheduler = RenderScheduler::new(true);
//! let now = Instant::now();
//!
//! // Without statistics there is nothing to pace with.
//! assert_eq!(scheduler.queue_redraw(now), RenderDecision::RenderNow);
//! scheduler.render_started(now);
//! assert!(scheduler.is_backend_busy());
//!
//! // Damage arriving mid-frame waits for the backend.
//! assert_eq!(scheduler.queue_redraw(now), RenderDecision::WaitForVblank);
//! ```

use log::{debug, info, trace, warn};
use std::time::{Duration, Instant};

use crate::statistics::{RenderStatistics, DEFAULT_RENDER_TIME_WINDOW};

/// Delays longer than this are suspicious: a frame is never more than one
/// vblank interval away.
const MAX_EXPECTED_DELAY: Duration = Duration::from_secs(1);

/// What the event loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderDecision {
    /// Render a frame right away.
    RenderNow,
    /// Render when this much time has passed. Report the expiry with
    /// [`RenderScheduler::on_timer`].
    RenderAfter(Duration),
    /// The backend is still busy with the previous frame; the redraw is
    /// reconsidered at the next vblank.
    WaitForVblank,
    /// Nothing to do, a render is already scheduled or none was requested.
    Idle,
}

/// Render scheduling state.
#[derive(Debug)]
pub struct RenderScheduler {
    /// Whether to delay renders toward the next vblank
    frame_pacing: bool,

    /// Whether the screen is redirected. Nothing is paced before that.
    redirected: bool,

    /// Render time and vblank interval estimates
    stats: RenderStatistics,

    /// A redraw was requested and the render has not started yet
    render_queued: bool,

    /// A frame was submitted and the backend has not confirmed it
    backend_busy: bool,

    /// Deadline of the armed render timer
    timer: Option<Instant>,

    /// A redraw waits for the next vblank
    vblank_armed: bool,

    last_vblank: Option<Instant>,
    render_start: Option<Instant>,
}

impl RenderScheduler {
    pub fn new(frame_pacing: bool) -> Self {
        Self::with_window(frame_pacing, DEFAULT_RENDER_TIME_WINDOW)
    }

    /// Like [`RenderScheduler::new`], estimating the render budget from
    /// the last `window` render times.
    pub fn with_window(frame_pacing: bool, window: usize) -> Self {
        info!(
            "🎬 Render scheduler initialized: frame pacing {}",
            if frame_pacing { "on" } else { "off" }
        );
        Self {
            frame_pacing,
            redirected: true,
            stats: RenderStatistics::new(window),
            render_queued: false,
            backend_busy: false,
            timer: None,
            vblank_armed: false,
            last_vblank: None,
            render_start: None,
        }
    }

    pub fn statistics(&self) -> &RenderStatistics {
        &self.stats
    }

    pub fn statistics_mut(&mut self) -> &mut RenderStatistics {
        &mut self.stats
    }

    pub fn is_render_queued(&self) -> bool {
        self.render_queued
    }

    pub fn is_backend_busy(&self) -> bool {
        self.backend_busy
    }

    /// Deadline of the pending render timer, if one is armed.
    pub fn timer_deadline(&self) -> Option<Instant> {
        self.timer
    }

    /// Screen redirection changed. Statistics from before are stale.
    pub fn set_redirected(&mut self, redirected: bool) {
        if self.redirected != redirected {
            debug!("Screen {}redirected, resetting statistics", if redirected { "" } else { "un" });
            self.stats.reset();
            self.last_vblank = None;
        }
        self.redirected = redirected;
    }

    /// Requests a new frame.
    pub fn queue_redraw(&mut self, now: Instant) -> RenderDecision {
        if self.render_queued {
            return RenderDecision::Idle;
        }
        self.render_queued = true;
        self.schedule_render(now)
    }

    fn schedule_render(&mut self, now: Instant) -> RenderDecision {
        if self.backend_busy {
            if self.vblank_armed {
                return RenderDecision::Idle;
            }
            trace!("Backend busy, waiting for the next vblank");
            self.vblank_armed = true;
            return RenderDecision::WaitForVblank;
        }

        let delay = self.render_delay(now);
        if delay.is_zero() {
            return RenderDecision::RenderNow;
        }
        if delay > MAX_EXPECTED_DELAY {
            warn!("Delaying the next render by {:?}, which is unusually long", delay);
        }
        assert!(self.timer.is_none(), "render timer armed twice");
        self.timer = Some(now + delay);
        trace!("Render delayed by {:?}", delay);
        RenderDecision::RenderAfter(delay)
    }

    /// How long to wait before rendering so the frame is done right before
    /// a vblank.
    fn render_delay(&mut self, now: Instant) -> Duration {
        if !self.frame_pacing || !self.redirected {
            return Duration::ZERO;
        }
        let (Some(budget), Some(frame_time), Some(last_vblank)) =
            (self.stats.render_budget(), self.stats.vblank_time(), self.last_vblank)
        else {
            return Duration::ZERO;
        };
        if budget >= frame_time {
            // The deadline can't be met anyway, so don't fall further behind.
            return Duration::ZERO;
        }
        let budget = u128::from(budget);
        let frame_time = u128::from(frame_time);

        // Smallest vblank after the last one leaving `budget` to render.
        let elapsed = now.saturating_duration_since(last_vblank).as_micros();
        let frames = ((elapsed + budget).div_ceil(frame_time)).max(1);
        let start = frames * frame_time - budget;
        let delay = start.saturating_sub(elapsed);
        Duration::from_micros(u64::try_from(delay).unwrap_or(u64::MAX))
    }

    /// The render timer expired.
    pub fn on_timer(&mut self, now: Instant) -> RenderDecision {
        if self.timer.take().is_none() || !self.render_queued {
            return RenderDecision::Idle;
        }
        if self.backend_busy {
            return self.schedule_render(now);
        }
        RenderDecision::RenderNow
    }

    /// The event loop started rendering a frame.
    pub fn render_started(&mut self, now: Instant) {
        assert!(!self.backend_busy, "a render is already in flight");
        self.render_queued = false;
        self.backend_busy = true;
        self.timer = None;
        self.render_start = Some(now);
    }

    /// A frame was rendered without reaching the backend, e.g. because
    /// nothing was damaged. The backend is free again right away.
    pub fn render_skipped(&mut self) {
        self.backend_busy = false;
        self.render_start = None;
    }

    /// A vblank happened. `last_render_time` asks the backend how long
    /// the frame in flight took, it returns `None` while the backend is
    /// still busy.
    pub fn on_vblank(
        &mut self,
        now: Instant,
        last_render_time: impl FnOnce() -> Option<Duration>,
    ) -> RenderDecision {
        if let Some(last) = self.last_vblank {
            let interval = now.saturating_duration_since(last).as_micros();
            self.stats
                .add_vblank_time_sample(u32::try_from(interval).unwrap_or(u32::MAX));
        }
        self.last_vblank = Some(now);

        if self.backend_busy {
            let Some(render_time) = last_render_time() else {
                trace!("Frame still in flight at vblank");
                return RenderDecision::Idle;
            };
            let us = u32::try_from(render_time.as_micros()).unwrap_or(u32::MAX);
            trace!("Frame finished, render time {} us", us);
            self.stats.add_render_time_sample(us);
            if let (Some(max), Some(frame_time)) =
                (self.stats.max_render_time(), self.stats.vblank_time())
            {
                if us == max && max > frame_time {
                    debug!(
                        "Render time {} us is the longest recent one and exceeds the vblank interval {} us",
                        us, frame_time
                    );
                }
            }
            self.backend_busy = false;
            self.render_start = None;
        }

        if !std::mem::take(&mut self.vblank_armed) || !self.render_queued {
            return RenderDecision::Idle;
        }
        self.schedule_render(now)
    }

    /// Forgets queued work and statistics, e.g. after the backend was
    /// recreated.
    pub fn reset(&mut self) {
        self.render_queued = false;
        self.backend_busy = false;
        self.timer = None;
        self.vblank_armed = false;
        self.last_vblank = None;
        self.render_start = None;
        self.stats.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_micros(16_000);

    /// A scheduler whose statistics are warmed up with a constant render
    /// time and vblank interval.
    fn warmed_up(render_time_us: u32, start: Instant) -> (RenderScheduler, Instant) {
        let mut scheduler = RenderScheduler::with_window(true, 4);
        for _ in 0..4 {
            scheduler.statistics_mut().add_render_time_sample(render_time_us);
        }
        let mut now = start;
        for _ in 0..30 {
            scheduler.on_vblank(now, || None);
            now += FRAME;
        }
        (scheduler, now - FRAME)
    }

    #[test]
    fn test_renders_immediately_without_statistics() {
        let mut scheduler = RenderScheduler::new(true);
        assert_eq!(scheduler.queue_redraw(Instant::now()), RenderDecision::RenderNow);
        assert!(scheduler.is_render_queued());
    }

    #[test]
    fn test_redraw_is_queued_once() {
        let mut scheduler = RenderScheduler::new(false);
        let now = Instant::now();
        assert_eq!(scheduler.queue_redraw(now), RenderDecision::RenderNow);
        assert_eq!(scheduler.queue_redraw(now), RenderDecision::Idle);
    }

    #[test]
    fn test_paced_render_is_delayed() {
        let (mut scheduler, last_vblank) = warmed_up(4_000, Instant::now());
        assert_eq!(scheduler.statistics_mut().render_budget(), Some(4_000));
        assert_eq!(scheduler.statistics().vblank_time(), Some(16_000));

        let now = last_vblank + Duration::from_micros(2_000);
        // Next vblank at 16 ms, 4 ms needed: start at 12 ms.
        assert_eq!(
            scheduler.queue_redraw(now),
            RenderDecision::RenderAfter(Duration::from_micros(10_000))
        );
        assert_eq!(
            scheduler.timer_deadline(),
            Some(last_vblank + Duration::from_micros(12_000))
        );
        assert_eq!(
            scheduler.on_timer(last_vblank + Duration::from_micros(12_000)),
            RenderDecision::RenderNow
        );
    }

    #[test]
    fn test_too_late_for_this_vblank() {
        let (mut scheduler, last_vblank) = warmed_up(4_000, Instant::now());
        let now = last_vblank + Duration::from_micros(13_000);
        // Only 3 ms left before the next vblank, aim for the one after.
        assert_eq!(
            scheduler.queue_redraw(now),
            RenderDecision::RenderAfter(Duration::from_micros(15_000))
        );
    }

    #[test]
    fn test_budget_over_frame_time_renders_now() {
        let (mut scheduler, last_vblank) = warmed_up(20_000, Instant::now());
        assert_eq!(
            scheduler.queue_redraw(last_vblank + Duration::from_micros(1_000)),
            RenderDecision::RenderNow
        );
    }

    #[test]
    fn test_pacing_disabled() {
        let (mut scheduler, last_vblank) = warmed_up(4_000, Instant::now());
        scheduler.frame_pacing = false;
        assert_eq!(scheduler.queue_redraw(last_vblank), RenderDecision::RenderNow);
    }

    #[test]
    fn test_busy_backend_waits_for_vblank() {
        let mut scheduler = RenderScheduler::new(true);
        let start = Instant::now();
        assert_eq!(scheduler.queue_redraw(start), RenderDecision::RenderNow);
        scheduler.render_started(start);
        assert_eq!(scheduler.queue_redraw(start), RenderDecision::WaitForVblank);
        assert_eq!(scheduler.queue_redraw(start), RenderDecision::Idle);

        // Still busy at the first vblank.
        let vblank = start + FRAME;
        assert_eq!(scheduler.on_vblank(vblank, || None), RenderDecision::Idle);
        assert!(scheduler.is_backend_busy());

        // Done at the second one, the queued redraw goes ahead.
        let vblank = vblank + FRAME;
        assert_eq!(
            scheduler.on_vblank(vblank, || Some(Duration::from_micros(500))),
            RenderDecision::RenderNow
        );
        assert!(!scheduler.is_backend_busy());
        assert_eq!(scheduler.statistics().max_render_time(), Some(500));
    }

    #[test]
    #[should_panic(expected = "already in flight")]
    fn test_double_render_panics() {
        let mut scheduler = RenderScheduler::new(false);
        let now = Instant::now();
        scheduler.render_started(now);
        scheduler.render_started(now);
    }

    #[test]
    fn test_unredirect_resets_statistics() {
        let (mut scheduler, last_vblank) = warmed_up(4_000, Instant::now());
        scheduler.set_redirected(false);
        assert_eq!(scheduler.statistics().vblank_time(), None);
        assert_eq!(scheduler.queue_redraw(last_vblank), RenderDecision::RenderNow);
    }
}
