//! Integration tests for Lucent
//!
//! These tests verify end-to-end functionality: the render pipeline from
//! window stack to presented frame, damage between frames, window
//! animations driven by configured scripts, and the session lifecycle.

use anyhow::Result;
use proptest::prelude::*;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use lucent::backend::dummy::BackendOp;
use lucent::backend::{Backend, DummyBackend};
use lucent::compositor::Session;
use lucent::config::CompositorConfig;
use lucent::region::Region;
use lucent::renderer::{damage, BuildOptions, CommandBuilder, FrameOptions, LayoutManager};
use lucent::types::{Color, IVec2};
use lucent::Renderer;
use lucent::window::{Geometry, Monitors, Window, WindowId, WindowStack};

const SCREEN: IVec2 = IVec2::new(400, 400);

/// Window stack and layout history without a renderer.
struct Pipeline {
    backend: DummyBackend,
    stack: WindowStack,
    layouts: LayoutManager,
    builder: CommandBuilder,
}

impl Pipeline {
    fn new() -> Self {
        Self {
            backend: DummyBackend::new(SCREEN),
            stack: WindowStack::new(),
            layouts: LayoutManager::new(3),
            builder: CommandBuilder::new(),
        }
    }

    /// Adds an opaque, shadowless window.
    fn add(&mut self, id: u32, x: i32, y: i32, size: i32) {
        let mut w = Window::new(WindowId(id), Geometry::new(x, y, size, size));
        w.win_image = Some(self.backend.bind_pixmap(id, IVec2::new(size, size)).unwrap());
        w.map();
        w.damage_all();
        self.stack.push(w);
    }

    fn frame(&mut self) {
        self.layouts.append_layout(&mut self.stack, 0, SCREEN);
        self.builder.build(
            self.layouts.current_mut(),
            &BuildOptions::default(),
            &Monitors::default(),
            &HashMap::new(),
        );
    }

    fn move_window(&mut self, id: u32, x: i32, y: i32) {
        let w = self.stack.get_mut(WindowId(id)).unwrap();
        let geometry = Geometry::new(x, y, w.geometry.width, w.geometry.height);
        assert!(w.configure(geometry).is_empty());
    }
}

/// Test that moving an opaque window damages exactly where it was and
/// where it is now
#[test]
fn test_moved_window_damages_both_boxes() {
    let mut pipeline = Pipeline::new();
    pipeline.add(1, 0, 0, 50);
    pipeline.frame();
    pipeline.move_window(1, 10, 10);
    pipeline.frame();

    let damage = damage::damage(&pipeline.layouts, 1, IVec2::ZERO);
    let expected = Region::from_xywh(0, 0, 50, 50).union(&Region::from_xywh(10, 10, 50, 50));
    assert_eq!(damage, expected);
}

/// Test that damage accumulates over several frames of buffer age
#[test]
fn test_older_buffer_accumulates_damage() {
    let mut pipeline = Pipeline::new();
    pipeline.add(1, 0, 0, 50);
    pipeline.add(2, 200, 200, 50);
    pipeline.frame();
    pipeline.move_window(1, 100, 0);
    pipeline.frame();
    pipeline.move_window(2, 300, 300);
    pipeline.frame();

    let latest = damage::damage(&pipeline.layouts, 1, IVec2::ZERO);
    assert!(latest.intersect(&Region::from_xywh(0, 0, 150, 50)).is_empty());

    let older = damage::damage(&pipeline.layouts, 2, IVec2::ZERO);
    for b in [(0, 0), (100, 0), (200, 200), (300, 300)] {
        let window = Region::from_xywh(b.0, b.1, 50, 50);
        assert_eq!(older.intersect(&window), window);
    }

    // Nothing that old is kept.
    let unknown = damage::damage(&pipeline.layouts, 4, IVec2::ZERO);
    assert_eq!(unknown, Region::from_xywh(0, 0, 400, 400));
}

/// Test that culling against the damage and unculling restores masks
#[test]
fn test_cull_then_uncull_restores_masks() {
    let mut pipeline = Pipeline::new();
    pipeline.add(1, 0, 0, 100);
    pipeline.add(2, 50, 50, 100);
    pipeline.frame();

    let commands = &mut pipeline.layouts.current_mut().commands;
    let original: Vec<Region> = commands.iter().map(|c| c.target_mask.clone()).collect();
    damage::cull(commands, &Region::from_xywh(0, 0, 10, 10), IVec2::ZERO);
    assert!(commands.iter().all(|c| c.mask().extents().width() <= 10));

    damage::uncull(commands);
    let restored: Vec<Region> = commands.iter().map(|c| c.mask().clone()).collect();
    assert_eq!(restored, original);
}

proptest! {
    /// Moving one window damages at least its old and new boxes.
    #[test]
    fn prop_move_damages_old_and_new(
        from in (0i32..350, 0i32..350),
        to in (0i32..350, 0i32..350),
        other in (0i32..350, 0i32..350),
    ) {
        let mut pipeline = Pipeline::new();
        pipeline.add(1, other.0, other.1, 50);
        pipeline.add(2, from.0, from.1, 50);
        pipeline.frame();
        pipeline.move_window(2, to.0, to.1);
        pipeline.frame();

        let damage = damage::damage(&pipeline.layouts, 1, IVec2::ZERO);
        let old = Region::from_xywh(from.0, from.1, 50, 50);
        let new = Region::from_xywh(to.0, to.1, 50, 50);
        prop_assert_eq!(damage.intersect(&old), old);
        prop_assert_eq!(damage.intersect(&new), new);
    }
}

fn quiet_config() -> CompositorConfig {
    let mut config = CompositorConfig::default();
    config.general.screen_width = 400;
    config.general.screen_height = 400;
    config.general.fading = false;
    config.frame_pacing.enabled = false;
    config
}

/// Test a session from first map to shutdown
#[test]
fn test_session_lifecycle() -> Result<()> {
    let mut session = Session::headless(quiet_config())?;
    assert!(session.add_window(WindowId(1), Geometry::new(10, 10, 100, 100), 0x400001));
    assert!(!session.add_window(WindowId(1), Geometry::new(0, 0, 1, 1), 0x400001));
    session.map_window(WindowId(1));
    assert_eq!(session.frames_rendered(), 1);

    let start = Instant::now();
    session.on_vblank(start);
    session.configure_window(WindowId(1), Geometry::new(30, 30, 150, 100));
    assert_eq!(session.frames_rendered(), 2);
    let w = session.stack().get(WindowId(1)).unwrap();
    assert_eq!(w.geometry.width, 150);
    assert!(w.win_image.is_some());
    assert!(!w.pixmap_stale);

    session.on_vblank(start + Duration::from_millis(16));
    session.destroy_window(WindowId(1));
    assert!(session.stack().is_empty());

    session.shutdown();
    Ok(())
}

/// Test that a configured close animation keeps the window on screen
/// until it finishes
#[test]
fn test_close_animation_from_config() -> Result<()> {
    let mut config = CompositorConfig::from_toml(
        r#"
[general]
screen_width = 400
screen_height = 400
fading = false

[frame_pacing]
enabled = false

[[animations]]
triggers = ["close"]
preset = { name = "disappear", duration = 0.1 }
"#,
    )?;
    config.shadow.enabled = false;
    let mut session = Session::headless(config)?;
    session.add_window(WindowId(1), Geometry::new(10, 10, 100, 100), 0x400001);
    session.map_window(WindowId(1));

    let start = Instant::now();
    session.on_vblank(start);
    session.destroy_window(WindowId(1));
    assert!(session.stack().get(WindowId(1)).unwrap().is_animating());

    let mut t = start;
    for _ in 0..20 {
        t += Duration::from_millis(16);
        session.on_vblank(t);
    }
    assert!(session.stack().is_empty());
    Ok(())
}

/// Test that the renderer repaints only what moved once the back buffer
/// holds the previous frame
#[test]
fn test_renderer_repaints_moved_window() -> Result<()> {
    let mut pipeline = Pipeline::new();
    pipeline.add(1, 0, 0, 50);
    let mut renderer = Renderer::new(&mut pipeline.backend, 0.0, Color::BLACK, false)?;
    let mut layouts = LayoutManager::new(pipeline.backend.max_buffer_age());
    let monitors = Monitors::default();
    let shaders = HashMap::new();
    let frame = FrameOptions {
        root_image: None,
        blur_context: None,
        use_damage: true,
        monitor_repaint: false,
        consistent_buffer_age: false,
        build: BuildOptions::default(),
        monitors: &monitors,
        shaders: &shaders,
    };

    layouts.append_layout(&mut pipeline.stack, 0, SCREEN);
    let first = renderer.render(&mut pipeline.backend, &mut layouts, &mut pipeline.stack, &frame)?;
    assert_eq!(first, Region::from_xywh(0, 0, 400, 400));

    pipeline.move_window(1, 10, 10);
    layouts.append_layout(&mut pipeline.stack, 0, SCREEN);
    let second = renderer.render(&mut pipeline.backend, &mut layouts, &mut pipeline.stack, &frame)?;
    let expected = Region::from_xywh(0, 0, 50, 50).union(&Region::from_xywh(10, 10, 50, 50));
    assert_eq!(second, expected);
    assert_eq!(pipeline.backend.last_frame().last(), Some(&BackendOp::Present));
    assert_eq!(pipeline.backend.frames_presented(), 2);

    for mut w in pipeline.stack.drain() {
        for image in w.take_images() {
            pipeline.backend.release_image(image);
        }
    }
    renderer.destroy(&mut pipeline.backend);
    assert_eq!(pipeline.backend.live_images(), 0);
    Ok(())
}

/// Test that the event loop stops on its own with a frame limit
#[tokio::test]
async fn test_run_with_frame_limit() -> Result<()> {
    let mut config = quiet_config();
    config.general.refresh_rate = 500;
    config.frame_pacing.enabled = true;
    let mut session = Session::headless(config)?;
    for i in 0..3 {
        let id = WindowId(0x400001 + i);
        session.add_window(id, Geometry::new(20 * i as i32, 20, 100, 100), id.0);
        session.map_window(id);
    }
    session.set_demo_damage(true);
    session.set_max_frames(Some(10));

    timeout(Duration::from_secs(10), session.run()).await??;
    Ok(())
}
