//! Compositor session
//!
//! This module contains the [`Session`] struct and its event loop. It
//! ties the window stack, window animations, the render scheduler and the
//! renderer together:
//!
//! - window changes queue a redraw with the [`RenderScheduler`]
//! - the scheduler answers with a [`RenderDecision`], which the event loop
//!   carries out with a timer or by waiting for the next vblank
//! - rendering a frame advances animations, appends a layout and draws it
//!
//! Without an X server the session drives the headless
//! [`DummyBackend`], and vblanks are simulated at the configured refresh
//! rate.

use anyhow::{Context, Result};
use log::{debug, error, info, trace, warn};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::signal;

use crate::backend::{
    Backend, BlurContextHandle, DummyBackend, ImageFormat, ImageHandle, ShaderHandle,
};
use crate::config::CompositorConfig;
use crate::region::Region;
use crate::renderer::{
    BuildOptions, FrameOptions, LayoutManager, RenderDecision, RenderError, RenderScheduler,
    Renderer,
};
use crate::types::{IBox, IVec2};
use crate::window::{
    AnimationSet, AnimationUpdate, Geometry, Monitors, Window, WindowId, WindowStack,
    WindowState,
};

/// A running compositor: windows, animations and the render loop.
pub struct Session {
    config: CompositorConfig,
    backend: Box<dyn Backend>,
    renderer: Option<Renderer>,
    scheduler: RenderScheduler,
    layouts: LayoutManager,
    stack: WindowStack,
    animations: AnimationSet,
    monitors: Monitors,
    shaders: HashMap<String, ShaderHandle>,
    blur_context: Option<BlurContextHandle>,
    root_image: Option<ImageHandle>,
    /// Bumped whenever the root background changes
    root_generation: u64,
    /// When animations were last advanced
    last_animation_tick: Option<Instant>,
    frames_rendered: u64,
    /// Stop after this many frames
    max_frames: Option<u64>,
    /// Damage a window every vblank, standing in for busy clients
    demo_damage: bool,
    demo_cursor: usize,
    running: bool,
}

impl Session {
    /// Creates a session drawing with `backend`.
    pub fn new(config: CompositorConfig, mut backend: Box<dyn Backend>) -> Result<Self> {
        info!("🏗️ Initializing Lucent session on {} backend", backend.name());
        config.validate()?;

        let shadow_radius = if config.shadow.enabled {
            config.shadow.radius
        } else {
            0.0
        };
        let renderer = Renderer::new(
            backend.as_mut(),
            shadow_radius,
            config.shadow.rgba()?,
            config.general.dithered_present,
        )
        .context("Failed to initialize the renderer")?;

        let blur_context = match config.blur.params() {
            Some(params) => {
                debug!("🌫️ Creating {:?} blur context", config.blur.method);
                Some(
                    backend
                        .create_blur_context(config.blur.method, ImageFormat::Pixmap, &params)
                        .context("Failed to create the blur context")?,
                )
            }
            None => None,
        };

        let mut animations =
            AnimationSet::from_config(&config.animations).context("Invalid animation script")?;
        if config.general.fading {
            animations = animations
                .with_fading(config.general.fade_in_duration, config.general.fade_out_duration)
                .context("Failed to build fade animations")?;
        }

        let mut scheduler =
            RenderScheduler::with_window(config.frame_pacing.enabled, config.frame_pacing.render_time_window);
        scheduler.set_redirected(true);

        let screen = config.general.screen_size();
        let layouts = LayoutManager::new(backend.max_buffer_age());
        info!("✅ Session initialized ({}x{})", screen.x, screen.y);

        Ok(Self {
            monitors: Monitors::new(vec![IBox::new(IVec2::ZERO, screen)]),
            config,
            backend,
            renderer: Some(renderer),
            scheduler,
            layouts,
            stack: WindowStack::new(),
            animations,
            shaders: HashMap::new(),
            blur_context,
            root_image: None,
            root_generation: 0,
            last_animation_tick: None,
            frames_rendered: 0,
            max_frames: None,
            demo_damage: false,
            demo_cursor: 0,
            running: false,
        })
    }

    /// Creates a session with a headless backend of the configured screen
    /// size.
    pub fn headless(config: CompositorConfig) -> Result<Self> {
        let backend = DummyBackend::new(config.general.screen_size());
        Self::new(config, Box::new(backend))
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    pub fn stack(&self) -> &WindowStack {
        &self.stack
    }

    pub fn scheduler(&self) -> &RenderScheduler {
        &self.scheduler
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn set_max_frames(&mut self, frames: Option<u64>) {
        self.max_frames = frames;
    }

    pub fn set_demo_damage(&mut self, enabled: bool) {
        self.demo_damage = enabled;
    }

    /// Sets the root background image. The session takes ownership of it.
    pub fn set_root_image(&mut self, image: Option<ImageHandle>) {
        if let Some(old) = std::mem::replace(&mut self.root_image, image) {
            self.backend.release_image(old);
        }
        self.root_generation += 1;
        self.queue_redraw(Instant::now());
    }

    /// Registers a custom shader windows can refer to by name.
    pub fn add_shader(&mut self, name: impl Into<String>, shader: ShaderHandle) {
        self.shaders.insert(name.into(), shader);
    }

    /// Starts tracking a window, with options taken from the configuration.
    /// Returns `false` when a window with the same id is already tracked.
    pub fn add_window(&mut self, id: WindowId, geometry: Geometry, pixmap: u32) -> bool {
        let mut w = Window::new(id, geometry);
        let shadow = &self.config.shadow;
        w.options.shadow = shadow.enabled;
        w.options.full_shadow = shadow.full_shadow;
        w.options.corner_radius = self.config.general.corner_radius;
        w.options.fade = self.config.general.fading;
        w.options.blur_background = self.blur_context.is_some();
        w.shadow_radius = shadow.radius as i32;
        w.shadow_opacity = shadow.opacity;
        w.shadow_offset = IVec2::new(shadow.offset_x, shadow.offset_y);
        w.pixmap = Some(pixmap);
        debug!("🪟 Tracking window {} at {:?}", id, geometry);
        self.stack.push(w)
    }

    fn with_window(&mut self, id: WindowId, f: impl FnOnce(&mut Window, &mut dyn Backend)) -> bool {
        let Some(w) = self.stack.get_mut(id) else {
            warn!("Unknown window {}", id);
            return false;
        };
        f(w, self.backend.as_mut());
        self.queue_redraw(Instant::now());
        true
    }

    /// Maps a window and damages all of it, as if its client drew it.
    pub fn map_window(&mut self, id: WindowId) -> bool {
        self.with_window(id, |w, _| {
            w.map();
            w.damage_all();
        })
    }

    pub fn unmap_window(&mut self, id: WindowId) -> bool {
        self.with_window(id, |w, _| w.unmap())
    }

    /// Marks a window destroyed. It is dropped once its close animation,
    /// if any, is done.
    pub fn destroy_window(&mut self, id: WindowId) -> bool {
        self.with_window(id, |w, _| w.destroy())
    }

    pub fn configure_window(&mut self, id: WindowId, geometry: Geometry) -> bool {
        self.with_window(id, |w, backend| {
            for image in w.configure(geometry) {
                backend.release_image(image);
            }
        })
    }

    pub fn set_window_opacity(&mut self, id: WindowId, opacity: f64) -> bool {
        self.with_window(id, |w, _| w.set_opacity(opacity))
    }

    /// Records content damage of a window, window local.
    pub fn damage_window(&mut self, id: WindowId, damage: &Region) -> bool {
        self.with_window(id, |w, _| w.add_damage(damage))
    }

    pub fn raise_window(&mut self, id: WindowId) -> bool {
        if !self.stack.raise_to_top(id) {
            return false;
        }
        self.queue_redraw(Instant::now());
        true
    }

    /// Asks for a new frame. Renders right away when the scheduler says so.
    pub fn queue_redraw(&mut self, now: Instant) {
        let decision = self.scheduler.queue_redraw(now);
        self.act_on(decision, now);
    }

    fn act_on(&mut self, decision: RenderDecision, now: Instant) {
        match decision {
            RenderDecision::RenderNow => {
                if let Err(e) = self.render_frame(now) {
                    error!("❌ Rendering failed: {:#}", e);
                    self.running = false;
                }
            }
            RenderDecision::RenderAfter(delay) => trace!("Render in {:?}", delay),
            RenderDecision::WaitForVblank => trace!("Render after the next vblank"),
            RenderDecision::Idle => {}
        }
    }

    /// A vblank happened.
    pub fn on_vblank(&mut self, now: Instant) {
        if self.demo_damage {
            self.damage_next_window();
        }
        let backend = &mut self.backend;
        let decision = self.scheduler.on_vblank(now, || backend.last_render_time());
        self.act_on(decision, now);
    }

    /// The render timer expired.
    pub fn on_timer(&mut self, now: Instant) {
        let decision = self.scheduler.on_timer(now);
        self.act_on(decision, now);
    }

    fn damage_next_window(&mut self) {
        let mapped: Vec<WindowId> = self
            .stack
            .iter()
            .filter(|w| w.is_mapped())
            .map(|w| w.id)
            .collect();
        if mapped.is_empty() {
            return;
        }
        self.demo_cursor = (self.demo_cursor + 1) % mapped.len();
        let id = mapped[self.demo_cursor];
        self.damage_window(id, &Region::from_xywh(0, 0, 50, 50));
    }

    /// Advances animations, then draws and presents one frame. A failure
    /// to allocate the back buffer is fatal, other render failures only
    /// drop the frame.
    pub fn render_frame(&mut self, now: Instant) -> Result<()> {
        let dt = self
            .last_animation_tick
            .map_or(0.0, |last| now.saturating_duration_since(last).as_secs_f64());
        self.last_animation_tick = Some(now);
        let animating = self.process_animations(dt);

        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };
        self.scheduler.render_started(now);
        renderer.bind_window_images(self.backend.as_mut(), &mut self.stack);
        let screen = self.config.general.screen_size();
        self.layouts
            .append_layout(&mut self.stack, self.root_generation, screen);

        let frame = FrameOptions {
            root_image: self.root_image,
            blur_context: self.blur_context,
            use_damage: self.config.general.use_damage,
            monitor_repaint: self.config.debug.monitor_repaint,
            consistent_buffer_age: self.config.debug.consistent_buffer_age,
            build: BuildOptions {
                force_blend: self.config.general.force_blend,
                blur_frame: self.config.blur.blur_frame,
                inactive_dim_fixed: self.config.general.inactive_dim_fixed,
                max_brightness: self.config.general.max_brightness,
            },
            monitors: &self.monitors,
            shaders: &self.shaders,
        };
        match renderer.render(self.backend.as_mut(), &mut self.layouts, &mut self.stack, &frame) {
            Ok(damage) => {
                self.frames_rendered += 1;
                trace!(
                    "Frame {} repainted {:?}",
                    self.frames_rendered,
                    damage.extents()
                );
            }
            Err(e @ RenderError::BackBuffer(_)) => {
                self.scheduler.render_skipped();
                return Err(e).context("Cannot render without a back buffer");
            }
            Err(e) => {
                // Retried on the next damage rather than right away.
                warn!("⚠️ Dropped a frame: {}", e);
                self.scheduler.render_skipped();
                return Ok(());
            }
        }

        if let Some(max) = self.max_frames {
            if self.frames_rendered >= max {
                info!("🏁 Rendered {} frames, stopping", self.frames_rendered);
                self.running = false;
            }
        }
        if animating {
            self.queue_redraw(now);
        }
        Ok(())
    }

    /// Advances every window's animation by `dt` seconds and drops
    /// destroyed windows with nothing left to show. Returns whether any
    /// animation still runs.
    fn process_animations(&mut self, dt: f64) -> bool {
        let screen = self.config.general.screen_size();
        let mut animating = false;
        for w in self.stack.iter_mut() {
            let update =
                w.process_animation(&self.animations, &self.monitors, screen, dt, self.backend.as_mut());
            animating |= update == AnimationUpdate::Running;
        }

        let finished: Vec<WindowId> = self
            .stack
            .iter()
            .filter(|w| w.state == WindowState::Destroyed && !w.is_animating())
            .map(|w| w.id)
            .collect();
        for id in finished {
            if let Some(mut w) = self.stack.remove(id) {
                debug!("🗑️ Dropping destroyed window {}", id);
                for image in w.take_images() {
                    self.backend.release_image(image);
                }
            }
        }
        animating
    }

    /// Runs the event loop until a signal arrives, the frame limit is
    /// reached, or rendering fails.
    pub async fn run(mut self) -> Result<()> {
        info!("🎬 Starting Lucent event loop");
        self.running = true;

        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

        let refresh = Duration::from_secs_f64(1.0 / f64::from(self.config.general.refresh_rate));
        let mut vblank = tokio::time::interval(refresh);
        vblank.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        self.queue_redraw(Instant::now());
        while self.running {
            let deadline = self.scheduler.timer_deadline();
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("📨 Received SIGTERM, shutting down gracefully");
                    self.running = false;
                }
                _ = sigint.recv() => {
                    info!("📨 Received SIGINT (Ctrl+C), shutting down gracefully");
                    self.running = false;
                }
                _ = vblank.tick() => self.on_vblank(Instant::now()),
                _ = sleep_until(deadline) => self.on_timer(Instant::now()),
            }
        }

        info!("🛑 Lucent event loop finished after {} frames", self.frames_rendered);
        if let Some(max) = self.scheduler.statistics().max_render_time() {
            info!("📊 Longest recent render time: {} us", max);
        }
        self.shutdown();
        Ok(())
    }

    /// Releases every backend resource.
    pub fn shutdown(&mut self) {
        info!("🔽 Shutting down Lucent session...");
        self.running = false;
        self.scheduler.reset();
        for mut w in self.stack.drain() {
            for image in w.take_images() {
                self.backend.release_image(image);
            }
        }
        if let Some(image) = self.root_image.take() {
            self.backend.release_image(image);
        }
        if let Some(context) = self.blur_context.take() {
            self.backend.destroy_blur_context(context);
        }
        if let Some(renderer) = self.renderer.take() {
            renderer.destroy(self.backend.as_mut());
        }
        info!("✅ Lucent session shutdown complete");
    }
}

/// Waits for the render timer, forever when it's not armed.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
