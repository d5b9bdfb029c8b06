//! # Window animations
//!
//! Animations are scripts (see [`crate::transition::script`]) started by
//! window state changes. A script reads the window's geometry and opacity
//! through context variables and drives the window's appearance through
//! output variables: any variable named like a [`WindowOutput`] overrides
//! that property while the animation runs.
//!
//! # Triggers
//!
//! When several things change at once, state changes (`open`, `show`,
//! `close`, `hide`) win over `geometry`, which wins over the opacity
//! triggers. A new animation interrupting a running one continues from
//! the running one's current values.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::preset::AnimationPreset;
use super::{Monitors, Window, WindowState};
use crate::backend::Backend;
use crate::transition::script::{Script, ScriptError, ScriptInstance, ScriptSource};
use crate::types::{IBox, IVec2, Vec2};

/// Window events that can start an animation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnimationTrigger {
    Open,
    Show,
    Close,
    Hide,
    Geometry,
    IncreaseOpacity,
    DecreaseOpacity,
}

impl AnimationTrigger {
    pub const ALL: [AnimationTrigger; 7] = [
        AnimationTrigger::Open,
        AnimationTrigger::Show,
        AnimationTrigger::Close,
        AnimationTrigger::Hide,
        AnimationTrigger::Geometry,
        AnimationTrigger::IncreaseOpacity,
        AnimationTrigger::DecreaseOpacity,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AnimationTrigger::Open => "open",
            AnimationTrigger::Show => "show",
            AnimationTrigger::Close => "close",
            AnimationTrigger::Hide => "hide",
            AnimationTrigger::Geometry => "geometry",
            AnimationTrigger::IncreaseOpacity => "increase-opacity",
            AnimationTrigger::DecreaseOpacity => "decrease-opacity",
        }
    }

    fn bit(self) -> u32 {
        1 << self as u32
    }
}

impl fmt::Display for AnimationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AnimationTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| format!("unknown animation trigger \"{}\"", s))
    }
}

/// Window properties an animation script can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowOutput {
    OffsetX,
    OffsetY,
    ShadowOffsetX,
    ShadowOffsetY,
    Opacity,
    BlurOpacity,
    ShadowOpacity,
    ScaleX,
    ScaleY,
    ShadowScaleX,
    ShadowScaleY,
    CropX,
    CropY,
    CropWidth,
    CropHeight,
    SavedImageBlend,
}

impl WindowOutput {
    pub const COUNT: usize = 16;

    pub const ALL: [WindowOutput; Self::COUNT] = [
        WindowOutput::OffsetX,
        WindowOutput::OffsetY,
        WindowOutput::ShadowOffsetX,
        WindowOutput::ShadowOffsetY,
        WindowOutput::Opacity,
        WindowOutput::BlurOpacity,
        WindowOutput::ShadowOpacity,
        WindowOutput::ScaleX,
        WindowOutput::ScaleY,
        WindowOutput::ShadowScaleX,
        WindowOutput::ShadowScaleY,
        WindowOutput::CropX,
        WindowOutput::CropY,
        WindowOutput::CropWidth,
        WindowOutput::CropHeight,
        WindowOutput::SavedImageBlend,
    ];

    /// Variable name the output is read from.
    pub fn name(self) -> &'static str {
        match self {
            WindowOutput::OffsetX => "offset-x",
            WindowOutput::OffsetY => "offset-y",
            WindowOutput::ShadowOffsetX => "shadow-offset-x",
            WindowOutput::ShadowOffsetY => "shadow-offset-y",
            WindowOutput::Opacity => "opacity",
            WindowOutput::BlurOpacity => "blur-opacity",
            WindowOutput::ShadowOpacity => "shadow-opacity",
            WindowOutput::ScaleX => "scale-x",
            WindowOutput::ScaleY => "scale-y",
            WindowOutput::ShadowScaleX => "shadow-scale-x",
            WindowOutput::ShadowScaleY => "shadow-scale-y",
            WindowOutput::CropX => "crop-x",
            WindowOutput::CropY => "crop-y",
            WindowOutput::CropWidth => "crop-width",
            WindowOutput::CropHeight => "crop-height",
            WindowOutput::SavedImageBlend => "saved-image-blend",
        }
    }
}

/// Context variables available to animation scripts, in the order
/// [`Window::script_context`] produces their values.
pub const CONTEXT_VARIABLES: [&str; 14] = [
    "window-x",
    "window-y",
    "window-width",
    "window-height",
    "window-x-before",
    "window-y-before",
    "window-width-before",
    "window-height-before",
    "window-raw-opacity-before",
    "window-raw-opacity",
    "window-monitor-x",
    "window-monitor-y",
    "window-monitor-width",
    "window-monitor-height",
];

/// One `[[animations]]` entry of the configuration. Either `script` or
/// `preset` defines the animation; a preset wins when both are given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationConfig {
    pub triggers: Vec<AnimationTrigger>,
    /// Triggers ignored while this animation runs.
    #[serde(default)]
    pub suppressions: Vec<AnimationTrigger>,
    #[serde(default, skip_serializing_if = "ScriptSource::is_empty")]
    pub script: ScriptSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<AnimationPreset>,
}

impl AnimationConfig {
    /// The script this entry defines.
    pub fn source(&self) -> Result<ScriptSource, ScriptError> {
        match &self.preset {
            Some(preset) => {
                debug!("Using animation preset {}", preset.name());
                preset.script()
            }
            None => Ok(self.script.clone()),
        }
    }
}

/// A compiled animation, ready to be instantiated for any window.
#[derive(Debug, Clone)]
pub struct WindowAnimation {
    script: Arc<Script>,
    outputs: [Option<usize>; WindowOutput::COUNT],
    suppressions: u32,
    /// Generated from the fading settings rather than configured.
    generated: bool,
}

impl WindowAnimation {
    pub fn compile(
        source: &ScriptSource,
        suppressions: &[AnimationTrigger],
    ) -> Result<Self, ScriptError> {
        let script = Script::compile(source, &CONTEXT_VARIABLES)?;
        let outputs = WindowOutput::ALL.map(|output| script.slot(output.name()));
        Ok(Self {
            script: Arc::new(script),
            outputs,
            suppressions: suppressions.iter().fold(0, |acc, t| acc | t.bit()),
            generated: false,
        })
    }

    pub fn script(&self) -> &Arc<Script> {
        &self.script
    }

    pub fn output_slot(&self, output: WindowOutput) -> Option<usize> {
        self.outputs[output as usize]
    }

    pub fn suppresses(&self, trigger: AnimationTrigger) -> bool {
        self.suppressions & trigger.bit() != 0
    }

    pub fn is_generated(&self) -> bool {
        self.generated
    }
}

/// Animations by trigger.
#[derive(Debug, Clone, Default)]
pub struct AnimationSet {
    by_trigger: [Option<WindowAnimation>; 7],
}

impl AnimationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles configured animations. Later entries replace earlier ones
    /// for the triggers they share.
    pub fn from_config(configs: &[AnimationConfig]) -> Result<Self, ScriptError> {
        let mut set = Self::new();
        for config in configs {
            let animation = WindowAnimation::compile(&config.source()?, &config.suppressions)?;
            for &trigger in &config.triggers {
                debug!("Animation for trigger {} defined at line {}", trigger, config.script.line);
                set.set(trigger, animation.clone());
            }
        }
        let configured = set.by_trigger.iter().flatten().count();
        if configured > 0 {
            info!("🎬 {} animation triggers configured", configured);
        }
        Ok(set)
    }

    /// Fills the triggers without a configured animation with opacity
    /// fades, `fade_in` seconds long when opacity goes up and `fade_out`
    /// seconds long when it goes down.
    pub fn with_fading(mut self, fade_in: f64, fade_out: f64) -> Result<Self, ScriptError> {
        let fade_in = Self::fade(fade_in)?;
        let fade_out = Self::fade(fade_out)?;
        for trigger in AnimationTrigger::ALL {
            let fade = match trigger {
                AnimationTrigger::Open
                | AnimationTrigger::Show
                | AnimationTrigger::IncreaseOpacity => &fade_in,
                AnimationTrigger::Close
                | AnimationTrigger::Hide
                | AnimationTrigger::DecreaseOpacity => &fade_out,
                AnimationTrigger::Geometry => continue,
            };
            if self.get(trigger).is_none() {
                self.set(trigger, fade.clone());
            }
        }
        Ok(self)
    }

    fn fade(duration: f64) -> Result<WindowAnimation, ScriptError> {
        let text = format!(
            "opacity = {{ duration = {:?}, start = \"window-raw-opacity-before\", end = \"window-raw-opacity\" }}\n\
             blur-opacity = \"opacity\"\n\
             shadow-opacity = \"opacity\"\n",
            duration
        );
        let source: ScriptSource = text.parse()?;
        let mut animation = WindowAnimation::compile(&source, &[])?;
        animation.generated = true;
        Ok(animation)
    }

    pub fn get(&self, trigger: AnimationTrigger) -> Option<&WindowAnimation> {
        self.by_trigger[trigger as usize].as_ref()
    }

    pub fn set(&mut self, trigger: AnimationTrigger, animation: WindowAnimation) {
        self.by_trigger[trigger as usize] = Some(animation);
    }

    pub fn is_empty(&self) -> bool {
        self.by_trigger.iter().all(Option::is_none)
    }
}

/// An animation running on a window.
#[derive(Debug, Clone)]
pub struct RunningAnimation {
    animation: WindowAnimation,
    instance: ScriptInstance,
}

impl RunningAnimation {
    fn new(animation: &WindowAnimation) -> Self {
        Self {
            instance: ScriptInstance::new(animation.script.clone()),
            animation: animation.clone(),
        }
    }

    /// The animation's value for `output`, if it drives it.
    pub fn output(&self, output: WindowOutput) -> Option<f64> {
        self.animation
            .output_slot(output)
            .map(|slot| self.instance.get(slot))
    }

    pub fn instance(&self) -> &ScriptInstance {
        &self.instance
    }

    fn update_output(&mut self, output: WindowOutput, f: impl FnOnce(f64) -> f64) {
        if let Some(slot) = self.animation.output_slot(output) {
            let value = f(self.instance.get(slot));
            self.instance.set(slot, value);
        }
    }
}

/// Result of [`Window::process_animation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationUpdate {
    /// Nothing is animating.
    Idle,
    /// An animation is in progress, another frame is needed.
    Running,
    /// An animation ended during this update.
    Finished,
}

enum Advance {
    Running,
    Ended,
}

impl Window {
    /// Values of [`CONTEXT_VARIABLES`] for this window.
    pub fn script_context(&self, monitors: &Monitors, screen: IVec2) -> [f64; 14] {
        let monitor = monitors
            .find(self.extents())
            .and_then(|i| monitors.get(i))
            .unwrap_or(IBox::new(IVec2::ZERO, screen));
        let before = self.previous.geometry;
        [
            self.geometry.x as f64,
            self.geometry.y as f64,
            self.width_b() as f64,
            self.height_b() as f64,
            before.x as f64,
            before.y as f64,
            before.width_b() as f64,
            before.height_b() as f64,
            self.previous.opacity,
            self.opacity,
            monitor.origin.x as f64,
            monitor.origin.y as f64,
            monitor.size.x as f64,
            monitor.size.y as f64,
        ]
    }

    /// Detects state, geometry and opacity changes since the last call,
    /// starts the matching animation and advances the running one by `dt`
    /// seconds.
    pub fn process_animation(
        &mut self,
        animations: &AnimationSet,
        monitors: &Monitors,
        screen: IVec2,
        dt: f64,
        backend: &mut dyn Backend,
    ) -> AnimationUpdate {
        let will_never_render =
            (!self.ever_damaged || self.win_image.is_none()) && self.state != WindowState::Mapped;
        let ctx = self.script_context(monitors, screen);
        let previous = self.previous;
        let geometry_changed = previous.geometry != self.geometry;
        let opacity_before = previous.opacity;
        self.previous.state = self.state;
        self.previous.opacity = self.opacity;
        self.previous.geometry = self.geometry;

        if will_never_render {
            let was_running = self.animation.is_some();
            self.end_animation(backend);
            let changed = previous.state != self.state
                || opacity_before != self.opacity
                || geometry_changed;
            return if was_running || changed {
                AnimationUpdate::Finished
            } else {
                AnimationUpdate::Idle
            };
        }

        let trigger = if previous.state != self.state {
            match (previous.state, self.state) {
                (WindowState::Unmapped, WindowState::Mapped) => Some(if self.in_openclose {
                    AnimationTrigger::Open
                } else {
                    AnimationTrigger::Show
                }),
                // X unmaps windows before destroying them. Only close if
                // the hide animation is still running.
                (WindowState::Unmapped, WindowState::Destroyed) => {
                    self.animation.as_ref().map(|_| AnimationTrigger::Close)
                }
                (WindowState::Mapped, WindowState::Destroyed) => Some(AnimationTrigger::Close),
                (WindowState::Mapped, WindowState::Unmapped) => Some(AnimationTrigger::Hide),
                (from, to) => {
                    warn!("Impossible state transition of {} from {:?} to {:?}", self.id, from, to);
                    None
                }
            }
        } else if geometry_changed {
            Some(AnimationTrigger::Geometry)
        } else if opacity_before != self.opacity {
            Some(if self.opacity > opacity_before {
                AnimationTrigger::IncreaseOpacity
            } else {
                AnimationTrigger::DecreaseOpacity
            })
        } else {
            None
        };

        let Some(trigger) = trigger else {
            return self.advance_and_settle(dt, &ctx, backend);
        };

        if let Some(running) = &self.animation {
            if running.animation.suppresses(trigger) {
                debug!("Not starting animation {} for {} because it is suppressed", trigger, self.id);
                return self.advance_and_settle(dt, &ctx, backend);
            }
        }

        let animation = match animations.get(trigger) {
            Some(a) if !(a.is_generated() && !self.options.fade) => a,
            _ => {
                let was_running = self.animation.is_some();
                self.end_animation(backend);
                return if was_running {
                    AnimationUpdate::Finished
                } else {
                    AnimationUpdate::Idle
                };
            }
        };

        debug!("Starting animation {} for {} ({})", trigger, self.id, self.name);

        if self.pixmap_stale {
            // Keep the old content around, the animation may blend from it.
            if let Some(old) = self.saved_win_image.take() {
                backend.release_image(old);
            }
            self.saved_win_image = self.win_image.take();
            self.saved_image_scale = Vec2::new(
                self.width_b() as f64 / previous.geometry.width_b() as f64,
                self.height_b() as f64 / previous.geometry.height_b() as f64,
            );
        }

        let mut next = RunningAnimation::new(animation);
        if let Some(mut old) = self.animation.take() {
            // Run the old animation up to now so the new one continues from
            // its latest values.
            if !old.instance.is_finished() {
                old.instance.advance(dt);
                if let Err(e) = old.instance.evaluate(&ctx) {
                    warn!("Failed to run animation script for {}: {}", self.id, e);
                }
            }
            old.update_output(WindowOutput::SavedImageBlend, |v| 1.0 - v);
            if geometry_changed {
                // Keep the window where the old animation had put it.
                let dx = (previous.geometry.x - self.geometry.x) as f64;
                let dy = (previous.geometry.y - self.geometry.y) as f64;
                let fx = previous.geometry.width_b() as f64 / self.width_b() as f64;
                let fy = previous.geometry.height_b() as f64 / self.height_b() as f64;
                old.update_output(WindowOutput::OffsetX, |v| v + dx);
                old.update_output(WindowOutput::OffsetY, |v| v + dy);
                old.update_output(WindowOutput::ShadowOffsetX, |v| v + dx);
                old.update_output(WindowOutput::ShadowOffsetY, |v| v + dy);
                old.update_output(WindowOutput::ScaleX, |v| v * fx);
                old.update_output(WindowOutput::ScaleY, |v| v * fy);
                old.update_output(WindowOutput::ShadowScaleX, |v| v * fx);
                old.update_output(WindowOutput::ShadowScaleY, |v| v * fy);
            }
            next.instance.resume_from(&old.instance);
        }

        if let Err(e) = next.instance.evaluate(&ctx) {
            warn!("Failed to run animation script for {}: {}", self.id, e);
            self.end_animation(backend);
            return AnimationUpdate::Finished;
        }
        let finished = next.instance.is_finished();
        self.animation = Some(next);
        if finished {
            self.end_animation(backend);
            AnimationUpdate::Finished
        } else {
            AnimationUpdate::Running
        }
    }

    fn advance_and_settle(
        &mut self,
        dt: f64,
        ctx: &[f64],
        backend: &mut dyn Backend,
    ) -> AnimationUpdate {
        match self.advance_animation(dt, ctx) {
            None => AnimationUpdate::Idle,
            Some(Advance::Running) => AnimationUpdate::Running,
            Some(Advance::Ended) => {
                self.end_animation(backend);
                AnimationUpdate::Finished
            }
        }
    }

    fn advance_animation(&mut self, dt: f64, ctx: &[f64]) -> Option<Advance> {
        let running = self.animation.as_mut()?;
        if running.instance.is_finished() {
            return Some(Advance::Ended);
        }
        running.instance.advance(dt);
        if let Err(e) = running.instance.evaluate(ctx) {
            warn!("Failed to run animation script for {}: {}", self.id, e);
            return Some(Advance::Ended);
        }
        Some(Advance::Running)
    }

    /// Drops the running animation and the content it was blending from.
    pub fn end_animation(&mut self, backend: &mut dyn Backend) {
        self.animation = None;
        if let Some(saved) = self.saved_win_image.take() {
            backend.release_image(saved);
        }
        self.saved_image_scale = Vec2::IDENTITY;
    }
}
