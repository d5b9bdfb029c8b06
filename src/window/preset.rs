//! Built-in animation scripts
//!
//! A preset expands to a regular animation script, so a configured
//! `[[animations]]` entry may name a preset instead of spelling out the
//! script:
//!
//! ```toml
//! [[animations]]
//! triggers = ["open", "show"]
//! preset = { name = "appear", duration = 0.2 }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::transition::script::{ScriptError, ScriptSource};

/// Deceleration curve used by every preset.
const PRESET_CURVE: &str = "cubic-bezier(0.24, 0.64, 0.79, 0.98)";

fn default_duration() -> f64 {
    0.2
}

fn default_scale() -> f64 {
    0.5
}

/// Edge of the screen a window slides from or to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Left,
    Right,
    Up,
    #[default]
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum AnimationPreset {
    /// Fades in while growing from `scale` to full size.
    Appear {
        #[serde(default = "default_duration")]
        duration: f64,
        #[serde(default = "default_scale")]
        scale: f64,
    },
    /// Fades out while shrinking to `scale`.
    Disappear {
        #[serde(default = "default_duration")]
        duration: f64,
        #[serde(default = "default_scale")]
        scale: f64,
    },
    /// Slides in from the edge of its monitor.
    SlideIn {
        #[serde(default = "default_duration")]
        duration: f64,
        #[serde(default)]
        direction: Direction,
    },
    /// Slides out to the edge of its monitor.
    SlideOut {
        #[serde(default = "default_duration")]
        duration: f64,
        #[serde(default)]
        direction: Direction,
    },
}

impl AnimationPreset {
    pub fn name(&self) -> &'static str {
        match self {
            AnimationPreset::Appear { .. } => "appear",
            AnimationPreset::Disappear { .. } => "disappear",
            AnimationPreset::SlideIn { .. } => "slide-in",
            AnimationPreset::SlideOut { .. } => "slide-out",
        }
    }

    /// Source of the script the preset stands for.
    pub fn script(&self) -> Result<ScriptSource, ScriptError> {
        let mut text = String::new();
        match *self {
            AnimationPreset::Appear { duration, scale } => {
                scale_script(&mut text, duration, scale, 1.0);
                fade_script(&mut text, duration, "0", "window-raw-opacity");
            }
            AnimationPreset::Disappear { duration, scale } => {
                scale_script(&mut text, duration, 1.0, scale);
                fade_script(&mut text, duration, "window-raw-opacity-before", "0");
            }
            AnimationPreset::SlideIn {
                duration,
                direction,
            } => {
                slide_script(&mut text, duration, direction, true);
                fade_script(&mut text, duration, "0", "window-raw-opacity");
            }
            AnimationPreset::SlideOut {
                duration,
                direction,
            } => {
                slide_script(&mut text, duration, direction, false);
                fade_script(&mut text, duration, "window-raw-opacity-before", "0");
            }
        }
        text.parse()
    }
}

fn fade_script(text: &mut String, duration: f64, start: &str, end: &str) {
    let _ = writeln!(
        text,
        "opacity = {{ curve = \"{PRESET_CURVE}\", duration = {duration:?}, start = \"{start}\", end = \"{end}\" }}"
    );
    text.push_str("blur-opacity = \"opacity\"\nshadow-opacity = \"opacity\"\n");
}

fn scale_script(text: &mut String, duration: f64, start: f64, end: f64) {
    let _ = writeln!(
        text,
        "scale = {{ curve = \"{PRESET_CURVE}\", duration = {duration:?}, start = {start:?}, end = {end:?} }}"
    );
    // Scale around the window's center.
    text.push_str(
        "scale-x = \"scale\"\n\
         scale-y = \"scale\"\n\
         offset-x = \"(1 - scale) * window-width / 2\"\n\
         offset-y = \"(1 - scale) * window-height / 2\"\n\
         shadow-scale-x = \"scale\"\n\
         shadow-scale-y = \"scale\"\n\
         shadow-offset-x = \"offset-x\"\n\
         shadow-offset-y = \"offset-y\"\n",
    );
}

fn slide_script(text: &mut String, duration: f64, direction: Direction, entering: bool) {
    // Distance to the monitor edge, with the sign of the motion.
    let (axis, distance) = match direction {
        Direction::Left => ("x", "window-monitor-x - window-x - window-width"),
        Direction::Right => ("x", "window-monitor-x + window-monitor-width - window-x"),
        Direction::Up => ("y", "window-monitor-y - window-y - window-height"),
        Direction::Down => ("y", "window-monitor-y + window-monitor-height - window-y"),
    };
    let (start, end) = if entering {
        ("distance", "0")
    } else {
        ("0", "distance")
    };
    let _ = writeln!(text, "distance = \"{distance}\"");
    let _ = writeln!(
        text,
        "offset-{axis} = {{ curve = \"{PRESET_CURVE}\", duration = {duration:?}, start = \"{start}\", end = \"{end}\" }}"
    );
    let _ = writeln!(text, "shadow-offset-{axis} = \"offset-{axis}\"");
}
