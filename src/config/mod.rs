//! Configuration management for Lucent
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files. It combines settings for rendering, frame pacing,
//! shadows, blur, diagnostics and window animations.
//!
//! # Usage
//!
//! ```toml
//! [general]
//! refresh_rate = 60
//!
//! [shadow]
//! enabled = true
//! radius = 12
//!
//! [[animations]]
//! triggers = ["open", "show"]
//! preset = { name = "appear", duration = 0.2 }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::backend::{BlurMethod, BlurParams};
use crate::types::{Color, IVec2};
use crate::window::AnimationConfig;

/// Main configuration struct containing all Lucent settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CompositorConfig {
    /// General compositor settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Render scheduling
    #[serde(default)]
    pub frame_pacing: FramePacingConfig,

    /// Drop shadow settings
    #[serde(default)]
    pub shadow: ShadowConfig,

    /// Background blur settings
    #[serde(default)]
    pub blur: BlurConfig,

    /// Diagnostic options
    #[serde(default)]
    pub debug: DebugConfig,

    /// Window animations, by trigger
    #[serde(default)]
    pub animations: Vec<AnimationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Screen size used by the headless backend (pixels)
    pub screen_width: i32,
    pub screen_height: i32,

    /// Refresh rate the headless vblank ticker runs at (Hz)
    pub refresh_rate: u32,

    /// Only repaint damaged areas
    pub use_damage: bool,

    /// Render at high precision and dither on present
    pub dithered_present: bool,

    /// Blend every window, even opaque ones
    pub force_blend: bool,

    /// Upper bound on the brightness of windows (0.0-1.0)
    pub max_brightness: f64,

    /// Dim inactive windows by a fixed amount instead of relative to
    /// their brightness
    pub inactive_dim_fixed: bool,

    /// Fade windows in and out when they have no configured animation
    pub fading: bool,

    /// Fade-in duration (seconds)
    pub fade_in_duration: f64,

    /// Fade-out duration (seconds)
    pub fade_out_duration: f64,

    /// Default corner radius of windows (pixels)
    pub corner_radius: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FramePacingConfig {
    /// Delay renders so they finish right before vblank
    pub enabled: bool,

    /// Number of render times the render budget is estimated from
    pub render_time_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShadowConfig {
    /// Enable drop shadows
    pub enabled: bool,

    /// Shadow blur radius (pixels)
    pub radius: f64,

    /// Shadow opacity (0.0-1.0)
    pub opacity: f64,

    /// Shadow offset relative to the window (pixels)
    pub offset_x: i32,
    pub offset_y: i32,

    /// Shadow color (hex: #RRGGBB)
    pub color: String,

    /// Draw the shadow under the window body too
    pub full_shadow: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BlurConfig {
    /// Blur algorithm, `none` disables background blur
    pub method: BlurMethod,

    /// Kernel size for `box` and `gaussian` (pixels)
    pub size: i32,

    /// Standard deviation for `gaussian`
    pub deviation: f64,

    /// Iterations for `dual_kawase` (1-20)
    pub strength: i32,

    /// Also blur behind window frames
    pub blur_frame: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DebugConfig {
    /// Tint repainted areas
    pub monitor_repaint: bool,

    /// Keep copies of recent frames so reused back buffers always have
    /// the content their age claims
    pub consistent_buffer_age: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            screen_width: 1920,
            screen_height: 1080,
            refresh_rate: 60,
            use_damage: true,
            dithered_present: false,
            force_blend: false,
            max_brightness: 1.0,
            inactive_dim_fixed: false,
            fading: true,
            fade_in_duration: 0.15,
            fade_out_duration: 0.15,
            corner_radius: 0.0,
        }
    }
}

impl Default for FramePacingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            render_time_window: 128,
        }
    }
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            radius: 12.0,
            opacity: 0.75,
            offset_x: -15,
            offset_y: -15,
            color: "#000000".to_string(),
            full_shadow: false,
        }
    }
}

impl Default for BlurConfig {
    fn default() -> Self {
        Self {
            method: BlurMethod::None,
            size: 3,
            deviation: 0.84089642,
            strength: 5,
            blur_frame: false,
        }
    }
}

impl ShadowConfig {
    /// The shadow color as RGBA, opaque.
    pub fn rgba(&self) -> Result<Color> {
        parse_hex_color(&self.color)
    }
}

impl BlurConfig {
    /// Blur context parameters, `None` when blur is disabled.
    pub fn params(&self) -> Option<BlurParams> {
        match self.method {
            BlurMethod::None => None,
            BlurMethod::Box => Some(BlurParams::Box { size: self.size }),
            BlurMethod::Gaussian => Some(BlurParams::Gaussian {
                size: self.size,
                deviation: self.deviation,
            }),
            BlurMethod::DualKawase => Some(BlurParams::DualKawase {
                strength: self.strength,
            }),
        }
    }
}

impl GeneralConfig {
    pub fn screen_size(&self) -> IVec2 {
        IVec2::new(self.screen_width, self.screen_height)
    }
}

/// Parses `#RRGGBB` into an opaque color.
pub fn parse_hex_color(text: &str) -> Result<Color> {
    let hex = text
        .strip_prefix('#')
        .with_context(|| format!("Color {:?} does not start with '#'", text))?;
    if hex.len() != 6 || !hex.is_ascii() {
        anyhow::bail!("Invalid color {:?}: expected #RRGGBB", text);
    }
    let channel = |i: usize| -> Result<f64> {
        let value = u8::from_str_radix(&hex[i..i + 2], 16)
            .with_context(|| format!("Invalid color {:?}", text))?;
        Ok(f64::from(value) / 255.0)
    };
    Ok(Color::new(channel(0)?, channel(2)?, channel(4)?, 1.0))
}

impl CompositorConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Expand ~ to home directory
        let expanded_path = if path.to_string_lossy().starts_with('~') {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            Path::new(&home).join(path.strip_prefix("~").unwrap_or(path))
        } else {
            path.to_path_buf()
        };

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        Ok(config)
    }

    /// Parses and validates a configuration document.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut config: CompositorConfig = toml::from_str(contents)?;
        for animation in &mut config.animations {
            animation.script.locate(contents);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let general = &self.general;
        if general.screen_width <= 0 || general.screen_height <= 0 {
            anyhow::bail!(
                "Invalid screen size {}x{}",
                general.screen_width,
                general.screen_height
            );
        }
        if general.refresh_rate == 0 || general.refresh_rate > 1000 {
            anyhow::bail!("Invalid refresh_rate: must be between 1 and 1000");
        }
        if !(0.0..=1.0).contains(&general.max_brightness) {
            anyhow::bail!("Invalid max_brightness: must be between 0.0 and 1.0");
        }
        if general.fade_in_duration < 0.0 || general.fade_out_duration < 0.0 {
            anyhow::bail!("Invalid fade duration: must not be negative");
        }
        if general.corner_radius < 0.0 {
            anyhow::bail!("Invalid corner_radius: must not be negative");
        }

        if self.frame_pacing.render_time_window == 0 {
            anyhow::bail!("Invalid render_time_window: must be at least 1");
        }

        if !(0.0..=1.0).contains(&self.shadow.opacity) {
            anyhow::bail!("Invalid shadow opacity: must be between 0.0 and 1.0");
        }
        if self.shadow.radius < 0.0 {
            anyhow::bail!("Invalid shadow radius: must not be negative");
        }
        self.shadow.rgba()?;

        match self.blur.method {
            BlurMethod::Box | BlurMethod::Gaussian if self.blur.size <= 0 => {
                anyhow::bail!("Invalid blur size: must be positive");
            }
            BlurMethod::Gaussian if self.blur.deviation <= 0.0 => {
                anyhow::bail!("Invalid blur deviation: must be positive");
            }
            BlurMethod::DualKawase if !(1..=20).contains(&self.blur.strength) => {
                anyhow::bail!("Invalid blur strength: must be between 1 and 20");
            }
            _ => {}
        }

        for (i, animation) in self.animations.iter().enumerate() {
            if animation.triggers.is_empty() {
                anyhow::bail!("Animation #{} has no triggers", i + 1);
            }
            if animation.preset.is_none() && animation.script.is_empty() {
                anyhow::bail!("Animation #{} has neither a script nor a preset", i + 1);
            }
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }
}


#[cfg(test)]
mod property_tests;
