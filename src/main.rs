//! # Lucent - X11 compositing core
//!
//! Runs a compositor session on the headless backend: a few windows are
//! mapped in a cascade and kept busy with damage, so the render pipeline,
//! frame pacing and window animations can be watched in the logs.

use anyhow::Result;
use clap::Parser;
use log::{error, info};

use lucent::compositor::Session;
use lucent::config::CompositorConfig;
use lucent::window::{Geometry, WindowId};

#[derive(Parser)]
#[command(name = "lucent")]
#[command(about = "An X11 compositing core with damage tracking and frame pacing")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/lucent/lucent.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Stop after rendering this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Number of demo windows to map
    #[arg(long, default_value_t = 3)]
    windows: u32,
}

/// Id of the first demo window.
const FIRST_WINDOW: u32 = 0x0040_0001;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    info!("🚀 Starting Lucent compositor");
    info!(
        "📄 Version: {} ({}, built {} for {})",
        lucent::VERSION,
        option_env!("GIT_COMMIT").unwrap_or("unknown commit"),
        env!("BUILD_DATE"),
        env!("TARGET_TRIPLE")
    );

    // Load configuration
    let config = match CompositorConfig::load(&cli.config) {
        Ok(config) => {
            info!("✅ Configuration loaded from: {}", cli.config);
            config
        }
        Err(e) => {
            error!("❌ Failed to load configuration: {:#}", e);
            info!("📝 Using default configuration");
            CompositorConfig::default()
        }
    };

    let mut session = Session::headless(config)?;
    session.set_max_frames(cli.frames);
    session.set_demo_damage(true);

    let screen = session.config().general.screen_size();
    for i in 0..cli.windows {
        let id = WindowId(FIRST_WINDOW + i);
        let offset = 40 * i as i32;
        let geometry = Geometry::new(
            60 + offset,
            60 + offset,
            (screen.x / 3).max(1),
            (screen.y / 3).max(1),
        );
        session.add_window(id, geometry, id.0);
        session.map_window(id);
    }
    info!("✨ Lucent is ready with {} windows", cli.windows);

    session.run().await?;

    info!("👋 Lucent shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["lucent"]).unwrap();
        assert!(!cli.debug);
        assert_eq!(cli.frames, None);
        assert_eq!(cli.windows, 3);
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "lucent",
            "--debug",
            "--frames",
            "120",
            "--windows",
            "5",
            "-c",
            "/tmp/lucent.toml",
        ])
        .unwrap();
        assert!(cli.debug);
        assert_eq!(cli.frames, Some(120));
        assert_eq!(cli.windows, 5);
        assert_eq!(cli.config, "/tmp/lucent.toml");
    }
}
