//! # Lucent compositing core
//!
//! The render pipeline of an X11 compositing window manager: it tracks
//! top-level windows, works out what changed since the frame the back
//! buffer holds, builds a minimal list of draw commands and drives a
//! rendering backend in step with the display's vblank.
//!
//! ## Architecture
//!
//! Lucent is built on a modular architecture:
//! - `region`, `types`: pixel regions and geometry primitives
//! - `transition`: easing curves and the animation script compiler/VM
//! - `statistics`: rolling estimators behind frame pacing
//! - `window`: window model, stacking order and window animations
//! - `backend`: the rendering backend interface and a headless backend
//! - `renderer`: layouts, render commands, damage and the frame scheduler
//! - `config`: configuration parsing and management
//! - `compositor`: the session tying everything to an event loop
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lucent::{CompositorConfig, Session};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CompositorConfig::default();
//!     let session = Session::headless(config)?;
//!     session.run().await
//! }
//! ```

pub mod backend;
pub mod compositor;
pub mod config;
pub mod region;
pub mod renderer;
pub mod statistics;
pub mod transition;
pub mod types;
pub mod window;

// Re-export main types for easy access
pub use compositor::Session;
pub use config::CompositorConfig;
pub use region::Region;
pub use renderer::{RenderError, Renderer};
pub use window::{Window, WindowId, WindowStack};

// Re-export common error types
pub use anyhow::{Context, Error, Result};

/// Version information for Lucent
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
