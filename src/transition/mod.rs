//! # Transitions
//!
//! Easing curves and the animation script engine that drives window
//! animations.

pub mod curve;
pub mod script;

pub use curve::{Curve, CurveError};
pub use script::{EvalError, Script, ScriptError, ScriptInstance, ScriptSource};
