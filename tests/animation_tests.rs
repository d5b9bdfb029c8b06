//! Window animation tests
//!
//! Animation scripts loaded from a configuration file and run by a
//! session as windows change.

use anyhow::Result;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;

use lucent::compositor::Session;
use lucent::config::CompositorConfig;
use lucent::transition::{Curve, Script, ScriptInstance, ScriptSource};
use lucent::window::{Geometry, WindowId, WindowOutput};

const CONFIG: &str = r#"
[general]
screen_width = 800
screen_height = 600
fading = false

[frame_pacing]
enabled = false

[shadow]
enabled = false

[[animations]]
triggers = ["geometry"]
script = { offset-x = { duration = 0.2, start = "window-x-before - window-x", end = 0 } }
"#;

fn session_from(text: &str) -> Result<Session> {
    let dir = tempdir()?;
    let path = dir.path().join("lucent.toml");
    fs::write(&path, text)?;
    Session::headless(CompositorConfig::load(&path)?)
}

/// Test that a window slides from its old position to the new one
#[test]
fn test_geometry_animation_slides_window() -> Result<()> {
    let mut session = session_from(CONFIG)?;
    let id = WindowId(1);
    session.add_window(id, Geometry::new(10, 10, 200, 100), 0x400001);
    session.map_window(id);
    assert!(!session.stack().get(id).unwrap().is_animating());

    let start = Instant::now();
    session.on_vblank(start);
    session.configure_window(id, Geometry::new(110, 10, 200, 100));
    let w = session.stack().get(id).unwrap();
    assert!(w.is_animating());
    assert_eq!(w.animatable(WindowOutput::OffsetX), -100.0);

    let mut t = start;
    let mut last = -100.0;
    for _ in 0..20 {
        t += Duration::from_millis(16);
        session.on_vblank(t);
        let offset = session.stack().get(id).unwrap().animatable(WindowOutput::OffsetX);
        assert!(offset >= last, "window moved backwards: {} -> {}", last, offset);
        last = offset;
    }

    let w = session.stack().get(id).unwrap();
    assert!(!w.is_animating());
    assert_eq!(w.animatable(WindowOutput::OffsetX), 0.0);
    Ok(())
}

/// Test that an animation script with an unknown variable is rejected
/// when the session starts
#[test]
fn test_unknown_variable_rejected() {
    let config = CONFIG.replace("window-x-before", "window-nowhere");
    assert!(session_from(&config).is_err());
}

/// Test that a cycle between variables is reported with its path
#[test]
fn test_cycle_reported() -> Result<()> {
    let source: ScriptSource = "a = \"b + 1\"\nb = \"a + 1\"\n".parse()?;
    let err = Script::compile(&source, &[]).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Cyclic references"), "{}", message);
    assert!(message.contains("a -> b -> a") || message.contains("b -> a -> b"));
    Ok(())
}

/// Test that a transition follows its curve between start and end
#[test]
fn test_transition_follows_curve() -> Result<()> {
    let source: ScriptSource =
        "x = { curve = \"cubic-bezier(0.42, 0, 0.58, 1)\", duration = 1, start = 0, end = 100 }\n"
            .parse()?;
    let mut instance = ScriptInstance::new(Arc::new(Script::compile(&source, &[])?));
    let (curve, _) = Curve::parse("cubic-bezier(0.42, 0, 0.58, 1)")?;

    for step in 0..=10 {
        let progress = f64::from(step) / 10.0;
        instance.set_elapsed(progress);
        instance.evaluate(&[])?;
        let value = instance.value("x").unwrap();
        assert!((value - 100.0 * curve.sample(progress)).abs() < 1e-9);
    }
    assert!(instance.is_finished());
    Ok(())
}
