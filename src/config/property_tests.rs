//! Property-based tests for configuration module
//!
//! These tests use proptest to generate random configurations and verify
//! invariants, serialization round-trips, and edge case handling.

use super::*;
use proptest::prelude::*;

// Strategy for generating valid general configurations
prop_compose! {
    fn valid_general_config()(
        screen_width in 1i32..8000,
        screen_height in 1i32..8000,
        refresh_rate in 1u32..=1000,
        use_damage in any::<bool>(),
        dithered_present in any::<bool>(),
        force_blend in any::<bool>(),
        max_brightness in 0.0f64..=1.0,
        fading in any::<bool>(),
        fade_in_duration in 0.0f64..5.0,
        fade_out_duration in 0.0f64..5.0,
        corner_radius in 0.0f64..64.0,
    ) -> GeneralConfig {
        GeneralConfig {
            screen_width,
            screen_height,
            refresh_rate,
            use_damage,
            dithered_present,
            force_blend,
            max_brightness,
            inactive_dim_fixed: false,
            fading,
            fade_in_duration,
            fade_out_duration,
            corner_radius,
        }
    }
}

// Strategy for generating valid shadow configurations
prop_compose! {
    fn valid_shadow_config()(
        enabled in any::<bool>(),
        radius in 0.0f64..100.0,
        opacity in 0.0f64..=1.0,
        offset_x in -100i32..100,
        offset_y in -100i32..100,
        rgb in any::<[u8; 3]>(),
        full_shadow in any::<bool>(),
    ) -> ShadowConfig {
        ShadowConfig {
            enabled,
            radius,
            opacity,
            offset_x,
            offset_y,
            color: format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2]),
            full_shadow,
        }
    }
}

// Strategy for generating valid blur configurations
prop_compose! {
    fn valid_blur_config()(
        method in prop_oneof![
            Just(BlurMethod::None),
            Just(BlurMethod::Box),
            Just(BlurMethod::Gaussian),
            Just(BlurMethod::DualKawase),
        ],
        size in 1i32..64,
        deviation in 0.1f64..20.0,
        strength in 1i32..=20,
        blur_frame in any::<bool>(),
    ) -> BlurConfig {
        BlurConfig {
            method,
            size,
            deviation,
            strength,
            blur_frame,
        }
    }
}

prop_compose! {
    fn valid_config()(
        general in valid_general_config(),
        pacing in any::<bool>(),
        render_time_window in 1usize..1024,
        shadow in valid_shadow_config(),
        blur in valid_blur_config(),
        monitor_repaint in any::<bool>(),
        consistent_buffer_age in any::<bool>(),
    ) -> CompositorConfig {
        CompositorConfig {
            general,
            frame_pacing: FramePacingConfig {
                enabled: pacing,
                render_time_window,
            },
            shadow,
            blur,
            debug: DebugConfig {
                monitor_repaint,
                consistent_buffer_age,
            },
            animations: Vec::new(),
        }
    }
}

proptest! {
    #[test]
    fn test_valid_configs_validate(config in valid_config()) {
        prop_assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_toml_roundtrip(config in valid_config()) {
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed = CompositorConfig::from_toml(&text).unwrap();
        prop_assert_eq!(parsed, config);
    }

    #[test]
    fn test_shadow_color_channels(rgb in any::<[u8; 3]>()) {
        let text = format!("#{:02X}{:02X}{:02X}", rgb[0], rgb[1], rgb[2]);
        let color = parse_hex_color(&text).unwrap();
        prop_assert_eq!((color.red * 255.0).round() as u8, rgb[0]);
        prop_assert_eq!((color.green * 255.0).round() as u8, rgb[1]);
        prop_assert_eq!((color.blue * 255.0).round() as u8, rgb[2]);
        prop_assert_eq!(color.alpha, 1.0);
    }

    #[test]
    fn test_out_of_range_opacity_rejected(opacity in prop_oneof![-10.0f64..-0.001, 1.001f64..10.0]) {
        let mut config = CompositorConfig::default();
        config.shadow.opacity = opacity;
        prop_assert!(config.validate().is_err());
    }

    #[test]
    fn test_blur_params_follow_method(blur in valid_blur_config()) {
        let params = blur.params();
        prop_assert_eq!(params.is_none(), blur.method == BlurMethod::None);
        if let Some(BlurParams::Box { size }) = params {
            prop_assert_eq!(size, blur.size);
        }
    }
}
