//! Performance benchmarks for Lucent
//!
//! These benchmarks cover the per-frame hot paths: region arithmetic,
//! layout and command building, damage calculation and animation script
//! evaluation.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::collections::HashMap;
use std::sync::Arc;

use lucent::backend::{Backend, DummyBackend};
use lucent::config::CompositorConfig;
use lucent::region::Region;
use lucent::renderer::{damage, BuildOptions, CommandBuilder, LayoutManager};
use lucent::transition::{Script, ScriptInstance, ScriptSource};
use lucent::types::IVec2;
use lucent::window::{Geometry, Monitors, Window, WindowId, WindowStack, CONTEXT_VARIABLES};

const SCREEN: IVec2 = IVec2::new(1920, 1080);

/// A cascade of `count` mapped windows with bound images.
fn window_stack(backend: &mut DummyBackend, count: u32) -> WindowStack {
    let mut stack = WindowStack::with_capacity(count as usize);
    for i in 0..count {
        let offset = (i * 13 % 1200) as i32;
        let mut w = Window::new(WindowId(i + 1), Geometry::new(offset, offset / 2, 640, 480));
        w.has_alpha = i % 3 == 0;
        w.options.shadow = i % 2 == 0;
        w.win_image = backend.bind_pixmap(i + 1, IVec2::new(640, 480)).ok();
        w.map();
        w.damage_all();
        stack.push(w);
    }
    stack
}

/// Benchmark region arithmetic
fn bench_region_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("region");

    let stripes = Region::from_rects((0..64).map(|i| {
        lucent::region::Rect::new(i * 30, 0, i * 30 + 20, 1080)
    }));
    let bands = Region::from_rects((0..64).map(|i| {
        lucent::region::Rect::new(0, i * 17, 1920, i * 17 + 10)
    }));

    group.bench_function("union_grid", |b| {
        b.iter(|| black_box(stripes.union(black_box(&bands))))
    });
    group.bench_function("intersect_grid", |b| {
        b.iter(|| black_box(stripes.intersect(black_box(&bands))))
    });
    group.bench_function("subtract_grid", |b| {
        b.iter(|| black_box(stripes.subtract(black_box(&bands))))
    });
    group.bench_function("dilate_grid", |b| {
        let grid = stripes.intersect(&bands);
        b.iter(|| black_box(grid.dilated(5, 5)))
    });

    group.finish();
}

/// Benchmark layout and command building
fn bench_command_building(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_building");
    let monitors = Monitors::default();
    let shaders = HashMap::new();

    for window_count in [10, 50, 100] {
        group.bench_function(format!("build_{}_windows", window_count), |b| {
            b.iter_batched(
                || {
                    let mut backend = DummyBackend::new(SCREEN);
                    let stack = window_stack(&mut backend, window_count);
                    (stack, LayoutManager::new(2), CommandBuilder::new())
                },
                |(mut stack, mut layouts, mut builder)| {
                    layouts.append_layout(&mut stack, 0, SCREEN);
                    builder.build(
                        layouts.current_mut(),
                        &BuildOptions::default(),
                        &monitors,
                        &shaders,
                    );
                    black_box(layouts.current().commands.len())
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Benchmark damage between two frames where one window moved
fn bench_damage(c: &mut Criterion) {
    let mut group = c.benchmark_group("damage");
    let monitors = Monitors::default();
    let shaders = HashMap::new();

    for window_count in [10, 50, 100] {
        let mut backend = DummyBackend::new(SCREEN);
        let mut stack = window_stack(&mut backend, window_count);
        let mut layouts = LayoutManager::new(2);
        let mut builder = CommandBuilder::new();
        for frame in 0..2 {
            if frame == 1 {
                if let Some(w) = stack.get_mut(WindowId(window_count / 2)) {
                    let g = w.geometry;
                    w.configure(Geometry::new(g.x + 10, g.y + 10, g.width, g.height));
                }
            }
            layouts.append_layout(&mut stack, 0, SCREEN);
            builder.build(
                layouts.current_mut(),
                &BuildOptions::default(),
                &monitors,
                &shaders,
            );
        }

        group.bench_function(format!("move_one_of_{}", window_count), |b| {
            b.iter(|| black_box(damage::damage(&layouts, 1, IVec2::ZERO)))
        });
        group.bench_function(format!("cull_{}", window_count), |b| {
            let repaint = damage::damage(&layouts, 1, IVec2::ZERO);
            b.iter_batched(
                || layouts.current().commands.clone(),
                |mut commands| {
                    damage::cull(&mut commands, &repaint, IVec2::ZERO);
                    black_box(commands)
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Benchmark animation script evaluation
fn bench_script_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("script");

    let source: ScriptSource = r#"
offset-x = { curve = "cubic-bezier(0.24, 0.64, 0.79, 0.98)", duration = 0.3, start = "window-x-before - window-x", end = 0 }
offset-y = { curve = "cubic-bezier(0.24, 0.64, 0.79, 0.98)", duration = 0.3, start = "window-y-before - window-y", end = 0 }
scale-x = { duration = 0.3, start = "window-width-before / window-width", end = 1 }
scale-y = { duration = 0.3, start = "window-height-before / window-height", end = 1 }
opacity = { curve = "steps(4, jump-end)", duration = 0.2, start = "window-raw-opacity-before", end = "window-raw-opacity" }
shadow-opacity = "opacity"
blur-opacity = "opacity"
"#
    .parse()
    .expect("benchmark script parses");
    let script = Arc::new(Script::compile(&source, &CONTEXT_VARIABLES).expect("benchmark script compiles"));
    let context = [
        100.0, 100.0, 800.0, 600.0, 0.0, 0.0, 400.0, 300.0, 0.0, 1.0, 0.0, 0.0, 1920.0, 1080.0,
    ];

    group.bench_function("compile", |b| {
        b.iter(|| black_box(Script::compile(&source, &CONTEXT_VARIABLES)))
    });
    group.bench_function("evaluate_frame", |b| {
        b.iter_batched(
            || {
                let mut instance = ScriptInstance::new(script.clone());
                let _ = instance.evaluate(&context);
                instance
            },
            |mut instance| {
                instance.advance(0.016);
                black_box(instance.evaluate(&context))
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

/// Benchmark configuration parsing
fn bench_configuration(c: &mut Criterion) {
    let text = toml::to_string_pretty(&CompositorConfig::default()).expect("default config serializes");

    c.bench_function("config_parse", |b| {
        b.iter(|| black_box(CompositorConfig::from_toml(black_box(&text))))
    });
}

criterion_group!(
    benches,
    bench_region_ops,
    bench_command_building,
    bench_damage,
    bench_script_evaluation,
    bench_configuration
);

criterion_main!(benches);
