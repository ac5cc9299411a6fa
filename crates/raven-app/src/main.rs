// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::{AppConfig, Args};
use glam::{Mat4, Vec3};
use raven_core::{init_tracing, FrameClock, FrameStats};
use raven_platform::Platform;
use raven_render::{RenderSize, Renderer};
use raven_render_vk::{Vertex, VkRenderer};
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const DEMO_TRIANGLE: [Vertex; 3] = [
    Vertex {
        position: [0.0, 0.5, 0.0],
        color: [1.0, 0.0, 0.0],
    },
    Vertex {
        position: [-0.5, -0.5, 0.0],
        color: [0.0, 1.0, 0.0],
    },
    Vertex {
        position: [0.5, -0.5, 0.0],
        color: [0.0, 0.0, 1.0],
    },
];

/// Idle wait while the window is minimized.
const PAUSED_SLEEP: Duration = Duration::from_millis(16);

/// Right-handed perspective looking down -Z from z = 3, depth mapped to [0, 1].
fn camera(size: RenderSize) -> Mat4 {
    let aspect = if size.is_empty() {
        1.0
    } else {
        size.width as f32 / size.height as f32
    };
    let proj = Mat4::perspective_rh(60f32.to_radians(), aspect, 0.1, 100.0);
    let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y);
    proj * view
}

/// A row of triangles receding into the scene, all sharing one mesh and material.
fn demo_transforms() -> Vec<Mat4> {
    (0..5)
        .map(|i| {
            let x = (i as f32 - 2.0) * 0.8;
            let z = -(i as f32) * 0.5;
            Mat4::from_translation(Vec3::new(x, 0.0, z)) * Mat4::from_rotation_z(i as f32 * 0.3)
        })
        .collect()
}

/// What one loop iteration did with the renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Iteration {
    Paused,
    Skipped,
    Presented,
}

/// Only presented frames count toward the FPS title; a pause restarts the window.
fn track_frame(clock: &mut FrameClock, it: Iteration, now: Instant) -> Option<FrameStats> {
    match it {
        Iteration::Paused => {
            clock.reset(now);
            None
        }
        Iteration::Skipped => None,
        Iteration::Presented => clock.tick(now),
    }
}

fn build_demo_scene(renderer: &mut VkRenderer) -> Result<()> {
    let mesh = renderer
        .create_mesh(&DEMO_TRIANGLE)
        .context("uploading demo mesh")?;
    let material = renderer
        .create_material("basic")
        .context("building \"basic\" material")?;
    let transforms = demo_transforms();
    let count = transforms.len();
    for t in transforms {
        renderer.add_object(mesh, material, t);
    }
    info!("demo scene: {count} objects");
    Ok(())
}

fn run(cfg: &AppConfig) -> Result<()> {
    let mut platform = Platform::new(&cfg.window.title, cfg.window.width, cfg.window.height)?;
    let settings = cfg.render_settings();

    let window = platform.window();
    let mut renderer = VkRenderer::new(window, window, platform.size(), &settings)
        .context("initializing the Vulkan renderer")?;
    build_demo_scene(&mut renderer)?;
    renderer.set_camera(camera(platform.size()));

    let mut clock = FrameClock::new(Instant::now());
    loop {
        if platform.take_resized() {
            let size = platform.size();
            renderer.resize(size)?;
            renderer.set_camera(camera(size));
        }

        let it = if renderer.is_paused() {
            std::thread::sleep(PAUSED_SLEEP);
            Iteration::Paused
        } else if renderer.render_frame()? {
            Iteration::Presented
        } else {
            Iteration::Skipped
        };
        if let Some(stats) = track_frame(&mut clock, it, Instant::now()) {
            platform.set_title(&stats.title(&cfg.window.title));
        }

        if !platform.update() {
            break;
        }
    }

    info!("shutting down");
    // The renderer's surface must go before the window it was created from.
    drop(renderer);
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let loaded = AppConfig::load(&args.config);
    let level = loaded
        .as_ref()
        .map_or_else(|_| "info".to_owned(), |c| c.log.level.clone());
    init_tracing(&level);

    let mut cfg = loaded.unwrap_or_else(|e| {
        warn!("{e:#}; using default configuration");
        AppConfig::default()
    });
    cfg.apply_args(&args);

    match run(&cfg) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}
