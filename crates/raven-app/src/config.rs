// SPDX-License-Identifier: CEPL-1.0
//! `raven.toml` plus command-line overrides.
use anyhow::{Context, Result};
use clap::Parser;
use raven_render::RenderSettings;
use raven_render_vk::pipeline::BUILT_SHADER_DIR;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Shorter fence waits turn ordinary GPU latency into a fatal `DeviceLost`.
pub const MIN_FENCE_TIMEOUT_MS: u64 = 100;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Config file; a missing file means built-in defaults
    #[arg(long, default_value = "raven.toml")]
    pub config: PathBuf,

    /// Enable the Khronos validation layer
    #[arg(long, overrides_with = "no_validation")]
    pub validation: bool,

    /// Disable the Khronos validation layer
    #[arg(long, overrides_with = "validation")]
    pub no_validation: bool,

    /// Frames the CPU may record ahead of the GPU (1-4)
    #[arg(long)]
    pub frames_in_flight: Option<usize>,

    /// Directory holding basic.vert.spv / basic.frag.spv
    #[arg(long)]
    pub shader_dir: Option<PathBuf>,
}

impl Args {
    fn validation_override(&self) -> Option<bool> {
        match (self.validation, self.no_validation) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "Raven".to_owned(),
            width: 1600,
            height: 900,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub frames_in_flight: usize,
    pub validation: bool,
    pub fence_timeout_ms: u64,
    pub shader_dir: PathBuf,
}

impl Default for RenderCfg {
    fn default() -> Self {
        let s = RenderSettings::default();
        Self {
            clear_color: s.clear_color,
            frames_in_flight: s.frames_in_flight,
            validation: s.validation,
            fence_timeout_ms: s.fence_timeout.as_millis() as u64,
            shader_dir: PathBuf::from(BUILT_SHADER_DIR),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LogCfg {
    /// Default `EnvFilter` directive; `RUST_LOG` still wins.
    pub level: String,
}

impl Default for LogCfg {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub window: WindowCfg,
    pub render: RenderCfg,
    pub log: LogCfg,
}

impl AppConfig {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// A missing file yields defaults; an unreadable or malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(s) => Self::parse(&s).with_context(|| format!("parsing {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn apply_args(&mut self, args: &Args) {
        if let Some(v) = args.validation_override() {
            self.render.validation = v;
        }
        if let Some(n) = args.frames_in_flight {
            self.render.frames_in_flight = n;
        }
        if let Some(dir) = &args.shader_dir {
            self.render.shader_dir = dir.clone();
        }
    }

    pub fn render_settings(&self) -> RenderSettings {
        let mut fence_timeout_ms = self.render.fence_timeout_ms;
        if fence_timeout_ms < MIN_FENCE_TIMEOUT_MS {
            warn!(
                "fence_timeout_ms = {fence_timeout_ms} is too short, using {MIN_FENCE_TIMEOUT_MS}"
            );
            fence_timeout_ms = MIN_FENCE_TIMEOUT_MS;
        }
        RenderSettings {
            app_name: self.window.title.clone(),
            clear_color: self.render.clear_color,
            frames_in_flight: self.render.frames_in_flight,
            validation: self.render.validation,
            fence_timeout: Duration::from_millis(fence_timeout_ms),
            shader_dir: self.render.shader_dir.clone(),
        }
    }
}
