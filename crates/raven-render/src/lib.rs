// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    /// A minimized window reports 0x0; nothing can be presented to it.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Backend-neutral knobs, filled from the app config.
#[derive(Clone, Debug)]
pub struct RenderSettings {
    pub app_name: String,
    pub clear_color: [f32; 4],
    /// Frames the CPU may record ahead of the GPU. Clamped to `1..=MAX_FRAMES_IN_FLIGHT`.
    pub frames_in_flight: usize,
    pub validation: bool,
    pub fence_timeout: Duration,
    /// Directory holding precompiled SPIR-V (`<name>.spv`).
    pub shader_dir: PathBuf,
}

impl RenderSettings {
    pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight.clamp(1, Self::MAX_FRAMES_IN_FLIGHT)
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            app_name: "Raven".to_owned(),
            clear_color: [0.0, 0.0, 1.0, 1.0],
            frames_in_flight: 2,
            validation: cfg!(debug_assertions),
            fence_timeout: Duration::from_secs(5),
            shader_dir: PathBuf::from("shaders"),
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self) -> Result<()>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_in_flight_is_clamped() {
        let mut s = RenderSettings::default();
        assert_eq!(s.frames_in_flight(), 2);

        s.frames_in_flight = 0;
        assert_eq!(s.frames_in_flight(), 1);

        s.frames_in_flight = 16;
        assert_eq!(s.frames_in_flight(), RenderSettings::MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn zero_sized_surface_is_empty() {
        assert!(RenderSize { width: 0, height: 900 }.is_empty());
        assert!(!RenderSize { width: 1600, height: 900 }.is_empty());
    }
}
