// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

/// Average frame time over the last reporting window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameStats {
    pub frame_ms: f32,
    pub fps: u32,
}

impl FrameStats {
    /// `"<base> - 16.67ms (60 FPS)"`
    pub fn title(&self, base: &str) -> String {
        format!("{base} - {:.2}ms ({} FPS)", self.frame_ms, self.fps)
    }
}

/// Rolling frame timer. Reports once the accumulated time passes the window.
pub struct FrameClock {
    last: Instant,
    window: Duration,
    acc: Duration,
    samples: u32,
}

impl FrameClock {
    pub const DEFAULT_WINDOW: Duration = Duration::from_millis(1000);

    pub fn new(now: Instant) -> Self {
        Self::with_window(now, Self::DEFAULT_WINDOW)
    }

    pub fn with_window(now: Instant, window: Duration) -> Self {
        Self {
            last: now,
            window,
            acc: Duration::ZERO,
            samples: 0,
        }
    }

    /// Drops the partial window, e.g. while rendering is paused.
    pub fn reset(&mut self, now: Instant) {
        self.last = now;
        self.acc = Duration::ZERO;
        self.samples = 0;
    }

    /// Records one presented frame ending at `now`.
    pub fn tick(&mut self, now: Instant) -> Option<FrameStats> {
        let delta = now.saturating_duration_since(self.last);
        self.last = now;
        self.acc += delta;
        self.samples = self.samples.saturating_add(1);

        if self.acc <= self.window {
            return None;
        }

        let acc_ms = self.acc.as_secs_f32() * 1000.0;
        let frame_ms = acc_ms / self.samples as f32;
        let fps = if frame_ms > 0.0 {
            (1000.0 / frame_ms).round() as u32
        } else {
            0
        };

        self.acc = Duration::ZERO;
        self.samples = 0;
        Some(FrameStats { frame_ms, fps })
    }
}
