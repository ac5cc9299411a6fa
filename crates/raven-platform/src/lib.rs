// SPDX-License-Identifier: CEPL-1.0
//! Window collaborator: owns the winit event loop and a single window,
//! drained once per frame with `update()`.
use anyhow::{anyhow, Context, Result};
use raven_render::RenderSize;
use std::time::Duration;
use tracing::{debug, info};

pub use winit;

use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    error::OsError,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowAttributes, WindowId},
};

// Desktop backends deliver `resumed` on the first pump; give slow ones a few tries.
const STARTUP_PUMPS: usize = 64;

struct WindowState {
    attrs: WindowAttributes,
    window: Option<Window>,
    created: bool,
    create_error: Option<OsError>,
    size: RenderSize,
    resized: bool,
    close_requested: bool,
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.created || self.create_error.is_some() {
            return;
        }
        match event_loop.create_window(self.attrs.clone()) {
            Ok(window) => {
                let s = window.inner_size();
                self.size = RenderSize {
                    width: s.width,
                    height: s.height,
                };
                self.window = Some(window);
                self.created = true;
            }
            Err(e) => self.create_error = Some(e),
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.close_requested = true;
            }
            WindowEvent::Resized(new_size) => {
                self.size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                self.resized = true;
                debug!("Resized → {}x{}", new_size.width, new_size.height);
            }
            _ => {}
        }
    }
}

// Field order is drop order: the window goes before its event loop.
pub struct Platform {
    window: Window,
    state: WindowState,
    event_loop: EventLoop<()>,
}

impl Platform {
    pub fn new(title: &str, width: u32, height: u32) -> Result<Self> {
        let mut event_loop = EventLoop::new().context("EventLoop::new")?;
        let mut state = WindowState {
            attrs: Window::default_attributes()
                .with_title(title)
                .with_inner_size(PhysicalSize::new(width, height)),
            window: None,
            created: false,
            create_error: None,
            size: RenderSize { width, height },
            resized: false,
            close_requested: false,
        };

        for _ in 0..STARTUP_PUMPS {
            if let PumpStatus::Exit(code) =
                event_loop.pump_app_events(Some(Duration::ZERO), &mut state)
            {
                return Err(anyhow!("event loop exited during startup (code {code})"));
            }
            if let Some(e) = state.create_error.take() {
                return Err(e).context("create_window");
            }
            if state.window.is_some() {
                break;
            }
        }

        let window = state
            .window
            .take()
            .ok_or_else(|| anyhow!("window was not created by the platform event loop"))?;
        // Creation itself may have resized; the renderer starts from the live size.
        state.resized = false;
        info!(
            "window created: {}x{}",
            state.size.width, state.size.height
        );

        Ok(Self {
            window,
            state,
            event_loop,
        })
    }

    /// Drains pending platform events. `false` once the app should stop.
    pub fn update(&mut self) -> bool {
        let status = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.state);
        match status {
            PumpStatus::Exit(_) => false,
            PumpStatus::Continue => !self.state.close_requested,
        }
    }

    /// Returns and clears the resize flag.
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.state.resized)
    }

    pub fn size(&self) -> RenderSize {
        self.state.size
    }

    pub fn set_title(&self, title: &str) {
        self.window.set_title(title);
    }

    /// Provides the raw window and display handles.
    pub fn window(&self) -> &Window {
        &self.window
    }
}
