// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

use flicker_render::{RenderSize, WindowSurface};
use raw_window_handle::{DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle};
use tracing::{debug, warn};
use winit::window::{CursorGrabMode, Window};

pub use winit;

/// A winit window as seen by the renderer.
pub struct PlatformWindow {
    window: Window,
    grabbed: bool,
}

impl PlatformWindow {
    pub fn new(window: Window) -> Self {
        Self {
            window,
            grabbed: false,
        }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn is_grabbed(&self) -> bool {
        self.grabbed
    }

    /// Hides the cursor and keeps it in the window. Locked where the platform
    /// supports it, otherwise confined.
    pub fn grab_cursor(&mut self) -> anyhow::Result<()> {
        let res = self
            .window
            .set_cursor_grab(CursorGrabMode::Locked)
            .or_else(|_| self.window.set_cursor_grab(CursorGrabMode::Confined));
        if let Err(e) = res {
            warn!("cursor grab unavailable: {e}");
            return Err(e.into());
        }
        self.window.set_cursor_visible(false);
        self.grabbed = true;
        debug!("cursor grabbed");
        Ok(())
    }

    pub fn release_cursor(&mut self) {
        if let Err(e) = self.window.set_cursor_grab(CursorGrabMode::None) {
            warn!("cursor release failed: {e}");
        }
        self.window.set_cursor_visible(true);
        self.grabbed = false;
    }
}

impl HasWindowHandle for PlatformWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}

impl HasDisplayHandle for PlatformWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}

impl WindowSurface for PlatformWindow {
    fn framebuffer_size(&self) -> RenderSize {
        let size = self.window.inner_size();
        RenderSize {
            width: size.width,
            height: size.height,
        }
    }
}

/// Frame delta plus a once-per-interval frame counter.
#[derive(Debug)]
pub struct FrameClock {
    last: Instant,
    window_start: Instant,
    frames: u32,
    interval: Duration,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(now: Instant) -> Self {
        Self {
            last: now,
            window_start: now,
            frames: 0,
            interval: Duration::from_secs(1),
        }
    }

    /// Seconds since the previous tick.
    pub fn tick(&mut self) -> f32 {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> f32 {
        let dt = now.saturating_duration_since(self.last).as_secs_f32();
        self.last = now;
        dt
    }

    pub fn count_frame(&mut self) {
        self.frames = self.frames.saturating_add(1);
    }

    /// Frames per second once a full interval has elapsed, then restarts.
    pub fn fps(&mut self) -> Option<f32> {
        self.fps_at(Instant::now())
    }

    pub fn fps_at(&mut self, now: Instant) -> Option<f32> {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.interval {
            return None;
        }
        let fps = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.window_start = now;
        Some(fps)
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}
