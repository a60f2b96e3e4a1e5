// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use serde::Deserialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        if self.is_zero() {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// One mesh vertex as laid out in the vertex buffer (binding 0, location 0).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
}

/// Per-frame uniform block. Both matrices are row-major; the engine copies
/// the bytes verbatim and never looks inside.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Ubo {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

impl Ubo {
    pub const IDENTITY: [[f32; 4]; 4] = [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ];

    pub fn identity() -> Self {
        Self {
            view: Self::IDENTITY,
            proj: Self::IDENTITY,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// What a `draw_frame` call ended up doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// Submitted and handed to the presentation engine.
    Presented,
    /// Swapchain was stale; extent-dependent state was rebuilt instead.
    Recreated,
    /// Framebuffer is 0x0 (minimised); nothing was touched.
    Suspended,
}

/// Engine-level knobs, read from the `[render]` table of the app config.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct GfxConfig {
    pub app_name: String,
    /// Directory holding `mesh.vert.spv` / `mesh.frag.spv`.
    pub shader_dir: PathBuf,
    pub validation: bool,
    /// Force FIFO presentation.
    pub vsync: bool,
    pub clear_color: [f32; 4],
}

impl Default for GfxConfig {
    fn default() -> Self {
        Self {
            app_name: "Flicker".to_string(),
            shader_dir: PathBuf::from("shaders"),
            validation: cfg!(debug_assertions),
            vsync: false,
            clear_color: [0.02, 0.02, 0.04, 1.0],
        }
    }
}

/// Windowing backend seam: raw handles for surface creation plus the
/// framebuffer size used during extent negotiation.
pub trait WindowSurface: HasWindowHandle + HasDisplayHandle {
    fn framebuffer_size(&self) -> RenderSize;
}

/// GPU backend seam.
pub trait Renderer {
    fn init(window: &dyn WindowSurface, vertices: &[Vertex], cfg: &GfxConfig) -> Result<Self>
    where
        Self: Sized;

    /// Releases every GPU object. Safe to call more than once.
    fn deinit(&mut self);

    /// Hint that the window changed size; the swapchain is rebuilt after the
    /// next present.
    fn resize(&mut self, size: RenderSize);

    fn draw_frame(&mut self, window: &dyn WindowSurface, ubo: &Ubo) -> Result<FrameStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ubo_is_two_packed_matrices() {
        assert_eq!(std::mem::size_of::<Ubo>(), 128);
        let ubo = Ubo::identity();
        let bytes = ubo.as_bytes();
        assert_eq!(bytes.len(), 128);
        // view[0][0] == 1.0 and proj starts at byte 64
        assert_eq!(&bytes[0..4], &1.0f32.to_ne_bytes());
        assert_eq!(&bytes[64..68], &1.0f32.to_ne_bytes());
    }

    #[test]
    fn vertex_is_three_floats() {
        assert_eq!(std::mem::size_of::<Vertex>(), 12);
    }

    #[test]
    fn zero_sized_render_target() {
        assert!(RenderSize { width: 0, height: 600 }.is_zero());
        assert!(RenderSize { width: 800, height: 0 }.is_zero());
        assert!(!RenderSize { width: 800, height: 600 }.is_zero());
        assert_eq!(RenderSize { width: 0, height: 0 }.aspect(), 1.0);
        assert_eq!(RenderSize { width: 1600, height: 800 }.aspect(), 2.0);
    }

    #[test]
    fn gfx_config_fills_missing_fields() {
        let cfg: GfxConfig = toml::from_str("vsync = true\nshader_dir = \"out/spv\"").unwrap();
        assert!(cfg.vsync);
        assert_eq!(cfg.shader_dir, PathBuf::from("out/spv"));
        assert_eq!(cfg.app_name, "Flicker");
        assert_eq!(cfg.clear_color, GfxConfig::default().clear_color);
    }
}
