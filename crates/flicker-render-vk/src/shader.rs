// SPDX-License-Identifier: CEPL-1.0
use std::io::Cursor;
use std::path::{Path, PathBuf};

use ash::util::read_spv;
use ash::vk;
use tracing::{debug, info};

use crate::error::{GfxError, VkResultExt};

pub const VERTEX_FILE: &str = "mesh.vert.spv";
pub const FRAGMENT_FILE: &str = "mesh.frag.spv";

static EMBEDDED_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.vert.spv"));
static EMBEDDED_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.frag.spv"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShaderOrigin {
    Disk(PathBuf),
    Embedded,
}

/// SPIR-V words for one stage.
#[derive(Clone, Debug)]
pub struct ShaderCode {
    pub words: Vec<u32>,
    pub origin: ShaderOrigin,
}

impl ShaderCode {
    /// `dir/file` if it exists, otherwise the build-time blob.
    pub fn load(dir: &Path, file: &str, embedded: &'static [u8]) -> Result<Self, GfxError> {
        let path = dir.join(file);
        if path.is_file() {
            let bytes = std::fs::read(&path).map_err(|source| GfxError::Shader {
                path: path.clone(),
                source,
            })?;
            let words = read_spv(&mut Cursor::new(&bytes[..])).map_err(|source| GfxError::Shader {
                path: path.clone(),
                source,
            })?;
            debug!("shader {} ({} words)", path.display(), words.len());
            return Ok(Self {
                words,
                origin: ShaderOrigin::Disk(path),
            });
        }

        let words = read_spv(&mut Cursor::new(embedded)).map_err(|source| GfxError::Shader {
            path: PathBuf::from(file),
            source,
        })?;
        Ok(Self {
            words,
            origin: ShaderOrigin::Embedded,
        })
    }

    /// Transient module; destroy it as soon as the pipeline exists.
    pub unsafe fn create_module(&self, device: &ash::Device) -> Result<vk::ShaderModule, GfxError> {
        let ci = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            p_code: self.words.as_ptr(),
            code_size: self.words.len() * 4,
            ..Default::default()
        };
        device
            .create_shader_module(&ci, None)
            .call("create_shader_module")
    }
}

/// Vertex + fragment SPIR-V, loaded once at init and reused on every
/// pipeline rebuild.
#[derive(Clone, Debug)]
pub struct ShaderSet {
    pub vertex: ShaderCode,
    pub fragment: ShaderCode,
}

impl ShaderSet {
    pub fn load(dir: &Path) -> Result<Self, GfxError> {
        let vertex = ShaderCode::load(dir, VERTEX_FILE, EMBEDDED_VERT)?;
        let fragment = ShaderCode::load(dir, FRAGMENT_FILE, EMBEDDED_FRAG)?;
        info!(
            "shaders: vertex from {:?}, fragment from {:?}",
            vertex.origin, fragment.origin
        );
        Ok(Self { vertex, fragment })
    }
}
