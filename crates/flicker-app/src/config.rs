// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use flicker_math::{glam::Vec3, Camera};
use flicker_render::GfxConfig;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_CONFIG: &str = "flicker.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Grab the cursor for mouse-look as soon as the window opens.
    pub grab_cursor: bool,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "Flicker".to_string(),
            width: 1000,
            height: 1000,
            grab_cursor: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CameraCfg {
    pub position: [f32; 3],
    pub fov_deg: f32,
    pub near: f32,
    pub far: f32,
    pub speed: f32,
    pub sensitivity: f32,
}

impl Default for CameraCfg {
    fn default() -> Self {
        let cam = Camera::default();
        Self {
            position: cam.position.to_array(),
            fov_deg: cam.fov_y.to_degrees(),
            near: cam.near,
            far: cam.far,
            speed: cam.speed,
            sensitivity: cam.sensitivity,
        }
    }
}

impl CameraCfg {
    pub fn camera(&self) -> Camera {
        Camera {
            position: Vec3::from_array(self.position),
            fov_y: self.fov_deg.to_radians(),
            near: self.near,
            far: self.far,
            speed: self.speed,
            sensitivity: self.sensitivity,
            ..Camera::default()
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: GfxConfig,
    /// Vertex file; the built-in cube when unset.
    pub mesh: Option<PathBuf>,
    pub camera: CameraCfg,
}

pub fn parse(text: &str, path: &Path) -> Result<AppCfg, ConfigError> {
    toml::from_str(text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// `Ok(None)` when the file does not exist.
pub fn load(path: &Path) -> Result<Option<AppCfg>, ConfigError> {
    match fs::read_to_string(path) {
        Ok(text) => parse(&text, path).map(Some),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Missing file means defaults; a broken one is reported and also yields
/// defaults.
pub fn load_or_default(path: &Path) -> AppCfg {
    match load(path) {
        Ok(Some(cfg)) => {
            info!("config: {}", path.display());
            cfg
        }
        Ok(None) => AppCfg::default(),
        Err(e) => {
            warn!("{e}; using defaults");
            AppCfg::default()
        }
    }
}
