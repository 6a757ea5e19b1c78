//! Flightmare installation layout and vision configuration.
//!
//! This module knows where a Flightmare checkout keeps the files a capture
//! session needs. It handles:
//!
//! - Resolving the installation root (`FLIGHTMARE_PATH`)
//! - Locating the vision `config.yaml` and the standalone renderer binary
//! - Parsing the stereo camera section of the vision config
//!
//! Only [`FlightmarePaths::from_env`] touches the process environment. Library
//! code receives a [`FlightmarePaths`] value instead.

use crate::CameraConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable holding the Flightmare installation root.
pub const FLIGHTMARE_PATH_VAR: &str = "FLIGHTMARE_PATH";

/// Vision config location relative to the installation root.
pub const VISION_CONFIG_PATH: &str = "flightpy/configs/vision/config.yaml";

/// Standalone renderer location relative to the installation root.
pub const RENDERER_PATH: &str = "flightrender/RPG_Flightmare.x86_64";

/// Errors raised while resolving or reading the Flightmare configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `FLIGHTMARE_PATH` is not set
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),

    /// Config file could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid YAML or misses required keys
    #[error("failed to parse vision config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Parsed values are out of range
    #[error("invalid vision config: {0}")]
    Invalid(String),
}

/// Paths inside a Flightmare installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightmarePaths {
    root: PathBuf,
}

impl FlightmarePaths {
    /// Use an explicit installation root.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the installation root from `FLIGHTMARE_PATH`.
    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var_os(FLIGHTMARE_PATH_VAR) {
            Some(root) if !root.is_empty() => Ok(Self::new(root)),
            _ => Err(ConfigError::MissingEnv(FLIGHTMARE_PATH_VAR)),
        }
    }

    /// Installation root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the vision `config.yaml`
    pub fn vision_config(&self) -> PathBuf {
        self.root.join(VISION_CONFIG_PATH)
    }

    /// Path of the standalone Unity renderer
    pub fn renderer_executable(&self) -> PathBuf {
        self.root.join(RENDERER_PATH)
    }

    /// Read and parse the vision config.
    pub fn load_vision_config(&self) -> Result<VisionConfig, ConfigError> {
        VisionConfig::load(&self.vision_config())
    }
}

/// Subset of the Flightmare vision config used by capture sessions.
///
/// Unknown sections and keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionConfig {
    pub rgb_camera: RgbCameraConfig,
}

/// `rgb_camera` section of the vision config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RgbCameraConfig {
    /// Field of view, as written in the config
    pub fov: f32,
    /// Stereo baseline in meters
    pub baseline: f32,
    /// Image width in pixels
    #[serde(default = "default_width")]
    pub width: u32,
    /// Image height in pixels
    #[serde(default = "default_height")]
    pub height: u32,
}

fn default_width() -> u32 {
    320
}

fn default_height() -> u32 {
    240
}

impl VisionConfig {
    /// Load a vision config from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Parse a vision config from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let cam = &self.rgb_camera;
        if cam.width == 0 || cam.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "image size must be non-zero, got {}x{}",
                cam.width, cam.height
            )));
        }
        if cam.fov.is_nan() || cam.fov <= 0.0 {
            return Err(ConfigError::Invalid(format!("fov must be positive, got {}", cam.fov)));
        }
        Ok(())
    }

    /// Camera model for a capture session.
    ///
    /// Near and far planes are fixed by the depth normalization of the renderer.
    pub fn camera(&self) -> CameraConfig {
        CameraConfig {
            fov: self.rgb_camera.fov,
            baseline: self.rgb_camera.baseline,
            width: self.rgb_camera.width,
            height: self.rgb_camera.height,
            ..CameraConfig::default()
        }
    }
}
