//! flightmare-dataset: stereo dataset capture for the Flightmare simulator
//!
//! This library runs synthetic data-collection sessions: it samples obstacle
//! layouts around planned quadrotor trajectories, steps simulated time, pulls
//! stereo frames from a rendering environment and writes RGB images, disparity
//! maps and timestamp logs with a fixed naming contract.
//!
//! # Capture Session
//!
//! ```ignore
//! use flightmare_dataset::{
//!     providers::{DartThrowingLayout, LayoutConfig, MinimumJerkTrajectories, TrajectoryConfig},
//!     raycast::RaycastEnvironment,
//!     session::SessionRunner,
//!     CameraConfig, SessionConfig,
//! };
//!
//! let camera = CameraConfig::default();
//! let config = SessionConfig::new("/data/stereo", 1, camera.clone());
//! let trajectories = MinimumJerkTrajectories::new(TrajectoryConfig::default(), 42);
//! let layouts = DartThrowingLayout::new(LayoutConfig::for_object_type(1), 42);
//! let env = RaycastEnvironment::new(camera);
//!
//! let summary = SessionRunner::new(config, trajectories, layouts, env).run()?;
//! println!("captured {} frames", summary.frames);
//! ```
//!
//! # SGM Preparation
//!
//! ```ignore
//! flightmare_dataset::sgm::reorganize(Path::new("/data/sgm_run"), 0.01)?;
//! ```
//!
//! # Output Layout
//!
//! ```text
//! save_dir/object_01/
//!   session.json
//!   environment_0000/
//!     sequence_00000/
//!       images/left/frame_0000000000.png
//!       images/right/frame_0000000000.png
//!       disparity/frame_0000000000.npy
//!       timestamps.txt
//! ```

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

// Naming contract, writers and read-back of captured sequences
pub mod dataset;

// Installation layout and vision config
pub mod flightmare;

// Trajectory and obstacle-layout collaborators
pub mod providers;

// CPU stereo renderer used when no simulator bridge is attached
pub mod raycast;

// Rendering collaborator seam and renderer subprocess
pub mod render;

// Capture loop
pub mod session;

// Post-processing for the SGM stereo matcher
pub mod sgm;

use flightmare::ConfigError;
use providers::ProviderError;
use render::RenderError;

// Re-export bevy math types used in the public API
pub use bevy::prelude::{Quat, Vec3};

/// Default simulation step in seconds.
pub const DEFAULT_SIM_DT: f64 = 0.01;

/// Steps discarded at the start of every sequence.
pub const DEFAULT_START_SAVE_FRAME: u64 = 2;

/// Number of obstacle layouts captured per session.
pub const DEFAULT_MAX_ENV: usize = 3;

/// Stereo camera model used for rendering and disparity conversion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Field of view as written in the vision config
    pub fov: f32,
    /// Stereo baseline in meters
    pub baseline: f32,
    /// Near plane of the normalized depth buffer in meters
    pub near: f32,
    /// Far plane of the normalized depth buffer in meters
    pub far: f32,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov: 90.0,
            baseline: 0.1,
            near: 0.02,
            far: 40.0,
            width: 320,
            height: 240,
        }
    }
}

impl CameraConfig {
    /// Map a normalized depth value back to meters: `near + raw * (far - near)`.
    pub fn linear_depth(&self, raw: f32) -> f32 {
        self.near + raw * (self.far - self.near)
    }

    /// Focal length in pixels, treating `fov` as the horizontal field of view in degrees.
    pub fn focal_length_px(&self) -> f32 {
        (self.width as f32 / 2.0) / (self.fov.to_radians() / 2.0).tan()
    }
}

/// Convert a normalized depth buffer into the stored disparity map.
///
/// Every entry is first mapped to linear depth. Entries whose linear depth is
/// positive are replaced with `fov * baseline / depth`; the rest keep the
/// linear depth value.
pub fn depth_to_disparity(depth_raw: &Array2<f32>, camera: &CameraConfig) -> Array2<f32> {
    let scale = camera.fov * camera.baseline;
    depth_raw.mapv(|raw| {
        let depth = camera.linear_depth(raw);
        if depth > 0.0 {
            scale / depth
        } else {
            depth
        }
    })
}

/// Immutable parameters of one capture session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Output root for this session (`save_dir/object_XX`)
    pub save_root: PathBuf,
    /// Obstacle model family
    pub object_type: u32,
    /// Drive the external renderer (connect/disconnect and renderer process)
    pub render_enabled: bool,
    /// Minimum obstacle spacing in meters
    pub radius: f32,
    /// Simulation step in seconds
    pub sim_dt: f64,
    /// Simulated duration of each sequence in seconds
    pub duration: f64,
    /// Frames are saved only once the step counter exceeds this value
    pub start_save_frame: u64,
    /// Number of obstacle layouts
    pub max_env: usize,
    /// Stereo camera model
    pub camera: CameraConfig,
}

impl SessionConfig {
    /// Session with default timing for `object_type`, rooted at `save_dir/object_XX`.
    pub fn new<P: AsRef<Path>>(save_dir: P, object_type: u32, camera: CameraConfig) -> Self {
        Self {
            save_root: save_dir.as_ref().join(dataset::object_dir_name(object_type)),
            object_type,
            render_enabled: false,
            radius: obstacle_radius(object_type),
            sim_dt: DEFAULT_SIM_DT,
            duration: 2.0 * providers::DEFAULT_WAYPOINT_TIME,
            start_save_frame: DEFAULT_START_SAVE_FRAME,
            max_env: DEFAULT_MAX_ENV,
            camera,
        }
    }

    /// Enable or disable the external renderer.
    pub fn with_render(mut self, render_enabled: bool) -> Self {
        self.render_enabled = render_enabled;
        self
    }

    /// Override the simulation step.
    pub fn with_sim_dt(mut self, sim_dt: f64) -> Self {
        self.sim_dt = sim_dt;
        self
    }

    /// Override the simulated duration of each sequence.
    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = duration;
        self
    }

    /// Override the number of obstacle layouts.
    pub fn with_max_env(mut self, max_env: usize) -> Self {
        self.max_env = max_env;
        self
    }

    /// Check that the time loop terminates and the camera is usable.
    pub fn validate(&self) -> Result<(), CaptureError> {
        if !(self.sim_dt.is_finite() && self.sim_dt > 0.0) {
            return Err(CaptureError::InvalidConfig(format!(
                "sim_dt must be positive, got {}",
                self.sim_dt
            )));
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(CaptureError::InvalidConfig(format!(
                "duration must be non-negative, got {}",
                self.duration
            )));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(CaptureError::InvalidConfig(
                "camera resolution must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Obstacle spacing for an object type: small models pack at 5 m, large ones at 16 m.
pub fn obstacle_radius(object_type: u32) -> f32 {
    if object_type <= 4 {
        5.0
    } else {
        16.0
    }
}

/// Quadrotor state sampled from a trajectory.
#[derive(Clone, Debug, PartialEq)]
pub struct QuadState {
    /// Trajectory time in seconds
    pub time: f64,
    /// World position in meters (z up)
    pub position: Vec3,
    /// Body-to-world rotation
    pub attitude: Quat,
    /// World velocity in m/s
    pub velocity: Vec3,
    /// Body rates in rad/s
    pub angular_velocity: Vec3,
    /// World acceleration in m/s^2
    pub acceleration: Vec3,
}

impl QuadState {
    /// Hovering state at `position`.
    pub fn hover(time: f64, position: Vec3) -> Self {
        Self {
            time,
            position,
            attitude: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            acceleration: Vec3::ZERO,
        }
    }
}

/// Errors that abort a capture session or post-processing run.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Output root exists; sessions never merge into earlier captures
    #[error("output directory already exists: {0}")]
    OutputExists(PathBuf),

    #[error("invalid session config: {0}")]
    InvalidConfig(String),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("failed to write disparity: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    #[error("failed to read disparity: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Captured sequence violates the layout contract
    #[error("inconsistent sequence {path}: {message}")]
    Inconsistent { path: PathBuf, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_camera_default() {
        let camera = CameraConfig::default();
        assert_eq!(camera.near, 0.02);
        assert_eq!(camera.far, 40.0);
    }

    #[test]
    fn test_linear_depth_endpoints() {
        let camera = CameraConfig::default();
        assert!((camera.linear_depth(0.0) - 0.02).abs() < 1e-6);
        assert!((camera.linear_depth(1.0) - 40.0).abs() < 1e-4);
    }

    #[test]
    fn test_disparity_midpoint() {
        let camera = CameraConfig {
            fov: 90.0,
            baseline: 0.1,
            ..CameraConfig::default()
        };
        let disparity = depth_to_disparity(&array![[0.5_f32]], &camera);
        // 0.02 + 0.5 * 39.98 = 20.01
        let expected = 90.0 * 0.1 / 20.01;
        assert!((disparity[[0, 0]] - expected).abs() < 1e-5);
    }

    #[test]
    fn test_disparity_keeps_non_positive_depth() {
        let camera = CameraConfig::default();
        // 0.02 + raw * 39.98 <= 0 for raw <= -0.02 / 39.98
        let raw = -0.5_f32;
        let disparity = depth_to_disparity(&array![[raw, 0.5]], &camera);
        assert_eq!(disparity[[0, 0]], camera.linear_depth(raw));
        assert!(disparity[[0, 0]] <= 0.0);
        assert!(disparity[[0, 1]] > 0.0);
    }

    #[test]
    fn test_disparity_shape_preserved() {
        let camera = CameraConfig::default();
        let depth = Array2::<f32>::from_elem((4, 6), 1.0);
        let disparity = depth_to_disparity(&depth, &camera);
        assert_eq!(disparity.dim(), (4, 6));
        let expected = camera.fov * camera.baseline / camera.far;
        assert!(disparity.iter().all(|d| (d - expected).abs() < 1e-5));
    }

    #[test]
    fn test_focal_length_90_deg() {
        let camera = CameraConfig {
            fov: 90.0,
            width: 200,
            ..CameraConfig::default()
        };
        // tan(45°) = 1
        assert!((camera.focal_length_px() - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_obstacle_radius_by_type() {
        assert_eq!(obstacle_radius(1), 5.0);
        assert_eq!(obstacle_radius(4), 5.0);
        assert_eq!(obstacle_radius(5), 16.0);
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::new("/data", 5, CameraConfig::default());
        assert_eq!(config.save_root, PathBuf::from("/data/object_05"));
        assert_eq!(config.radius, 16.0);
        assert_eq!(config.sim_dt, 0.01);
        assert_eq!(config.duration, 2.0);
        assert_eq!(config.start_save_frame, 2);
        assert_eq!(config.max_env, 3);
        assert!(!config.render_enabled);
    }

    #[test]
    fn test_session_config_builders() {
        let config = SessionConfig::new("/data", 1, CameraConfig::default())
            .with_render(true)
            .with_sim_dt(0.05)
            .with_max_env(1);
        assert!(config.render_enabled);
        assert_eq!(config.sim_dt, 0.05);
        assert_eq!(config.max_env, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_session_config_rejects_zero_dt() {
        let config = SessionConfig::new("/data", 1, CameraConfig::default()).with_sim_dt(0.0);
        assert!(matches!(
            config.validate(),
            Err(CaptureError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_quad_state_hover() {
        let state = QuadState::hover(1.5, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(state.time, 1.5);
        assert_eq!(state.attitude, Quat::IDENTITY);
        assert_eq!(state.velocity, Vec3::ZERO);
    }

    #[test]
    fn test_capture_error_display() {
        let errors = vec![
            CaptureError::OutputExists(PathBuf::from("/data/object_01")),
            CaptureError::InvalidConfig("bad".to_string()),
            CaptureError::Provider(ProviderError::ListNotCreated),
            CaptureError::Render(RenderError::NotConnected),
            CaptureError::Io(std::io::Error::new(std::io::ErrorKind::Other, "io")),
            CaptureError::Inconsistent {
                path: PathBuf::from("seq"),
                message: "count".to_string(),
            },
        ];
        for err in errors {
            assert!(!err.to_string().is_empty());
        }
    }
}
