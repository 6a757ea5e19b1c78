//! Rendering collaborator seam.
//!
//! A capture session talks to its renderer only through [`RenderingEnvironment`].
//! The environment owns the simulator connection, the obstacle scene and the
//! stereo camera rig; the session pushes quadrotor states and pulls frames.
//!
//! # Frame Protocol
//!
//! For every simulation step the session calls, in order:
//!
//! 1. [`RenderingEnvironment::set_quad_state`] with the trajectory state
//! 2. [`RenderingEnvironment::render`] with the step index
//! 3. [`RenderingEnvironment::left_image`], [`RenderingEnvironment::right_image`]
//!    and [`RenderingEnvironment::depth_image`]
//!
//! Backends that hand out flat buffers convert them with [`rgb_from_raw`] and
//! [`depth_from_raw`], which reject buffers whose length does not match the
//! advertised image size.
//!
//! # Renderer Process
//!
//! When rendering is enabled the session keeps one external renderer process
//! alive for all sequences of an environment ([`RendererProcess`]).

use crate::providers::ObstacleLayout;
use crate::QuadState;
use image::RgbImage;
use ndarray::Array2;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised by a rendering environment or the renderer process.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Frame or state requested before `connect`
    #[error("rendering environment is not connected")]
    NotConnected,

    /// Image requested before any `render` call since the last reset
    #[error("no frame rendered for step {step:?}")]
    NoFrame { step: Option<u64> },

    /// Buffer length does not match the advertised image size
    #[error("{kind} buffer has {actual} values, expected {expected}")]
    FrameSize {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Backend-specific failure
    #[error("render failed: {0}")]
    Backend(String),

    /// Renderer process could not be started or stopped
    #[error("renderer process {program}: {source}")]
    Process {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A simulator-backed stereo renderer.
pub trait RenderingEnvironment {
    /// Image size as `(width, height)`.
    fn image_size(&self) -> (u32, u32);

    /// Replace the obstacle scene.
    fn set_obstacles(&mut self, layout: &ObstacleLayout) -> Result<(), RenderError>;

    /// (Re)establish the renderer connection.
    fn connect(&mut self) -> Result<(), RenderError>;

    /// Drop the renderer connection.
    fn disconnect(&mut self) -> Result<(), RenderError>;

    /// Reset the simulated vehicle before a new sequence.
    fn reset(&mut self) -> Result<(), RenderError>;

    /// Place the vehicle. The state's `time` is not forwarded to the renderer.
    fn set_quad_state(&mut self, state: &QuadState) -> Result<(), RenderError>;

    /// Render the current state as step `step`.
    fn render(&mut self, step: u64) -> Result<(), RenderError>;

    /// Left RGB image of the last rendered step.
    fn left_image(&mut self) -> Result<RgbImage, RenderError>;

    /// Right RGB image of the last rendered step.
    fn right_image(&mut self) -> Result<RgbImage, RenderError>;

    /// Normalized depth (`height × width`, values in `[0, 1]`) of the last rendered step.
    fn depth_image(&mut self) -> Result<Array2<f32>, RenderError>;
}

/// Wrap an interleaved RGB buffer, checking its length against `width * height * 3`.
pub fn rgb_from_raw(raw: Vec<u8>, width: u32, height: u32) -> Result<RgbImage, RenderError> {
    let expected = width as usize * height as usize * 3;
    let actual = raw.len();
    if actual != expected {
        return Err(RenderError::FrameSize {
            kind: "rgb",
            expected,
            actual,
        });
    }
    RgbImage::from_raw(width, height, raw).ok_or(RenderError::FrameSize {
        kind: "rgb",
        expected,
        actual,
    })
}

/// Reshape a row-major depth buffer into `height × width`.
pub fn depth_from_raw(raw: Vec<f32>, width: u32, height: u32) -> Result<Array2<f32>, RenderError> {
    let expected = width as usize * height as usize;
    let actual = raw.len();
    Array2::from_shape_vec((height as usize, width as usize), raw).map_err(|_| {
        RenderError::FrameSize {
            kind: "depth",
            expected,
            actual,
        }
    })
}

/// Command line used to start an external renderer.
#[derive(Clone, Debug, PartialEq)]
pub struct RendererCommand {
    /// Renderer executable
    pub program: PathBuf,
    /// Arguments passed to the executable
    pub args: Vec<OsString>,
}

impl RendererCommand {
    /// Create a command with no arguments.
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument.
    pub fn arg<S: Into<OsString>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Flightmare's standalone Unity renderer in batch mode.
    pub fn flightmare(paths: &crate::flightmare::FlightmarePaths) -> Self {
        Self::new(paths.renderer_executable()).arg("--batchmode")
    }

    /// Start the renderer.
    pub fn spawn(&self) -> Result<RendererProcess, RenderError> {
        debug!(program = %self.program.display(), "starting renderer process");
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| RenderError::Process {
                program: self.program.clone(),
                source,
            })?;
        Ok(RendererProcess {
            program: self.program.clone(),
            child: Some(child),
        })
    }
}

/// A running external renderer. Killed on drop if still alive.
#[derive(Debug)]
pub struct RendererProcess {
    program: PathBuf,
    child: Option<Child>,
}

impl RendererProcess {
    /// OS process id, if the process has not been terminated.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Whether the process is still running.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Kill the process and reap it.
    pub fn terminate(mut self) -> Result<(), RenderError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), RenderError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let io_err = |source: std::io::Error| RenderError::Process {
            program: self.program.clone(),
            source,
        };
        if child.try_wait().map_err(io_err)?.is_none() {
            // Already-exited processes report InvalidInput here; the wait below still reaps them.
            if let Err(e) = child.kill() {
                if e.kind() != std::io::ErrorKind::InvalidInput {
                    return Err(io_err(e));
                }
            }
        }
        let status = child.wait().map_err(io_err)?;
        debug!(program = %self.program.display(), ?status, "renderer process stopped");
        Ok(())
    }
}

impl Drop for RendererProcess {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("failed to stop renderer process: {}", e);
        }
    }
}
