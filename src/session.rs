//! Capture loop.
//!
//! [`SessionRunner`] drives one capture session: for each environment it asks
//! the providers for trajectories and an obstacle layout, pushes the layout to
//! the renderer, then flies every trajectory step by step and writes the
//! resulting stereo frames.
//!
//! # Example
//!
//! ```ignore
//! use flightmare_dataset::session::SessionRunner;
//! use flightmare_dataset::render::RendererCommand;
//!
//! let runner = SessionRunner::new(config, trajectories, layouts, env)
//!     .with_renderer(RendererCommand::flightmare(&paths));
//! let summary = runner.run()?;
//! ```
//!
//! # Frame Schedule
//!
//! Each sequence starts at `t = 0` and steps by `sim_dt` while
//! `t <= duration`. The state is sampled before `t` advances. The first
//! `start_save_frame + 1` rendered steps are discarded; the remaining frames
//! are numbered from 0.

use crate::dataset::{
    save_disparity_npy, save_rgb_png, write_timestamps, SequenceLayout, SessionManifest,
};
use crate::providers::{ObstacleLayoutProvider, ProviderError, TrajectoryProvider};
use crate::render::{RenderError, RendererCommand, RenderingEnvironment};
use crate::{depth_to_disparity, CaptureError, SessionConfig};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info};

/// Counts produced by a completed session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Environments captured
    pub environments: usize,
    /// Sequences captured across all environments
    pub sequences: usize,
    /// Frames saved across all sequences
    pub frames: usize,
}

/// Runs a capture session against its three collaborators.
pub struct SessionRunner<T, O, R> {
    config: SessionConfig,
    trajectories: T,
    layouts: O,
    env: R,
    renderer: Option<RendererCommand>,
}

impl<T, O, R> SessionRunner<T, O, R>
where
    T: TrajectoryProvider,
    O: ObstacleLayoutProvider,
    R: RenderingEnvironment,
{
    pub fn new(config: SessionConfig, trajectories: T, layouts: O, env: R) -> Self {
        Self {
            config,
            trajectories,
            layouts,
            env,
            renderer: None,
        }
    }

    /// Start this renderer once per environment when rendering is enabled.
    pub fn with_renderer(mut self, command: RendererCommand) -> Self {
        self.renderer = Some(command);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn env(&self) -> &R {
        &self.env
    }

    /// Capture every environment and sequence.
    ///
    /// Fails with [`CaptureError::OutputExists`] before touching any
    /// collaborator if the session root already exists.
    pub fn run(mut self) -> Result<SessionSummary, CaptureError> {
        self.config.validate()?;
        create_output_root(&self.config.save_root)?;
        let manifest = SessionManifest::from_config(&self.config).write(&self.config.save_root)?;

        info!(
            save_root = %self.config.save_root.display(),
            object_type = self.config.object_type,
            render = self.config.render_enabled,
            environments = self.config.max_env,
            "starting capture session"
        );
        debug!(manifest = %manifest.display(), "session manifest written");

        let mut summary = SessionSummary::default();
        for env_index in 0..self.config.max_env {
            let (sequences, frames) = self.capture_environment(env_index)?;
            summary.environments += 1;
            summary.sequences += sequences;
            summary.frames += frames;
        }

        info!(
            environments = summary.environments,
            sequences = summary.sequences,
            frames = summary.frames,
            "capture session complete"
        );
        Ok(summary)
    }

    fn capture_environment(&mut self, env_index: usize) -> Result<(usize, usize), CaptureError> {
        let trajectories = self.trajectories.generate_trajectories()?;
        let count = self.trajectories.num_trajectories();
        if count != trajectories.len() {
            return Err(ProviderError::CountMismatch {
                reported: count,
                actual: trajectories.len(),
            }
            .into());
        }

        self.layouts.load_trajectories(&trajectories);
        self.layouts.create_list()?;
        let layout = self.layouts.generate_trees()?;

        // Dropping the process on an early return kills it
        let process = match (&self.renderer, self.config.render_enabled) {
            (Some(command), true) => Some(command.spawn()?),
            _ => None,
        };

        self.env.set_obstacles(&layout)?;
        self.env.connect()?;
        info!(
            environment = env_index,
            obstacles = layout.len(),
            sequences = count,
            "environment ready"
        );

        let mut frames = 0;
        for seq_index in 0..count {
            frames += self.capture_sequence(env_index, seq_index)?;
        }

        if self.config.render_enabled {
            self.env.disconnect()?;
            if let Some(process) = process {
                process.terminate()?;
            }
        }
        Ok((count, frames))
    }

    fn capture_sequence(&mut self, env_index: usize, seq_index: usize) -> Result<usize, CaptureError> {
        let layout = SequenceLayout::new(&self.config.save_root, env_index, seq_index);
        layout.create()?;
        self.env.reset()?;

        let (width, height) = self.env.image_size();
        let mut t = 0.0;
        let mut frame_id = 0;
        let mut ep_len: u64 = 0;

        while t <= self.config.duration {
            let state = self.trajectories.state(seq_index, t)?;
            t += self.config.sim_dt;

            self.env.set_quad_state(&state)?;
            self.env.render(ep_len)?;
            let left = self.env.left_image()?;
            let right = self.env.right_image()?;
            let depth = self.env.depth_image()?;

            if ep_len > self.config.start_save_frame {
                let expected = (height as usize, width as usize);
                if depth.dim() != expected {
                    return Err(RenderError::FrameSize {
                        kind: "depth",
                        expected: expected.0 * expected.1,
                        actual: depth.len(),
                    }
                    .into());
                }
                let disparity = depth_to_disparity(&depth, &self.config.camera);
                save_rgb_png(&left, &layout.left_frame(frame_id))?;
                save_rgb_png(&right, &layout.right_frame(frame_id))?;
                save_disparity_npy(&disparity, &layout.disparity_frame(frame_id))?;
                frame_id += 1;
            }
            ep_len += 1;
        }

        write_timestamps(&layout.timestamps_path(), frame_id, self.config.sim_dt)?;
        debug!(
            environment = env_index,
            sequence = seq_index,
            steps = ep_len,
            frames = frame_id,
            "sequence captured"
        );
        Ok(frame_id)
    }
}

/// Create the session root. Parents are created as needed; the root itself
/// must not exist.
fn create_output_root(root: &Path) -> Result<(), CaptureError> {
    if root.exists() {
        return Err(CaptureError::OutputExists(root.to_path_buf()));
    }
    if let Some(parent) = root.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::create_dir(root) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(CaptureError::OutputExists(root.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}
