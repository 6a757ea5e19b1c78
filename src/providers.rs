//! Trajectory and obstacle-layout collaborators.
//!
//! A capture session asks a [`TrajectoryProvider`] for a fresh batch of
//! trajectories per environment, then hands them to an
//! [`ObstacleLayoutProvider`] so obstacles can be placed clear of every path.
//!
//! The reference implementations here are deliberately simple:
//!
//! - [`MinimumJerkTrajectories`]: piecewise minimum-jerk paths through random
//!   waypoints
//! - [`DartThrowingLayout`]: uniform dart throwing with a spacing radius and a
//!   trajectory keep-out corridor
//!
//! Both are seeded with `ChaCha8Rng` so sessions are reproducible.

use crate::{obstacle_radius, QuadState};
use bevy::prelude::{Quat, Vec2, Vec3};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::f32::consts::PI;
use thiserror::Error;

/// Seconds spent between two consecutive waypoints.
pub const DEFAULT_WAYPOINT_TIME: f64 = 1.0;

/// Errors raised by trajectory or layout providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// State requested for a trajectory that does not exist
    #[error("trajectory index {index} out of range ({len} trajectories)")]
    IndexOutOfRange { index: usize, len: usize },

    /// Reported trajectory count disagrees with the generated list
    #[error("provider reports {reported} trajectories but generated {actual}")]
    CountMismatch { reported: usize, actual: usize },

    /// `generate_trees` called before `create_list`
    #[error("obstacle candidate list not created")]
    ListNotCreated,

    /// Provider parameters cannot produce a result
    #[error("invalid provider config: {0}")]
    InvalidConfig(String),
}

/// Source of time-parameterized quadrotor trajectories.
pub trait TrajectoryProvider {
    /// Generate a fresh batch of trajectories, replacing the previous one.
    fn generate_trajectories(&mut self) -> Result<Vec<Trajectory>, ProviderError>;

    /// Number of trajectories in the current batch.
    fn num_trajectories(&self) -> usize;

    /// State of trajectory `index` at time `t`.
    fn state(&self, index: usize, t: f64) -> Result<QuadState, ProviderError>;
}

/// Source of obstacle layouts that avoid a set of trajectories.
pub trait ObstacleLayoutProvider {
    /// Register the trajectories obstacles must stay clear of.
    fn load_trajectories(&mut self, trajectories: &[Trajectory]);

    /// Prepare the candidate list for the loaded trajectories.
    fn create_list(&mut self) -> Result<(), ProviderError>;

    /// Sample an obstacle layout.
    fn generate_trees(&mut self) -> Result<ObstacleLayout, ProviderError>;
}

/// A vertical obstacle standing on the ground plane.
#[derive(Clone, Debug, PartialEq)]
pub struct Obstacle {
    /// Base position (z = ground)
    pub position: Vec3,
    /// Trunk radius in meters
    pub radius: f32,
    /// Height in meters
    pub height: f32,
}

/// Obstacles for one environment.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObstacleLayout {
    /// Obstacle model family
    pub object_type: u32,
    pub obstacles: Vec<Obstacle>,
}

impl ObstacleLayout {
    pub fn len(&self) -> usize {
        self.obstacles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obstacles.is_empty()
    }
}

/// Waypoint path flown with minimum-jerk segments of equal duration.
#[derive(Clone, Debug, PartialEq)]
pub struct Trajectory {
    /// Waypoints visited in order
    pub waypoints: Vec<Vec3>,
    /// Time spent on each segment in seconds
    pub segment_time: f64,
}

impl Trajectory {
    /// Total flight time
    pub fn duration(&self) -> f64 {
        self.waypoints.len().saturating_sub(1) as f64 * self.segment_time
    }

    /// State at time `t`, clamped to `[0, duration]`.
    ///
    /// Each segment uses the quintic `s(τ) = 10τ³ - 15τ⁴ + 6τ⁵`, so the vehicle
    /// starts and stops at every waypoint with zero velocity and acceleration.
    pub fn sample(&self, t: f64) -> QuadState {
        let Some(&first) = self.waypoints.first() else {
            return QuadState::hover(t, Vec3::ZERO);
        };
        if self.waypoints.len() < 2 || self.segment_time <= 0.0 {
            return QuadState::hover(t, first);
        }

        let segments = self.waypoints.len() - 1;
        let clamped = t.clamp(0.0, self.duration());
        let segment = ((clamped / self.segment_time) as usize).min(segments - 1);
        let tau = ((clamped - segment as f64 * self.segment_time) / self.segment_time).clamp(0.0, 1.0);

        let seg_t = self.segment_time;
        let s = 10.0 * tau.powi(3) - 15.0 * tau.powi(4) + 6.0 * tau.powi(5);
        let ds = (30.0 * tau.powi(2) - 60.0 * tau.powi(3) + 30.0 * tau.powi(4)) / seg_t;
        let dds = (60.0 * tau - 180.0 * tau.powi(2) + 120.0 * tau.powi(3)) / (seg_t * seg_t);

        let a = self.waypoints[segment];
        let delta = self.waypoints[segment + 1] - a;
        let yaw = delta.y.atan2(delta.x);

        QuadState {
            time: t,
            position: a + delta * s as f32,
            attitude: Quat::from_rotation_z(yaw),
            velocity: delta * ds as f32,
            angular_velocity: Vec3::ZERO,
            acceleration: delta * dds as f32,
        }
    }

    /// Ground-plane points along the path, at most `spacing` meters apart.
    pub fn footprint(&self, spacing: f32) -> Vec<Vec2> {
        let mut points = Vec::new();
        for pair in self.waypoints.windows(2) {
            let (a, b) = (pair[0].truncate(), pair[1].truncate());
            let steps = ((b - a).length() / spacing).ceil().max(1.0) as usize;
            for k in 0..steps {
                points.push(a.lerp(b, k as f32 / steps as f32));
            }
        }
        if let Some(last) = self.waypoints.last() {
            points.push(last.truncate());
        }
        points
    }
}

/// Parameters of [`MinimumJerkTrajectories`].
#[derive(Clone, Debug)]
pub struct TrajectoryConfig {
    /// Side of the square area waypoints are drawn from, centered on the origin
    pub area: f32,
    /// Distance between consecutive waypoints in meters
    pub waypoint_step: f32,
    /// Seconds per segment
    pub waypoint_time: f64,
    /// Segments per trajectory
    pub segments: usize,
    /// Trajectories per batch
    pub num_trajectory: usize,
    /// Flight altitude range in meters
    pub altitude: (f32, f32),
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            area: 80.0,
            waypoint_step: 7.0,
            waypoint_time: DEFAULT_WAYPOINT_TIME,
            segments: 2,
            num_trajectory: 50,
            altitude: (1.5, 3.0),
        }
    }
}

impl TrajectoryConfig {
    /// Flight time of each trajectory
    pub fn duration(&self) -> f64 {
        self.segments as f64 * self.waypoint_time
    }
}

/// Random waypoint paths flown with minimum-jerk segments.
pub struct MinimumJerkTrajectories {
    config: TrajectoryConfig,
    rng: ChaCha8Rng,
    trajectories: Vec<Trajectory>,
}

impl MinimumJerkTrajectories {
    pub fn new(config: TrajectoryConfig, seed: u64) -> Self {
        Self {
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
            trajectories: Vec::new(),
        }
    }

    pub fn config(&self) -> &TrajectoryConfig {
        &self.config
    }

    fn random_trajectory(&mut self) -> Trajectory {
        let half = self.config.area / 2.0;
        let (z_min, z_max) = self.config.altitude;
        let mut heading: f32 = self.rng.gen_range(-PI..PI);
        let mut current = Vec3::new(
            self.rng.gen_range(-half..=half),
            self.rng.gen_range(-half..=half),
            self.rng.gen_range(z_min..=z_max),
        );

        let mut waypoints = Vec::with_capacity(self.config.segments + 1);
        waypoints.push(current);
        for _ in 0..self.config.segments {
            heading += self.rng.gen_range(-PI / 4.0..=PI / 4.0);
            let step = Vec2::from_angle(heading) * self.config.waypoint_step;
            let next = (current.truncate() + step).clamp(Vec2::splat(-half), Vec2::splat(half));
            current = next.extend(self.rng.gen_range(z_min..=z_max));
            waypoints.push(current);
        }

        Trajectory {
            waypoints,
            segment_time: self.config.waypoint_time,
        }
    }
}

impl TrajectoryProvider for MinimumJerkTrajectories {
    fn generate_trajectories(&mut self) -> Result<Vec<Trajectory>, ProviderError> {
        if self.config.segments == 0 || self.config.waypoint_time <= 0.0 {
            return Err(ProviderError::InvalidConfig(
                "trajectories need at least one segment of positive duration".to_string(),
            ));
        }
        if self.config.area <= 0.0 || self.config.altitude.0 > self.config.altitude.1 {
            return Err(ProviderError::InvalidConfig(format!(
                "empty sampling region: area {}, altitude {:?}",
                self.config.area, self.config.altitude
            )));
        }
        let batch = (0..self.config.num_trajectory)
            .map(|_| self.random_trajectory())
            .collect::<Vec<_>>();
        self.trajectories = batch.clone();
        Ok(batch)
    }

    fn num_trajectories(&self) -> usize {
        self.trajectories.len()
    }

    fn state(&self, index: usize, t: f64) -> Result<QuadState, ProviderError> {
        self.trajectories
            .get(index)
            .map(|trajectory| trajectory.sample(t))
            .ok_or(ProviderError::IndexOutOfRange {
                index,
                len: self.trajectories.len(),
            })
    }
}

/// Parameters of [`DartThrowingLayout`].
#[derive(Clone, Debug)]
pub struct LayoutConfig {
    /// Obstacle model family
    pub object_type: u32,
    /// Side of the square area obstacles are placed in, centered on the origin
    pub area: f32,
    /// Minimum distance between obstacle centers
    pub radius: f32,
    /// Rejected samples tolerated per accepted obstacle
    pub max_tries: usize,
    /// Free corridor around every trajectory, measured from the obstacle surface
    pub clearance: f32,
    /// Trunk radius of generated obstacles
    pub obstacle_radius: f32,
    /// Height of generated obstacles
    pub obstacle_height: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self::for_object_type(1)
    }
}

impl LayoutConfig {
    /// Defaults for an object type; large models get wider spacing and trunks.
    pub fn for_object_type(object_type: u32) -> Self {
        let large = object_type > 4;
        Self {
            object_type,
            area: 100.0,
            radius: obstacle_radius(object_type),
            max_tries: 30,
            clearance: 1.5,
            obstacle_radius: if large { 1.2 } else { 0.4 },
            obstacle_height: if large { 15.0 } else { 8.0 },
        }
    }

    /// Override the spacing radius.
    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }
}

/// Uniform dart throwing with a spacing radius and trajectory keep-out.
pub struct DartThrowingLayout {
    config: LayoutConfig,
    rng: ChaCha8Rng,
    trajectories: Vec<Trajectory>,
    keep_out: Option<Vec<Vec2>>,
}

impl DartThrowingLayout {
    pub fn new(config: LayoutConfig, seed: u64) -> Self {
        Self {
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
            trajectories: Vec::new(),
            keep_out: None,
        }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    fn capacity(&self) -> usize {
        let cell = self.config.radius * self.config.radius;
        ((self.config.area * self.config.area) / cell).ceil() as usize
    }
}

impl ObstacleLayoutProvider for DartThrowingLayout {
    fn load_trajectories(&mut self, trajectories: &[Trajectory]) {
        self.trajectories = trajectories.to_vec();
        self.keep_out = None;
    }

    fn create_list(&mut self) -> Result<(), ProviderError> {
        if self.config.radius <= 0.0 || self.config.area <= 0.0 {
            return Err(ProviderError::InvalidConfig(format!(
                "radius {} and area {} must be positive",
                self.config.radius, self.config.area
            )));
        }
        let spacing = (self.config.clearance / 2.0).max(0.1);
        let keep_out = self
            .trajectories
            .iter()
            .flat_map(|trajectory| trajectory.footprint(spacing))
            .collect();
        self.keep_out = Some(keep_out);
        Ok(())
    }

    fn generate_trees(&mut self) -> Result<ObstacleLayout, ProviderError> {
        let keep_out = self.keep_out.as_ref().ok_or(ProviderError::ListNotCreated)?;
        let half = self.config.area / 2.0;
        let min_path_distance = self.config.clearance + self.config.obstacle_radius;
        let attempts = self.capacity() * self.config.max_tries.max(1);

        let mut centers: Vec<Vec2> = Vec::new();
        for _ in 0..attempts {
            let candidate = Vec2::new(
                self.rng.gen_range(-half..=half),
                self.rng.gen_range(-half..=half),
            );
            let spaced = centers
                .iter()
                .all(|c| c.distance(candidate) >= self.config.radius);
            let clear = keep_out
                .iter()
                .all(|p| p.distance(candidate) >= min_path_distance);
            if spaced && clear {
                centers.push(candidate);
            }
        }

        Ok(ObstacleLayout {
            object_type: self.config.object_type,
            obstacles: centers
                .into_iter()
                .map(|c| Obstacle {
                    position: c.extend(0.0),
                    radius: self.config.obstacle_radius,
                    height: self.config.obstacle_height,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight_line() -> Trajectory {
        Trajectory {
            waypoints: vec![
                Vec3::new(0.0, 0.0, 2.0),
                Vec3::new(7.0, 0.0, 2.0),
                Vec3::new(14.0, 0.0, 2.0),
            ],
            segment_time: 1.0,
        }
    }

    #[test]
    fn test_trajectory_duration() {
        assert_eq!(straight_line().duration(), 2.0);
    }

    #[test]
    fn test_trajectory_hits_waypoints() {
        let trajectory = straight_line();
        assert!((trajectory.sample(0.0).position - Vec3::new(0.0, 0.0, 2.0)).length() < 1e-5);
        assert!((trajectory.sample(1.0).position - Vec3::new(7.0, 0.0, 2.0)).length() < 1e-5);
        assert!((trajectory.sample(2.0).position - Vec3::new(14.0, 0.0, 2.0)).length() < 1e-5);
    }

    #[test]
    fn test_trajectory_midpoint_velocity() {
        let state = straight_line().sample(0.5);
        // s(0.5) = 0.5, s'(0.5) = 1.875 / T
        assert!((state.position.x - 3.5).abs() < 1e-4);
        assert!((state.velocity.x - 7.0 * 1.875).abs() < 1e-3);
        assert!(state.acceleration.length() < 1e-3);
    }

    #[test]
    fn test_trajectory_rest_at_waypoints() {
        let state = straight_line().sample(1.0);
        assert!(state.velocity.length() < 1e-4);
    }

    #[test]
    fn test_trajectory_clamps_time() {
        let trajectory = straight_line();
        let late = trajectory.sample(2.5);
        assert_eq!(late.time, 2.5);
        assert!((late.position.x - 14.0).abs() < 1e-5);
        let early = trajectory.sample(-1.0);
        assert!(early.position.x.abs() < 1e-5);
    }

    #[test]
    fn test_trajectory_yaw_follows_path() {
        let trajectory = Trajectory {
            waypoints: vec![Vec3::ZERO, Vec3::new(0.0, 5.0, 0.0)],
            segment_time: 1.0,
        };
        let forward = trajectory.sample(0.5).attitude * Vec3::X;
        assert!((forward - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_single_waypoint_hovers() {
        let trajectory = Trajectory {
            waypoints: vec![Vec3::new(1.0, 1.0, 1.0)],
            segment_time: 1.0,
        };
        let state = trajectory.sample(0.3);
        assert_eq!(state.position, Vec3::new(1.0, 1.0, 1.0));
        assert_eq!(state.velocity, Vec3::ZERO);
    }

    #[test]
    fn test_footprint_spacing() {
        let points = straight_line().footprint(1.0);
        assert_eq!(points.first(), Some(&Vec2::new(0.0, 0.0)));
        assert_eq!(points.last(), Some(&Vec2::new(14.0, 0.0)));
        for pair in points.windows(2) {
            assert!(pair[0].distance(pair[1]) <= 1.0 + 1e-5);
        }
    }

    #[test]
    fn test_generate_trajectories_count() {
        let config = TrajectoryConfig {
            num_trajectory: 7,
            ..TrajectoryConfig::default()
        };
        let mut provider = MinimumJerkTrajectories::new(config, 1);
        assert_eq!(provider.num_trajectories(), 0);
        let batch = provider.generate_trajectories().unwrap();
        assert_eq!(batch.len(), 7);
        assert_eq!(provider.num_trajectories(), 7);
        for trajectory in &batch {
            assert_eq!(trajectory.waypoints.len(), 3);
            assert_eq!(trajectory.duration(), 2.0);
        }
    }

    #[test]
    fn test_generated_waypoints_inside_area() {
        let config = TrajectoryConfig::default();
        let half = config.area / 2.0;
        let mut provider = MinimumJerkTrajectories::new(config, 9);
        for trajectory in provider.generate_trajectories().unwrap() {
            for w in &trajectory.waypoints {
                assert!(w.x.abs() <= half && w.y.abs() <= half);
                assert!(w.z >= 1.5 && w.z <= 3.0);
            }
        }
    }

    #[test]
    fn test_trajectories_reproducible() {
        let mut a = MinimumJerkTrajectories::new(TrajectoryConfig::default(), 42);
        let mut b = MinimumJerkTrajectories::new(TrajectoryConfig::default(), 42);
        assert_eq!(
            a.generate_trajectories().unwrap(),
            b.generate_trajectories().unwrap()
        );
    }

    #[test]
    fn test_state_out_of_range() {
        let provider = MinimumJerkTrajectories::new(TrajectoryConfig::default(), 0);
        assert!(matches!(
            provider.state(0, 0.0),
            Err(ProviderError::IndexOutOfRange { index: 0, len: 0 })
        ));
    }

    #[test]
    fn test_layout_requires_list() {
        let mut layout = DartThrowingLayout::new(LayoutConfig::default(), 0);
        assert!(matches!(
            layout.generate_trees(),
            Err(ProviderError::ListNotCreated)
        ));
    }

    #[test]
    fn test_layout_spacing_and_clearance() {
        let config = LayoutConfig::for_object_type(1);
        let mut layout = DartThrowingLayout::new(config.clone(), 3);
        let trajectory = straight_line();
        layout.load_trajectories(std::slice::from_ref(&trajectory));
        layout.create_list().unwrap();
        let trees = layout.generate_trees().unwrap();

        assert!(!trees.is_empty());
        assert_eq!(trees.object_type, 1);
        for (i, a) in trees.obstacles.iter().enumerate() {
            for b in &trees.obstacles[i + 1..] {
                assert!(a.position.distance(b.position) >= config.radius);
            }
        }
        let path = trajectory.footprint(0.1);
        for obstacle in &trees.obstacles {
            let center = obstacle.position.truncate();
            let nearest = path
                .iter()
                .map(|p| p.distance(center))
                .fold(f32::INFINITY, f32::min);
            // Keep-out is sampled at clearance / 2 spacing.
            assert!(nearest >= config.clearance + config.obstacle_radius - config.clearance / 4.0);
        }
    }

    #[test]
    fn test_layout_large_objects_sparser() {
        let mut small = DartThrowingLayout::new(LayoutConfig::for_object_type(1), 5);
        let mut large = DartThrowingLayout::new(LayoutConfig::for_object_type(5), 5);
        small.create_list().unwrap();
        large.create_list().unwrap();
        let small_count = small.generate_trees().unwrap().len();
        let large_count = large.generate_trees().unwrap().len();
        assert!(large_count < small_count);
    }

    #[test]
    fn test_layout_rejects_zero_radius() {
        let mut layout = DartThrowingLayout::new(LayoutConfig::default().with_radius(0.0), 0);
        assert!(matches!(
            layout.create_list(),
            Err(ProviderError::InvalidConfig(_))
        ));
    }
}
