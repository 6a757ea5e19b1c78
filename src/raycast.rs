//! CPU stereo renderer.
//!
//! [`RaycastEnvironment`] implements [`RenderingEnvironment`] without a
//! simulator: every pixel of both cameras casts a pinhole ray against the
//! ground plane and the vertical trunks of the current obstacle layout.
//!
//! The camera sits at the vehicle origin looking along body `+x` (body `y`
//! left, `z` up). The right camera is shifted by `baseline` along the body's
//! right axis. Depth is measured along the optical axis and normalized with
//! the camera's near/far planes, so it goes through the same
//! [`depth_to_disparity`](crate::depth_to_disparity) conversion as simulator
//! output.

use crate::providers::{Obstacle, ObstacleLayout};
use crate::render::{depth_from_raw, rgb_from_raw, RenderError, RenderingEnvironment};
use crate::{CameraConfig, QuadState};
use bevy::math::{Quat, Vec2, Vec3};
use image::RgbImage;
use ndarray::Array2;
use tracing::debug;

const SKY_HORIZON: [f32; 3] = [200.0, 220.0, 235.0];
const SKY_ZENITH: [f32; 3] = [90.0, 140.0, 215.0];
const GROUND_LIGHT: [f32; 3] = [96.0, 140.0, 72.0];
const GROUND_DARK: [f32; 3] = [70.0, 110.0, 55.0];
const TRUNK: [f32; 3] = [115.0, 82.0, 52.0];

// Hits closer than this along the ray are ignored
const MIN_HIT: f32 = 1e-4;

#[derive(Debug, Clone, Copy)]
enum Surface {
    Ground,
    Trunk { normal: Vec2 },
}

#[derive(Debug, Clone, Copy)]
struct Hit {
    /// Distance along the optical axis
    depth: f32,
    point: Vec3,
    surface: Surface,
}

#[derive(Debug)]
struct Frame {
    step: u64,
    left: Vec<u8>,
    right: Vec<u8>,
    depth: Vec<f32>,
}

/// Ray-casting stereo renderer over the current obstacle layout.
#[derive(Debug)]
pub struct RaycastEnvironment {
    camera: CameraConfig,
    obstacles: Vec<Obstacle>,
    connected: bool,
    pose: Option<(Vec3, Quat)>,
    frame: Option<Frame>,
}

impl RaycastEnvironment {
    pub fn new(camera: CameraConfig) -> Self {
        Self {
            camera,
            obstacles: Vec::new(),
            connected: false,
            pose: None,
            frame: None,
        }
    }

    pub fn camera(&self) -> &CameraConfig {
        &self.camera
    }

    /// Obstacles of the current scene
    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn ensure_connected(&self) -> Result<(), RenderError> {
        if self.connected {
            Ok(())
        } else {
            Err(RenderError::NotConnected)
        }
    }

    fn frame(&self) -> Result<&Frame, RenderError> {
        self.ensure_connected()?;
        self.frame.as_ref().ok_or(RenderError::NoFrame { step: None })
    }

    /// Body-frame ray through the center of pixel `(u, v)`, scaled so its
    /// forward component is 1.
    fn pixel_ray(&self, u: u32, v: u32) -> Vec3 {
        let f = self.camera.focal_length_px();
        let cx = self.camera.width as f32 / 2.0;
        let cy = self.camera.height as f32 / 2.0;
        Vec3::new(
            1.0,
            -((u as f32 + 0.5 - cx) / f),
            -((v as f32 + 0.5 - cy) / f),
        )
    }

    fn cast(&self, origin: Vec3, direction: Vec3) -> Option<Hit> {
        let mut best: Option<Hit> = None;
        let mut consider = |t: f32, surface: Surface| {
            if t > MIN_HIT && best.map_or(true, |b| t < b.depth) {
                best = Some(Hit {
                    depth: t,
                    point: origin + direction * t,
                    surface,
                });
            }
        };

        if direction.z < -f32::EPSILON {
            consider(-origin.z / direction.z, Surface::Ground);
        }

        for obstacle in &self.obstacles {
            if let Some((t, normal)) = intersect_trunk(origin, direction, obstacle) {
                consider(t, Surface::Trunk { normal });
            }
        }
        best
    }

    fn normalized_depth(&self, hit: Option<Hit>) -> f32 {
        let (near, far) = (self.camera.near, self.camera.far);
        match hit {
            Some(hit) if hit.depth <= far => ((hit.depth - near) / (far - near)).clamp(0.0, 1.0),
            _ => 1.0,
        }
    }

    fn shade(&self, hit: Option<Hit>, direction: Vec3) -> [u8; 3] {
        let color = match hit {
            Some(hit) if hit.depth <= self.camera.far => match hit.surface {
                Surface::Ground => {
                    let cell = hit.point.x.floor() as i64 + hit.point.y.floor() as i64;
                    if cell.rem_euclid(2) == 0 {
                        GROUND_LIGHT
                    } else {
                        GROUND_DARK
                    }
                }
                Surface::Trunk { normal } => {
                    let light = Vec2::new(0.6, 0.8);
                    let k = 0.4 + 0.6 * normal.dot(light).max(0.0);
                    TRUNK.map(|c| c * k)
                }
            },
            _ => sky(direction),
        };
        color.map(|c| c.round().clamp(0.0, 255.0) as u8)
    }

    fn render_view(&self, origin: Vec3, attitude: Quat, depth: Option<&mut Vec<f32>>) -> Vec<u8> {
        let (width, height) = (self.camera.width, self.camera.height);
        let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
        let mut depth = depth;
        for v in 0..height {
            for u in 0..width {
                let direction = attitude * self.pixel_ray(u, v);
                let hit = self.cast(origin, direction);
                rgb.extend_from_slice(&self.shade(hit, direction));
                if let Some(buf) = depth.as_deref_mut() {
                    buf.push(self.normalized_depth(hit));
                }
            }
        }
        rgb
    }
}

fn sky(direction: Vec3) -> [f32; 3] {
    let elevation = (direction.z / direction.length().max(f32::EPSILON)).clamp(0.0, 1.0);
    std::array::from_fn(|i| SKY_HORIZON[i] + (SKY_ZENITH[i] - SKY_HORIZON[i]) * elevation)
}

/// First intersection of a ray with the side of a vertical cylinder standing on
/// `z = 0`. Returns the ray parameter and the outward surface normal.
fn intersect_trunk(origin: Vec3, direction: Vec3, obstacle: &Obstacle) -> Option<(f32, Vec2)> {
    let center = obstacle.position.truncate();
    let o = origin.truncate() - center;
    let d = direction.truncate();
    let a = d.length_squared();
    if a <= f32::EPSILON {
        return None;
    }
    let b = 2.0 * o.dot(d);
    let c = o.length_squared() - obstacle.radius * obstacle.radius;
    // Viewpoint inside the trunk
    if c <= 0.0 {
        return None;
    }
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return None;
    }
    let t = (-b - disc.sqrt()) / (2.0 * a);
    if t <= MIN_HIT {
        return None;
    }
    let z = origin.z + direction.z * t - obstacle.position.z;
    if !(0.0..=obstacle.height).contains(&z) {
        return None;
    }
    let normal = (o + d * t).normalize_or_zero();
    Some((t, normal))
}

impl RenderingEnvironment for RaycastEnvironment {
    fn image_size(&self) -> (u32, u32) {
        (self.camera.width, self.camera.height)
    }

    fn set_obstacles(&mut self, layout: &ObstacleLayout) -> Result<(), RenderError> {
        debug!(obstacles = layout.len(), "raycast scene replaced");
        self.obstacles = layout.obstacles.clone();
        self.frame = None;
        Ok(())
    }

    fn connect(&mut self) -> Result<(), RenderError> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), RenderError> {
        self.connected = false;
        self.frame = None;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), RenderError> {
        self.ensure_connected()?;
        self.pose = None;
        self.frame = None;
        Ok(())
    }

    fn set_quad_state(&mut self, state: &QuadState) -> Result<(), RenderError> {
        self.ensure_connected()?;
        self.pose = Some((state.position, state.attitude));
        Ok(())
    }

    fn render(&mut self, step: u64) -> Result<(), RenderError> {
        self.ensure_connected()?;
        let (position, attitude) = self
            .pose
            .ok_or_else(|| RenderError::Backend("vehicle state not set".to_string()))?;

        let pixels = self.camera.width as usize * self.camera.height as usize;
        let mut depth = Vec::with_capacity(pixels);
        let left = self.render_view(position, attitude, Some(&mut depth));
        let right_origin = position + attitude * Vec3::new(0.0, -self.camera.baseline, 0.0);
        let right = self.render_view(right_origin, attitude, None);

        self.frame = Some(Frame {
            step,
            left,
            right,
            depth,
        });
        Ok(())
    }

    fn left_image(&mut self) -> Result<RgbImage, RenderError> {
        let (w, h) = self.image_size();
        rgb_from_raw(self.frame()?.left.clone(), w, h)
    }

    fn right_image(&mut self) -> Result<RgbImage, RenderError> {
        let (w, h) = self.image_size();
        rgb_from_raw(self.frame()?.right.clone(), w, h)
    }

    fn depth_image(&mut self) -> Result<Array2<f32>, RenderError> {
        let (w, h) = self.image_size();
        let frame = self.frame()?;
        debug!(step = frame.step, "raycast depth pulled");
        depth_from_raw(frame.depth.clone(), w, h)
    }
}
