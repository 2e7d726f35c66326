//! Camera for cluster-rendered 3D views
//!
//! A look-at camera with perspective/orthographic projection. The frame
//! coordinator consumes its view direction (for the partition visitation
//! order) and its clipping range (reset against the collective data bounds
//! after camera moves).

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::Bounds;

/// Camera projection mode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectionMode {
    Perspective,
    Orthographic,
}

/// Camera state
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Camera {
    /// Camera position in world space
    pub position: [f64; 3],

    /// Look-at target
    pub target: [f64; 3],

    /// Up vector
    pub up: [f64; 3],

    /// Field of view in radians (perspective)
    pub fov: f64,

    /// Near clipping plane
    pub near: f64,

    /// Far clipping plane
    pub far: f64,

    /// Projection mode
    pub projection: ProjectionMode,
}

impl Camera {
    /// Create a perspective camera
    pub fn perspective(position: [f64; 3], target: [f64; 3], fov_degrees: f64) -> Self {
        Self {
            position,
            target,
            up: [0.0, 1.0, 0.0],
            fov: fov_degrees.to_radians(),
            near: 0.1,
            far: 1000.0,
            projection: ProjectionMode::Perspective,
        }
    }

    /// Normalized direction the camera looks along
    pub fn view_direction(&self) -> [f64; 3] {
        let dir = Vector3::from(self.target) - Vector3::from(self.position);
        let len = dir.norm();
        if len <= f64::EPSILON {
            return [0.0, 0.0, -1.0];
        }
        (dir / len).into()
    }

    /// Distance from camera to target
    pub fn distance(&self) -> f64 {
        (Vector3::from(self.target) - Vector3::from(self.position)).norm()
    }

    /// Current clipping range as (near, far)
    pub fn clipping_range(&self) -> (f64, f64) {
        (self.near, self.far)
    }

    /// Set the clipping range, requiring `0 < near < far`
    pub fn set_clipping_range(&mut self, near: f64, far: f64) -> Result<(), ConfigError> {
        if !(near.is_finite() && far.is_finite()) || near <= 0.0 || near >= far {
            return Err(ConfigError::InvalidClippingRange { near, far });
        }
        self.near = near;
        self.far = far;
        Ok(())
    }

    /// Reset the clipping range to tightly enclose the given bounds.
    ///
    /// Empty bounds leave the range untouched.
    pub fn reset_clipping_range(&mut self, bounds: &Bounds) {
        if bounds.is_empty() {
            return;
        }
        let dir = Vector3::from(self.view_direction());
        let position = Vector3::from(self.position);

        // Project all eight corners onto the view direction.
        let mut nearest = f64::INFINITY;
        let mut farthest = f64::NEG_INFINITY;
        for ix in 0..2 {
            for iy in 0..2 {
                for iz in 0..2 {
                    let corner = Vector3::new(
                        if ix == 0 { bounds.min[0] } else { bounds.max[0] },
                        if iy == 0 { bounds.min[1] } else { bounds.max[1] },
                        if iz == 0 { bounds.min[2] } else { bounds.max[2] },
                    );
                    let depth = (corner - position).dot(&dir);
                    nearest = nearest.min(depth);
                    farthest = farthest.max(depth);
                }
            }
        }

        let margin = (farthest - nearest).max(1e-3) * 0.01;
        self.near = (nearest - margin).max(farthest * 1e-4).max(1e-6);
        self.far = farthest + margin;
    }

    /// Orbit around the target by the given azimuth/elevation deltas (radians)
    pub fn orbit(&mut self, delta_phi: f64, delta_theta: f64) {
        let offset = Vector3::from(self.position) - Vector3::from(self.target);
        let radius = offset.norm();
        if radius <= f64::EPSILON {
            return;
        }

        let mut theta = (offset.y / radius).acos();
        let mut phi = offset.z.atan2(offset.x);
        phi += delta_phi;
        theta = (theta + delta_theta).clamp(0.01, std::f64::consts::PI - 0.01);

        self.position = [
            self.target[0] + radius * theta.sin() * phi.cos(),
            self.target[1] + radius * theta.cos(),
            self.target[2] + radius * theta.sin() * phi.sin(),
        ];
    }

    /// Zoom by scaling the distance to the target
    pub fn zoom(&mut self, factor: f64) {
        let offset = Vector3::from(self.position) - Vector3::from(self.target);
        let scaled = offset * factor.clamp(1e-3, 1e3);
        self.position = (Vector3::from(self.target) + scaled).into();
    }

    /// Move the camera so the given bounds fill the view
    pub fn fit_to_bounds(&mut self, bounds: &Bounds) {
        if bounds.is_empty() {
            return;
        }
        let center = bounds.center();
        let radius = bounds.diagonal_length() / 2.0;
        let distance = match self.projection {
            ProjectionMode::Perspective => radius / (self.fov / 2.0).tan().max(1e-6),
            ProjectionMode::Orthographic => radius * 2.0,
        };

        let back = -Vector3::from(self.view_direction());
        self.target = center;
        self.position = (Vector3::from(center) + back * distance.max(1e-6)).into();
        self.reset_clipping_range(bounds);
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::perspective([0.0, 0.0, 5.0], [0.0, 0.0, 0.0], 45.0)
    }
}
