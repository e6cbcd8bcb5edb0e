//! Pinhole camera model used by the frustum gate and surfel radius.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Pinhole intrinsics of the depth camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

impl Default for CameraIntrinsics {
    /// Nominal Kinect-class VGA depth camera.
    fn default() -> Self {
        Self {
            fx: 525.0,
            fy: 525.0,
            cx: 319.5,
            cy: 239.5,
            width: default_width(),
            height: default_height(),
        }
    }
}

impl CameraIntrinsics {
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32, width: u32, height: u32) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
        }
    }

    /// Build from a row-major 3x3 camera matrix `K`.
    pub fn from_k(k: &[f64; 9], width: u32, height: u32) -> Self {
        Self::new(
            k[0] as f32,
            k[4] as f32,
            k[2] as f32,
            k[5] as f32,
            width,
            height,
        )
    }

    pub fn mean_focal(&self) -> f32 {
        0.5 * (self.fx + self.fy)
    }

    /// Project a camera-frame point to pixel coordinates.
    ///
    /// Returns `None` for points at or behind the image plane.
    pub fn project(&self, p: &[f32; 3]) -> Option<[f32; 2]> {
        if p[2] <= 0.0 {
            return None;
        }
        Some([
            self.fx * p[0] / p[2] + self.cx,
            self.fy * p[1] / p[2] + self.cy,
        ])
    }

    /// Whether a camera-frame point projects inside the image.
    pub fn in_frustum(&self, p: &[f32; 3]) -> bool {
        match self.project(p) {
            Some([u, v]) => {
                u >= 0.0 && u < self.width as f32 && v >= 0.0 && v < self.height as f32
            }
            None => false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let finite_positive = |v: f32| v.is_finite() && v > 0.0;
        if !finite_positive(self.fx) || !finite_positive(self.fy) {
            return Err(ConfigError::InvalidIntrinsics(format!(
                "focal lengths must be positive, got fx={} fy={}",
                self.fx, self.fy
            )));
        }
        if !self.cx.is_finite() || !self.cy.is_finite() {
            return Err(ConfigError::InvalidIntrinsics(
                "principal point is not finite".to_string(),
            ));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidIntrinsics(format!(
                "image size {}x{} is empty",
                self.width, self.height
            )));
        }
        Ok(())
    }
}
