//! Surfel map configuration.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::normals::NormalEstimation;

/// Configuration for fusion and export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfelMapConfig {
    /// Maximum distance along the surfel normal for an observation to be
    /// merged rather than replace the surfel (default: 0.005 m)
    pub dmax: f32,
    /// Minimum sensor-frame depth accepted (default: 0.8 m)
    pub min_sensor_dist: f32,
    /// Maximum sensor-frame depth accepted (default: 4.0 m)
    pub max_sensor_dist: f32,
    /// Octree leaf edge; at most one surfel per leaf (default: 0.2 m)
    pub octree_resolution: f32,
    /// Voxel edge of the downsampled preview (default: 0.2 m)
    pub preview_resolution: f32,
    /// Surfels averaged per preview voxel (default: 3)
    pub preview_samples_per_voxel: usize,
    /// Minimum confidence for export (default: 5)
    pub confidence_threshold: u32,
    /// Minimum `|n_z|` of the sensor-frame normal (default: 0.2)
    pub min_normal_alignment: f32,
    /// Reject points that project outside the image (default: true)
    pub use_frustum: bool,
    /// Maximum number of surfels (default: 30 000 000)
    pub scene_capacity: usize,
    /// Merge into occupied leaves; when false they are left untouched (default: true)
    pub use_update: bool,
    /// Log a summary for every fused cloud (default: true)
    pub log_fusion: bool,
    /// Neighbourhood radius for unorganized normals (default: 0.03 m)
    pub normal_search_radius: f32,
    /// Minimum neighbours for an unorganized normal (default: 5)
    pub normal_min_neighbors: usize,
}

impl Default for SurfelMapConfig {
    fn default() -> Self {
        Self {
            dmax: 0.005,
            min_sensor_dist: 0.8,
            max_sensor_dist: 4.0,
            octree_resolution: 0.2,
            preview_resolution: 0.2,
            preview_samples_per_voxel: 3,
            confidence_threshold: 5,
            min_normal_alignment: 0.2,
            use_frustum: true,
            scene_capacity: 30_000_000,
            use_update: true,
            log_fusion: true,
            normal_search_radius: 0.03,
            normal_min_neighbors: 5,
        }
    }
}

impl SurfelMapConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("dmax", self.dmax),
            ("octree_resolution", self.octree_resolution),
            ("preview_resolution", self.preview_resolution),
            ("normal_search_radius", self.normal_search_radius),
            ("max_sensor_dist", self.max_sensor_dist),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NonPositive { name, value });
            }
        }

        if !(self.min_sensor_dist >= 0.0 && self.min_sensor_dist <= self.max_sensor_dist) {
            return Err(ConfigError::EmptyRange {
                min: self.min_sensor_dist,
                max: self.max_sensor_dist,
            });
        }

        if !(0.0..=1.0).contains(&self.min_normal_alignment) {
            return Err(ConfigError::AlignmentOutOfRange(self.min_normal_alignment));
        }

        // u32::MAX marks empty octree slots.
        if self.scene_capacity == 0 || self.scene_capacity >= u32::MAX as usize {
            return Err(ConfigError::InvalidCapacity(self.scene_capacity));
        }

        if self.preview_samples_per_voxel == 0 {
            return Err(ConfigError::ZeroCount("preview_samples_per_voxel"));
        }

        Ok(())
    }

    pub fn normal_estimation(&self) -> NormalEstimation {
        NormalEstimation {
            search_radius: self.normal_search_radius,
            min_neighbors: self.normal_min_neighbors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = SurfelMapConfig::default();
        assert_eq!(config.dmax, 0.005);
        assert_eq!(config.min_sensor_dist, 0.8);
        assert_eq!(config.max_sensor_dist, 4.0);
        assert_eq!(config.octree_resolution, 0.2);
        assert_eq!(config.preview_samples_per_voxel, 3);
        assert_eq!(config.confidence_threshold, 5);
        assert_eq!(config.min_normal_alignment, 0.2);
        assert_eq!(config.scene_capacity, 30_000_000);
        assert!(config.use_frustum);
        assert!(config.use_update);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = SurfelMapConfig {
            octree_resolution: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositive { name: "octree_resolution", .. })
        ));

        let config = SurfelMapConfig {
            min_sensor_dist: 5.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptyRange { .. })));

        let config = SurfelMapConfig {
            min_normal_alignment: 1.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::AlignmentOutOfRange(_))));

        let config = SurfelMapConfig {
            scene_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCapacity(0))));
    }
}
