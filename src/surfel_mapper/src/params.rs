//! Node parameters, loaded from a TOML file.
//!
//! Every section and field is optional; missing values fall back to the
//! defaults below.
//!
//! ```toml
//! [map]
//! dmax = 0.005
//! octree_resolution = 0.2
//! scene_capacity = 30000000
//!
//! [camera]          # optional; otherwise the map waits for camera_info
//! fx = 525.0
//! fy = 525.0
//! cx = 319.5
//! cy = 239.5
//!
//! [queue]
//! warn_depth = 50
//!
//! [node]
//! tick_hz = 2.0
//! max_markers = 100000
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use surfel_map::{CameraIntrinsics, CloudQueueConfig, SurfelMapConfig};

/// Slowest accepted tick rate (one tick every 100 s).
const MIN_TICK_HZ: f64 = 0.01;
/// Fastest accepted tick rate.
const MAX_TICK_HZ: f64 = 1000.0;

/// Node-level settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeParams {
    /// Preview publication and drain retry rate (default: 2 Hz)
    pub tick_hz: f64,
    /// Maximum markers per publish_map response (default: 100000)
    pub max_markers: usize,
    /// Frame of published markers and previews (default: "odom")
    pub map_frame: String,
    /// Marker namespace (default: "surfelmap")
    pub marker_namespace: String,
    /// Destination of save_map (default: "surfel_map.jsonl")
    pub save_path: PathBuf,
}

impl Default for NodeParams {
    fn default() -> Self {
        Self {
            tick_hz: 2.0,
            max_markers: 100_000,
            map_frame: "odom".to_string(),
            marker_namespace: "surfelmap".to_string(),
            save_path: PathBuf::from("surfel_map.jsonl"),
        }
    }
}

/// All surfel mapper parameters.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MapperParams {
    pub map: SurfelMapConfig,
    /// Static intrinsics. When absent the map is created on the first
    /// camera_info event.
    pub camera: Option<CameraIntrinsics>,
    pub queue: CloudQueueConfig,
    pub node: NodeParams,
}

impl MapperParams {
    /// Load and validate parameters from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read parameter file {}", path.display()))?;
        let params = Self::from_toml(&text)
            .with_context(|| format!("invalid parameter file {}", path.display()))?;
        Ok(params)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let params: Self = toml::from_str(text)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        self.map.validate()?;
        if let Some(camera) = &self.camera {
            camera.validate()?;
        }
        let tick_hz = self.node.tick_hz;
        if !(MIN_TICK_HZ..=MAX_TICK_HZ).contains(&tick_hz) {
            bail!("node.tick_hz must be within [{MIN_TICK_HZ}, {MAX_TICK_HZ}], got {tick_hz}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let params = MapperParams::from_toml("").unwrap();
        assert_eq!(params, MapperParams::default());
        assert_eq!(params.map.dmax, 0.005);
        assert_eq!(params.map.confidence_threshold, 5);
        assert!(params.camera.is_none());
        assert_eq!(params.queue.warn_depth, 50);
        assert_eq!(params.node.tick_hz, 2.0);
        assert_eq!(params.node.max_markers, 100_000);
    }

    #[test]
    fn test_partial_sections() {
        let params = MapperParams::from_toml(
            r#"
            [map]
            dmax = 0.01
            use_update = false

            [camera]
            fx = 500.0
            fy = 500.0
            cx = 320.0
            cy = 240.0

            [queue]
            max_depth = 20
            "#,
        )
        .unwrap();

        assert_eq!(params.map.dmax, 0.01);
        assert!(!params.map.use_update);
        assert_eq!(params.map.octree_resolution, 0.2);
        let camera = params.camera.unwrap();
        assert_eq!(camera.fx, 500.0);
        assert_eq!(camera.width, 640);
        assert_eq!(camera.height, 480);
        assert_eq!(params.queue.max_depth, Some(20));
        assert_eq!(params.queue.warn_depth, 50);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(MapperParams::from_toml("[map]\noctree_resolution = -1.0\n").is_err());
        assert!(MapperParams::from_toml("[node]\ntick_hz = 0.0\n").is_err());
        assert!(MapperParams::from_toml("[node]\ntick_hz = 1e-310\n").is_err());
        assert!(MapperParams::from_toml("[node]\ntick_hz = 5000.0\n").is_err());
        assert!(MapperParams::from_toml("[node]\ntick_hz = 0.01\n").is_ok());
        assert!(MapperParams::from_toml("[map]\nunknown_type = [\n").is_err());
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/surfel_mapper.toml");
        let params = MapperParams::load(&path).unwrap();
        assert_eq!(params, MapperParams::default());
    }

    #[test]
    fn test_load_missing_file() {
        let err = MapperParams::load(Path::new("/nonexistent/surfel_mapper.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read parameter file"));
    }
}
