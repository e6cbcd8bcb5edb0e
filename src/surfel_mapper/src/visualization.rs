//! Marker payloads for surfel visualization.
//!
//! Each surfel becomes a flat cylinder (a disk) whose axis follows the
//! surfel normal, sized by the surfel radius and colored by its RGB.

use std::f64::consts::PI;

use nalgebra::{UnitQuaternion, Vector3};
use serde::Serialize;
use surfel_map::{Surfel, SurfelId, SurfelMap};
use tracing::warn;

/// Thickness of a disk marker (m).
const DISK_THICKNESS: f32 = 0.0001;

/// One disk marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskMarker {
    pub id: u32,
    pub position: [f32; 3],
    /// Orientation as `[x, y, z, w]`
    pub orientation: [f32; 4],
    pub scale: [f32; 3],
    /// RGBA in `[0, 1]`
    pub color: [f32; 4],
}

/// Markers for one publish_map request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerArray {
    pub frame_id: String,
    pub namespace: String,
    pub markers: Vec<DiskMarker>,
    /// Surfels in the region left out because of the marker cap
    pub truncated: usize,
}

/// Configuration for marker generation.
#[derive(Debug, Clone)]
pub struct MarkerConfig {
    pub frame_id: String,
    pub namespace: String,
    pub max_markers: usize,
}

/// Orientation that maps the marker z axis onto `normal`.
fn disk_orientation(normal: &Vector3<f32>) -> UnitQuaternion<f64> {
    let normal = normal.cast::<f64>();
    UnitQuaternion::rotation_between(&Vector3::z(), &normal).unwrap_or_else(|| {
        if normal.z < 0.0 {
            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), PI)
        } else {
            UnitQuaternion::identity()
        }
    })
}

pub fn surfel_marker(id: u32, surfel: &Surfel) -> DiskMarker {
    let q = disk_orientation(&surfel.normal);
    let p = surfel.position;
    let diameter = surfel.radius * 2.0;
    DiskMarker {
        id,
        position: [p.x, p.y, p.z],
        orientation: [q.i as f32, q.j as f32, q.k as f32, q.w as f32],
        scale: [diameter, diameter, DISK_THICKNESS],
        color: [
            surfel.color[0] as f32 / 255.0,
            surfel.color[1] as f32 / 255.0,
            surfel.color[2] as f32 / 255.0,
            1.0,
        ],
    }
}

/// Build disk markers for `ids`, capped at `config.max_markers`.
pub fn surfel_markers(map: &SurfelMap, ids: &[SurfelId], config: &MarkerConfig) -> MarkerArray {
    let markers: Vec<DiskMarker> = ids
        .iter()
        .filter_map(|&id| map.surfel(id))
        .take(config.max_markers)
        .enumerate()
        .map(|(i, surfel)| surfel_marker(i as u32, surfel))
        .collect();

    let truncated = ids.len().saturating_sub(markers.len());
    if truncated > 0 {
        warn!(
            requested = ids.len(),
            published = markers.len(),
            "Too many surfels in region, truncating marker array"
        );
    }

    MarkerArray {
        frame_id: config.frame_id.clone(),
        namespace: config.namespace.clone(),
        markers,
        truncated,
    }
}
