//! Synthetic clouds and trajectories for testing.
//!
//! Geometry is generated with a known ground truth: fronto-parallel planes
//! back-projected through the camera model and straight-line trajectories.

use crate::camera::CameraIntrinsics;
use crate::stamp::Stamp;
use crate::types::{ColoredPoint, RawCloud, StampedPose};

/// Generate an organized cloud of a plane at constant depth.
///
/// The `width x height` pixel window is centred on the optical axis and
/// back-projected through `camera`, so neighbouring points are one pixel
/// footprint apart.
///
/// # Arguments
/// * `camera` - Intrinsics used for back-projection (only the focal lengths)
/// * `depth` - Distance of the plane along the optical axis (m)
/// * `rgb` - Color of every point
pub fn make_plane_cloud(
    stamp: Stamp,
    camera: &CameraIntrinsics,
    width: u32,
    height: u32,
    depth: f32,
    rgb: [u8; 3],
) -> RawCloud {
    let u0 = (width as f32 - 1.0) / 2.0;
    let v0 = (height as f32 - 1.0) / 2.0;

    let mut points = Vec::with_capacity(width as usize * height as usize);
    for v in 0..height {
        for u in 0..width {
            let x = (u as f32 - u0) * depth / camera.fx;
            let y = (v as f32 - v0) * depth / camera.fy;
            points.push(ColoredPoint::new([x, y, depth], rgb));
        }
    }

    RawCloud::organized(stamp, "camera", width, height, points)
}

/// A one-point cloud carrying an explicit sensor-frame normal.
pub fn single_point_cloud(
    stamp: Stamp,
    xyz: [f32; 3],
    normal: [f32; 3],
    rgb: [u8; 3],
) -> RawCloud {
    RawCloud::unorganized(stamp, "camera", vec![ColoredPoint::new(xyz, rgb)])
        .with_normals(vec![normal])
}

/// Generate poses moving along x at constant velocity with identity
/// orientation.
///
/// # Arguments
/// * `start_ms` - Stamp of the first pose in milliseconds
/// * `step_ms` - Time between poses in milliseconds
/// * `count` - Number of poses
/// * `velocity` - Speed along x (m/s)
pub fn make_linear_trajectory(
    start_ms: i64,
    step_ms: i64,
    count: usize,
    velocity: f64,
) -> Vec<StampedPose> {
    (0..count)
        .map(|i| {
            let ms = start_ms + step_ms * i as i64;
            let x = velocity * (ms - start_ms) as f64 / 1000.0;
            StampedPose::from_wxyz(Stamp::from_millis(ms), [1.0, 0.0, 0.0, 0.0], [x, 0.0, 0.0])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_plane_cloud_layout() {
        let camera = CameraIntrinsics::default();
        let cloud = make_plane_cloud(Stamp::default(), &camera, 5, 3, 2.0, [1, 2, 3]);

        assert!(cloud.is_organized());
        assert_eq!(cloud.len(), 15);
        // Centre pixel lies on the optical axis.
        assert_relative_eq!(cloud.points[7].xyz[0], 0.0);
        assert_relative_eq!(cloud.points[7].xyz[1], 0.0);
        // Adjacent pixels are one footprint apart and project inside the image.
        assert_relative_eq!(cloud.points[8].xyz[0] - cloud.points[7].xyz[0], 2.0 / 525.0);
        assert!(cloud.points.iter().all(|p| camera.in_frustum(&p.xyz)));
    }

    #[test]
    fn test_linear_trajectory() {
        let poses = make_linear_trajectory(10_000, 100, 11, 2.0);
        assert_eq!(poses.len(), 11);
        assert_eq!(poses[0].stamp, Stamp::new(10, 0));
        assert_eq!(poses[10].stamp, Stamp::new(11, 0));
        assert_relative_eq!(poses[10].origin.x, 2.0);
    }
}
