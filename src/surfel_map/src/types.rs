//! Cloud, pose and region types shared by the synchronizer, queue and map.

use nalgebra::{Isometry3, Point3, Quaternion, Translation3, UnitQuaternion};

use crate::stamp::Stamp;

/// A single colored point in the sensor frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColoredPoint {
    pub xyz: [f32; 3],
    pub rgb: [u8; 3],
}

impl ColoredPoint {
    pub const fn new(xyz: [f32; 3], rgb: [u8; 3]) -> Self {
        Self { xyz, rgb }
    }

    pub fn is_finite(&self) -> bool {
        self.xyz.iter().all(|v| v.is_finite())
    }
}

/// A sensor pose in the map frame, valid at `stamp`.
#[derive(Debug, Clone, PartialEq)]
pub struct StampedPose {
    pub stamp: Stamp,
    pub orientation: UnitQuaternion<f64>,
    pub origin: Point3<f64>,
}

impl StampedPose {
    pub fn new(stamp: Stamp, orientation: UnitQuaternion<f64>, origin: Point3<f64>) -> Self {
        Self {
            stamp,
            orientation,
            origin,
        }
    }

    /// Build from a scalar-first quaternion `[w, x, y, z]`, normalizing it.
    pub fn from_wxyz(stamp: Stamp, wxyz: [f64; 4], origin: [f64; 3]) -> Self {
        let [w, x, y, z] = wxyz;
        Self {
            stamp,
            orientation: UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)),
            origin: Point3::from(origin),
        }
    }

    pub fn identity(stamp: Stamp) -> Self {
        Self::new(stamp, UnitQuaternion::identity(), Point3::origin())
    }

    /// Sensor-to-map transform.
    pub fn isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.origin.coords), self.orientation)
    }
}

/// A point cloud as it arrives from the camera, not yet associated with a pose.
///
/// `normals`, when present, holds one sensor-frame normal per point and is
/// used instead of estimating normals from the point neighbourhood.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCloud {
    pub stamp: Stamp,
    pub frame_id: String,
    pub width: u32,
    pub height: u32,
    pub points: Vec<ColoredPoint>,
    pub normals: Option<Vec<[f32; 3]>>,
}

impl RawCloud {
    /// An unorganized cloud (`height == 1`).
    pub fn unorganized(
        stamp: Stamp,
        frame_id: impl Into<String>,
        points: Vec<ColoredPoint>,
    ) -> Self {
        Self {
            stamp,
            frame_id: frame_id.into(),
            width: points.len() as u32,
            height: 1,
            points,
            normals: None,
        }
    }

    /// A row-major organized cloud of `width * height` points.
    pub fn organized(
        stamp: Stamp,
        frame_id: impl Into<String>,
        width: u32,
        height: u32,
        points: Vec<ColoredPoint>,
    ) -> Self {
        debug_assert_eq!(width as usize * height as usize, points.len());
        Self {
            stamp,
            frame_id: frame_id.into(),
            width,
            height,
            points,
            normals: None,
        }
    }

    /// Attach precomputed sensor-frame normals, one per point. Points past
    /// the end of `normals` are treated as having no normal.
    pub fn with_normals(mut self, normals: Vec<[f32; 3]>) -> Self {
        self.normals = Some(normals);
        self
    }

    pub fn is_organized(&self) -> bool {
        self.height > 1 && self.width as usize * self.height as usize == self.points.len()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Associate the cloud with its pose. Consumes the cloud, so a pose is
    /// attached exactly once.
    pub fn attach_pose(self, pose: StampedPose) -> PosedCloud {
        PosedCloud { cloud: self, pose }
    }
}

/// A cloud with the pose valid at its capture time.
#[derive(Debug, Clone, PartialEq)]
pub struct PosedCloud {
    cloud: RawCloud,
    pose: StampedPose,
}

impl PosedCloud {
    pub fn cloud(&self) -> &RawCloud {
        &self.cloud
    }

    pub fn pose(&self) -> &StampedPose {
        &self.pose
    }

    pub fn stamp(&self) -> Stamp {
        self.cloud.stamp
    }

    pub fn into_parts(self) -> (RawCloud, StampedPose) {
        (self.cloud, self.pose)
    }
}

/// Axis-aligned region in the map frame. Containment is inclusive on every face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    min: [f32; 3],
    max: [f32; 3],
}

impl BoundingBox {
    /// Build from two opposite corners given in any order.
    pub fn from_corners(a: [f32; 3], b: [f32; 3]) -> Self {
        Self {
            min: [a[0].min(b[0]), a[1].min(b[1]), a[2].min(b[2])],
            max: [a[0].max(b[0]), a[1].max(b[1]), a[2].max(b[2])],
        }
    }

    pub fn min(&self) -> [f32; 3] {
        self.min
    }

    pub fn max(&self) -> [f32; 3] {
        self.max
    }

    pub fn contains(&self, p: &[f32; 3]) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }
}

/// A downsampled map point for live preview.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewPoint {
    pub xyz: [f32; 3],
    pub rgb: [u8; 3],
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    #[test]
    fn test_bounding_box_normalizes_corners() {
        let bbox = BoundingBox::from_corners([1.0, -2.0, 3.0], [-1.0, 2.0, 0.0]);
        assert_eq!(bbox.min(), [-1.0, -2.0, 0.0]);
        assert_eq!(bbox.max(), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_bounding_box_inclusive_faces() {
        let bbox = BoundingBox::from_corners([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        assert!(bbox.contains(&[1.0, 1.0, 1.0]));
        assert!(bbox.contains(&[0.0, 0.5, 1.0]));
        assert!(!bbox.contains(&[1.0001, 0.5, 0.5]));
    }

    #[test]
    fn test_organized_detection() {
        let points = vec![ColoredPoint::new([0.0, 0.0, 1.0], [0, 0, 0]); 6];
        let organized = RawCloud::organized(Stamp::default(), "camera", 3, 2, points.clone());
        assert!(organized.is_organized());

        let flat = RawCloud::unorganized(Stamp::default(), "camera", points);
        assert!(!flat.is_organized());
        assert_eq!(flat.width, 6);
    }

    #[test]
    fn test_pose_from_wxyz_normalizes() {
        let pose = StampedPose::from_wxyz(Stamp::new(1, 0), [2.0, 0.0, 0.0, 0.0], [1.0, 2.0, 3.0]);
        assert_relative_eq!(pose.orientation.w, 1.0, epsilon = 1e-12);

        let moved = pose.isometry() * Point3::new(1.0, 0.0, 0.0);
        assert_relative_eq!(moved.coords, Vector3::new(2.0, 2.0, 3.0), epsilon = 1e-12);
    }

    #[test]
    fn test_attach_pose_keeps_cloud() {
        let cloud = RawCloud::unorganized(
            Stamp::new(4, 0),
            "camera",
            vec![ColoredPoint::new([0.0, 0.0, 1.0], [1, 2, 3])],
        );
        let posed = cloud.clone().attach_pose(StampedPose::identity(Stamp::new(4, 0)));
        assert_eq!(posed.stamp(), Stamp::new(4, 0));
        let (raw, _) = posed.into_parts();
        assert_eq!(raw, cloud);
    }
}
