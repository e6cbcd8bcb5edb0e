//! Conversion between serialized cloud/pose records and library types.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use surfel_map::{ColoredPoint, RawCloud, Stamp, StampedPose};

fn default_frame_id() -> String {
    "camera".to_string()
}

/// A serialized trajectory pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseRecord {
    pub stamp: Stamp,
    pub position: [f64; 3],
    /// Scalar-first quaternion `[w, x, y, z]`
    pub orientation: [f64; 4],
}

impl From<PoseRecord> for StampedPose {
    fn from(record: PoseRecord) -> Self {
        StampedPose::from_wxyz(record.stamp, record.orientation, record.position)
    }
}

/// A serialized point cloud.
///
/// Each point is `[x, y, z, r, g, b]` with colors in `0..=255`; `null` marks
/// an invalid pixel of an organized cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudRecord {
    pub stamp: Stamp,
    #[serde(default = "default_frame_id")]
    pub frame_id: String,
    /// Row length of an organized cloud; omit for unorganized clouds
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    pub points: Vec<Option<[f32; 6]>>,
    /// Optional sensor-frame normals, one per point
    #[serde(default)]
    pub normals: Option<Vec<[f32; 3]>>,
}

fn to_colored_point(values: Option<[f32; 6]>) -> ColoredPoint {
    match values {
        Some([x, y, z, r, g, b]) => {
            let channel = |c: f32| c.round().clamp(0.0, 255.0) as u8;
            ColoredPoint::new([x, y, z], [channel(r), channel(g), channel(b)])
        }
        None => ColoredPoint::new([f32::NAN; 3], [0, 0, 0]),
    }
}

impl TryFrom<CloudRecord> for RawCloud {
    type Error = anyhow::Error;

    fn try_from(record: CloudRecord) -> Result<Self> {
        let points: Vec<ColoredPoint> = record.points.into_iter().map(to_colored_point).collect();

        let mut cloud = match (record.width, record.height) {
            (Some(width), Some(height)) => {
                if width as usize * height as usize != points.len() {
                    bail!(
                        "cloud at {} declares {}x{} but carries {} points",
                        record.stamp,
                        width,
                        height,
                        points.len()
                    );
                }
                RawCloud::organized(record.stamp, record.frame_id, width, height, points)
            }
            (None, None) => RawCloud::unorganized(record.stamp, record.frame_id, points),
            _ => bail!("cloud at {} sets only one of width/height", record.stamp),
        };

        if let Some(normals) = record.normals {
            if normals.len() != cloud.len() {
                bail!(
                    "cloud at {} has {} normals for {} points",
                    cloud.stamp,
                    normals.len(),
                    cloud.len()
                );
            }
            cloud = cloud.with_normals(normals);
        }

        Ok(cloud)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn record(width: Option<u32>, height: Option<u32>, n: usize) -> CloudRecord {
        CloudRecord {
            stamp: Stamp::new(3, 0),
            frame_id: default_frame_id(),
            width,
            height,
            points: vec![Some([0.0, 0.0, 1.0, 255.0, 128.4, 300.0]); n],
            normals: None,
        }
    }

    #[test]
    fn test_unorganized_conversion() {
        let cloud = RawCloud::try_from(record(None, None, 3)).unwrap();
        assert!(!cloud.is_organized());
        assert_eq!(cloud.len(), 3);
        assert_eq!(cloud.points[0].rgb, [255, 128, 255]);
    }

    #[test]
    fn test_organized_conversion_keeps_invalid_pixels() {
        let mut rec = record(Some(2), Some(2), 4);
        rec.points[1] = None;
        let cloud = RawCloud::try_from(rec).unwrap();
        assert!(cloud.is_organized());
        assert!(!cloud.points[1].is_finite());
    }

    #[test]
    fn test_size_mismatch_rejected() {
        assert!(RawCloud::try_from(record(Some(3), Some(2), 4)).is_err());
        assert!(RawCloud::try_from(record(Some(4), None, 4)).is_err());

        let mut rec = record(None, None, 2);
        rec.normals = Some(vec![[0.0, 0.0, -1.0]]);
        assert!(RawCloud::try_from(rec).is_err());
    }

    #[test]
    fn test_pose_record() {
        let pose: StampedPose = PoseRecord {
            stamp: Stamp::new(1, 0),
            position: [1.0, 2.0, 3.0],
            orientation: [1.0, 0.0, 0.0, 0.0],
        }
        .into();
        assert_relative_eq!(pose.origin.y, 2.0);
        assert_relative_eq!(pose.orientation.w, 1.0);
    }

    #[test]
    fn test_record_from_json() {
        let rec: CloudRecord = serde_json::from_str(
            r#"{"stamp": {"sec": 5, "nanosec": 10}, "points": [[0, 0, 1.5, 1, 2, 3], null]}"#,
        )
        .unwrap();
        assert_eq!(rec.frame_id, "camera");
        assert_eq!(rec.points.len(), 2);
        assert!(rec.points[1].is_none());
    }
}
