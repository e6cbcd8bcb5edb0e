//! Fusion of posed clouds into the surfel map.
//!
//! Each point passes four gates in the sensor frame (finite coordinates,
//! depth range, image frustum, normal alignment with the viewing axis). A
//! surviving point is moved into the map frame and then creates, merges into
//! or replaces the surfel of its octree leaf.

use std::f32::consts::SQRT_2;

use nalgebra::{Point3, Vector3};
use tracing::{info, warn};

use crate::error::FusionError;
use crate::map::SurfelMap;
use crate::normals::estimate_normals;
use crate::surfel::{Observation, Surfel};
use crate::types::{ColoredPoint, PosedCloud};

/// Per-cloud fusion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FusionStats {
    /// Points in the cloud
    pub points: usize,
    /// Non-finite coordinates
    pub rejected_invalid: usize,
    /// Depth outside the sensor range
    pub rejected_range: usize,
    /// Projected outside the image
    pub rejected_frustum: usize,
    /// Undefined normal or too oblique to the viewing axis
    pub rejected_normal: usize,
    /// New surfels in empty leaves
    pub inserted: usize,
    /// Consistent observations merged into existing surfels
    pub merged: usize,
    /// Surfels overwritten by a disagreeing observation
    pub replaced: usize,
    /// Observations on occupied leaves with updates disabled
    pub ignored_occupied: usize,
    /// Insertions refused because storage is full
    pub refused_capacity: usize,
}

impl FusionStats {
    /// Points that passed every gate.
    pub fn accepted(&self) -> usize {
        self.inserted + self.merged + self.replaced + self.ignored_occupied + self.refused_capacity
    }

    pub fn rejected(&self) -> usize {
        self.rejected_invalid + self.rejected_range + self.rejected_frustum + self.rejected_normal
    }
}

enum Rejection {
    Invalid,
    Range,
    Frustum,
    Normal,
}

impl SurfelMap {
    /// Merge one posed cloud into the map.
    ///
    /// Bad points never abort the cloud; they are counted and skipped.
    ///
    /// # Returns
    /// * `Ok(stats)` - Every accepted point was applied.
    /// * `Err(FusionError::CapacityExhausted)` - Storage ran out. Merges and
    ///   replacements were still applied, new surfels beyond capacity were
    ///   dropped, and the carried stats describe the whole cloud.
    pub fn fuse(&mut self, cloud: &PosedCloud) -> Result<FusionStats, FusionError> {
        let raw = cloud.cloud();
        let isometry = cloud.pose().isometry();
        let normals = estimate_normals(raw, &self.config.normal_estimation());

        let mut stats = FusionStats {
            points: raw.len(),
            ..Default::default()
        };

        for (point, normal) in raw.points.iter().zip(normals) {
            let (normal, alignment) = match self.gate(point, normal) {
                Ok(accepted) => accepted,
                Err(Rejection::Invalid) => {
                    stats.rejected_invalid += 1;
                    continue;
                }
                Err(Rejection::Range) => {
                    stats.rejected_range += 1;
                    continue;
                }
                Err(Rejection::Frustum) => {
                    stats.rejected_frustum += 1;
                    continue;
                }
                Err(Rejection::Normal) => {
                    stats.rejected_normal += 1;
                    continue;
                }
            };

            let depth = point.xyz[2];
            let sensor_point = Point3::new(point.xyz[0] as f64, point.xyz[1] as f64, depth as f64);
            let map_point = isometry * sensor_point;
            let map_normal = isometry.rotation * normal.cast::<f64>();

            let observation = Observation {
                position: map_point.coords.cast::<f32>(),
                normal: map_normal.cast::<f32>(),
                radius: self.footprint_radius(depth, alignment),
                color: point.rgb,
            };
            self.integrate(&observation, &mut stats);
        }

        if self.config.log_fusion {
            info!(
                stamp = %raw.stamp,
                frame = %raw.frame_id,
                points = stats.points,
                inserted = stats.inserted,
                merged = stats.merged,
                replaced = stats.replaced,
                ignored = stats.ignored_occupied,
                rejected = stats.rejected(),
                surfels = self.len(),
                "Fused cloud"
            );
        }

        if stats.refused_capacity > 0 {
            warn!(
                capacity = self.capacity(),
                refused = stats.refused_capacity,
                "Surfel storage exhausted, new surfels dropped until reset"
            );
            return Err(FusionError::CapacityExhausted {
                capacity: self.capacity(),
                stats,
            });
        }

        Ok(stats)
    }

    /// Sensor-frame gates. Returns the normal and its alignment `|n_z|`.
    fn gate(
        &self,
        point: &ColoredPoint,
        normal: Option<Vector3<f32>>,
    ) -> Result<(Vector3<f32>, f32), Rejection> {
        if !point.is_finite() {
            return Err(Rejection::Invalid);
        }

        let depth = point.xyz[2];
        if depth < self.config.min_sensor_dist || depth > self.config.max_sensor_dist {
            return Err(Rejection::Range);
        }

        if self.config.use_frustum && !self.intrinsics.in_frustum(&point.xyz) {
            return Err(Rejection::Frustum);
        }

        let normal = normal.ok_or(Rejection::Normal)?;
        let alignment = normal.z.abs();
        if alignment < self.config.min_normal_alignment {
            return Err(Rejection::Normal);
        }

        Ok((normal, alignment))
    }

    /// Radius of a pixel's footprint at `depth`, widened at grazing angles.
    fn footprint_radius(&self, depth: f32, alignment: f32) -> f32 {
        let alignment = alignment
            .max(self.config.min_normal_alignment)
            .max(f32::EPSILON);
        SQRT_2 * depth / self.intrinsics.mean_focal() / alignment
    }

    fn integrate(&mut self, observation: &Observation, stats: &mut FusionStats) {
        let p = &observation.position;
        let key = self.octree.key_of(&[p.x, p.y, p.z]);

        match self.octree.get(key) {
            None => {
                if self.exhausted {
                    stats.refused_capacity += 1;
                    return;
                }
                match self.store.insert(Surfel::from_observation(observation)) {
                    Some(id) => {
                        self.octree.insert(key, id);
                        stats.inserted += 1;
                    }
                    None => {
                        self.exhausted = true;
                        stats.refused_capacity += 1;
                    }
                }
            }
            Some(id) if self.config.use_update => {
                let dmax = self.config.dmax;
                let surfel = self.resolve_mut(key, id);
                if surfel.distance_along_normal(&observation.position) <= dmax {
                    surfel.merge(observation);
                    stats.merged += 1;
                } else {
                    surfel.replace(observation);
                    stats.replaced += 1;
                }
            }
            Some(_) => stats.ignored_occupied += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraIntrinsics;
    use crate::octree::VoxelCoord;
    use crate::stamp::Stamp;
    use crate::test_utils::{make_plane_cloud, single_point_cloud};
    use crate::types::{RawCloud, StampedPose};
    use approx::assert_relative_eq;
    use rand_distr::{Distribution, Normal};

    const FACING: [f32; 3] = [0.0, 0.0, -1.0];

    fn make_map(use_update: bool) -> SurfelMap {
        SurfelMap::builder()
            .scene_capacity(1024)
            .use_update(use_update)
            .log_fusion(false)
            .build()
            .unwrap()
    }

    fn posed(cloud: RawCloud) -> PosedCloud {
        let stamp = cloud.stamp;
        cloud.attach_pose(StampedPose::identity(stamp))
    }

    #[test]
    fn test_first_observation_inserts() {
        let mut map = make_map(true);
        let cloud = single_point_cloud(Stamp::new(1, 0), [0.1, 0.1, 1.1], FACING, [10, 20, 30]);
        let stats = map.fuse(&posed(cloud)).unwrap();

        assert_eq!(stats.inserted, 1);
        assert_eq!(map.len(), 1);
        let surfel = &map.export_with_min_confidence(1)[0];
        assert_eq!(surfel.confidence, 1);
        assert_eq!(surfel.color, [10, 20, 30]);
        // sqrt(2) * 1.1 / 525 / 1.0
        assert_relative_eq!(surfel.radius, SQRT_2 * 1.1 / 525.0, epsilon = 1e-7);
    }

    #[test]
    fn test_confidence_accumulates_to_n() {
        let mut map = make_map(true);
        let n = 7;
        for i in 0..n {
            let cloud =
                single_point_cloud(Stamp::new(i, 0), [0.1, 0.1, 1.1], FACING, [100, 100, 100]);
            map.fuse(&posed(cloud)).unwrap();
        }

        assert_eq!(map.len(), 1);
        let exported = map.export_with_min_confidence(n as u32);
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].confidence, n as u32);
        assert!(map.export_with_min_confidence(n as u32 + 1).is_empty());
    }

    #[test]
    fn test_no_update_is_idempotent() {
        let mut map = make_map(false);
        let camera = CameraIntrinsics::default();
        let cloud = make_plane_cloud(Stamp::new(1, 0), &camera, 40, 30, 2.0, [50, 60, 70]);

        let first = map.fuse(&posed(cloud.clone())).unwrap();
        let snapshot: Vec<_> = map
            .valid_ids()
            .into_iter()
            .map(|id| map.surfel(id).cloned())
            .collect();

        let second = map.fuse(&posed(cloud)).unwrap();
        let after: Vec<_> = map
            .valid_ids()
            .into_iter()
            .map(|id| map.surfel(id).cloned())
            .collect();

        assert!(first.inserted > 0);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.merged + second.replaced, 0);
        assert_eq!(second.ignored_occupied, first.accepted());
        assert_eq!(snapshot, after);
    }

    #[test]
    fn test_large_disagreement_replaces() {
        let mut map = make_map(true);
        let dmax = map.config().dmax;
        for i in 0..3 {
            let cloud = single_point_cloud(Stamp::new(i, 0), [0.1, 0.1, 1.1], FACING, [1, 1, 1]);
            map.fuse(&posed(cloud)).unwrap();
        }

        let far_z = 1.1 + 10.0 * dmax;
        assert_eq!(VoxelCoord::from_point(&[0.1, 0.1, far_z], 0.2), VoxelCoord::new(0, 0, 5));
        let cloud = single_point_cloud(Stamp::new(3, 0), [0.1, 0.1, far_z], FACING, [200, 0, 0]);
        let stats = map.fuse(&posed(cloud)).unwrap();

        assert_eq!(stats.replaced, 1);
        let surfel = &map.export_with_min_confidence(1)[0];
        assert_eq!(surfel.confidence, 1);
        assert_eq!(surfel.color, [200, 0, 0]);
        assert_relative_eq!(surfel.position.z, far_z, epsilon = 1e-6);
    }

    #[test]
    fn test_small_disagreement_merges() {
        let mut map = make_map(true);
        let a = single_point_cloud(Stamp::new(0, 0), [0.1, 0.1, 1.100], FACING, [0, 0, 0]);
        let b = single_point_cloud(Stamp::new(1, 0), [0.1, 0.1, 1.104], FACING, [0, 0, 0]);
        map.fuse(&posed(a)).unwrap();
        let stats = map.fuse(&posed(b)).unwrap();
        assert_eq!(stats.merged, 1);
        let surfel = &map.export_with_min_confidence(2)[0];
        assert_relative_eq!(surfel.position.z, 1.102, epsilon = 1e-6);
    }

    #[test]
    fn test_gates() {
        let mut map = make_map(true);
        let points = vec![
            ColoredPoint::new([f32::NAN, 0.0, 1.0], [0, 0, 0]),
            ColoredPoint::new([0.0, 0.0, 0.5], [0, 0, 0]),
            ColoredPoint::new([0.0, 0.0, 4.5], [0, 0, 0]),
            ColoredPoint::new([3.0, 0.0, 1.0], [0, 0, 0]),
            ColoredPoint::new([0.0, 0.0, 1.0], [0, 0, 0]),
            ColoredPoint::new([0.0, 0.0, 1.5], [0, 0, 0]),
            ColoredPoint::new([0.3, 0.3, 2.5], [0, 0, 0]),
        ];
        let normals = vec![
            FACING,
            FACING,
            FACING,
            FACING,
            // Grazing: |n_z| = 0.1
            [0.995, 0.0, -0.1],
            [0.0, 0.0, 0.0],
            FACING,
        ];
        let cloud = RawCloud::unorganized(Stamp::new(1, 0), "camera", points).with_normals(normals);
        let stats = map.fuse(&posed(cloud)).unwrap();

        assert_eq!(stats.points, 7);
        assert_eq!(stats.rejected_invalid, 1);
        assert_eq!(stats.rejected_range, 2);
        assert_eq!(stats.rejected_frustum, 1);
        assert_eq!(stats.rejected_normal, 2);
        assert_eq!(stats.inserted, 1);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_short_normals_reject_trailing_points() {
        let mut map = make_map(true);
        let points = vec![
            ColoredPoint::new([0.0, 0.0, 1.0], [0, 0, 0]),
            ColoredPoint::new([0.0, 0.0, 1.5], [0, 0, 0]),
            ColoredPoint::new([0.0, 0.0, 2.5], [0, 0, 0]),
        ];
        let mut cloud = RawCloud::unorganized(Stamp::new(1, 0), "camera", points);
        cloud.normals = Some(vec![FACING]);
        let stats = map.fuse(&posed(cloud)).unwrap();

        assert_eq!(stats.points, 3);
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.rejected_normal, 2);
        assert_eq!(stats.accepted() + stats.rejected(), stats.points);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_frustum_gate_can_be_disabled() {
        let mut map = SurfelMap::builder()
            .scene_capacity(16)
            .use_frustum(false)
            .log_fusion(false)
            .build()
            .unwrap();
        let cloud = single_point_cloud(Stamp::new(1, 0), [3.0, 0.0, 1.0], FACING, [0, 0, 0]);
        assert_eq!(map.fuse(&posed(cloud)).unwrap().inserted, 1);
    }

    #[test]
    fn test_pose_moves_points_into_map_frame() {
        let mut map = make_map(true);
        let cloud = single_point_cloud(Stamp::new(1, 0), [0.1, 0.1, 1.1], FACING, [0, 0, 0]);
        // 90 degrees about y, then 5 m along x.
        let half = std::f64::consts::FRAC_PI_4;
        let pose = StampedPose::from_wxyz(
            Stamp::new(1, 0),
            [half.cos(), 0.0, half.sin(), 0.0],
            [5.0, 0.0, 0.0],
        );
        map.fuse(&cloud.attach_pose(pose)).unwrap();

        let surfel = &map.export_with_min_confidence(1)[0];
        assert_relative_eq!(surfel.position, Vector3::new(6.1, 0.1, -0.1), epsilon = 1e-5);
        assert_relative_eq!(surfel.normal, Vector3::new(-1.0, 0.0, 0.0), epsilon = 1e-5);
    }

    #[test]
    fn test_capacity_exhaustion_is_reported() {
        let mut map = SurfelMap::builder()
            .scene_capacity(4)
            .log_fusion(false)
            .build()
            .unwrap();
        let camera = CameraIntrinsics::default();
        let cloud = make_plane_cloud(Stamp::new(1, 0), &camera, 200, 150, 2.0, [0, 0, 0]);

        let err = map.fuse(&posed(cloud.clone())).unwrap_err();
        let FusionError::CapacityExhausted { capacity, stats } = err;
        assert_eq!(capacity, 4);
        assert_eq!(stats.inserted, 4);
        assert!(stats.refused_capacity > 0);
        assert!(map.is_exhausted());
        assert_eq!(map.len(), 4);

        // Existing surfels still take updates.
        let err = map.fuse(&posed(cloud)).unwrap_err();
        let FusionError::CapacityExhausted { stats, .. } = err;
        assert_eq!(stats.inserted, 0);
        assert!(stats.merged > 0);
    }

    #[test]
    fn test_noisy_plane_stays_within_leaf_count() {
        let mut rng = rand::thread_rng();
        let noise = Normal::new(0.0f32, 0.001).unwrap();
        let camera = CameraIntrinsics::default();
        let mut map = make_map(true);

        let mut expected_leaves = std::collections::HashSet::new();
        for frame in 0..3 {
            let mut cloud =
                make_plane_cloud(Stamp::new(frame, 0), &camera, 64, 48, 2.0, [80, 80, 80]);
            for p in &mut cloud.points {
                p.xyz[2] += noise.sample(&mut rng);
            }
            let normals = vec![FACING; cloud.len()];
            for p in &cloud.points {
                expected_leaves.insert(VoxelCoord::from_point(&p.xyz, 0.2));
            }
            map.fuse(&posed(cloud.with_normals(normals))).unwrap();
        }

        assert_eq!(map.len(), expected_leaves.len());
        assert_eq!(map.valid_ids().len(), map.len());
    }
}
