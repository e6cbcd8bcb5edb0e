//! Read-only spatial queries and export over the surfel map.
//!
//! All enumeration follows octree traversal order, so repeated queries over
//! an unmodified map return identical sequences.

use std::collections::BTreeMap;

use nalgebra::Vector3;
use rayon::prelude::*;

use crate::map::SurfelMap;
use crate::octree::VoxelCoord;
use crate::surfel::{Surfel, SurfelId};
use crate::types::{BoundingBox, PreviewPoint};

/// Running sums for one preview voxel.
#[derive(Debug, Default)]
struct PreviewAccumulator {
    position_sum: Vector3<f64>,
    color_sum: [u32; 3],
    count: usize,
}

impl PreviewAccumulator {
    fn add(&mut self, surfel: &Surfel) {
        self.position_sum += surfel.position.cast::<f64>();
        for (sum, channel) in self.color_sum.iter_mut().zip(surfel.color) {
            *sum += channel as u32;
        }
        self.count += 1;
    }

    fn finish(&self) -> PreviewPoint {
        let n = self.count as f64;
        let mean = self.position_sum / n;
        PreviewPoint {
            xyz: [mean.x as f32, mean.y as f32, mean.z as f32],
            rgb: self
                .color_sum
                .map(|sum| (sum as f64 / n).round().clamp(0.0, 255.0) as u8),
        }
    }
}

impl SurfelMap {
    /// Ids of every valid surfel, in traversal order.
    pub fn valid_ids(&self) -> Vec<SurfelId> {
        self.octree.entries().into_iter().map(|(_, id)| id).collect()
    }

    pub fn surfel(&self, id: SurfelId) -> Option<&Surfel> {
        self.store.get(id)
    }

    /// Ids of valid surfels whose position lies inside `bbox` (faces included).
    pub fn range_query(&self, bbox: &BoundingBox) -> Vec<SurfelId> {
        let min = self.octree.key_of(&bbox.min());
        let max = self.octree.key_of(&bbox.max());

        self.octree
            .range(min, max)
            .into_iter()
            .filter(|&(key, id)| {
                let p = self.resolve(key, id).position;
                bbox.contains(&[p.x, p.y, p.z])
            })
            .map(|(_, id)| id)
            .collect()
    }

    /// Valid, finite surfels at or above the configured confidence threshold.
    pub fn confidence_filtered_export(&self) -> Vec<Surfel> {
        self.export_with_min_confidence(self.config.confidence_threshold)
    }

    pub fn export_with_min_confidence(&self, min_confidence: u32) -> Vec<Surfel> {
        self.octree
            .entries()
            .into_iter()
            .map(|(key, id)| self.resolve(key, id))
            .filter(|surfel| surfel.is_finite() && surfel.confidence >= min_confidence)
            .cloned()
            .collect()
    }

    /// Downsampled preview with the configured resolution and sample count.
    pub fn preview(&self) -> Vec<PreviewPoint> {
        self.downsample(
            self.config.preview_resolution,
            self.config.preview_samples_per_voxel,
        )
    }

    /// Average the first `samples_per_voxel` surfels (traversal order) of each
    /// `voxel_size` cell. Output is sorted by cell coordinate.
    ///
    /// A non-positive `voxel_size` returns every surfel as its own point.
    pub fn downsample(&self, voxel_size: f32, samples_per_voxel: usize) -> Vec<PreviewPoint> {
        if samples_per_voxel == 0 {
            return Vec::new();
        }

        let entries = self.octree.entries();
        if voxel_size <= 0.0 || !voxel_size.is_finite() {
            return entries
                .into_iter()
                .map(|(key, id)| {
                    let surfel = self.resolve(key, id);
                    let p = surfel.position;
                    PreviewPoint {
                        xyz: [p.x, p.y, p.z],
                        rgb: surfel.color,
                    }
                })
                .collect();
        }

        let mut cells: BTreeMap<VoxelCoord, PreviewAccumulator> = BTreeMap::new();
        for (key, id) in entries {
            let surfel = self.resolve(key, id);
            let p = surfel.position;
            let cell = VoxelCoord::from_point(&[p.x, p.y, p.z], voxel_size);
            let acc = cells.entry(cell).or_default();
            if acc.count < samples_per_voxel {
                acc.add(surfel);
            }
        }

        let cells: Vec<PreviewAccumulator> = cells.into_values().collect();
        cells.par_iter().map(PreviewAccumulator::finish).collect()
    }
}
