//! Surfel map: fixed-capacity surfel storage indexed by an octree.
//!
//! Fusion lives in [`crate::fusion`] and read-only queries in
//! [`crate::query`]; this module owns the storage, its consistency with the
//! octree, and construction.
//!
//! # Usage
//!
//! ```ignore
//! use surfel_map::{CameraIntrinsics, SurfelMap};
//!
//! let mut map = SurfelMap::builder()
//!     .intrinsics(CameraIntrinsics::default())
//!     .octree_resolution(0.2)
//!     .scene_capacity(1_000_000)
//!     .build()?;
//!
//! let stats = map.fuse(&posed_cloud)?;
//! let confident = map.confidence_filtered_export();
//! ```

use tracing::info;

use crate::camera::CameraIntrinsics;
use crate::config::SurfelMapConfig;
use crate::error::ConfigError;
use crate::octree::{Octree, VoxelCoord};
use crate::surfel::{Surfel, SurfelId};

/// Fixed-capacity slot storage with a free list.
#[derive(Debug)]
pub(crate) struct SurfelStore {
    slots: Vec<Surfel>,
    /// Reusable slot indices; popped from the back.
    free: Vec<u32>,
    capacity: usize,
    live: usize,
}

impl SurfelStore {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            capacity,
            live: 0,
        }
    }

    /// Store a surfel, or `None` when every slot is taken.
    pub(crate) fn insert(&mut self, surfel: Surfel) -> Option<SurfelId> {
        let id = if let Some(index) = self.free.pop() {
            self.slots[index as usize] = surfel;
            SurfelId(index)
        } else if self.slots.len() < self.capacity {
            self.slots.push(surfel);
            SurfelId(self.slots.len() as u32 - 1)
        } else {
            return None;
        };
        self.live += 1;
        Some(id)
    }

    pub(crate) fn get(&self, id: SurfelId) -> Option<&Surfel> {
        self.slots.get(id.index()).filter(|s| s.valid)
    }

    pub(crate) fn get_mut(&mut self, id: SurfelId) -> Option<&mut Surfel> {
        self.slots.get_mut(id.index()).filter(|s| s.valid)
    }

    /// Invalidate every slot. Ids are reissued in ascending order afterwards,
    /// exactly as on a fresh store.
    pub(crate) fn invalidate_all(&mut self) {
        for slot in &mut self.slots {
            slot.valid = false;
        }
        self.free.clear();
        self.free.extend((0..self.slots.len() as u32).rev());
        self.live = 0;
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Persistent surfel map.
#[derive(Debug)]
pub struct SurfelMap {
    pub(crate) config: SurfelMapConfig,
    pub(crate) intrinsics: CameraIntrinsics,
    pub(crate) octree: Octree,
    pub(crate) store: SurfelStore,
    /// Set once an insertion is refused; cleared by `reset`.
    pub(crate) exhausted: bool,
}

impl SurfelMap {
    pub fn new(config: SurfelMapConfig, intrinsics: CameraIntrinsics) -> Result<Self, ConfigError> {
        config.validate()?;
        intrinsics.validate()?;

        info!(
            capacity = config.scene_capacity,
            resolution = config.octree_resolution,
            fx = intrinsics.fx,
            fy = intrinsics.fy,
            "Creating surfel map"
        );

        Ok(Self {
            octree: Octree::new(config.octree_resolution),
            store: SurfelStore::with_capacity(config.scene_capacity),
            exhausted: false,
            config,
            intrinsics,
        })
    }

    pub fn builder() -> SurfelMapBuilder {
        SurfelMapBuilder::default()
    }

    pub fn config(&self) -> &SurfelMapConfig {
        &self.config
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    /// Number of valid surfels.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    /// Whether an insertion has been refused since the last reset.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Discard every surfel. The map behaves exactly like a freshly built one
    /// afterwards, including the ids it hands out. Idempotent.
    pub fn reset(&mut self) {
        let cleared = self.store.len();
        self.store.invalidate_all();
        self.octree.clear();
        self.exhausted = false;
        info!(cleared, "Surfel map reset");
    }

    /// Resolve an id taken from the octree.
    ///
    /// # Panics
    /// If the id does not name a valid surfel; the octree and storage have
    /// diverged and no result can be trusted.
    pub(crate) fn resolve(&self, key: VoxelCoord, id: SurfelId) -> &Surfel {
        match self.store.get(id) {
            Some(surfel) => surfel,
            None => panic!(
                "octree leaf {key:?} references surfel {} which is not a valid slot",
                id.0
            ),
        }
    }

    pub(crate) fn resolve_mut(&mut self, key: VoxelCoord, id: SurfelId) -> &mut Surfel {
        match self.store.get_mut(id) {
            Some(surfel) => surfel,
            None => panic!(
                "octree leaf {key:?} references surfel {} which is not a valid slot",
                id.0
            ),
        }
    }
}

/// Builder for [`SurfelMap`].
#[derive(Debug, Clone, Default)]
pub struct SurfelMapBuilder {
    config: SurfelMapConfig,
    intrinsics: CameraIntrinsics,
}

impl SurfelMapBuilder {
    pub fn config(mut self, config: SurfelMapConfig) -> Self {
        self.config = config;
        self
    }

    pub fn intrinsics(mut self, intrinsics: CameraIntrinsics) -> Self {
        self.intrinsics = intrinsics;
        self
    }

    pub fn dmax(mut self, dmax: f32) -> Self {
        self.config.dmax = dmax;
        self
    }

    pub fn sensor_range(mut self, min: f32, max: f32) -> Self {
        self.config.min_sensor_dist = min;
        self.config.max_sensor_dist = max;
        self
    }

    pub fn octree_resolution(mut self, resolution: f32) -> Self {
        self.config.octree_resolution = resolution;
        self
    }

    pub fn preview(mut self, resolution: f32, samples_per_voxel: usize) -> Self {
        self.config.preview_resolution = resolution;
        self.config.preview_samples_per_voxel = samples_per_voxel;
        self
    }

    pub fn confidence_threshold(mut self, threshold: u32) -> Self {
        self.config.confidence_threshold = threshold;
        self
    }

    pub fn min_normal_alignment(mut self, alignment: f32) -> Self {
        self.config.min_normal_alignment = alignment;
        self
    }

    pub fn use_frustum(mut self, enabled: bool) -> Self {
        self.config.use_frustum = enabled;
        self
    }

    pub fn scene_capacity(mut self, capacity: usize) -> Self {
        self.config.scene_capacity = capacity;
        self
    }

    pub fn use_update(mut self, enabled: bool) -> Self {
        self.config.use_update = enabled;
        self
    }

    pub fn log_fusion(mut self, enabled: bool) -> Self {
        self.config.log_fusion = enabled;
        self
    }

    pub fn build(self) -> Result<SurfelMap, ConfigError> {
        SurfelMap::new(self.config, self.intrinsics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surfel::Observation;
    use nalgebra::Vector3;

    fn make_surfel(z: f32) -> Surfel {
        Surfel::from_observation(&Observation {
            position: Vector3::new(0.0, 0.0, z),
            normal: Vector3::new(0.0, 0.0, -1.0),
            radius: 0.01,
            color: [0, 0, 0],
        })
    }

    #[test]
    fn test_store_capacity() {
        let mut store = SurfelStore::with_capacity(2);
        assert_eq!(store.insert(make_surfel(1.0)), Some(SurfelId(0)));
        assert_eq!(store.insert(make_surfel(2.0)), Some(SurfelId(1)));
        assert_eq!(store.insert(make_surfel(3.0)), None);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_store_reissues_ids_after_invalidate() {
        let mut store = SurfelStore::with_capacity(3);
        for z in [1.0, 2.0, 3.0] {
            store.insert(make_surfel(z));
        }
        store.invalidate_all();
        assert_eq!(store.len(), 0);
        assert!(store.get(SurfelId(0)).is_none());

        assert_eq!(store.insert(make_surfel(4.0)), Some(SurfelId(0)));
        assert_eq!(store.insert(make_surfel(5.0)), Some(SurfelId(1)));
        assert_eq!(store.insert(make_surfel(6.0)), Some(SurfelId(2)));
        assert_eq!(store.insert(make_surfel(7.0)), None);
        assert_eq!(store.get(SurfelId(1)).map(|s| s.position.z), Some(5.0));
    }

    #[test]
    fn test_builder_validates() {
        let map = SurfelMap::builder().scene_capacity(16).build().unwrap();
        assert_eq!(map.capacity(), 16);
        assert!(map.is_empty());

        assert!(SurfelMap::builder().octree_resolution(-1.0).build().is_err());
        assert!(SurfelMap::builder()
            .scene_capacity(16)
            .intrinsics(CameraIntrinsics::new(0.0, 1.0, 0.0, 0.0, 640, 480))
            .build()
            .is_err());
    }

    #[test]
    #[should_panic(expected = "not a valid slot")]
    fn test_resolve_inconsistent_id_panics() {
        let map = SurfelMap::builder().scene_capacity(4).build().unwrap();
        map.resolve(VoxelCoord::new(0, 0, 0), SurfelId(3));
    }
}
