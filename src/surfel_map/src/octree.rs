//! Sparse octree mapping leaf voxels to surfel ids.
//!
//! The tree is an arena of branch nodes, each with eight child slots. The
//! root spans `2^depth` voxels per axis, centred on the origin; children at
//! the last level hold surfel ids instead of node indices. A key outside the
//! root grows the tree by one level (rebuilding it), so the map extent is
//! unbounded up to the full `i32` key range.
//!
//! Traversal always visits children in slot order `x | y << 1 | z << 2`, so
//! enumeration order depends only on the set of occupied voxels.

use crate::surfel::SurfelId;

/// Marks an unused child slot.
const EMPTY: u32 = u32::MAX;

/// Initial tree depth: 64 leaf voxels per axis.
const INITIAL_DEPTH: u32 = 6;

/// Depth at which the root covers every `i32` key.
const MAX_DEPTH: u32 = 32;

/// Integer leaf key of a voxel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VoxelCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl VoxelCoord {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Compute voxel coordinates from a 3D point.
    pub fn from_point(point: &[f32; 3], resolution: f32) -> Self {
        Self {
            x: (point[0] / resolution).floor() as i32,
            y: (point[1] / resolution).floor() as i32,
            z: (point[2] / resolution).floor() as i32,
        }
    }

    fn components(&self) -> [i32; 3] {
        [self.x, self.y, self.z]
    }
}

/// Octree over leaf voxels of edge `resolution`.
#[derive(Debug, Clone)]
pub struct Octree {
    resolution: f32,
    depth: u32,
    branches: Vec<[u32; 8]>,
    len: usize,
}

impl Octree {
    pub fn new(resolution: f32) -> Self {
        Self {
            resolution,
            depth: INITIAL_DEPTH,
            branches: vec![[EMPTY; 8]],
            len: 0,
        }
    }

    pub fn resolution(&self) -> f32 {
        self.resolution
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Number of occupied leaves.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn key_of(&self, point: &[f32; 3]) -> VoxelCoord {
        VoxelCoord::from_point(point, self.resolution)
    }

    pub fn get(&self, key: VoxelCoord) -> Option<SurfelId> {
        if !self.covers(&key) {
            return None;
        }

        let mut node = 0;
        for level in 0..self.depth {
            let child = self.branches[node][self.child_slot(&key, level)];
            if child == EMPTY {
                return None;
            }
            if level + 1 == self.depth {
                return Some(SurfelId(child));
            }
            node = child as usize;
        }
        None
    }

    /// Store `id` at `key`, returning the id it displaced.
    pub fn insert(&mut self, key: VoxelCoord, id: SurfelId) -> Option<SurfelId> {
        debug_assert_ne!(id.0, EMPTY, "surfel id collides with the empty marker");
        while !self.covers(&key) {
            self.grow();
        }

        let mut node = 0;
        for level in 0..self.depth - 1 {
            let slot = self.child_slot(&key, level);
            let mut child = self.branches[node][slot];
            if child == EMPTY {
                child = self.branches.len() as u32;
                self.branches.push([EMPTY; 8]);
                self.branches[node][slot] = child;
            }
            node = child as usize;
        }

        let slot = self.child_slot(&key, self.depth - 1);
        let previous = std::mem::replace(&mut self.branches[node][slot], id.0);
        if previous == EMPTY {
            self.len += 1;
            None
        } else {
            Some(SurfelId(previous))
        }
    }

    /// Remove every leaf and shrink back to the initial depth.
    pub fn clear(&mut self) {
        self.depth = INITIAL_DEPTH;
        self.branches.clear();
        self.branches.push([EMPTY; 8]);
        self.len = 0;
    }

    /// All occupied leaves in traversal order.
    pub fn entries(&self) -> Vec<(VoxelCoord, SurfelId)> {
        let mut out = Vec::with_capacity(self.len);
        self.visit(0, 0, [0; 3], None, &mut |key, id| out.push((key, id)));
        out
    }

    /// Occupied leaves whose key lies in `[min, max]` on every axis, in
    /// traversal order.
    pub fn range(&self, min: VoxelCoord, max: VoxelCoord) -> Vec<(VoxelCoord, SurfelId)> {
        let half = self.half_extent();
        let to_offset = |c: VoxelCoord| c.components().map(|k| k as i64 + half);
        let bounds = KeyRange {
            min: to_offset(min),
            max: to_offset(max),
        };

        let mut out = Vec::new();
        self.visit(0, 0, [0; 3], Some(&bounds), &mut |key, id| out.push((key, id)));
        out
    }

    fn half_extent(&self) -> i64 {
        1i64 << (self.depth - 1)
    }

    fn covers(&self, key: &VoxelCoord) -> bool {
        let half = self.half_extent();
        key.components()
            .iter()
            .all(|&k| (k as i64) >= -half && (k as i64) < half)
    }

    /// Child slot of `key` below a node at `level` (0 = root).
    fn child_slot(&self, key: &VoxelCoord, level: u32) -> usize {
        let shift = self.depth - 1 - level;
        let half = self.half_extent();
        let bit = |k: i32| (((k as i64 + half) >> shift) & 1) as usize;
        bit(key.x) | (bit(key.y) << 1) | (bit(key.z) << 2)
    }

    /// Add a level above the root and reinsert every leaf.
    fn grow(&mut self) {
        assert!(self.depth < MAX_DEPTH, "octree already spans the full key range");
        let entries = self.entries();
        self.depth += 1;
        self.branches.clear();
        self.branches.push([EMPTY; 8]);
        self.len = 0;
        for (key, id) in entries {
            self.insert(key, id);
        }
    }

    fn visit<F>(
        &self,
        node: usize,
        level: u32,
        origin: [i64; 3],
        bounds: Option<&KeyRange>,
        f: &mut F,
    ) where
        F: FnMut(VoxelCoord, SurfelId),
    {
        let child_size = 1i64 << (self.depth - 1 - level);
        let is_leaf_level = level + 1 == self.depth;

        for (slot, &child) in self.branches[node].iter().enumerate() {
            if child == EMPTY {
                continue;
            }
            let child_origin = [
                origin[0] + (slot & 1) as i64 * child_size,
                origin[1] + ((slot >> 1) & 1) as i64 * child_size,
                origin[2] + ((slot >> 2) & 1) as i64 * child_size,
            ];
            if let Some(bounds) = bounds {
                if !bounds.intersects(&child_origin, child_size) {
                    continue;
                }
            }

            if is_leaf_level {
                let half = self.half_extent();
                let key = VoxelCoord::new(
                    (child_origin[0] - half) as i32,
                    (child_origin[1] - half) as i32,
                    (child_origin[2] - half) as i32,
                );
                f(key, SurfelId(child));
            } else {
                self.visit(child as usize, level + 1, child_origin, bounds, f);
            }
        }
    }
}

/// Inclusive key range in root offset space.
struct KeyRange {
    min: [i64; 3],
    max: [i64; 3],
}

impl KeyRange {
    fn intersects(&self, origin: &[i64; 3], size: i64) -> bool {
        (0..3).all(|i| origin[i] <= self.max[i] && origin[i] + size - 1 >= self.min[i])
    }
}
