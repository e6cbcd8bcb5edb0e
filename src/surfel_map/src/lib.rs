//! Surfel mapping from posed depth-camera point clouds.
//!
//! This library builds a persistent map of surfels (oriented colored disks)
//! from a stream of point clouds whose poses arrive on a separate trajectory
//! channel.
//!
//! # Architecture
//!
//! - [`sync`]: latest trajectory snapshot and nearest-pose association over
//!   millisecond-rounded timestamps
//! - [`queue`]: FIFO of clouds waiting for a pose, drained in arrival order
//! - [`fusion`]: gating and per-leaf create/merge/replace of surfels
//! - [`octree`]: sparse voxel index, at most one surfel per leaf
//! - [`query`]: range queries, confidence-filtered export and preview
//!
//! # Usage
//!
//! ```ignore
//! use surfel_map::{CloudQueue, FuseOutcome, PoseSynchronizer, PoseTrace, SurfelMap};
//!
//! let sync = PoseSynchronizer::new();
//! let mut queue = CloudQueue::default();
//! let mut map = SurfelMap::builder().scene_capacity(1_000_000).build()?;
//!
//! queue.enqueue(cloud);
//! sync.replace_trace(PoseTrace::new(trajectory));
//!
//! queue.drain(&sync, |posed| match map.fuse(posed) {
//!     Ok(_) => FuseOutcome::Fused,
//!     Err(_) => FuseOutcome::Partial,
//! });
//!
//! let confident = map.confidence_filtered_export();
//! ```

pub mod camera;
pub mod config;
pub mod error;
pub mod fusion;
pub mod map;
pub mod normals;
pub mod octree;
pub mod query;
pub mod queue;
pub mod stamp;
pub mod surfel;
pub mod sync;
pub mod test_utils;
pub mod types;

pub use camera::CameraIntrinsics;
pub use config::SurfelMapConfig;
pub use error::{ConfigError, FusionError, PoseUnavailable};
pub use fusion::FusionStats;
pub use map::{SurfelMap, SurfelMapBuilder};
pub use normals::NormalEstimation;
pub use octree::{Octree, VoxelCoord};
pub use queue::{
    CloudQueue, CloudQueueConfig, DrainReport, DrainStop, FuseOutcome, QueueStats, QueuedCloud,
};
pub use stamp::Stamp;
pub use surfel::{Surfel, SurfelId};
pub use sync::{PoseSynchronizer, PoseTrace};
pub use types::{BoundingBox, ColoredPoint, PosedCloud, PreviewPoint, RawCloud, StampedPose};
