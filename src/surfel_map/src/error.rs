//! Error types for pose association, fusion and configuration.

use thiserror::Error;

use crate::fusion::FusionStats;
use crate::stamp::Stamp;

/// Why no pose could be associated with a cloud timestamp.
///
/// Every variant means the same thing to the caller: keep the cloud queued
/// and retry after the next trajectory update.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoseUnavailable {
    #[error("no trajectory received yet")]
    NoTrajectory,

    #[error("trajectory contains no poses")]
    EmptyTrace,

    #[error("stamp {query} outside trajectory range [{first}, {last}]")]
    OutOfRange {
        query: Stamp,
        first: Stamp,
        last: Stamp,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    /// Surfel storage ran out of slots while fusing a cloud. Updates to
    /// existing surfels were still applied.
    #[error(
        "surfel storage exhausted at capacity {capacity}, {refused} insertions refused",
        refused = .stats.refused_capacity
    )]
    CapacityExhausted { capacity: usize, stats: FusionStats },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be positive and finite, got {value}")]
    NonPositive { name: &'static str, value: f32 },

    #[error("sensor range [{min}, {max}] is empty")]
    EmptyRange { min: f32, max: f32 },

    #[error("min_normal_alignment must lie in [0, 1], got {0}")]
    AlignmentOutOfRange(f32),

    #[error("scene capacity {0} is outside [1, {max}]", max = u32::MAX - 1)]
    InvalidCapacity(usize),

    #[error("{0} must be at least 1")]
    ZeroCount(&'static str),

    #[error("invalid camera intrinsics: {0}")]
    InvalidIntrinsics(String),
}
