//! Pose trace and temporal pose synchronizer.
//!
//! The trajectory producer publishes its whole optimized trajectory each time
//! it changes. The synchronizer keeps only the latest one and answers "which
//! pose was valid at this capture time" by nearest neighbour over
//! millisecond-rounded timestamps. Stamps outside the trace are never
//! extrapolated.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::PoseUnavailable;
use crate::stamp::Stamp;
use crate::types::StampedPose;

/// An immutable trajectory snapshot, ordered by timestamp.
#[derive(Debug, Clone, Default)]
pub struct PoseTrace {
    poses: Vec<StampedPose>,
    /// Millisecond-rounded stamps in nanoseconds, parallel to `poses`.
    rounded_ns: Vec<i64>,
}

impl PoseTrace {
    /// Build a trace. Rounded timestamps are computed once here.
    ///
    /// The producer is trusted to deliver poses in non-decreasing time order.
    pub fn new(poses: Vec<StampedPose>) -> Self {
        let rounded_ns: Vec<i64> = poses
            .iter()
            .map(|pose| pose.stamp.round_to_millis().to_ns())
            .collect();
        debug_assert!(rounded_ns.windows(2).all(|w| w[0] <= w[1]));
        Self { poses, rounded_ns }
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn poses(&self) -> &[StampedPose] {
        &self.poses
    }

    /// Rounded stamps of the first and last pose.
    pub fn span(&self) -> Option<(Stamp, Stamp)> {
        match (self.rounded_ns.first(), self.rounded_ns.last()) {
            (Some(&first), Some(&last)) => Some((Stamp::from_ns(first), Stamp::from_ns(last))),
            _ => None,
        }
    }

    /// Find the pose valid at `stamp`.
    ///
    /// # Returns
    /// * `Ok(pose)` - The stored pose whose rounded stamp is closest to the
    ///   rounded query. On equal distance the earlier pose wins.
    /// * `Err(PoseUnavailable)` - The trace is empty or the rounded query
    ///   lies outside `[first, last]`.
    pub fn lookup(&self, stamp: Stamp) -> Result<&StampedPose, PoseUnavailable> {
        let (first, last) = match (self.rounded_ns.first(), self.rounded_ns.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => return Err(PoseUnavailable::EmptyTrace),
        };

        let query = stamp.round_to_millis().to_ns();
        if query < first || query > last {
            return Err(PoseUnavailable::OutOfRange {
                query: Stamp::from_ns(query),
                first: Stamp::from_ns(first),
                last: Stamp::from_ns(last),
            });
        }

        // Bracket: rounded[lower] <= query < rounded[upper]
        let upper = self.rounded_ns.partition_point(|&t| t <= query);
        let lower = upper - 1;

        let index = match self.rounded_ns.get(upper) {
            Some(&next) if next - query < query - self.rounded_ns[lower] => upper,
            _ => {
                // Several poses may share the lower stamp; take the first of them.
                let value = self.rounded_ns[lower];
                self.rounded_ns.partition_point(|&t| t < value)
            }
        };

        Ok(&self.poses[index])
    }
}

/// Thread-safe holder of the latest trace.
///
/// Readers take an `Arc` snapshot, so a lookup always sees one complete trace
/// even while another thread replaces it.
#[derive(Debug, Default)]
pub struct PoseSynchronizer {
    trace: RwLock<Option<Arc<PoseTrace>>>,
}

impl PoseSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the live trace wholesale. Returns the previous one.
    pub fn replace_trace(&self, trace: PoseTrace) -> Option<Arc<PoseTrace>> {
        self.trace.write().replace(Arc::new(trace))
    }

    pub fn snapshot(&self) -> Option<Arc<PoseTrace>> {
        self.trace.read().clone()
    }

    pub fn has_trace(&self) -> bool {
        self.trace.read().is_some()
    }

    pub fn lookup(&self, stamp: Stamp) -> Result<StampedPose, PoseUnavailable> {
        let trace = self.snapshot().ok_or(PoseUnavailable::NoTrajectory)?;
        trace.lookup(stamp).cloned()
    }
}
