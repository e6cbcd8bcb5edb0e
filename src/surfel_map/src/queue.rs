//! Cloud ingestion queue.
//!
//! Clouds usually arrive before the trajectory that covers them. They wait
//! here in arrival order and are handed to fusion strictly FIFO: a drain pass
//! stops at the first cloud whose pose cannot be resolved yet, so a later
//! cloud is never fused ahead of an earlier one.
//!
//! # Liveness
//!
//! The queue is unbounded unless `max_depth` is set. Depth, the age of the
//! oldest entry and the number of stalled drain passes are exposed so the
//! caller can surface a trajectory producer that has stopped advancing.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PoseUnavailable;
use crate::stamp::Stamp;
use crate::sync::PoseSynchronizer;
use crate::types::{PosedCloud, RawCloud};

/// Configuration for the cloud queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudQueueConfig {
    /// Drop the oldest cloud once this many are waiting (default: unbounded)
    pub max_depth: Option<usize>,
    /// Warn once the queue grows past this depth (default: 50)
    pub warn_depth: usize,
}

impl Default for CloudQueueConfig {
    fn default() -> Self {
        Self {
            max_depth: None,
            warn_depth: 50,
        }
    }
}

/// A cloud waiting for its pose.
#[derive(Debug, Clone)]
pub struct QueuedCloud {
    pub cloud: RawCloud,
    /// Arrival time for latency tracking
    pub arrival_time: Instant,
}

/// What the fusion callback did with a posed cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuseOutcome {
    /// Every point was processed.
    Fused,
    /// Fusion ran but storage overflowed part-way; applied updates stay.
    Partial,
    /// The fusion target is not ready. The cloud stays at the front and the
    /// pass stops.
    Deferred,
}

/// Why a drain pass stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainStop {
    Empty,
    PoseUnavailable(PoseUnavailable),
    Deferred,
}

/// Result of one drain pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Clouds handed to fusion and removed from the queue
    pub processed: usize,
    /// Clouds still waiting
    pub remaining: usize,
    pub stop: DrainStop,
}

/// Statistics about queue operations.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueStats {
    /// Total clouds enqueued
    pub enqueued: u64,
    /// Clouds fused completely
    pub fused: u64,
    /// Clouds fused while storage was exhausted
    pub partial: u64,
    /// Clouds discarded by the `max_depth` policy
    pub dropped: u64,
    /// Total drain passes
    pub drain_passes: u64,
    /// Drain passes that left a non-empty queue without processing anything
    pub stalled_passes: u64,
}

/// FIFO of clouds awaiting pose association.
#[derive(Debug, Default)]
pub struct CloudQueue {
    config: CloudQueueConfig,
    pending: VecDeque<QueuedCloud>,
    stats: QueueStats,
}

impl CloudQueue {
    pub fn new(config: CloudQueueConfig) -> Self {
        Self {
            config,
            pending: VecDeque::new(),
            stats: QueueStats::default(),
        }
    }

    /// Append a cloud to the back of the queue.
    ///
    /// # Returns
    /// Number of old clouds discarded to respect `max_depth` (0 when unbounded).
    pub fn enqueue(&mut self, cloud: RawCloud) -> usize {
        self.stats.enqueued += 1;

        let mut dropped = 0;
        if let Some(max_depth) = self.config.max_depth {
            while self.pending.len() >= max_depth.max(1) {
                if let Some(old) = self.pending.pop_front() {
                    warn!(
                        stamp = %old.cloud.stamp,
                        max_depth,
                        "Cloud queue full, dropping oldest cloud"
                    );
                    dropped += 1;
                }
            }
            self.stats.dropped += dropped as u64;
        }

        self.pending.push_back(QueuedCloud {
            cloud,
            arrival_time: Instant::now(),
        });

        if self.pending.len() == self.config.warn_depth + 1 {
            warn!(
                depth = self.pending.len(),
                "Cloud queue is growing, trajectory may not be advancing"
            );
        }

        dropped
    }

    /// Fuse as many clouds as possible from the front of the queue.
    ///
    /// For each front cloud the pose is resolved through `poses`; on success
    /// the posed cloud is handed to `fuse` and removed. The pass stops at the
    /// first unresolvable cloud (leaving it and everything behind it queued),
    /// at a `Deferred` outcome, or when the queue is empty.
    pub fn drain<F>(&mut self, poses: &PoseSynchronizer, mut fuse: F) -> DrainReport
    where
        F: FnMut(&PosedCloud) -> FuseOutcome,
    {
        self.stats.drain_passes += 1;
        let mut processed = 0;

        let stop = loop {
            let stamp = match self.pending.front() {
                Some(front) => front.cloud.stamp,
                None => break DrainStop::Empty,
            };

            let pose = match poses.lookup(stamp) {
                Ok(pose) => pose,
                Err(reason) => {
                    debug!(%stamp, %reason, "No pose for queued cloud yet");
                    break DrainStop::PoseUnavailable(reason);
                }
            };

            let Some(entry) = self.pending.pop_front() else {
                break DrainStop::Empty;
            };
            let arrival_time = entry.arrival_time;
            let posed = entry.cloud.attach_pose(pose);

            match fuse(&posed) {
                FuseOutcome::Fused => self.stats.fused += 1,
                FuseOutcome::Partial => self.stats.partial += 1,
                FuseOutcome::Deferred => {
                    let (cloud, _) = posed.into_parts();
                    self.pending.push_front(QueuedCloud {
                        cloud,
                        arrival_time,
                    });
                    break DrainStop::Deferred;
                }
            }
            processed += 1;
        };

        if processed == 0 && stop != DrainStop::Empty {
            self.stats.stalled_passes += 1;
        }

        DrainReport {
            processed,
            remaining: self.pending.len(),
            stop,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// How long the front cloud has been waiting.
    pub fn oldest_age(&self) -> Option<Duration> {
        self.pending.front().map(|entry| entry.arrival_time.elapsed())
    }

    /// Stamps of waiting clouds, front first.
    pub fn pending_stamps(&self) -> Vec<Stamp> {
        self.pending.iter().map(|entry| entry.cloud.stamp).collect()
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    pub fn config(&self) -> &CloudQueueConfig {
        &self.config
    }

    /// Whether the queue is past its warning depth.
    pub fn is_backlogged(&self) -> bool {
        self.pending.len() > self.config.warn_depth
    }
}
