//! JSON-lines replay source.
//!
//! Each line holds one event tagged by `type`:
//!
//! ```text
//! {"type": "camera_info", "k": [525, 0, 319.5, 0, 525, 239.5, 0, 0, 1]}
//! {"type": "cloud", "stamp": {"sec": 10, "nanosec": 0}, "points": [[0.1, 0.1, 1.1, 255, 0, 0]]}
//! {"type": "trajectory", "poses": [{"stamp": {"sec": 10, "nanosec": 0},
//!   "position": [0, 0, 0], "orientation": [1, 0, 0, 0]}]}
//! {"type": "publish_map", "min": [-1, -1, 0], "max": [1, 1, 3]}
//! {"type": "save_map"}
//! {"type": "reset_map"}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. The file is read on
//! its own thread and events are forwarded over a channel, standing in for
//! the message transport.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use serde::Deserialize;
use surfel_map::{BoundingBox, CameraIntrinsics, RawCloud};
use tracing::{info, warn};

use crate::context::MapperEvent;
use crate::pointcloud::{CloudRecord, PoseRecord};

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

/// One line of a replay file.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayRecord {
    CameraInfo {
        /// Row-major 3x3 camera matrix
        k: [f64; 9],
        #[serde(default = "default_width")]
        width: u32,
        #[serde(default = "default_height")]
        height: u32,
    },
    Trajectory {
        poses: Vec<PoseRecord>,
    },
    Cloud(CloudRecord),
    ResetMap,
    PublishMap {
        min: [f32; 3],
        max: [f32; 3],
    },
    SaveMap,
}

impl TryFrom<ReplayRecord> for MapperEvent {
    type Error = anyhow::Error;

    fn try_from(record: ReplayRecord) -> Result<Self> {
        let event = match record {
            ReplayRecord::CameraInfo { k, width, height } => {
                MapperEvent::CameraInfo(CameraIntrinsics::from_k(&k, width, height))
            }
            ReplayRecord::Trajectory { poses } => {
                MapperEvent::Trajectory(poses.into_iter().map(Into::into).collect())
            }
            ReplayRecord::Cloud(cloud) => MapperEvent::Cloud(RawCloud::try_from(cloud)?),
            ReplayRecord::ResetMap => MapperEvent::ResetMap,
            ReplayRecord::PublishMap { min, max } => {
                MapperEvent::PublishMap(BoundingBox::from_corners(min, max))
            }
            ReplayRecord::SaveMap => MapperEvent::SaveMap,
        };
        Ok(event)
    }
}

/// Parse one replay line. `Ok(None)` for blank and comment lines.
pub fn parse_line(line: &str) -> Result<Option<MapperEvent>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let record: ReplayRecord = serde_json::from_str(line)?;
    Ok(Some(MapperEvent::try_from(record)?))
}

/// Reads a replay file on a background thread.
pub struct ReplaySource {
    path: PathBuf,
    handle: Option<JoinHandle<Result<usize>>>,
}

impl ReplaySource {
    /// Open `path` and start forwarding its events to `tx`.
    ///
    /// The thread stops at end of file, when `running` is cleared, or when
    /// the receiver is dropped.
    pub fn spawn(path: &Path, tx: Sender<MapperEvent>, running: Arc<AtomicBool>) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open replay file {}", path.display()))?;
        let reader = BufReader::new(file);
        let thread_path = path.to_path_buf();

        let handle = thread::Builder::new()
            .name("replay".to_string())
            .spawn(move || forward_events(reader, &thread_path, &tx, &running))
            .context("failed to spawn replay thread")?;

        Ok(Self {
            path: path.to_path_buf(),
            handle: Some(handle),
        })
    }

    /// Wait for the reader thread and return the number of events forwarded.
    pub fn join(mut self) -> Result<usize> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| {
                anyhow::anyhow!("replay thread for {} panicked", self.path.display())
            })?,
            None => Ok(0),
        }
    }
}

fn forward_events<R: BufRead>(
    reader: R,
    path: &Path,
    tx: &Sender<MapperEvent>,
    running: &AtomicBool,
) -> Result<usize> {
    let mut forwarded = 0;

    for (index, line) in reader.lines().enumerate() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;

        match parse_line(&line) {
            Ok(Some(event)) => {
                if tx.send(event).is_err() {
                    break;
                }
                forwarded += 1;
            }
            Ok(None) => {}
            Err(error) => warn!(line = index + 1, %error, "Skipping malformed replay line"),
        }
    }

    info!(path = %path.display(), events = forwarded, "Replay finished");
    Ok(forwarded)
}
