//! Output seams: preview/marker publication and map persistence.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use surfel_map::{PreviewPoint, Surfel};
use tracing::{info, trace, Level};

use crate::visualization::MarkerArray;

/// Destination of preview clouds and marker arrays.
pub trait Publisher {
    fn publish_preview(&mut self, frame_id: &str, points: &[PreviewPoint]);
    fn publish_markers(&mut self, markers: &MarkerArray);
}

/// Publisher that only logs what would be sent.
#[derive(Debug, Default)]
pub struct LogPublisher {
    previews: u64,
}

impl Publisher for LogPublisher {
    fn publish_preview(&mut self, frame_id: &str, points: &[PreviewPoint]) {
        self.previews += 1;
        info!(
            frame = frame_id,
            points = points.len(),
            sequence = self.previews,
            "Publishing map preview"
        );
    }

    fn publish_markers(&mut self, markers: &MarkerArray) {
        info!(
            frame = %markers.frame_id,
            namespace = %markers.namespace,
            markers = markers.markers.len(),
            truncated = markers.truncated,
            "Publishing surfel markers"
        );
        if tracing::enabled!(Level::TRACE) {
            match serde_json::to_string(markers) {
                Ok(payload) => trace!(%payload, "Marker payload"),
                Err(e) => trace!("Failed to serialize markers: {e}"),
            }
        }
    }
}

/// Persists exported surfels.
pub trait MapWriter {
    /// Write `surfels`, returning how many were written.
    fn write(&mut self, surfels: &[Surfel]) -> Result<usize>;
}

/// One line of the saved map.
#[derive(Debug, Serialize)]
struct PointRecord {
    x: f32,
    y: f32,
    z: f32,
    r: u8,
    g: u8,
    b: u8,
}

/// Writes one JSON object `{x, y, z, r, g, b}` per surfel per line.
#[derive(Debug, Clone)]
pub struct JsonLinesMapWriter {
    path: PathBuf,
}

impl JsonLinesMapWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MapWriter for JsonLinesMapWriter {
    fn write(&mut self, surfels: &[Surfel]) -> Result<usize> {
        let file = File::create(&self.path)
            .with_context(|| format!("failed to create map file {}", self.path.display()))?;
        let mut writer = BufWriter::new(file);

        for surfel in surfels {
            let record = PointRecord {
                x: surfel.position.x,
                y: surfel.position.y,
                z: surfel.position.z,
                r: surfel.color[0],
                g: surfel.color[1],
                b: surfel.color[2],
            };
            serde_json::to_writer(&mut writer, &record)?;
            writer.write_all(b"\n")?;
        }
        writer
            .flush()
            .with_context(|| format!("failed to flush map file {}", self.path.display()))?;

        info!(path = %self.path.display(), surfels = surfels.len(), "Saved surfel map");
        Ok(surfels.len())
    }
}
