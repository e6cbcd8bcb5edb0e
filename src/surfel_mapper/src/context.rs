//! Mapper context: owns the trajectory, the cloud queue and the map.
//!
//! All events are handled on one driver thread through `&mut self`, so
//! fusion, queries and map resets never overlap.

use anyhow::Result;
use surfel_map::{
    BoundingBox, CameraIntrinsics, CloudQueue, DrainReport, DrainStop, FuseOutcome, FusionError,
    FusionStats, PoseSynchronizer, PoseTrace, RawCloud, StampedPose, SurfelMap,
};
use tracing::{debug, info, warn};

use crate::diagnostics::{DiagnosticLevel, DiagnosticStatus, DiagnosticsInterface};
use crate::output::{MapWriter, Publisher};
use crate::params::MapperParams;
use crate::visualization::{surfel_markers, MarkerArray, MarkerConfig};

/// Inputs to the mapper.
#[derive(Debug, Clone)]
pub enum MapperEvent {
    CameraInfo(CameraIntrinsics),
    Trajectory(Vec<StampedPose>),
    Cloud(RawCloud),
    ResetMap,
    PublishMap(BoundingBox),
    SaveMap,
}

pub struct MapperContext {
    params: MapperParams,
    synchronizer: PoseSynchronizer,
    queue: CloudQueue,
    /// Created once camera intrinsics are known.
    map: Option<SurfelMap>,
    last_fusion: Option<FusionStats>,
    diagnostics: DiagnosticsInterface,
}

impl MapperContext {
    /// Create the context. With static intrinsics in `params` the map is
    /// built immediately; otherwise it waits for the first camera info.
    pub fn new(params: MapperParams) -> Result<Self> {
        params.validate()?;

        let map = match params.camera {
            Some(intrinsics) => Some(SurfelMap::new(params.map.clone(), intrinsics)?),
            None => None,
        };

        Ok(Self {
            synchronizer: PoseSynchronizer::new(),
            queue: CloudQueue::new(params.queue.clone()),
            map,
            last_fusion: None,
            diagnostics: DiagnosticsInterface::default(),
            params,
        })
    }

    pub fn map(&self) -> Option<&SurfelMap> {
        self.map.as_ref()
    }

    pub fn queue(&self) -> &CloudQueue {
        &self.queue
    }

    /// Dispatch one event.
    pub fn handle(
        &mut self,
        event: MapperEvent,
        publisher: &mut dyn Publisher,
        writer: &mut dyn MapWriter,
    ) -> Result<()> {
        match event {
            MapperEvent::CameraInfo(intrinsics) => self.on_camera_info(intrinsics)?,
            MapperEvent::Trajectory(poses) => {
                self.on_trajectory(poses);
            }
            MapperEvent::Cloud(cloud) => {
                self.on_cloud(cloud);
            }
            MapperEvent::ResetMap => self.reset_map(),
            MapperEvent::PublishMap(bbox) => {
                if let Some(markers) = self.publish_map(&bbox) {
                    publisher.publish_markers(&markers);
                }
            }
            MapperEvent::SaveMap => {
                self.save_map(writer)?;
            }
        }
        Ok(())
    }

    /// Build the map from the first camera info; later ones are ignored.
    pub fn on_camera_info(&mut self, intrinsics: CameraIntrinsics) -> Result<()> {
        if self.map.is_some() {
            return Ok(());
        }
        info!(
            fx = intrinsics.fx,
            fy = intrinsics.fy,
            cx = intrinsics.cx,
            cy = intrinsics.cy,
            "Received camera intrinsics, initializing surfel map"
        );
        self.map = Some(SurfelMap::new(self.params.map.clone(), intrinsics)?);
        self.process_queue();
        Ok(())
    }

    /// Replace the trajectory and fuse whatever became resolvable.
    pub fn on_trajectory(&mut self, poses: Vec<StampedPose>) -> DrainReport {
        let trace = PoseTrace::new(poses);
        debug!(
            poses = trace.len(),
            span = ?trace.span(),
            "Received trajectory"
        );
        self.synchronizer.replace_trace(trace);
        self.process_queue()
    }

    pub fn on_cloud(&mut self, cloud: RawCloud) -> DrainReport {
        debug!(stamp = %cloud.stamp, points = cloud.len(), "Received cloud");
        self.queue.enqueue(cloud);
        self.process_queue()
    }

    /// One drain pass over the queue.
    pub fn process_queue(&mut self) -> DrainReport {
        let Self {
            synchronizer,
            queue,
            map,
            last_fusion,
            ..
        } = self;

        queue.drain(synchronizer, |posed| {
            let Some(map) = map.as_mut() else {
                return FuseOutcome::Deferred;
            };
            match map.fuse(posed) {
                Ok(stats) => {
                    *last_fusion = Some(stats);
                    FuseOutcome::Fused
                }
                Err(FusionError::CapacityExhausted { stats, .. }) => {
                    *last_fusion = Some(stats);
                    FuseOutcome::Partial
                }
            }
        })
    }

    pub fn reset_map(&mut self) {
        match self.map.as_mut() {
            Some(map) => map.reset(),
            None => info!("Reset requested before the map was initialized"),
        }
        self.last_fusion = None;
    }

    /// Disk markers for every surfel inside `bbox`.
    pub fn publish_map(&self, bbox: &BoundingBox) -> Option<MarkerArray> {
        let Some(map) = self.map.as_ref() else {
            warn!("publish_map requested before the map was initialized");
            return None;
        };

        let ids = map.range_query(bbox);
        info!(
            min = ?bbox.min(),
            max = ?bbox.max(),
            surfels = ids.len(),
            "Publishing surfels in region"
        );

        let config = MarkerConfig {
            frame_id: self.params.node.map_frame.clone(),
            namespace: self.params.node.marker_namespace.clone(),
            max_markers: self.params.node.max_markers,
        };
        Some(surfel_markers(map, &ids, &config))
    }

    /// Write every confident surfel through `writer`.
    ///
    /// # Returns
    /// Number of surfels written, `0` when the map does not exist yet.
    pub fn save_map(&self, writer: &mut dyn MapWriter) -> Result<usize> {
        let Some(map) = self.map.as_ref() else {
            warn!("save_map requested before the map was initialized");
            return Ok(0);
        };
        let surfels = map.confidence_filtered_export();
        writer.write(&surfels)
    }

    /// Periodic work: retry the queue, publish the preview, refresh diagnostics.
    pub fn tick(&mut self, publisher: &mut dyn Publisher) -> Vec<DiagnosticStatus> {
        let report = self.process_queue();

        if let Some(map) = self.map.as_ref() {
            let preview = map.preview();
            publisher.publish_preview(&self.params.node.map_frame, &preview);
        }

        self.update_diagnostics(&report);
        self.diagnostics.publish()
    }

    fn update_diagnostics(&mut self, report: &DrainReport) {
        let mapper = self.diagnostics.mapper_mut();
        mapper.clear();
        match (&self.map, &self.last_fusion) {
            (None, _) => mapper.update_level_and_message(
                DiagnosticLevel::Warn,
                "waiting for camera intrinsics",
            ),
            (Some(_), Some(stats)) => {
                mapper.add_key_value("last_points", stats.points);
                mapper.add_key_value("last_inserted", stats.inserted);
                mapper.add_key_value("last_merged", stats.merged);
                mapper.add_key_value("last_replaced", stats.replaced);
                mapper.add_key_value("last_rejected", stats.rejected());
            }
            (Some(_), None) => {}
        }

        let queue = self.diagnostics.queue_mut();
        queue.clear();
        queue.add_key_value("depth", self.queue.len());
        queue.add_key_value("enqueued", self.queue.stats().enqueued);
        queue.add_key_value("fused", self.queue.stats().fused);
        queue.add_key_value("dropped", self.queue.stats().dropped);
        queue.add_key_value("stalled_passes", self.queue.stats().stalled_passes);
        if let Some(age) = self.queue.oldest_age() {
            queue.add_key_value("oldest_age_ms", age.as_millis());
        }
        if let DrainStop::PoseUnavailable(reason) = &report.stop {
            queue.add_key_value("blocked_on", reason);
        }
        if self.queue.is_backlogged() {
            queue.update_level_and_message(
                DiagnosticLevel::Warn,
                "cloud queue backlog, trajectory may not be advancing",
            );
        }

        let map_status = self.diagnostics.map_mut();
        map_status.clear();
        match &self.map {
            Some(map) => {
                map_status.add_key_value("surfels", map.len());
                map_status.add_key_value("capacity", map.capacity());
                if map.is_exhausted() {
                    map_status.update_level_and_message(
                        DiagnosticLevel::Error,
                        "surfel storage exhausted, reset the map",
                    );
                }
            }
            None => map_status.update_level_and_message(DiagnosticLevel::Stale, "no map"),
        }
    }
}
