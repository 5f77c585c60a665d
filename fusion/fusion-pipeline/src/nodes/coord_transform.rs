use std::path::Path;
use std::sync::Arc;

use bev_geom::CoordinateTransformer;
use skein::{ConfigMap, Error as SkeinError, Node, NodeWorker, WorkerCtx, WorkerFlow};
use tracing::{debug, warn};

use super::forward;
use crate::types::{DetectedObject, FusionOutput, TrackerOutput};

pub(crate) const CAMERA_PORT: usize = 0;
pub(crate) const RADAR_PORT: usize = 1;

/// Single-camera coordinate transform and fusion-bag assembly.
///
/// Consumes an aligned (camera frame, radar frame) pair, projects each
/// camera ROI into the BEV ground plane through the homography, filters
/// all-zero radar tracks, and attaches the assembled [`FusionOutput`] to the
/// camera buffer.
#[derive(Default)]
pub struct CoordTransformNode {
    transformer: Option<Arc<CoordinateTransformer>>,
    config: Option<ConfigMap>,
}

impl CoordTransformNode {
    pub fn boxed() -> Box<dyn Node> {
        Box::new(Self::default())
    }

    /// Bypass file-based configuration with a ready transformer.
    pub fn with_transformer(transformer: CoordinateTransformer) -> Box<dyn Node> {
        Box::new(Self {
            transformer: Some(Arc::new(transformer)),
            config: None,
        })
    }
}

impl Node for CoordTransformNode {
    fn kind(&self) -> &'static str {
        "coordinate-transform"
    }
    fn in_port_count(&self) -> usize {
        2
    }
    fn out_port_count(&self) -> usize {
        1
    }

    fn configure(&mut self, config: &ConfigMap) -> skein::Result<()> {
        if self.transformer.is_none() {
            // calibration paths are required when no transformer was
            // injected; probe them now so configure fails early
            config.get_str("registrationMatrixFilePath")?;
            config.get_str("qMatrixFilePath")?;
            config.get_str("homographyMatrixFilePath")?;
            config.get_int_array("pclConstraints")?;
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn prepare(&mut self) -> skein::Result<()> {
        if self.transformer.is_some() {
            return Ok(());
        }
        let config = self.config.as_ref().ok_or_else(|| {
            SkeinError::InvalidParameter("coordinate transform is unconfigured".into())
        })?;
        let constraints: Vec<i32> = config
            .get_int_array("pclConstraints")?
            .iter()
            .map(|&v| v as i32)
            .collect();
        let mut transformer = CoordinateTransformer::from_files(
            Path::new(config.get_str("registrationMatrixFilePath")?),
            Path::new(config.get_str("qMatrixFilePath")?),
            Path::new(config.get_str("homographyMatrixFilePath")?),
            &constraints,
        )
        .map_err(SkeinError::node_fail)?;
        if let Some(footprint) = config.opt_float("footprintWidth")? {
            let height = config.opt_float("footprintHeight")?.unwrap_or(1.7);
            transformer = transformer.with_footprint(footprint, height);
        }
        self.transformer = Some(Arc::new(transformer));
        Ok(())
    }

    fn new_worker(&mut self, _worker_idx: usize) -> Box<dyn NodeWorker> {
        Box::new(CoordTransformWorker {
            transformer: self.transformer.clone().expect("prepared"),
        })
    }

    fn reset(&mut self) -> skein::Result<()> {
        // drop the transformer only if prepare can rebuild it from files
        let file_configured = self
            .config
            .as_ref()
            .map(|c| c.contains("registrationMatrixFilePath"))
            .unwrap_or(false);
        if file_configured {
            self.transformer = None;
        }
        Ok(())
    }
}

struct CoordTransformWorker {
    transformer: Arc<CoordinateTransformer>,
}

impl NodeWorker for CoordTransformWorker {
    fn process(&mut self, ctx: &mut WorkerCtx) -> WorkerFlow {
        let mut got = ctx.get_batched_input(&[CAMERA_PORT, RADAR_PORT]);
        if got.is_empty() {
            return WorkerFlow::Continue;
        }
        let radar_blob = got.pop().expect("two blobs");
        let mut camera_blob = got.pop().expect("two blobs");
        let frame_id = camera_blob.frame_id;
        ctx.start_latency(frame_id, "coordinate-transform");

        let radar_tracks = radar_blob
            .get(0)
            .and_then(|buf| buf.get_meta::<TrackerOutput>())
            .map(|out| filter_zero_tracks(&out.tracks))
            .unwrap_or_default();

        if let Some(buf) = camera_blob.get_mut(0) {
            let rois = buf.rois().to_vec();
            let mut fusion = FusionOutput::new(1);
            fusion.set_radar_tracks(radar_tracks);

            let mut rects = Vec::with_capacity(rois.len());
            let mut detections = Vec::with_capacity(rois.len());
            for (index, roi) in rois.iter().enumerate() {
                let pixel = bev_geom::PixelRect::new(roi.x, roi.y, roi.width, roi.height);
                let ground = self.transformer.pixel_to_ground(&pixel);
                rects.push(ground);
                detections.push(DetectedObject {
                    rect: ground,
                    confidence: roi.confidence_detection,
                    label: roi.label_detection.clone(),
                    source: Some((0, index)),
                });
            }
            debug!(
                frame = frame_id,
                cameras = 1,
                rois = rois.len(),
                radar = fusion.radar_tracks.len(),
                "fusion bag assembled"
            );
            fusion.add_camera_rois(0, rois, rects);
            fusion.set_fused_camera_detections(detections);
            buf.set_meta(fusion);
        } else {
            warn!(frame = frame_id, "camera blob carries no buffer");
        }

        forward(ctx, camera_blob, 0);
        ctx.stop_latency(frame_id, "coordinate-transform");
        WorkerFlow::Continue
    }
}

/// Drop tracker rows that are entirely zero.
pub(crate) fn filter_zero_tracks(
    tracks: &[radar_track::TrackReport],
) -> Vec<radar_track::TrackReport> {
    tracks
        .iter()
        .filter(|t| {
            !(t.s[0] == 0.0 && t.s[1] == 0.0 && t.x_size == 0.0 && t.y_size == 0.0)
        })
        .cloned()
        .collect()
}
