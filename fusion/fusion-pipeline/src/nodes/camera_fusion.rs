use std::path::Path;
use std::sync::Arc;

use skein::{ConfigMap, Error as SkeinError, Node, NodeWorker, WorkerCtx, WorkerFlow};
use tracing::{debug, warn};

use super::coord_transform::filter_zero_tracks;
use super::forward;
use crate::fuser::MultiCameraFuser;
use crate::types::{FusionOutput, TrackerOutput};

/// N-camera fusion node: aligns one frame from every camera with the radar
/// frame, projects all detections into BEV, merges them with class-wise NMS
/// and assembles the fusion bag.
///
/// Input ports `0..n_cameras` carry the camera frames; port `n_cameras`
/// carries the radar frame. The bag leaves on the first camera's blob.
pub struct CameraFusionNode {
    n_cameras: usize,
    fuser: Option<Arc<MultiCameraFuser>>,
    config: Option<ConfigMap>,
}

impl CameraFusionNode {
    pub fn boxed(n_cameras: usize) -> Box<dyn Node> {
        Box::new(Self {
            n_cameras,
            fuser: None,
            config: None,
        })
    }

    /// Two- and four-camera graphs are the deployed arrangements.
    pub fn boxed_2c() -> Box<dyn Node> {
        Self::boxed(2)
    }

    pub fn boxed_4c() -> Box<dyn Node> {
        Self::boxed(4)
    }

    pub fn with_fuser(n_cameras: usize, fuser: MultiCameraFuser) -> Box<dyn Node> {
        Box::new(Self {
            n_cameras,
            fuser: Some(Arc::new(fuser)),
            config: None,
        })
    }

    fn radar_port(&self) -> usize {
        self.n_cameras
    }
}

impl Node for CameraFusionNode {
    fn kind(&self) -> &'static str {
        "camera-fusion"
    }
    fn in_port_count(&self) -> usize {
        self.n_cameras + 1
    }
    fn out_port_count(&self) -> usize {
        1
    }

    fn configure(&mut self, config: &ConfigMap) -> skein::Result<()> {
        if self.fuser.is_none() {
            let paths = config.get_str_array("homographyMatrixFilePaths")?;
            if paths.len() != self.n_cameras {
                return Err(SkeinError::InvalidParameter(format!(
                    "{} homography files configured for {} cameras",
                    paths.len(),
                    self.n_cameras
                )));
            }
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn prepare(&mut self) -> skein::Result<()> {
        if self.fuser.is_some() {
            return Ok(());
        }
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| SkeinError::InvalidParameter("camera fusion is unconfigured".into()))?;
        let mut fuser = MultiCameraFuser::new();
        for (camera_id, path) in config
            .get_str_array("homographyMatrixFilePaths")?
            .iter()
            .enumerate()
        {
            fuser
                .set_transform_params(Path::new(path), camera_id as u32)
                .map_err(SkeinError::node_fail)?;
        }
        if let Some(threshold) = config.opt_float("nmsThreshold")? {
            fuser.set_nms_threshold(threshold);
        }
        self.fuser = Some(Arc::new(fuser));
        Ok(())
    }

    fn new_worker(&mut self, _worker_idx: usize) -> Box<dyn NodeWorker> {
        Box::new(CameraFusionWorker {
            n_cameras: self.n_cameras,
            fuser: self.fuser.clone().expect("prepared"),
        })
    }

    fn reset(&mut self) -> skein::Result<()> {
        // drop the fuser only if prepare can rebuild it from files
        let file_configured = self
            .config
            .as_ref()
            .map(|c| c.contains("homographyMatrixFilePaths"))
            .unwrap_or(false);
        if file_configured {
            self.fuser = None;
        }
        Ok(())
    }
}

struct CameraFusionWorker {
    n_cameras: usize,
    fuser: Arc<MultiCameraFuser>,
}

impl NodeWorker for CameraFusionWorker {
    fn process(&mut self, ctx: &mut WorkerCtx) -> WorkerFlow {
        let ports: Vec<usize> = (0..=self.n_cameras).collect();
        let mut got = ctx.get_batched_input(&ports);
        if got.is_empty() {
            return WorkerFlow::Continue;
        }
        let radar_blob = got.pop().expect("radar port");
        let frame_id = got[0].frame_id;
        ctx.start_latency(frame_id, "camera-fusion");

        let radar_tracks = radar_blob
            .get(0)
            .and_then(|buf| buf.get_meta::<TrackerOutput>())
            .map(|out| filter_zero_tracks(&out.tracks))
            .unwrap_or_default();

        let mut fusion = FusionOutput::new(self.n_cameras);
        fusion.set_radar_tracks(radar_tracks);

        let mut transformed = Vec::new();
        for (camera_id, blob) in got.iter().enumerate() {
            let rois = blob.get(0).map(|b| b.rois().to_vec()).unwrap_or_default();
            let mut rects = Vec::with_capacity(rois.len());
            for (index, roi) in rois.iter().enumerate() {
                match self
                    .fuser
                    .transform_detection(roi, camera_id as u32, index)
                {
                    Ok(det) => {
                        rects.push(det.rect);
                        transformed.push(det);
                    }
                    Err(e) => warn!(camera_id, "transform failed: {e}"),
                }
            }
            fusion.add_camera_rois(camera_id as u32, rois, rects);
        }
        fusion.set_fused_camera_detections(self.fuser.class_nms_merge(&transformed));
        debug!(
            frame = frame_id,
            merged = fusion.fused_camera_detections.len(),
            radar = fusion.radar_tracks.len(),
            "cameras fused"
        );

        let mut carrier = got.remove(0);
        if let Some(buf) = carrier.get_mut(0) {
            buf.set_meta(fusion);
        }
        forward(ctx, carrier, 0);
        ctx.stop_latency(frame_id, "camera-fusion");
        WorkerFlow::Continue
    }
}
