use std::time::Instant;

use bev_geom::GroundRect;
use radar_track::TrackReport;
use skein::Roi;

/// Radar tracker output for one frame, carried as buffer metadata.
#[derive(Debug, Clone, Default)]
pub struct TrackerOutput {
    pub tracks: Vec<TrackReport>,
}

/// Capture-time stamp set by the ingesting node; sinks derive end-to-end
/// latency from it.
#[derive(Debug, Clone, Copy)]
pub struct CaptureStamp {
    pub at: Instant,
    /// Upstream inference time in milliseconds, when known.
    pub inference_ms: f64,
}

impl CaptureStamp {
    pub fn now() -> Self {
        Self {
            at: Instant::now(),
            inference_ms: 0.0,
        }
    }
}

/// A camera detection projected into the BEV ground plane.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedObject {
    pub rect: GroundRect,
    pub confidence: f64,
    pub label: String,
    /// `(camera_id, roi_index)` provenance of the pixel-space detection;
    /// `None` for the dummy object.
    pub source: Option<(u32, usize)>,
}

impl DetectedObject {
    /// Placeholder paired with radar tracks that matched no camera
    /// detection.
    pub fn dummy() -> Self {
        Self {
            rect: GroundRect::default(),
            confidence: 0.0,
            label: "dummy".to_string(),
            source: None,
        }
    }

    pub fn is_dummy(&self) -> bool {
        self.source.is_none() && self.label == "dummy"
    }
}

impl Default for DetectedObject {
    fn default() -> Self {
        Self::dummy()
    }
}

/// One radar track paired with its fused camera detection (or the dummy).
#[derive(Debug, Clone)]
pub struct FusionPair {
    pub radar: TrackReport,
    pub camera: DetectedObject,
}

/// Per-frame fusion bag accumulated along the graph, carried as buffer
/// metadata from the coordinate-transform node onwards.
#[derive(Debug, Clone, Default)]
pub struct FusionOutput {
    pub num_cameras: usize,
    /// Original pixel-space ROIs, per camera.
    pub camera_rois: Vec<Vec<Roi>>,
    /// BEV projection of each camera ROI, index-aligned with `camera_rois`.
    pub camera_ground_rects: Vec<Vec<GroundRect>>,
    /// Radar tracks after dropping all-zero entries.
    pub radar_tracks: Vec<TrackReport>,
    /// Camera detections in BEV after the cross-camera NMS merge.
    pub fused_camera_detections: Vec<DetectedObject>,
    /// Whether `fused_camera_detections[i]` was claimed by a radar track.
    pub camera_associated: Vec<bool>,
    /// Final radar-camera pairs, one per radar track.
    pub pairs: Vec<FusionPair>,
}

impl FusionOutput {
    pub fn new(num_cameras: usize) -> Self {
        Self {
            num_cameras,
            camera_rois: vec![Vec::new(); num_cameras],
            camera_ground_rects: vec![Vec::new(); num_cameras],
            ..Default::default()
        }
    }

    pub fn add_camera_rois(&mut self, camera_id: u32, rois: Vec<Roi>, rects: Vec<GroundRect>) {
        let idx = camera_id as usize;
        self.camera_rois[idx] = rois;
        self.camera_ground_rects[idx] = rects;
    }

    pub fn set_fused_camera_detections(&mut self, detections: Vec<DetectedObject>) {
        self.camera_associated = vec![false; detections.len()];
        self.fused_camera_detections = detections;
    }

    pub fn set_radar_tracks(&mut self, tracks: Vec<TrackReport>) {
        self.radar_tracks = tracks;
    }

    pub fn push_pair(&mut self, pair: FusionPair) {
        self.pairs.push(pair);
    }

    /// Fused camera detections not claimed by any radar track; these remain
    /// camera-only outputs.
    pub fn unassociated_camera_detections(&self) -> impl Iterator<Item = &DetectedObject> {
        self.fused_camera_detections
            .iter()
            .zip(self.camera_associated.iter())
            .filter(|&(_, &assoc)| !assoc)
            .map(|(det, _)| det)
    }
}
