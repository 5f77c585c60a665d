use serde::{Deserialize, Serialize};

use crate::types::{DetectedObject, FusionOutput};

/// One output object in a [`FusionResponse`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoiInfo {
    /// Pixel rect `[x, y, w, h]`; only camera-only rows carry real values,
    /// radar-paired rows are zero-filled.
    pub roi: [i32; 4],
    pub roi_class: String,
    pub roi_score: f64,
    pub track_id: i64,
    pub track_status: String,
    /// BEV rect slot `[x, y, w, h]`; zero-filled.
    pub media_birdview_roi: [f64; 4],
    /// Radar state `[x, y, vx, vy]`; zeros for camera-only rows.
    pub fusion_roi_state: [f64; 4],
    /// Radar extent `[w, h]`.
    pub fusion_roi_size: [f64; 2],
    /// `-1` for rows paired with a radar track, otherwise the camera index.
    pub sensor_source: i32,
}

/// Per-frame JSON response emitted by the fusion sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionResponse {
    /// 0 success, 1 no ROI, -2 decode/read failure.
    pub status_code: i32,
    pub description: String,
    pub inference_latency: i64,
    pub latency: i64,
    pub stream_id: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roi_info: Vec<RoiInfo>,
}

impl FusionResponse {
    /// Assemble the response rows for one frame's fusion bag. `dropped`
    /// marks frames an upstream failure made unusable.
    pub fn from_fusion(
        fusion: &FusionOutput,
        stream_id: u32,
        dropped: bool,
        inference_latency: i64,
        latency: i64,
    ) -> Self {
        let mut roi_info = Vec::new();

        // one row per radar track, fused or radar-only; both keep zeroed
        // pixel and birdview rects
        for pair in &fusion.pairs {
            let mut row = RoiInfo {
                fusion_roi_state: pair.radar.s,
                fusion_roi_size: [pair.radar.x_size, pair.radar.y_size],
                track_id: pair.radar.track_id as i64,
                track_status: "ACTIVE".to_string(),
                sensor_source: -1,
                ..Default::default()
            };
            row.roi_class = pair.camera.label.clone();
            if !pair.camera.is_dummy() {
                row.roi_score = pair.camera.confidence;
            }
            roi_info.push(row);
        }

        // camera detections no radar track claimed
        for det in fusion.unassociated_camera_detections() {
            let mut row = RoiInfo {
                sensor_source: det.source.map(|(camera_id, _)| camera_id as i32).unwrap_or(-1),
                ..Default::default()
            };
            fill_camera_fields(&mut row, fusion, det);
            roi_info.push(row);
        }

        let (status_code, description) = if roi_info.is_empty() {
            if dropped {
                (-2, "Read or decode input media failed".to_string())
            } else {
                (1, "noRoiDetected".to_string())
            }
        } else {
            (0, "succeeded".to_string())
        };

        FusionResponse {
            status_code,
            description,
            inference_latency,
            latency,
            stream_id,
            roi_info,
        }
    }
}

/// Copy camera-only detection fields into the row. The pixel `roi` is the
/// only rect populated; `media_birdview_roi` stays zero-filled.
fn fill_camera_fields(row: &mut RoiInfo, fusion: &FusionOutput, det: &DetectedObject) {
    row.roi_class = det.label.clone();
    row.roi_score = det.confidence;
    if let Some((camera_id, roi_index)) = det.source {
        if let Some(roi) = fusion
            .camera_rois
            .get(camera_id as usize)
            .and_then(|rois| rois.get(roi_index))
        {
            row.roi = [roi.x, roi.y, roi.width, roi.height];
            row.track_id = roi.tracking_id as i64;
            row.track_status = roi.tracking_status.to_string();
        }
    }
}
