use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use bev_geom::{iou, GroundRect, Homography, DEFAULT_FOOTPRINT};
use skein::Roi;
use tracing::trace;

use crate::error::{Error, Result};
use crate::types::DetectedObject;

pub const DEFAULT_NMS_THRESHOLD: f64 = 0.5;

/// Projects per-camera detections into the common BEV ground plane and
/// merges them with class-wise non-maximum suppression.
#[derive(Debug, Clone, Default)]
pub struct MultiCameraFuser {
    homographies: HashMap<u32, Homography>,
    nms_threshold: f64,
    footprint: (f64, f64),
}

impl MultiCameraFuser {
    pub fn new() -> Self {
        Self {
            homographies: HashMap::new(),
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            footprint: DEFAULT_FOOTPRINT,
        }
    }

    pub fn set_nms_threshold(&mut self, threshold: f64) {
        self.nms_threshold = threshold;
    }

    pub fn set_footprint(&mut self, width: f64, height: f64) {
        self.footprint = (width, height);
    }

    /// Load camera `camera_id`'s pixel-to-ground homography from a
    /// calibration file.
    pub fn set_transform_params(&mut self, path: &Path, camera_id: u32) -> Result<()> {
        self.homographies
            .insert(camera_id, Homography::from_file(path)?);
        Ok(())
    }

    pub fn insert_homography(&mut self, camera_id: u32, homography: Homography) {
        self.homographies.insert(camera_id, homography);
    }

    pub fn camera_count(&self) -> usize {
        self.homographies.len()
    }

    /// Project one pixel ROI into BEV through its camera's homography,
    /// carrying the detection label and score.
    pub fn transform_detection(
        &self,
        roi: &Roi,
        camera_id: u32,
        roi_index: usize,
    ) -> Result<DetectedObject> {
        let homography = self
            .homographies
            .get(&camera_id)
            .ok_or(Error::UnknownCamera(camera_id))?;
        let cx = roi.x as f64 + roi.width as f64 / 2.0;
        let cy = roi.y as f64 + roi.height as f64 / 2.0;
        let (x, y) = homography.project(cx, cy);
        Ok(DetectedObject {
            rect: GroundRect::new(x, y, self.footprint.0, self.footprint.1),
            confidence: roi.confidence_detection,
            label: roi.label_detection.clone(),
            source: Some((camera_id, roi_index)),
        })
    }

    /// Class-wise NMS: within each label, sort by confidence descending and
    /// suppress rects whose IoU with a kept rect exceeds the threshold.
    pub fn class_nms_merge(&self, objects: &[DetectedObject]) -> Vec<DetectedObject> {
        if objects.is_empty() {
            return Vec::new();
        }
        // group by label; BTreeMap keeps output order deterministic
        let mut by_label: BTreeMap<&str, Vec<&DetectedObject>> = BTreeMap::new();
        for obj in objects {
            by_label.entry(obj.label.as_str()).or_default().push(obj);
        }

        let mut results = Vec::new();
        for (label, mut group) in by_label {
            group.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
            let mut keep = vec![true; group.len()];
            for i in 0..group.len() {
                if !keep[i] {
                    continue;
                }
                results.push(group[i].clone());
                for j in (i + 1)..group.len() {
                    if !keep[j] {
                        continue;
                    }
                    let overlap = iou(&group[i].rect, &group[j].rect);
                    if overlap > self.nms_threshold {
                        trace!(label, i, j, overlap, "suppressed");
                        keep[j] = false;
                    }
                }
            }
        }
        results
    }

    /// Transform every camera's detections and merge across cameras.
    pub fn fuse_cameras(&self, per_camera: &[&[Roi]]) -> Result<Vec<DetectedObject>> {
        let mut transformed = Vec::new();
        for (camera_id, rois) in per_camera.iter().enumerate() {
            for (roi_index, roi) in rois.iter().enumerate() {
                transformed.push(self.transform_detection(roi, camera_id as u32, roi_index)?);
            }
        }
        Ok(self.class_nms_merge(&transformed))
    }

    pub fn fuse_2_cameras(&self, left: &[Roi], right: &[Roi]) -> Result<Vec<DetectedObject>> {
        self.fuse_cameras(&[left, right])
    }

    pub fn fuse_4_cameras(
        &self,
        first: &[Roi],
        second: &[Roi],
        third: &[Roi],
        fourth: &[Roi],
    ) -> Result<Vec<DetectedObject>> {
        self.fuse_cameras(&[first, second, third, fourth])
    }
}
