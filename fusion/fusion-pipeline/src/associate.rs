use bev_geom::{ciou, GroundRect};
use nalgebra::DMatrix;
use tracing::{debug, trace};

use crate::types::{DetectedObject, FusionOutput, FusionPair};

/// Cost above which a radar/camera pairing is rejected.
pub const DEFAULT_COST_GATE: f64 = 1.60;

/// Cost of the padding ("no match") columns.
const NO_MATCH_COST: f64 = 2.0;

#[derive(Debug, Clone)]
pub struct TrackAssociatorConfig {
    pub cost_gate: f64,
    /// BEV footprint assumed for radar tracks.
    pub radar_footprint: (f64, f64),
}

impl Default for TrackAssociatorConfig {
    fn default() -> Self {
        Self {
            cost_gate: DEFAULT_COST_GATE,
            radar_footprint: bev_geom::DEFAULT_FOOTPRINT,
        }
    }
}

/// Pairs radar tracks with fused camera detections in the BEV plane.
///
/// Builds an `nR × (nC + nR)` cost matrix of `1 − CIoU` with `nR` padding
/// columns at cost 2.0, solves the assignment with the Hungarian algorithm,
/// and accepts pairs whose cost clears the gate. Every radar track yields
/// exactly one pair (dummy when unmatched); unclaimed camera detections stay
/// available as camera-only outputs.
#[derive(Debug, Clone, Default)]
pub struct TrackToTrackAssociator {
    cfg: TrackAssociatorConfig,
}

impl TrackToTrackAssociator {
    pub fn new(cfg: TrackAssociatorConfig) -> Self {
        Self { cfg }
    }

    pub fn associate(&self, fusion: &mut FusionOutput) {
        let n_radar = fusion.radar_tracks.len();
        let n_camera = fusion.fused_camera_detections.len();
        if n_radar == 0 {
            // nothing to pair; the bag passes through untouched
            return;
        }
        if n_camera == 0 {
            for radar in fusion.radar_tracks.clone() {
                fusion.push_pair(FusionPair {
                    radar,
                    camera: DetectedObject::dummy(),
                });
            }
            return;
        }

        let (footprint_w, footprint_h) = self.cfg.radar_footprint;

        let mut costs = DMatrix::from_element(n_radar, n_camera + n_radar, NO_MATCH_COST);
        for (r, radar) in fusion.radar_tracks.iter().enumerate() {
            let radar_rect = GroundRect::new(radar.s[0], radar.s[1], footprint_w, footprint_h);
            for (c, camera) in fusion.fused_camera_detections.iter().enumerate() {
                costs[(r, c)] = 1.0 - ciou(&radar_rect, &camera.rect);
            }
        }

        let assignment = hungarian::minimize(&costs);
        for (r, &col) in assignment.iter().enumerate() {
            let radar = fusion.radar_tracks[r].clone();
            let pair = if col < n_camera && costs[(r, col)] < self.cfg.cost_gate {
                trace!(r, col, cost = costs[(r, col)], "radar-camera pair");
                fusion.camera_associated[col] = true;
                FusionPair {
                    radar,
                    camera: fusion.fused_camera_detections[col].clone(),
                }
            } else {
                FusionPair {
                    radar,
                    camera: DetectedObject::dummy(),
                }
            };
            fusion.push_pair(pair);
        }
        debug!(
            n_radar,
            n_camera,
            paired = fusion.camera_associated.iter().filter(|&&a| a).count(),
            "association complete"
        );
    }
}
