use radar_track::{ClusterOutput, ClusterTracker, RadarConfig};
use skein::{ConfigMap, Node, NodeWorker, WorkerCtx, WorkerFlow};
use tracing::{error, warn};

use super::forward;
use crate::types::TrackerOutput;

/// Runs the EKF cluster tracker over the clustering output.
///
/// The tracker pool is owned by this node's single worker; no cross-thread
/// sharing. Tracker errors degrade to a dropped frame with an empty output.
#[derive(Debug, Default)]
pub struct RadarTrackingNode {}

impl RadarTrackingNode {
    pub fn boxed() -> Box<dyn Node> {
        Box::new(Self {})
    }
}

impl Node for RadarTrackingNode {
    fn kind(&self) -> &'static str {
        "radar-tracking"
    }
    fn in_port_count(&self) -> usize {
        1
    }
    fn out_port_count(&self) -> usize {
        1
    }
    fn configure(&mut self, _config: &ConfigMap) -> skein::Result<()> {
        Ok(())
    }
    fn new_worker(&mut self, _worker_idx: usize) -> Box<dyn NodeWorker> {
        Box::new(RadarTrackingWorker { tracker: None })
    }
}

struct RadarTrackingWorker {
    tracker: Option<ClusterTracker>,
}

impl NodeWorker for RadarTrackingWorker {
    fn process(&mut self, ctx: &mut WorkerCtx) -> WorkerFlow {
        let mut got = ctx.get_batched_input(&[0]);
        if got.is_empty() {
            return WorkerFlow::Continue;
        }
        let mut blob = got.remove(0);
        let frame_id = blob.frame_id;
        ctx.start_latency(frame_id, "radar-tracking");

        if let Some(buf) = blob.get_mut(0) {
            if buf.is_dropped() {
                buf.set_meta(TrackerOutput::default());
            } else {
                let config = buf.get_meta::<RadarConfig>().cloned();
                let clusters = buf.get_meta::<ClusterOutput>().cloned();
                match (config, clusters) {
                    (Some(config), Some(clusters)) => {
                        let tracker = self
                            .tracker
                            .get_or_insert_with(|| ClusterTracker::new(config.tracking.clone()));
                        match tracker.run(&clusters, config.frame_dt()) {
                            Ok(tracks) => buf.set_meta(TrackerOutput { tracks }),
                            Err(e) => {
                                warn!(frame = frame_id, "tracking failed: {e}");
                                buf.mark_dropped();
                                buf.set_meta(TrackerOutput::default());
                            }
                        }
                    }
                    _ => {
                        error!(frame = frame_id, "missing radar config or cluster output");
                        buf.mark_dropped();
                        buf.set_meta(TrackerOutput::default());
                    }
                }
            }
        }

        forward(ctx, blob, 0);
        ctx.stop_latency(frame_id, "radar-tracking");
        WorkerFlow::Continue
    }
}
