use skein::{ConfigMap, Node, NodeWorker, WorkerCtx, WorkerFlow};
use tracing::{error, warn};

use super::forward;
use crate::associate::{TrackAssociatorConfig, TrackToTrackAssociator};
use crate::types::FusionOutput;

/// Radar-to-camera track association over the fusion bag.
#[derive(Debug, Default)]
pub struct TrackAssocNode {
    cfg: TrackAssociatorConfig,
}

impl TrackAssocNode {
    pub fn boxed() -> Box<dyn Node> {
        Box::new(Self::default())
    }

    pub fn with_config(cfg: TrackAssociatorConfig) -> Box<dyn Node> {
        Box::new(Self { cfg })
    }
}

impl Node for TrackAssocNode {
    fn kind(&self) -> &'static str {
        "track-to-track-association"
    }
    fn in_port_count(&self) -> usize {
        1
    }
    fn out_port_count(&self) -> usize {
        1
    }

    fn configure(&mut self, config: &ConfigMap) -> skein::Result<()> {
        if let Some(gate) = config.opt_float("costGate")? {
            self.cfg.cost_gate = gate;
        }
        if let Some(width) = config.opt_float("radarFootprintWidth")? {
            self.cfg.radar_footprint.0 = width;
        }
        if let Some(height) = config.opt_float("radarFootprintHeight")? {
            self.cfg.radar_footprint.1 = height;
        }
        Ok(())
    }

    fn new_worker(&mut self, _worker_idx: usize) -> Box<dyn NodeWorker> {
        Box::new(TrackAssocWorker {
            associator: TrackToTrackAssociator::new(self.cfg.clone()),
        })
    }
}

struct TrackAssocWorker {
    associator: TrackToTrackAssociator,
}

impl NodeWorker for TrackAssocWorker {
    fn process(&mut self, ctx: &mut WorkerCtx) -> WorkerFlow {
        let mut got = ctx.get_batched_input(&[0]);
        if got.is_empty() {
            return WorkerFlow::Continue;
        }
        let mut blob = got.remove(0);
        let frame_id = blob.frame_id;
        ctx.start_latency(frame_id, "track-to-track");

        if let Some(buf) = blob.get_mut(0) {
            match buf.get_meta::<FusionOutput>().cloned() {
                Some(mut fusion) => {
                    if !buf.is_dropped() {
                        self.associator.associate(&mut fusion);
                    }
                    buf.set_meta(fusion);
                }
                None => {
                    if !buf.is_eos() {
                        error!(frame = frame_id, "no fusion bag on input buffer");
                    }
                    buf.mark_dropped();
                }
            }
        } else {
            warn!(frame = frame_id, "blob carries no buffer");
        }

        forward(ctx, blob, 0);
        ctx.stop_latency(frame_id, "track-to-track");
        WorkerFlow::Continue
    }
}
