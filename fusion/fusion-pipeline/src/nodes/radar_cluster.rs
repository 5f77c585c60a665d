use radar_track::{ClusterOutput, DbscanEngine, PointCloud, RadarConfig};
use skein::{ConfigMap, Node, NodeWorker, WorkerCtx, WorkerFlow};
use tracing::{debug, error, warn};

use super::forward;

/// Clusters each frame's radar point cloud.
///
/// Input buffers carry a [`PointCloud`] plus the [`RadarConfig`] as
/// metadata; the clustering engine is built from the first frame's config.
/// The cluster output is attached as metadata and the blob forwarded.
/// Per-frame clustering failures mark the frame dropped instead of stopping
/// the graph.
#[derive(Debug, Default)]
pub struct RadarClusterNode {}

impl RadarClusterNode {
    pub fn boxed() -> Box<dyn Node> {
        Box::new(Self {})
    }
}

impl Node for RadarClusterNode {
    fn kind(&self) -> &'static str {
        "radar-clustering"
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
        Box::new(RadarClusterWorker { engine: None })
    }
}

struct RadarClusterWorker {
    engine: Option<DbscanEngine>,
}

impl NodeWorker for RadarClusterWorker {
    fn process(&mut self, ctx: &mut WorkerCtx) -> WorkerFlow {
        let mut got = ctx.get_batched_input(&[0]);
        if got.is_empty() {
            return WorkerFlow::Continue;
        }
        let mut blob = got.remove(0);
        ctx.record_timestamp(blob.frame_id, "RadarClusteringIn");
        let frame_id = blob.frame_id;

        if let Some(buf) = blob.get_mut(0) {
            if buf.is_dropped() {
                buf.set_meta(ClusterOutput::default());
            } else {
                let config = buf.get_meta::<RadarConfig>().cloned();
                match config {
                    None => {
                        error!("input buffer carries no radar config");
                        buf.mark_dropped();
                        buf.set_meta(ClusterOutput::default());
                    }
                    Some(config) => {
                        let engine = self
                            .engine
                            .get_or_insert_with(|| DbscanEngine::new(&config.clustering));
                        let cloud = buf.get_meta::<PointCloud>().cloned().unwrap_or_default();
                        match engine.cluster(&cloud) {
                            Ok(output) => {
                                debug!(
                                    frame = frame_id,
                                    clusters = output.num_clusters,
                                    "clustered"
                                );
                                buf.set_meta(output);
                            }
                            Err(e) => {
                                warn!(frame = frame_id, "clustering failed: {e}");
                                buf.mark_dropped();
                                buf.set_meta(ClusterOutput::default());
                            }
                        }
                    }
                }
            }
        }

        let frame_id = blob.frame_id;
        forward(ctx, blob, 0);
        ctx.record_timestamp(frame_id, "RadarClusteringOut");
        WorkerFlow::Continue
    }
}
