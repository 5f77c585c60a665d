use crossbeam_channel::Sender;
use skein::{ConfigMap, EosTally, EventId, EventPayload, Node, NodeWorker, WorkerCtx, WorkerFlow};
use tracing::{debug, info, warn};

use crate::response::FusionResponse;
use crate::types::{CaptureStamp, FusionOutput};

/// Terminal node of the fusion chain: renders one [`FusionResponse`] per
/// frame onto a channel and emits the pipeline finish event when every
/// stream has drained.
pub struct ResponseSinkNode {
    sender: Option<Sender<FusionResponse>>,
    expected_streams: usize,
}

impl ResponseSinkNode {
    pub fn boxed(sender: Sender<FusionResponse>, expected_streams: usize) -> Box<dyn Node> {
        Box::new(Self {
            sender: Some(sender),
            expected_streams,
        })
    }
}

impl Node for ResponseSinkNode {
    fn kind(&self) -> &'static str {
        "fusion-response-sink"
    }
    fn in_port_count(&self) -> usize {
        1
    }
    fn out_port_count(&self) -> usize {
        0
    }

    fn configure(&mut self, config: &ConfigMap) -> skein::Result<()> {
        if let Some(n) = config.opt_int("streamNum")? {
            self.expected_streams = n as usize;
        }
        Ok(())
    }

    fn new_worker(&mut self, _worker_idx: usize) -> Box<dyn NodeWorker> {
        Box::new(ResponseSinkWorker {
            sender: self.sender.clone().expect("sender installed"),
            tally: EosTally::new(self.expected_streams.max(1)),
            expected: self.expected_streams.max(1),
        })
    }
}

struct ResponseSinkWorker {
    sender: Sender<FusionResponse>,
    tally: EosTally,
    expected: usize,
}

impl NodeWorker for ResponseSinkWorker {
    fn process(&mut self, ctx: &mut WorkerCtx) -> WorkerFlow {
        let got = ctx.get_batched_input(&[0]);
        for blob in got {
            if let Some(buf) = blob.get(0) {
                let has_bag = buf.contains_meta::<FusionOutput>();
                if !blob.is_eos() || has_bag {
                    let fusion = buf.get_meta::<FusionOutput>().cloned().unwrap_or_default();
                    let (latency_ms, inference_ms) = match buf.get_meta::<CaptureStamp>() {
                        Some(stamp) => (
                            stamp.at.elapsed().as_millis() as i64,
                            stamp.inference_ms as i64,
                        ),
                        None => (0, 0),
                    };
                    let response = FusionResponse::from_fusion(
                        &fusion,
                        blob.stream_id,
                        buf.is_dropped(),
                        inference_ms,
                        latency_ms,
                    );
                    debug!(
                        frame = blob.frame_id,
                        status = response.status_code,
                        rois = response.roi_info.len(),
                        "response emitted"
                    );
                    if self.sender.send(response).is_err() {
                        warn!("response receiver dropped");
                    }
                }
            }
            if self.tally.observe(&blob) {
                info!("fusion sink drained all streams");
                ctx.emit_event(
                    EventId::Finish,
                    &EventPayload::Finish {
                        stream_count: self.expected,
                    },
                );
                return WorkerFlow::Finished;
            }
        }
        WorkerFlow::Continue
    }
}
