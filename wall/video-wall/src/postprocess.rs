use skein::{ConfigMap, Node, NodeWorker, WorkerCtx, WorkerFlow};
use tracing::trace;

/// Descriptor-level post-processing between decode and display: rescales
/// every frame to the configured target geometry. The pixel operation itself
/// is the platform's; the graph only rewrites the frame descriptor.
pub struct PostProcessNode {
    target_width: u32,
    target_height: u32,
}

impl PostProcessNode {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }
}

impl Node for PostProcessNode {
    fn kind(&self) -> &'static str {
        "wall-postprocess"
    }
    fn in_port_count(&self) -> usize {
        1
    }
    fn out_port_count(&self) -> usize {
        1
    }

    fn configure(&mut self, config: &ConfigMap) -> skein::Result<()> {
        if let Some(width) = config.opt_int("targetWidth")? {
            self.target_width = width as u32;
        }
        if let Some(height) = config.opt_int("targetHeight")? {
            self.target_height = height as u32;
        }
        Ok(())
    }

    fn new_worker(&mut self, _worker_idx: usize) -> Box<dyn NodeWorker> {
        Box::new(PostProcessWorker {
            target_width: self.target_width,
            target_height: self.target_height,
        })
    }
}

struct PostProcessWorker {
    target_width: u32,
    target_height: u32,
}

impl NodeWorker for PostProcessWorker {
    fn process(&mut self, ctx: &mut WorkerCtx) -> WorkerFlow {
        let mut got = ctx.get_batched_input(&[0]);
        if got.is_empty() {
            return WorkerFlow::Continue;
        }
        let mut blob = got.remove(0);
        if let Some(view) = blob.get_mut(0).and_then(|b| b.frame_view_mut()) {
            if !view.is_eos() {
                trace!(
                    frame = view.frame_id,
                    from_w = view.width,
                    to_w = self.target_width,
                    "rescaled"
                );
                view.width = self.target_width;
                view.height = self.target_height;
            }
        }
        let mut pending = blob;
        loop {
            match ctx.send_output(pending, 0, std::time::Duration::from_millis(100)) {
                skein::SendStatus::PortFullTimeout(returned) => {
                    if ctx.is_shutting_down() {
                        return WorkerFlow::Finished;
                    }
                    pending = returned;
                }
                _ => break,
            }
        }
        WorkerFlow::Continue
    }
}
