use std::collections::HashMap;
use std::time::Duration;

use skein::Pipeline;
use tracing::{info, warn};

use crate::decode::{DecodeControl, DecodeNode};
use crate::display::{DisplayNode, DisplayStream};
use crate::error::{Error, Result};
use crate::id::{WallNodeId, WallNodeKind};
use crate::postprocess::PostProcessNode;

/// Retries waiting for a decode chain to drain at stop.
const UNBIND_RETRY_TIMES: usize = 5;
const UNBIND_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// The wall composition graph: a typed facade over a [`Pipeline`] enforcing
/// wall-node identity, bind legality and the decode drain protocol.
pub struct WallGraph {
    pipeline: Pipeline,
    kinds: HashMap<WallNodeId, WallNodeKind>,
    edges: Vec<(WallNodeId, WallNodeId)>,
    decodes: HashMap<WallNodeId, DecodeControl>,
    displays: HashMap<WallNodeId, DisplayStream>,
    started: bool,
}

impl Default for WallGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl WallGraph {
    pub fn new() -> Self {
        Self {
            pipeline: Pipeline::new(),
            kinds: HashMap::new(),
            edges: Vec::new(),
            decodes: HashMap::new(),
            displays: HashMap::new(),
            started: false,
        }
    }

    fn insert_id(&mut self, id: WallNodeId) -> Result<()> {
        if self.kinds.contains_key(&id) {
            return Err(Error::DuplicatedId(id));
        }
        self.kinds.insert(id, id.kind);
        Ok(())
    }

    pub fn add_decode(&mut self, dev_id: u32, stream_id: u32, node: DecodeNode) -> Result<WallNodeId> {
        let id = WallNodeId::new(WallNodeKind::Decode, dev_id, stream_id);
        self.insert_id(id)?;
        let control = node.control();
        self.pipeline.set_source(Box::new(node), &id.node_name())?;
        self.decodes.insert(id, control);
        Ok(id)
    }

    pub fn add_postprocess(
        &mut self,
        dev_id: u32,
        stream_id: u32,
        node: PostProcessNode,
    ) -> Result<WallNodeId> {
        let id = WallNodeId::new(WallNodeKind::PostProcess, dev_id, stream_id);
        self.insert_id(id)?;
        self.pipeline.add_node(Box::new(node), &id.node_name())?;
        Ok(id)
    }

    pub fn add_display(
        &mut self,
        dev_id: u32,
        stream_id: u32,
        node: DisplayNode,
    ) -> Result<WallNodeId> {
        let id = WallNodeId::new(WallNodeKind::Display, dev_id, stream_id);
        self.insert_id(id)?;
        let stream = node.stream();
        self.pipeline.add_node(Box::new(node), &id.node_name())?;
        self.displays.insert(id, stream);
        Ok(id)
    }

    /// Bind a producer to a consumer. Only declared-compatible kinds may be
    /// bound, each input accepts one producer, and the kind ordering keeps
    /// the graph acyclic.
    pub fn bind(&mut self, src: WallNodeId, dst: WallNodeId) -> Result<()> {
        let src_kind = *self.kinds.get(&src).ok_or(Error::InvalidId(src))?;
        let dst_kind = *self.kinds.get(&dst).ok_or(Error::InvalidId(dst))?;
        if !src_kind.can_bind_to(dst_kind) {
            return Err(Error::IllegalBind {
                src: src_kind,
                dst: dst_kind,
            });
        }
        if self.edges.iter().any(|&(_, to)| to == dst) {
            return Err(Error::InputBusy { dst });
        }
        self.pipeline
            .link_node(&src.node_name(), 0, &dst.node_name(), 0, None)?;
        self.edges.push((src, dst));
        Ok(())
    }

    /// Prepare and start every node, then drive all decoders to Started.
    pub fn start(&mut self) -> Result<()> {
        for id in self.kinds.keys() {
            self.pipeline.configure_node_by_string(&id.node_name(), "")?;
        }
        self.pipeline.prepare()?;
        self.pipeline.start()?;
        for control in self.decodes.values() {
            control.init();
            control.start();
        }
        self.started = true;
        info!(nodes = self.kinds.len(), "wall started");
        Ok(())
    }

    /// Stop one decode chain: command the reader to stop, then wait within a
    /// bounded retry budget until every downstream display consumed what the
    /// decoder produced.
    pub fn stop_decode(&mut self, id: WallNodeId) -> Result<()> {
        if !self.started {
            return Err(Error::MixedSetupAndCtrl);
        }
        let control = self.decodes.get(&id).ok_or(Error::InvalidId(id))?;
        control.stop();
        let downstream = self.downstream_displays(id);
        for _ in 0..UNBIND_RETRY_TIMES {
            let consumed: u64 = downstream.iter().map(|d| d.consumed_frames()).sum();
            if consumed >= control.produced_frames() {
                return Ok(());
            }
            std::thread::sleep(UNBIND_RETRY_INTERVAL);
        }
        warn!(%id, "decode queue still occupied after retries");
        Err(Error::DrainTimeout(id))
    }

    fn downstream_displays(&self, from: WallNodeId) -> Vec<DisplayStream> {
        let mut stack = vec![from];
        let mut found = Vec::new();
        while let Some(id) = stack.pop() {
            for &(src, dst) in &self.edges {
                if src == id {
                    if let Some(stream) = self.displays.get(&dst) {
                        found.push(stream.clone());
                    } else {
                        stack.push(dst);
                    }
                }
            }
        }
        found
    }

    /// Stop everything: drain each decode chain, then stop the pipeline.
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        let decode_ids: Vec<WallNodeId> = self.decodes.keys().copied().collect();
        for id in decode_ids {
            if let Err(e) = self.stop_decode(id) {
                warn!("stopping {id}: {e}");
            }
        }
        self.pipeline.stop();
        self.started = false;
    }

    pub fn decode_control(&self, id: WallNodeId) -> Result<DecodeControl> {
        self.decodes.get(&id).cloned().ok_or(Error::InvalidId(id))
    }

    /// Per-tile control (pause/resume/hide/show/zoom/OSD). Control commands
    /// are only meaningful once setup completed.
    pub fn display_stream(&self, id: WallNodeId) -> Result<DisplayStream> {
        if !self.started {
            return Err(Error::MixedSetupAndCtrl);
        }
        self.displays.get(&id).cloned().ok_or(Error::InvalidId(id))
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}
