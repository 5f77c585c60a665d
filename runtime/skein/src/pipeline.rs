use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::blob::Blob;
use crate::config::ConfigMap;
use crate::error::{Error, Result};
use crate::event::{EventBus, EventId, EventListener, LatencyMonitor};
use crate::node::{Node, NodeRuntime, NodeState, OutBinding, WorkerCtx, WorkerFlow};
use crate::port::{PortQueue, PushOutcome, SendStatus};
use crate::ConvertFn;

/// Default capacity of a node input port.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    Idle,
    Prepared,
    Running,
    Stopped,
    Destroyed,
}

pub(crate) struct NodeCell {
    pub(crate) name: String,
    pub(crate) kind: String,
    pub(crate) node: Box<dyn Node>,
    pub(crate) state: NodeState,
    pub(crate) config_str: Option<String>,
    pub(crate) is_source: bool,
    pub(crate) queue_sizes: Vec<usize>,
    pub(crate) runtime: Option<Arc<NodeRuntime>>,
}

pub(crate) struct EdgeDef {
    pub(crate) from: (usize, usize),
    pub(crate) to: (usize, usize),
    pub(crate) converter: Option<Arc<ConvertFn>>,
}

/// A graph of nodes connected by bounded ports, plus the machinery to drive
/// it: preparation in dependency order, worker threads, events, latency
/// accounting, EOS propagation and topology serialization.
pub struct Pipeline {
    cells: Vec<NodeCell>,
    by_name: HashMap<String, usize>,
    edges: Vec<EdgeDef>,
    events: Arc<EventBus>,
    latency: Arc<LatencyMonitor>,
    shutdown: Arc<AtomicBool>,
    eos_requested: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    state: PipelineState,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        let events = Arc::new(EventBus::new());
        // Built-in events are always present.
        for id in [
            EventId::TimestampRecord,
            EventId::LatencyCapture,
            EventId::Finish,
        ] {
            events.register_event(id).expect("fresh bus");
        }
        Self {
            cells: Vec::new(),
            by_name: HashMap::new(),
            edges: Vec::new(),
            events,
            latency: Arc::new(LatencyMonitor::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            eos_requested: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
            state: PipelineState::Idle,
        }
    }

    // ------------------------------------------------------------------
    // graph assembly

    fn add_cell(&mut self, node: Box<dyn Node>, name: &str, is_source: bool) -> Result<()> {
        if self.by_name.contains_key(name) {
            return Err(Error::DuplicatedId(name.to_string()));
        }
        let in_ports = node.in_port_count();
        let cell = NodeCell {
            name: name.to_string(),
            kind: node.kind().to_string(),
            node,
            state: NodeState::Unconfigured,
            config_str: None,
            is_source,
            queue_sizes: vec![DEFAULT_QUEUE_CAPACITY; in_ports],
            runtime: None,
        };
        self.by_name.insert(name.to_string(), self.cells.len());
        self.cells.push(cell);
        Ok(())
    }

    /// Add a node with at least one predecessor.
    pub fn add_node(&mut self, node: Box<dyn Node>, name: &str) -> Result<()> {
        self.add_cell(node, name, false)
    }

    /// Add a node with no predecessors.
    pub fn set_source(&mut self, node: Box<dyn Node>, name: &str) -> Result<()> {
        self.add_cell(node, name, true)
    }

    fn idx(&self, name: &str) -> Result<usize> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::InvalidId(name.to_string()))
    }

    /// Parse a `key=(TYPE)value;...` options string and configure the node.
    pub fn configure_node_by_string(&mut self, name: &str, config: &str) -> Result<()> {
        let idx = self.idx(name)?;
        let parsed = ConfigMap::parse(config)?;
        let cell = &mut self.cells[idx];
        if !cell.state.can_transition(NodeState::Configured) {
            return Err(Error::IllegalStateTransition {
                from: cell.state,
                to: NodeState::Configured,
            });
        }
        cell.node.configure(&parsed)?;
        cell.node.validate()?;
        cell.config_str = Some(config.to_string());
        cell.state = NodeState::Configured;
        Ok(())
    }

    /// Create a directed edge `(src, src_port) -> (dst, dst_port)`, with an
    /// optional pure converter applied in transit. Each input port accepts at
    /// most one incoming edge; output ports may fan out.
    pub fn link_node(
        &mut self,
        src: &str,
        src_port: usize,
        dst: &str,
        dst_port: usize,
        converter: Option<Arc<ConvertFn>>,
    ) -> Result<()> {
        let from = self.idx(src)?;
        let to = self.idx(dst)?;
        if src_port >= self.cells[from].node.out_port_count() {
            return Err(Error::PortOutOfRange {
                node: src.to_string(),
                port: src_port,
            });
        }
        if dst_port >= self.cells[to].node.in_port_count() {
            return Err(Error::PortOutOfRange {
                node: dst.to_string(),
                port: dst_port,
            });
        }
        if self
            .edges
            .iter()
            .any(|e| e.to == (to, dst_port))
        {
            return Err(Error::PortAlreadyBound {
                node: dst.to_string(),
                port: dst_port,
            });
        }
        self.edges.push(EdgeDef {
            from: (from, src_port),
            to: (to, dst_port),
            converter,
        });
        Ok(())
    }

    /// Set the capacity of one input port. Takes effect at the next prepare.
    pub fn set_node_queue_size(&mut self, name: &str, port: usize, size: usize) -> Result<()> {
        let idx = self.idx(name)?;
        let cell = &mut self.cells[idx];
        match cell.queue_sizes.get_mut(port) {
            Some(slot) => {
                *slot = size.max(1);
                Ok(())
            }
            None => Err(Error::PortOutOfRange {
                node: name.to_string(),
                port,
            }),
        }
    }

    // ------------------------------------------------------------------
    // lifecycle

    /// Topological order over the adjacency; rejects cycles and dangling
    /// non-source nodes.
    fn dependency_order(&self) -> Result<Vec<usize>> {
        let n = self.cells.len();
        let mut in_degree = vec![0usize; n];
        for e in &self.edges {
            in_degree[e.to.0] += 1;
        }
        for (i, cell) in self.cells.iter().enumerate() {
            if !cell.is_source && in_degree[i] == 0 {
                return Err(Error::DanglingNode(cell.name.clone()));
            }
        }
        let mut order = Vec::with_capacity(n);
        let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        while let Some(i) = ready.pop() {
            order.push(i);
            for e in self.edges.iter().filter(|e| e.from.0 == i) {
                in_degree[e.to.0] -= 1;
                if in_degree[e.to.0] == 0 {
                    ready.push(e.to.0);
                }
            }
        }
        if order.len() != n {
            let stuck = (0..n)
                .find(|&i| !order.contains(&i))
                .map(|i| self.cells[i].name.clone())
                .unwrap_or_default();
            return Err(Error::CyclicGraph(stuck));
        }
        Ok(order)
    }

    fn build_runtimes(&mut self) {
        // Input queues, shared between the owning node (consumer side) and
        // the producing node's output bindings.
        let mut queues: HashMap<(usize, usize), Arc<PortQueue>> = HashMap::new();
        for (i, cell) in self.cells.iter().enumerate() {
            for (port, &cap) in cell.queue_sizes.iter().enumerate() {
                queues.insert((i, port), Arc::new(PortQueue::new(cap)));
            }
        }
        for (i, cell) in self.cells.iter_mut().enumerate() {
            let in_queues: Vec<Arc<PortQueue>> = (0..cell.node.in_port_count())
                .map(|p| queues[&(i, p)].clone())
                .collect();
            let mut out_bindings: Vec<Vec<OutBinding>> = (0..cell.node.out_port_count())
                .map(|_| Vec::new())
                .collect();
            for e in self.edges.iter().filter(|e| e.from.0 == i) {
                out_bindings[e.from.1].push(OutBinding {
                    queue: queues[&e.to].clone(),
                    converter: e.converter.clone(),
                });
            }
            let max_cap = cell.queue_sizes.iter().copied().max().unwrap_or(1);
            cell.runtime = Some(Arc::new(NodeRuntime::new(
                cell.name.clone(),
                in_queues,
                out_bindings,
                cell.node.batching_policy(),
                max_cap * 4,
                self.events.clone(),
                self.latency.clone(),
                self.shutdown.clone(),
                self.eos_requested.clone(),
            )));
        }
    }

    /// Prepare every node in dependency order (sources first). Fails if any
    /// node is not Configured; the failing call leaves prior state intact.
    pub fn prepare(&mut self) -> Result<()> {
        let order = self.dependency_order()?;
        for &i in &order {
            let cell = &self.cells[i];
            if !cell.state.can_transition(NodeState::Prepared) {
                return Err(Error::IllegalStateTransition {
                    from: cell.state,
                    to: NodeState::Prepared,
                });
            }
        }
        self.shutdown.store(false, Ordering::SeqCst);
        self.eos_requested.store(false, Ordering::SeqCst);
        self.build_runtimes();
        for &i in &order {
            let cell = &mut self.cells[i];
            cell.node.prepare()?;
            cell.state = NodeState::Prepared;
            debug!(node = %cell.name, "prepared");
        }
        self.state = PipelineState::Prepared;
        Ok(())
    }

    /// Spawn all worker threads. Non-blocking.
    pub fn start(&mut self) -> Result<()> {
        if self.state != PipelineState::Prepared {
            return Err(Error::IllegalStateTransition {
                from: self.node_state_for_pipeline(),
                to: NodeState::Running,
            });
        }
        for cell in self.cells.iter_mut() {
            let rt = cell.runtime.as_ref().expect("prepared").clone();
            let policy = cell.node.batching_policy();
            for worker_idx in 0..policy.worker_count() {
                let worker = cell.node.new_worker(worker_idx);
                let mut ctx = WorkerCtx {
                    rt: rt.clone(),
                    worker_idx,
                    stream_binding: policy.stream_binding(worker_idx),
                };
                let thread_name = format!("{}-{}", cell.name, worker_idx);
                let handle = std::thread::Builder::new()
                    .name(thread_name)
                    .spawn(move || worker_main(worker, &mut ctx))
                    .map_err(|e| Error::NodeFail(e.to_string()))?;
                self.threads.push(handle);
            }
            cell.state = NodeState::Running;
        }
        self.state = PipelineState::Running;
        info!(nodes = self.cells.len(), "pipeline started");
        Ok(())
    }

    /// Stop the pipeline. Broadcasts the shutdown flag, wakes every port
    /// wait, and joins all workers synchronously; the pipeline reaches
    /// Stopped in finite time.
    pub fn stop(&mut self) {
        if self.state != PipelineState::Running {
            return;
        }
        self.shutdown.store(true, Ordering::SeqCst);
        for cell in &self.cells {
            if let Some(rt) = &cell.runtime {
                for q in &rt.in_queues {
                    q.shutdown();
                }
            }
        }
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked during stop");
            }
        }
        for cell in self.cells.iter_mut() {
            cell.state = NodeState::Stopped;
        }
        self.state = PipelineState::Stopped;
        info!("pipeline stopped");
    }

    /// Return all nodes from Stopped to Prepared with fresh ports.
    pub fn rearm(&mut self) -> Result<()> {
        if self.state != PipelineState::Stopped {
            return Err(Error::IllegalStateTransition {
                from: self.node_state_for_pipeline(),
                to: NodeState::Prepared,
            });
        }
        self.shutdown.store(false, Ordering::SeqCst);
        self.eos_requested.store(false, Ordering::SeqCst);
        self.build_runtimes();
        for cell in self.cells.iter_mut() {
            cell.node.rearm()?;
            if let Some(rt) = &cell.runtime {
                rt.clear_transient();
            }
            cell.state = NodeState::Prepared;
        }
        self.state = PipelineState::Prepared;
        Ok(())
    }

    /// Return all nodes from Stopped to Configured.
    pub fn reset(&mut self) -> Result<()> {
        if self.state != PipelineState::Stopped {
            return Err(Error::IllegalStateTransition {
                from: self.node_state_for_pipeline(),
                to: NodeState::Configured,
            });
        }
        for cell in self.cells.iter_mut() {
            cell.node.reset()?;
            cell.runtime = None;
            cell.state = NodeState::Configured;
        }
        self.state = PipelineState::Idle;
        Ok(())
    }

    fn node_state_for_pipeline(&self) -> NodeState {
        match self.state {
            PipelineState::Idle => NodeState::Configured,
            PipelineState::Prepared => NodeState::Prepared,
            PipelineState::Running => NodeState::Running,
            PipelineState::Stopped => NodeState::Stopped,
            PipelineState::Destroyed => NodeState::Destroyed,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn node_state(&self, name: &str) -> Result<NodeState> {
        Ok(self.cells[self.idx(name)?].state)
    }

    /// Access a node by name after assembly, e.g. to drive node-specific
    /// controls that are not part of the graph contract.
    pub fn get_node_handle(&mut self, name: &str) -> Result<&mut dyn Node> {
        let idx = self.idx(name)?;
        Ok(self.cells[idx].node.as_mut())
    }

    // ------------------------------------------------------------------
    // external interaction

    /// Inject a blob into a node's input port from outside the graph.
    pub fn send_to_port(
        &self,
        blob: Blob,
        node: &str,
        port: usize,
        timeout: Duration,
    ) -> Result<SendStatus> {
        let idx = self.idx(node)?;
        let cell = &self.cells[idx];
        let rt = cell
            .runtime
            .as_ref()
            .ok_or_else(|| Error::NodeNotFound(node.to_string()))?;
        let queue = rt.in_queues.get(port).ok_or(Error::PortOutOfRange {
            node: node.to_string(),
            port,
        })?;
        Ok(match queue.push_timeout(blob, timeout) {
            PushOutcome::Pushed => SendStatus::Success,
            PushOutcome::Full(b) | PushOutcome::Shutdown(b) => SendStatus::PortFullTimeout(b),
        })
    }

    pub fn register_event(&self, id: EventId) -> Result<()> {
        self.events.register_event(id)
    }

    pub fn register_callback(&self, id: EventId, cb: EventListener) -> Result<()> {
        self.events.register_callback(id, cb)
    }

    pub fn wait_for_event(&self, id: EventId, timeout: Duration) -> Result<()> {
        self.events.wait_for(id, timeout)
    }

    pub fn reset_all_callbacks(&self) {
        self.events.reset_all_callbacks()
    }

    /// Request end-of-stream: source workers observe this and emit
    /// END_OF_REQUEST-tagged blobs on their streams.
    pub fn request_eos(&self) {
        self.eos_requested.store(true, Ordering::SeqCst);
    }

    /// Install a process-signal handler (SIGINT/SIGTERM) that translates the
    /// signal into a per-stream EOS request, so the graph drains instead of
    /// being torn down.
    pub fn install_default_eos_handler(&self) -> Result<()> {
        let eos = self.eos_requested.clone();
        ctrlc::set_handler(move || {
            eos.store(true, Ordering::SeqCst);
        })
        .map_err(|e| Error::SignalHandler(e.to_string()))
    }

    /// Per-label latency statistics as JSON.
    pub fn report_performance_to_string(&self) -> String {
        self.latency.report_to_string()
    }

    pub fn report_performance_to_json(&self, path: &std::path::Path) -> Result<()> {
        std::fs::write(path, self.report_performance_to_string())?;
        Ok(())
    }

    pub(crate) fn cells(&self) -> &[NodeCell] {
        &self.cells
    }

    pub(crate) fn edges(&self) -> &[EdgeDef] {
        &self.edges
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.state == PipelineState::Running {
            self.stop();
        }
        for cell in self.cells.iter_mut() {
            cell.node.deinit();
            cell.state = NodeState::Destroyed;
        }
        self.state = PipelineState::Destroyed;
    }
}

fn worker_main(mut worker: Box<dyn crate::node::NodeWorker>, ctx: &mut WorkerCtx) {
    worker.first_run(ctx);
    loop {
        if ctx.is_shutting_down() {
            break;
        }
        match worker.process(ctx) {
            WorkerFlow::Continue => {}
            WorkerFlow::Finished => break,
        }
    }
    worker.last_run(ctx);
    debug!(node = %ctx.node_name(), worker = ctx.worker_idx(), "worker exited");
}
