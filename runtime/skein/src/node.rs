use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::blob::Blob;
use crate::config::ConfigMap;
use crate::error::Result;
use crate::event::{EventBus, EventId, EventPayload, LatencyMonitor};
use crate::port::{PortQueue, PushOutcome, SendStatus};
use crate::ConvertFn;

/// How long a worker waits for input before `get_batched_input` gives up and
/// returns empty.
pub(crate) const INPUT_WAIT: Duration = Duration::from_millis(100);

/// Node lifecycle state. Allowed transitions form a forward DAG:
/// Unconfigured→Configured→Prepared→Running→Stopped→(Prepared via rearm |
/// Destroyed); reset returns to Configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Unconfigured,
    Configured,
    Prepared,
    Running,
    Stopped,
    Destroyed,
}

impl NodeState {
    pub(crate) fn can_transition(self, to: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, to),
            (Unconfigured, Configured)
                | (Configured, Configured) // reconfigure before prepare
                | (Configured, Prepared)
                | (Prepared, Running)
                | (Running, Stopped)
                | (Stopped, Prepared)   // rearm
                | (Stopped, Configured) // reset
                | (Stopped, Destroyed)
        )
    }
}

/// Rule deciding how a node's workers harvest blobs from its input ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchingPolicy {
    /// One worker per listed stream, statically bound; a worker only consumes
    /// blobs whose `stream_id` matches its binding. Order within a stream is
    /// preserved.
    WithStream { stream_ids: Vec<u32> },
    /// Any worker takes one blob per invocation from any stream. Cross-stream
    /// ordering is not guaranteed downstream of such a node.
    WithSource,
    /// `workers` workers, each coalescing up to `batch_size` blobs per
    /// invocation (single-input nodes only).
    BatchSize { workers: usize, batch_size: usize },
}

impl Default for BatchingPolicy {
    fn default() -> Self {
        BatchingPolicy::WithSource
    }
}

impl BatchingPolicy {
    pub fn worker_count(&self) -> usize {
        match self {
            BatchingPolicy::WithStream { stream_ids } => stream_ids.len().max(1),
            BatchingPolicy::WithSource => 1,
            BatchingPolicy::BatchSize { workers, .. } => (*workers).max(1),
        }
    }

    pub(crate) fn stream_binding(&self, worker_idx: usize) -> Option<u32> {
        match self {
            BatchingPolicy::WithStream { stream_ids } => stream_ids.get(worker_idx).copied(),
            _ => None,
        }
    }

    pub(crate) fn batch_size(&self) -> usize {
        match self {
            BatchingPolicy::BatchSize { batch_size, .. } => (*batch_size).max(1),
            _ => 1,
        }
    }
}

/// A long-lived processing unit of the graph.
///
/// One concrete struct per node kind holds that node's configuration; the
/// per-thread processing state lives in the [`NodeWorker`] values produced by
/// `new_worker`. Configure/validate/prepare run on the pipeline thread;
/// workers run on their own threads.
pub trait Node: Send {
    /// Stable kind string used by the node registry and topology
    /// serialization.
    fn kind(&self) -> &'static str;

    fn in_port_count(&self) -> usize;

    fn out_port_count(&self) -> usize;

    /// Apply a parsed configuration. Errors leave the node unconfigured.
    fn configure(&mut self, config: &ConfigMap) -> Result<()>;

    /// Pure configuration check, run before prepare.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn batching_policy(&self) -> BatchingPolicy {
        BatchingPolicy::default()
    }

    /// Acquire runtime resources. Called in dependency order, sources first.
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    /// Factory for one worker; called once per worker thread at start.
    fn new_worker(&mut self, worker_idx: usize) -> Box<dyn NodeWorker>;

    /// Return from Stopped to Prepared.
    fn rearm(&mut self) -> Result<()> {
        Ok(())
    }

    /// Return from Stopped to Configured, dropping prepared resources.
    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release everything; the node is Destroyed afterwards.
    fn deinit(&mut self) {}
}

/// Flow decision returned by [`NodeWorker::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerFlow {
    Continue,
    /// The worker is done (e.g. a sink drained all streams); its thread
    /// exits after `last_run`.
    Finished,
}

/// Per-thread processing state of a node.
pub trait NodeWorker: Send {
    /// Invoked exactly once before the first `process`.
    fn first_run(&mut self, _ctx: &mut WorkerCtx) {}

    /// Invoked repeatedly by the runtime until it returns
    /// [`WorkerFlow::Finished`] or the pipeline shuts down. Implementations
    /// pull inputs via [`WorkerCtx::get_batched_input`], do their work, and
    /// push results with [`WorkerCtx::send_output`].
    fn process(&mut self, ctx: &mut WorkerCtx) -> WorkerFlow;

    /// Invoked exactly once after the last `process`.
    fn last_run(&mut self, _ctx: &mut WorkerCtx) {}
}

pub(crate) struct OutBinding {
    pub(crate) queue: Arc<PortQueue>,
    pub(crate) converter: Option<Arc<ConvertFn>>,
}

/// Shared runtime state of one node: its input queues, output bindings and
/// the pending-blob buffers used for multi-input alignment.
pub(crate) struct NodeRuntime {
    pub(crate) name: String,
    pub(crate) in_queues: Vec<Arc<PortQueue>>,
    pub(crate) out_bindings: Vec<Vec<OutBinding>>,
    pub(crate) policy: BatchingPolicy,
    /// Per input port, blobs popped but not yet returned, keyed by
    /// `(stream_id, frame_id)`.
    pending: Mutex<Vec<BTreeMap<(u32, u32), Blob>>>,
    pending_cap: usize,
    pub(crate) events: Arc<EventBus>,
    pub(crate) latency: Arc<LatencyMonitor>,
    pub(crate) shutdown: Arc<AtomicBool>,
    pub(crate) eos_requested: Arc<AtomicBool>,
}

impl NodeRuntime {
    pub(crate) fn new(
        name: String,
        in_queues: Vec<Arc<PortQueue>>,
        out_bindings: Vec<Vec<OutBinding>>,
        policy: BatchingPolicy,
        pending_cap: usize,
        events: Arc<EventBus>,
        latency: Arc<LatencyMonitor>,
        shutdown: Arc<AtomicBool>,
        eos_requested: Arc<AtomicBool>,
    ) -> Self {
        let n_ports = in_queues.len();
        Self {
            name,
            in_queues,
            out_bindings,
            policy,
            pending: Mutex::new(vec![BTreeMap::new(); n_ports]),
            pending_cap,
            events,
            latency,
            shutdown,
            eos_requested,
        }
    }

    fn stash_pending(&self, port: usize, blob: Blob) {
        let mut pending = self.pending.lock().unwrap();
        let map = &mut pending[port];
        if map.len() >= self.pending_cap {
            // An aligned tuple could not be formed in time for the oldest
            // frame; drop it to bound memory.
            if let Some((&key, _)) = map.iter().next() {
                map.remove(&key);
                warn!(
                    node = %self.name,
                    port,
                    stream = key.0,
                    frame = key.1,
                    "alignment buffer overflow, dropping oldest frame"
                );
            }
        }
        map.insert((blob.stream_id, blob.frame_id), blob);
    }

    /// Find a `(stream, frame)` key buffered on every requested port.
    fn take_aligned(&self, ports: &[usize], binding: Option<u32>) -> Option<Vec<Blob>> {
        let mut pending = self.pending.lock().unwrap();
        let first = &pending[ports[0]];
        let key = first
            .keys()
            .copied()
            .filter(|k| binding.map(|s| k.0 == s).unwrap_or(true))
            .find(|k| ports[1..].iter().all(|&p| pending[p].contains_key(k)))?;
        Some(
            ports
                .iter()
                .map(|&p| pending[p].remove(&key).expect("key present"))
                .collect(),
        )
    }

    /// The multi-input alignment workhorse. Returns one blob per requested
    /// port, all sharing the same `(frame_id, stream_id)`, or an empty vector
    /// on timeout or shutdown.
    pub(crate) fn get_batched_input(&self, binding: Option<u32>, ports: &[usize]) -> Vec<Blob> {
        let pred = |blob: &Blob| binding.map(|s| blob.stream_id == s).unwrap_or(true);

        if ports.is_empty() {
            return Vec::new();
        }
        if ports.len() == 1 {
            let port = ports[0];
            let Some(queue) = self.in_queues.get(port) else {
                return Vec::new();
            };
            let mut out = Vec::new();
            if let Some(blob) = queue.pop_where(pred, INPUT_WAIT) {
                out.push(blob);
                for _ in 1..self.policy.batch_size() {
                    match queue.try_pop_where(pred) {
                        Some(b) => out.push(b),
                        None => break,
                    }
                }
            }
            return out;
        }

        let deadline = Instant::now() + INPUT_WAIT;
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Vec::new();
            }
            for &port in ports {
                while let Some(blob) = self.in_queues[port].try_pop_where(pred) {
                    self.stash_pending(port, blob);
                }
            }
            if let Some(blobs) = self.take_aligned(ports, binding) {
                trace!(
                    node = %self.name,
                    stream = blobs[0].stream_id,
                    frame = blobs[0].frame_id,
                    "aligned tuple formed"
                );
                return blobs;
            }
            let now = Instant::now();
            if now >= deadline {
                return Vec::new();
            }
            // Block on the first port for new arrivals; the other ports are
            // drained non-blockingly at the top of the loop.
            if let Some(blob) = self.in_queues[ports[0]].pop_where(pred, deadline - now) {
                self.stash_pending(ports[0], blob);
            }
        }
    }

    pub(crate) fn send_output(&self, blob: Blob, port: usize, timeout: Duration) -> SendStatus {
        let Some(bindings) = self.out_bindings.get(port) else {
            return SendStatus::NullPort(blob);
        };
        if bindings.is_empty() {
            return SendStatus::NullPort(blob);
        }
        if bindings.len() == 1 {
            let b = &bindings[0];
            let converted = match &b.converter {
                Some(f) => f(blob),
                None => blob,
            };
            return match b.queue.push_timeout(converted, timeout) {
                PushOutcome::Pushed => SendStatus::Success,
                PushOutcome::Full(blob) | PushOutcome::Shutdown(blob) => {
                    SendStatus::PortFullTimeout(blob)
                }
            };
        }
        // Fan-out: deliver where possible, discard for full subscribers.
        let mut discarded = 0usize;
        for b in bindings {
            let converted = match &b.converter {
                Some(f) => f(blob.clone()),
                None => blob.clone(),
            };
            match b.queue.push_timeout(converted, timeout) {
                PushOutcome::Pushed => {}
                PushOutcome::Full(_) | PushOutcome::Shutdown(_) => discarded += 1,
            }
        }
        if discarded == 0 {
            SendStatus::Success
        } else if discarded == bindings.len() {
            SendStatus::PortFullTimeout(blob)
        } else {
            debug!(node = %self.name, port, discarded, "fan-out partially discarded");
            SendStatus::PortFullDiscarded
        }
    }

    pub(crate) fn clear_transient(&self) {
        let mut pending = self.pending.lock().unwrap();
        for map in pending.iter_mut() {
            map.clear();
        }
    }
}

/// Handle through which a worker interacts with the runtime.
pub struct WorkerCtx {
    pub(crate) rt: Arc<NodeRuntime>,
    pub(crate) worker_idx: usize,
    pub(crate) stream_binding: Option<u32>,
}

impl WorkerCtx {
    /// See [`NodeRuntime::get_batched_input`]. An empty return means timeout
    /// or shutdown; callers simply try again (the runtime loop observes the
    /// shutdown flag).
    pub fn get_batched_input(&self, ports: &[usize]) -> Vec<Blob> {
        self.rt.get_batched_input(self.stream_binding, ports)
    }

    /// Push `blob` downstream with backpressure bounded by `timeout`.
    pub fn send_output(&self, blob: Blob, port: usize, timeout: Duration) -> SendStatus {
        self.rt.send_output(blob, port, timeout)
    }

    /// Fire-and-forget to all listeners registered for `id` on the owning
    /// pipeline. Emission is synchronous on this thread.
    pub fn emit_event(&self, id: EventId, payload: &EventPayload) {
        if let Err(e) = self.rt.events.emit(id, payload) {
            debug!(node = %self.rt.name, "emit_event: {e}");
        }
    }

    /// Record a named timestamp for a frame and notify listeners.
    pub fn record_timestamp(&self, frame_id: u32, label: &str) {
        self.emit_event(
            EventId::TimestampRecord,
            &EventPayload::Timestamp {
                frame_id,
                label: label.to_string(),
            },
        );
    }

    pub fn start_latency(&self, frame_id: u32, label: &str) {
        self.rt.latency.start_recording(frame_id, label);
    }

    /// Close a latency interval; the captured duration is published on the
    /// latency-capture event.
    pub fn stop_latency(&self, frame_id: u32, label: &str) {
        if let Some(elapsed) = self.rt.latency.stop_recording(frame_id, label) {
            self.emit_event(
                EventId::LatencyCapture,
                &EventPayload::Latency {
                    label: label.to_string(),
                    elapsed,
                },
            );
        }
    }

    pub fn node_name(&self) -> &str {
        &self.rt.name
    }

    pub fn worker_idx(&self) -> usize {
        self.worker_idx
    }

    /// The stream this worker is statically bound to, if the node uses
    /// [`BatchingPolicy::WithStream`].
    pub fn stream_binding(&self) -> Option<u32> {
        self.stream_binding
    }

    /// True once the pipeline began stopping. Source workers must poll this
    /// between productions.
    pub fn is_shutting_down(&self) -> bool {
        self.rt.shutdown.load(Ordering::Relaxed)
    }

    /// True once end-of-stream was requested (by the default signal handler
    /// or programmatically). Source workers translate this into
    /// END_OF_REQUEST-tagged blobs on their streams.
    pub fn eos_requested(&self) -> bool {
        self.rt.eos_requested.load(Ordering::Relaxed)
    }
}

/// Helper for sink nodes: counts END_OF_REQUEST markers per stream and
/// reports when all expected streams have drained.
#[derive(Debug)]
pub struct EosTally {
    expected: usize,
    seen: HashSet<u32>,
}

impl EosTally {
    pub fn new(expected_streams: usize) -> Self {
        Self {
            expected: expected_streams.max(1),
            seen: HashSet::new(),
        }
    }

    /// Observe a blob; returns true when this blob completes the tally.
    pub fn observe(&mut self, blob: &Blob) -> bool {
        if blob.is_eos() {
            self.seen.insert(blob.stream_id);
            self.seen.len() >= self.expected
        } else {
            false
        }
    }

    pub fn drained(&self) -> bool {
        self.seen.len() >= self.expected
    }
}
