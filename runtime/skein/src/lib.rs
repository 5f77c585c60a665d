//! A typed dataflow graph runtime.
//!
//! A [`Pipeline`] holds a directed acyclic graph of long-lived [`Node`]s
//! connected by bounded ports. Each node owns one or more worker threads
//! which repeatedly harvest [`Blob`]s from the node's input ports according
//! to a [`BatchingPolicy`], process them, and push results downstream with
//! bounded-wait backpressure. Per-frame annotations travel alongside the
//! payload in a type-keyed [`MetaMap`]. End of stream is signalled in-band
//! with an [`END_OF_REQUEST`]-tagged buffer.
//!
//! The graph is assembled by name (`add_node`/`set_source`/`link_node`),
//! prepared in dependency order, and driven through the
//! Unconfigured→Configured→Prepared→Running→Stopped lifecycle. A typed
//! event table carries timestamp records, latency captures and per-request
//! finish notifications out of the graph.

mod blob;
mod config;
mod error;
mod event;
mod meta;
mod node;
mod pipeline;
mod port;
mod registry;
mod topology;

pub use blob::{
    Blob, Buffer, FrameView, MetaRoi, Payload, RawChunk, Roi, END_OF_REQUEST, MAX_PLANE_NUM,
};
pub use config::{ConfigMap, ConfigValue};
pub use error::{Error, Result};
pub use event::{EventBus, EventId, EventListener, EventPayload, LatencyMonitor};
pub use meta::MetaMap;
pub use node::{BatchingPolicy, EosTally, Node, NodeState, NodeWorker, WorkerCtx, WorkerFlow};
pub use pipeline::{Pipeline, PipelineState, DEFAULT_QUEUE_CAPACITY};
pub use port::SendStatus;
pub use registry::NodeRegistry;

/// Converter applied to a blob while it transits an edge. Must be pure.
pub type ConvertFn = dyn Fn(Blob) -> Blob + Send + Sync;
