//! The camera/radar sensor-fusion graph.
//!
//! Radar point clouds flow through clustering and EKF tracking; camera
//! detections are projected into the shared BEV ground plane, merged across
//! cameras with class-wise NMS, and associated to radar tracks by Hungarian
//! assignment over a CIoU cost. Results leave the graph as JSON responses
//! and, for the radar-only chain, as CSV rows.
//!
//! All nodes run on the [`skein`] dataflow runtime; per-frame results travel
//! as typed metadata on the frame buffers.

mod associate;
mod csv_sink;
mod error;
mod fuser;
mod graph;
pub mod nodes;
mod response;
mod types;

pub use associate::{TrackAssociatorConfig, TrackToTrackAssociator};
pub use csv_sink::UnionCsvWriter;
pub use error::{Error, Result};
pub use fuser::MultiCameraFuser;
pub use graph::{
    build_multi_camera_graph, build_single_camera_graph, register_fusion_nodes, FusionGraphConfig,
};
pub use response::{FusionResponse, RoiInfo};
pub use types::{CaptureStamp, DetectedObject, FusionOutput, FusionPair, TrackerOutput};
