//! Video-wall composition runtime.
//!
//! A specialized graph over the [`skein`] runtime with three node kinds:
//! *Decode* (bitstream reader thread producing frame descriptors),
//! *PostProcess* (descriptor-level scaling/cropping) and *Display*
//! (per-tile sink driving a display backend). Platform SDK calls sit behind
//! the [`DisplayBackend`] and [`BitstreamReader`] traits; an in-memory
//! simulator backend ships for tests.
//!
//! Nodes are identified by `(kind, device id, stream id)`. Binding is only
//! legal between declared-compatible kinds, one producer per input, no
//! cycles. Decode nodes expose init→start→stop→destroy with a drain-bounded
//! stop, plus a user-picture override that substitutes live frames.

mod decode;
mod display;
mod error;
mod graph;
mod id;
mod postprocess;
mod sdk;

pub use decode::{DecodeControl, DecodeNode, DecodeState, UserPicture};
pub use display::{DisplayNode, DisplayStream, OsdItem, TilePlacement, TileState, ZoomRect};
pub use error::{Error, Result};
pub use graph::WallGraph;
pub use id::{WallNodeId, WallNodeKind};
pub use postprocess::PostProcessNode;
pub use sdk::{
    BitstreamReader, DisplayBackend, FileBitstreamReader, MemoryBitstreamReader, PostedFrame,
    SimDisplayBackend,
};
