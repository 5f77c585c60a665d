use std::any::Any;
use std::sync::Arc;

use crate::meta::MetaMap;

/// Buffer tag marking the last blob of a logical request on its stream.
pub const END_OF_REQUEST: u32 = 1;

/// Maximum number of planes a video frame descriptor can carry.
pub const MAX_PLANE_NUM: usize = 8;

/// A reference-counted byte range.
///
/// The optional guard keeps an external owner (e.g. a mapped buffer or an SDK
/// surface handle) alive until the last clone is dropped, which is when the
/// owner's release logic runs.
#[derive(Clone)]
pub struct RawChunk {
    data: Arc<[u8]>,
    _guard: Option<Arc<dyn Any + Send + Sync>>,
}

impl RawChunk {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: data.into(),
            _guard: None,
        }
    }

    /// Byte range whose lifetime is tied to `guard`.
    pub fn with_guard(data: Vec<u8>, guard: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            data: data.into(),
            _guard: Some(guard),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for RawChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawChunk({} bytes)", self.data.len())
    }
}

/// Descriptor of a decoded video frame. Pixel data, when present, is opaque
/// to the graph: only the geometry and the `tag`/`drop` markers are
/// interpreted by the runtime.
#[derive(Clone, Debug, Default)]
pub struct FrameView {
    pub frame_id: u32,
    pub width: u32,
    pub height: u32,
    pub plane_num: u32,
    pub stride: [u32; MAX_PLANE_NUM],
    pub offset: [u32; MAX_PLANE_NUM],
    pub tag: u32,
    /// Frame marked unusable by an upstream failure; downstream nodes pass
    /// it through without processing so sinks can report a status.
    pub drop: bool,
    pub data: Option<RawChunk>,
}

impl FrameView {
    pub fn new(frame_id: u32, width: u32, height: u32) -> Self {
        Self {
            frame_id,
            width,
            height,
            plane_num: 1,
            ..Default::default()
        }
    }

    pub fn is_eos(&self) -> bool {
        self.tag == END_OF_REQUEST
    }
}

/// Pixel-space region of interest with classification and detection results.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Roi {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub label_classification: String,
    pub label_id_classification: i32,
    pub confidence_classification: f64,
    pub label_detection: String,
    pub label_id_detection: i32,
    pub confidence_detection: f64,
    pub pts: u64,
    pub frame_id: u32,
    pub stream_id: u32,
    pub tracking_id: u32,
    pub tracking_status: u32,
}

/// Region of interest carrying opaque typed annotations instead of the fixed
/// classification/detection fields.
#[derive(Clone, Debug, Default)]
pub struct MetaRoi {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub meta: MetaMap,
}

/// The payload kinds a buffer can hold.
#[derive(Clone, Debug)]
pub enum Payload {
    /// Plain byte range.
    Raw(RawChunk),
    /// Video frame with detection ROIs.
    Frame { view: FrameView, rois: Vec<Roi> },
    /// Video frame with meta-annotated ROIs.
    MetaFrame { view: FrameView, rois: Vec<MetaRoi> },
}

/// One typed content of a [`Blob`], together with its metadata map.
#[derive(Clone, Debug)]
pub struct Buffer {
    pub payload: Payload,
    pub meta: MetaMap,
}

impl Buffer {
    pub fn raw(chunk: RawChunk) -> Self {
        Self {
            payload: Payload::Raw(chunk),
            meta: MetaMap::new(),
        }
    }

    pub fn frame(view: FrameView) -> Self {
        Self {
            payload: Payload::Frame {
                view,
                rois: Vec::new(),
            },
            meta: MetaMap::new(),
        }
    }

    pub fn meta_frame(view: FrameView) -> Self {
        Self {
            payload: Payload::MetaFrame {
                view,
                rois: Vec::new(),
            },
            meta: MetaMap::new(),
        }
    }

    pub fn set_meta<T: Any + Send + Sync>(&mut self, value: T) {
        self.meta.set_meta(value)
    }

    pub fn get_meta<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.meta.get_meta()
    }

    pub fn contains_meta<T: Any + Send + Sync>(&self) -> bool {
        self.meta.contains_meta::<T>()
    }

    pub fn frame_view(&self) -> Option<&FrameView> {
        match &self.payload {
            Payload::Raw(_) => None,
            Payload::Frame { view, .. } | Payload::MetaFrame { view, .. } => Some(view),
        }
    }

    pub fn frame_view_mut(&mut self) -> Option<&mut FrameView> {
        match &mut self.payload {
            Payload::Raw(_) => None,
            Payload::Frame { view, .. } | Payload::MetaFrame { view, .. } => Some(view),
        }
    }

    pub fn rois(&self) -> &[Roi] {
        match &self.payload {
            Payload::Frame { rois, .. } => rois,
            _ => &[],
        }
    }

    pub fn rois_mut(&mut self) -> Option<&mut Vec<Roi>> {
        match &mut self.payload {
            Payload::Frame { rois, .. } => Some(rois),
            _ => None,
        }
    }

    pub fn meta_rois(&self) -> &[MetaRoi] {
        match &self.payload {
            Payload::MetaFrame { rois, .. } => rois,
            _ => &[],
        }
    }

    pub fn tag(&self) -> u32 {
        self.frame_view().map(|v| v.tag).unwrap_or(0)
    }

    pub fn is_eos(&self) -> bool {
        self.frame_view().map(|v| v.is_eos()).unwrap_or(false)
    }

    pub fn is_dropped(&self) -> bool {
        self.frame_view().map(|v| v.drop).unwrap_or(false)
    }

    pub fn mark_dropped(&mut self) {
        if let Some(view) = self.frame_view_mut() {
            view.drop = true;
        }
    }
}

/// The unit of data travelling through the graph: an ordered sequence of
/// buffers stamped with the logical channel and a frame number that is
/// monotonically increasing within the channel.
///
/// Blobs move by value along edges; a fan-out edge clones the blob, which is
/// a shared-ownership handoff because payload bytes and metadata entries are
/// reference-counted.
#[derive(Clone, Debug)]
pub struct Blob {
    pub stream_id: u32,
    pub frame_id: u32,
    buffers: Vec<Buffer>,
}

impl Blob {
    pub fn new(stream_id: u32, frame_id: u32) -> Self {
        Self {
            stream_id,
            frame_id,
            buffers: Vec::new(),
        }
    }

    /// Append a buffer. Indices are stable: downstream nodes rely on `get(i)`
    /// addressing the same content the producer pushed at position `i`.
    pub fn push(&mut self, buffer: Buffer) {
        self.buffers.push(buffer);
    }

    pub fn get(&self, i: usize) -> Option<&Buffer> {
        self.buffers.get(i)
    }

    pub fn get_mut(&mut self, i: usize) -> Option<&mut Buffer> {
        self.buffers.get_mut(i)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn buffers(&self) -> &[Buffer] {
        &self.buffers
    }

    /// True when any contained buffer carries the end-of-request tag.
    pub fn is_eos(&self) -> bool {
        self.buffers.iter().any(|b| b.is_eos())
    }
}
