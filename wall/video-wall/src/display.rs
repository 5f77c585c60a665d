use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use skein::{ConfigMap, Node, NodeWorker, WorkerCtx, WorkerFlow};
use tracing::{debug, warn};

use crate::sdk::DisplayBackend;

/// Where a stream lands on the wall.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilePlacement {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub tile_id: Option<u32>,
    pub fps: u32,
}

/// On-screen display item attached to a tile.
#[derive(Debug, Clone, PartialEq)]
pub struct OsdItem {
    pub id: u32,
    pub text: String,
    pub x: i32,
    pub y: i32,
}

/// Zoom region within the source frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug)]
struct TileInner {
    placement: TilePlacement,
    paused: bool,
    hidden: bool,
    zoom: Option<ZoomRect>,
    osd: Vec<OsdItem>,
}

/// Shared state of one display tile, owned by the display node and driven
/// through [`DisplayStream`].
#[derive(Debug)]
pub struct TileState {
    inner: Mutex<TileInner>,
    shown: AtomicU64,
    consumed: AtomicU64,
}

impl TileState {
    fn new(placement: TilePlacement) -> Self {
        Self {
            inner: Mutex::new(TileInner {
                placement,
                paused: false,
                hidden: false,
                zoom: None,
                osd: Vec::new(),
            }),
            shown: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
        }
    }

    /// Frames actually posted to the backend.
    pub fn shown_frames(&self) -> u64 {
        self.shown.load(Ordering::Relaxed)
    }

    /// Frames pulled off the port, posted or not; the drain check at decode
    /// stop compares this against the producer count.
    pub fn consumed_frames(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }
}

/// Control surface of a display tile: pause/resume, hide/show, zoom and OSD.
#[derive(Clone)]
pub struct DisplayStream {
    tile: Arc<TileState>,
}

impl DisplayStream {
    pub fn pause(&self) {
        self.tile.inner.lock().unwrap().paused = true;
    }

    pub fn resume(&self) {
        self.tile.inner.lock().unwrap().paused = false;
    }

    pub fn hide(&self) {
        self.tile.inner.lock().unwrap().hidden = true;
    }

    pub fn show(&self) {
        self.tile.inner.lock().unwrap().hidden = false;
    }

    pub fn zoom_in(&self, rect: ZoomRect) {
        self.tile.inner.lock().unwrap().zoom = Some(rect);
    }

    pub fn zoom_out(&self) {
        self.tile.inner.lock().unwrap().zoom = None;
    }

    pub fn add_osd(&self, item: OsdItem) {
        let mut inner = self.tile.inner.lock().unwrap();
        inner.osd.retain(|o| o.id != item.id);
        inner.osd.push(item);
    }

    pub fn remove_osd(&self, id: u32) {
        self.tile.inner.lock().unwrap().osd.retain(|o| o.id != id);
    }

    pub fn osd_items(&self) -> Vec<OsdItem> {
        self.tile.inner.lock().unwrap().osd.clone()
    }

    pub fn placement(&self) -> TilePlacement {
        self.tile.inner.lock().unwrap().placement
    }

    pub fn shown_frames(&self) -> u64 {
        self.tile.shown_frames()
    }

    pub fn consumed_frames(&self) -> u64 {
        self.tile.consumed_frames()
    }
}

/// Sink node posting one stream's frames onto a wall tile.
///
/// Pause drops frames on the floor (the tile keeps its last picture); hide
/// consumes frames without posting; zoom restricts the posted region.
/// Backend failures degrade to per-frame drops.
pub struct DisplayNode {
    tile: Arc<TileState>,
    backend: Arc<dyn DisplayBackend>,
}

impl DisplayNode {
    pub fn new(placement: TilePlacement, backend: Arc<dyn DisplayBackend>) -> Self {
        Self {
            tile: Arc::new(TileState::new(placement)),
            backend,
        }
    }

    /// Control handle; clone before the node is handed to the graph.
    pub fn stream(&self) -> DisplayStream {
        DisplayStream {
            tile: self.tile.clone(),
        }
    }
}

impl Node for DisplayNode {
    fn kind(&self) -> &'static str {
        "wall-display"
    }
    fn in_port_count(&self) -> usize {
        1
    }
    fn out_port_count(&self) -> usize {
        0
    }

    fn configure(&mut self, config: &ConfigMap) -> skein::Result<()> {
        let mut inner = self.tile.inner.lock().unwrap();
        if let Some(fps) = config.opt_int("fps")? {
            inner.placement.fps = fps as u32;
        }
        Ok(())
    }

    fn new_worker(&mut self, _worker_idx: usize) -> Box<dyn NodeWorker> {
        Box::new(DisplayWorker {
            tile: self.tile.clone(),
            backend: self.backend.clone(),
        })
    }
}

struct DisplayWorker {
    tile: Arc<TileState>,
    backend: Arc<dyn DisplayBackend>,
}

impl NodeWorker for DisplayWorker {
    fn process(&mut self, ctx: &mut WorkerCtx) -> WorkerFlow {
        let got = ctx.get_batched_input(&[0]);
        for blob in got {
            if blob.is_eos() {
                debug!(stream = blob.stream_id, "display stream drained");
                return WorkerFlow::Finished;
            }
            let Some(view) = blob.get(0).and_then(|b| b.frame_view()) else {
                continue;
            };
            self.tile.consumed.fetch_add(1, Ordering::Relaxed);
            let (paused, hidden, placement, zoom) = {
                let inner = self.tile.inner.lock().unwrap();
                (inner.paused, inner.hidden, inner.placement, inner.zoom)
            };
            if paused || hidden {
                continue;
            }
            let mut posted_view = view.clone();
            if let Some(zoom) = zoom {
                posted_view.width = zoom.width;
                posted_view.height = zoom.height;
            }
            match self.backend.post_frame(&placement, &posted_view) {
                Ok(()) => {
                    self.tile.shown.fetch_add(1, Ordering::Relaxed);
                }
                Err(code) => {
                    warn!(
                        stream = blob.stream_id,
                        frame = blob.frame_id,
                        code,
                        "display backend rejected frame"
                    );
                }
            }
        }
        WorkerFlow::Continue
    }
}
