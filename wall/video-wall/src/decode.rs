use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use skein::{
    Blob, Buffer, ConfigMap, FrameView, Node, NodeWorker, RawChunk, SendStatus, WorkerCtx,
    WorkerFlow, END_OF_REQUEST,
};
use tracing::{debug, info, warn};

/// Per-send retry budget before a frame is discarded under backpressure.
const SEND_RETRY: usize = 20;
/// Wait between send retries.
const SEND_RETRY_INTERVAL: Duration = Duration::from_micros(20);
/// Sleep after the reader reaches end of file, to avoid busy-looping on a
/// closed source.
const SLEEP_AFTER_EOF: Duration = Duration::from_millis(100);

/// Decode node lifecycle, driven through the control queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    Uninitialized,
    Initialized,
    Started,
    Stopped,
    Destroyed,
}

/// YUV still image substituted for live frames while enabled.
#[derive(Clone)]
pub struct UserPicture {
    pub width: u32,
    pub height: u32,
    /// Apply from the very next frame rather than at the next stream
    /// boundary.
    pub instant: bool,
    pub data: Arc<[u8]>,
}

enum Command {
    SetState(DecodeState),
    EnableUserPic(UserPicture),
    DisableUserPic,
}

/// Shared handle through which the wall graph drives a decode node after
/// assembly.
#[derive(Clone)]
pub struct DecodeControl {
    commands: Sender<Command>,
    produced: Arc<AtomicU64>,
    state: Arc<Mutex<DecodeState>>,
}

impl DecodeControl {
    pub fn state(&self) -> DecodeState {
        *self.state.lock().unwrap()
    }

    /// Frames emitted so far, used by the drain check at stop.
    pub fn produced_frames(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }

    pub fn init(&self) {
        let _ = self.commands.send(Command::SetState(DecodeState::Initialized));
    }

    pub fn start(&self) {
        let _ = self.commands.send(Command::SetState(DecodeState::Started));
    }

    pub fn stop(&self) {
        let _ = self.commands.send(Command::SetState(DecodeState::Stopped));
    }

    pub fn destroy(&self) {
        let _ = self.commands.send(Command::SetState(DecodeState::Destroyed));
    }

    pub fn enable_user_pic(&self, pic: UserPicture) {
        let _ = self.commands.send(Command::EnableUserPic(pic));
    }

    pub fn disable_user_pic(&self) {
        let _ = self.commands.send(Command::DisableUserPic);
    }
}

/// Source node wrapping a bitstream reader thread.
///
/// The worker owns the reader; the control queue carries lifecycle commands
/// and the user-picture override. Backpressure is absorbed by a bounded
/// retry (`SEND_RETRY` × `SEND_RETRY_INTERVAL`); a frame that still cannot
/// be delivered is discarded rather than stalling the wall.
pub struct DecodeNode {
    stream_id: u32,
    width: u32,
    height: u32,
    loop_input: bool,
    reader: Option<Box<dyn crate::sdk::BitstreamReader>>,
    control: DecodeControl,
    commands_rx: Receiver<Command>,
}

impl DecodeNode {
    pub fn new(
        stream_id: u32,
        width: u32,
        height: u32,
        loop_input: bool,
        reader: Box<dyn crate::sdk::BitstreamReader>,
    ) -> Self {
        let (tx, rx) = unbounded();
        let control = DecodeControl {
            commands: tx,
            produced: Arc::new(AtomicU64::new(0)),
            state: Arc::new(Mutex::new(DecodeState::Uninitialized)),
        };
        Self {
            stream_id,
            width,
            height,
            loop_input,
            reader: Some(reader),
            control,
            commands_rx: rx,
        }
    }

    /// Handle for lifecycle control and user-picture override; clone before
    /// the node is handed to the graph.
    pub fn control(&self) -> DecodeControl {
        self.control.clone()
    }
}

impl Node for DecodeNode {
    fn kind(&self) -> &'static str {
        "wall-decode"
    }
    fn in_port_count(&self) -> usize {
        0
    }
    fn out_port_count(&self) -> usize {
        1
    }

    fn configure(&mut self, config: &ConfigMap) -> skein::Result<()> {
        if let Some(loop_input) = config.opt_bool("loopInput")? {
            self.loop_input = loop_input;
        }
        Ok(())
    }

    fn new_worker(&mut self, _worker_idx: usize) -> Box<dyn NodeWorker> {
        Box::new(DecodeWorker {
            stream_id: self.stream_id,
            width: self.width,
            height: self.height,
            loop_input: self.loop_input,
            reader: self.reader.take().expect("single worker per decode node"),
            commands: self.commands_rx.clone(),
            control: self.control.clone(),
            next_frame: 0,
            user_pic: None,
            pending_user_pic: None,
            eos_sent: false,
        })
    }
}

struct DecodeWorker {
    stream_id: u32,
    width: u32,
    height: u32,
    loop_input: bool,
    reader: Box<dyn crate::sdk::BitstreamReader>,
    commands: Receiver<Command>,
    control: DecodeControl,
    next_frame: u32,
    user_pic: Option<UserPicture>,
    /// Non-instant override waiting for the next stream boundary.
    pending_user_pic: Option<UserPicture>,
    eos_sent: bool,
}

impl DecodeWorker {
    fn drain_commands(&mut self) -> DecodeState {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                Command::SetState(state) => {
                    info!(stream = self.stream_id, ?state, "decode state change");
                    *self.control.state.lock().unwrap() = state;
                }
                Command::EnableUserPic(pic) => {
                    debug!(stream = self.stream_id, instant = pic.instant, "user picture enabled");
                    if pic.instant {
                        self.user_pic = Some(pic);
                    } else {
                        self.pending_user_pic = Some(pic);
                    }
                }
                Command::DisableUserPic => {
                    debug!(stream = self.stream_id, "user picture disabled");
                    self.user_pic = None;
                    self.pending_user_pic = None;
                }
            }
        }
        self.control.state()
    }

    fn make_frame(&mut self, chunk: Vec<u8>) -> Blob {
        let mut view = FrameView::new(self.next_frame, self.width, self.height);
        match &self.user_pic {
            Some(pic) => {
                // live frame replaced by the still
                view.width = pic.width;
                view.height = pic.height;
                view.data = Some(RawChunk::new(pic.data.to_vec()));
            }
            None => {
                view.data = Some(RawChunk::new(chunk));
            }
        }
        let mut blob = Blob::new(self.stream_id, self.next_frame);
        blob.push(Buffer::frame(view));
        self.next_frame += 1;
        blob
    }

    fn send_with_retry(&self, ctx: &WorkerCtx, mut blob: Blob) -> bool {
        for _ in 0..SEND_RETRY {
            match ctx.send_output(blob, 0, SEND_RETRY_INTERVAL) {
                SendStatus::PortFullTimeout(returned) => {
                    if ctx.is_shutting_down() {
                        return false;
                    }
                    blob = returned;
                }
                SendStatus::NullPort(_) => return false,
                SendStatus::Success | SendStatus::PortFullDiscarded => return true,
            }
        }
        warn!(stream = self.stream_id, "frame discarded after send retries");
        false
    }

    fn send_eos(&mut self, ctx: &WorkerCtx) {
        if self.eos_sent {
            return;
        }
        let mut view = FrameView::new(self.next_frame, self.width, self.height);
        view.tag = END_OF_REQUEST;
        let mut blob = Blob::new(self.stream_id, self.next_frame);
        blob.push(Buffer::frame(view));
        if self.send_with_retry(ctx, blob) {
            self.eos_sent = true;
        }
    }
}

impl NodeWorker for DecodeWorker {
    fn process(&mut self, ctx: &mut WorkerCtx) -> WorkerFlow {
        let state = self.drain_commands();
        match state {
            DecodeState::Destroyed => return WorkerFlow::Finished,
            DecodeState::Started => {}
            _ => {
                // idle until started
                std::thread::sleep(Duration::from_millis(5));
                return WorkerFlow::Continue;
            }
        }
        if ctx.eos_requested() {
            self.send_eos(ctx);
            std::thread::sleep(SLEEP_AFTER_EOF);
            return WorkerFlow::Continue;
        }
        match self.reader.next_chunk() {
            Ok(Some(chunk)) => {
                let blob = self.make_frame(chunk);
                let produced = self.send_with_retry(ctx, blob);
                if produced {
                    self.control.produced.fetch_add(1, Ordering::Relaxed);
                }
            }
            Ok(None) => {
                // stream boundary: a deferred user picture takes effect here
                if let Some(pic) = self.pending_user_pic.take() {
                    self.user_pic = Some(pic);
                }
                if self.loop_input {
                    if let Err(e) = self.reader.rewind() {
                        warn!(stream = self.stream_id, "rewind failed: {e}");
                    }
                } else {
                    self.send_eos(ctx);
                }
                std::thread::sleep(SLEEP_AFTER_EOF);
            }
            Err(e) => {
                warn!(stream = self.stream_id, "bitstream read failed: {e}");
                std::thread::sleep(SLEEP_AFTER_EOF);
            }
        }
        WorkerFlow::Continue
    }

    fn last_run(&mut self, _ctx: &mut WorkerCtx) {
        *self.control.state.lock().unwrap() = DecodeState::Stopped;
    }
}
