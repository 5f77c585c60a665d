use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use skein::FrameView;

use crate::display::TilePlacement;

/// Source of encoded bitstream chunks feeding a decode node. File and
/// network readers implement this; tests use the in-memory variant.
pub trait BitstreamReader: Send {
    /// Next chunk, or `None` at end of stream.
    fn next_chunk(&mut self) -> std::io::Result<Option<Vec<u8>>>;

    /// Restart from the beginning (loop-input support).
    fn rewind(&mut self) -> std::io::Result<()>;
}

/// Fixed-chunk file reader.
pub struct FileBitstreamReader {
    file: BufReader<std::fs::File>,
    chunk_size: usize,
}

impl FileBitstreamReader {
    pub fn open(path: &Path, chunk_size: usize) -> std::io::Result<Self> {
        Ok(Self {
            file: BufReader::new(std::fs::File::open(path)?),
            chunk_size: chunk_size.max(1),
        })
    }
}

impl BitstreamReader for FileBitstreamReader {
    fn next_chunk(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0usize;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(buf))
    }

    fn rewind(&mut self) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }
}

/// Pre-seeded chunk list, one chunk per frame.
pub struct MemoryBitstreamReader {
    chunks: Vec<Vec<u8>>,
    position: usize,
}

impl MemoryBitstreamReader {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks,
            position: 0,
        }
    }

    /// `count` synthetic frames of `size` bytes each.
    pub fn synthetic(count: usize, size: usize) -> Self {
        Self::new((0..count).map(|i| vec![(i % 251) as u8; size]).collect())
    }
}

impl BitstreamReader for MemoryBitstreamReader {
    fn next_chunk(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        if self.position >= self.chunks.len() {
            return Ok(None);
        }
        let chunk = self.chunks[self.position].clone();
        self.position += 1;
        Ok(Some(chunk))
    }

    fn rewind(&mut self) -> std::io::Result<()> {
        self.position = 0;
        Ok(())
    }
}

/// Platform display surface. `post_frame` is the synchronous external call a
/// display worker makes per frame; failures carry the platform error code.
pub trait DisplayBackend: Send + Sync {
    fn post_frame(
        &self,
        placement: &TilePlacement,
        frame: &FrameView,
    ) -> std::result::Result<(), i32>;
}

/// One frame as seen by the simulated display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostedFrame {
    pub tile_id: Option<u32>,
    pub frame_id: u32,
    pub width: u32,
    pub height: u32,
}

/// Records every posted frame; the test double for a display device.
#[derive(Default)]
pub struct SimDisplayBackend {
    posted: Mutex<Vec<PostedFrame>>,
    fail_with: Mutex<Option<i32>>,
}

impl SimDisplayBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posted(&self) -> Vec<PostedFrame> {
        self.posted.lock().unwrap().clone()
    }

    pub fn posted_count(&self) -> usize {
        self.posted.lock().unwrap().len()
    }

    /// Make subsequent posts fail with a platform error code.
    pub fn inject_failure(&self, code: Option<i32>) {
        *self.fail_with.lock().unwrap() = code;
    }
}

impl DisplayBackend for SimDisplayBackend {
    fn post_frame(
        &self,
        placement: &TilePlacement,
        frame: &FrameView,
    ) -> std::result::Result<(), i32> {
        if let Some(code) = *self.fail_with.lock().unwrap() {
            return Err(code);
        }
        self.posted.lock().unwrap().push(PostedFrame {
            tile_id: placement.tile_id,
            frame_id: frame.frame_id,
            width: frame.width,
            height: frame.height,
        });
        Ok(())
    }
}
