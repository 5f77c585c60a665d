use crate::id::{WallNodeId, WallNodeKind};

pub type Result<M> = std::result::Result<M, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("node {0} already exists in the wall graph")]
    DuplicatedId(WallNodeId),
    #[error("node {0} not found")]
    InvalidId(WallNodeId),
    #[error("binding {src:?} -> {dst:?} is not a legal kind pairing")]
    IllegalBind {
        src: WallNodeKind,
        dst: WallNodeKind,
    },
    #[error("binding {src} -> {dst} would close a cycle")]
    CyclicBind { src: WallNodeId, dst: WallNodeId },
    #[error("{dst} already has a producer")]
    InputBusy { dst: WallNodeId },
    #[error("control command before setup completed")]
    MixedSetupAndCtrl,
    #[error("decode {0} did not drain within the retry budget")]
    DrainTimeout(WallNodeId),
    #[error("platform sdk failure, code {code}")]
    PlatformSdk { code: i32 },
    #[error("{source}")]
    Runtime {
        #[from]
        source: skein::Error,
    },
    #[error("{source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}
