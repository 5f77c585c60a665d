use crate::event::EventId;
use crate::node::NodeState;

pub type Result<M> = std::result::Result<M, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    // ------ configuration ------
    #[error("invalid config string near `{0}`")]
    InvalidConfigString(String),
    #[error("missing config key `{0}`")]
    MissingKey(String),
    #[error("config key `{key}` is {actual}, expected {expected}")]
    BadType {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    // ------ topology ------
    #[error("duplicated node id `{0}`")]
    DuplicatedId(String),
    #[error("unknown node id `{0}`")]
    InvalidId(String),
    #[error("input port {port} of `{node}` is already bound")]
    PortAlreadyBound { node: String, port: usize },
    #[error("port {port} out of range for `{node}`")]
    PortOutOfRange { node: String, port: usize },
    #[error("graph contains a cycle through `{0}`")]
    CyclicGraph(String),
    #[error("node `{0}` is dangling: not a source and has no incoming edge")]
    DanglingNode(String),
    #[error("illegal state transition {from:?} -> {to:?}")]
    IllegalStateTransition { from: NodeState, to: NodeState },

    // ------ runtime ------
    #[error("node `{0}` not found")]
    NodeNotFound(String),
    #[error("unknown node kind `{0}`")]
    UnknownNodeKind(String),
    #[error("output port has no binding")]
    PortNullPtr,
    #[error("signal handler installation failed: {0}")]
    SignalHandler(String),

    // ------ event system ------
    #[error("event {0:?} is already registered")]
    EventRegisterFailed(EventId),
    #[error("event {0:?} is not registered")]
    EventNotFound(EventId),
    #[error("timed out waiting for event {0:?}")]
    EventWaitTimeout(EventId),
    #[error("event callback failed for {0:?}")]
    CallbackFail(EventId),

    // ------ node-supplied failures ------
    #[error("node failure: {0}")]
    NodeFail(String),

    #[error("{source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("{source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    /// Wrap a domain-specific configure/prepare failure raised inside a node.
    pub fn node_fail<E: std::fmt::Display>(e: E) -> Self {
        Error::NodeFail(e.to_string())
    }
}

fn _test_error_is_send() {
    fn implements<T: Send>() {}
    implements::<Error>();
}
