pub type Result<M> = std::result::Result<M, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{source}")]
    Cluster {
        #[from]
        source: ClusterError,
    },
    #[error("{source}")]
    Tracker {
        #[from]
        source: TrackerError,
    },
    #[error("radar config: {source}")]
    Config {
        #[from]
        source: serde_json::Error,
    },
    #[error("invalid radar parameter: {0}")]
    InvalidParameter(String),
}

/// Per-frame clustering failures. These are reported as values; the caller
/// marks the frame dropped rather than tearing the pipeline down.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("cluster count exceeded the configured maximum of {max_clusters}")]
    ClusterLimitReached { max_clusters: usize },
    #[error("{num_points} input points exceed the configured budget of {max_points}")]
    TooManyPoints {
        num_points: usize,
        max_points: usize,
    },
}

/// Per-frame tracker failures, likewise reported as values.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("idle tracker pool exhausted")]
    PoolExhausted,
    #[error("track {track_id} exceeded {max} associated measurements")]
    TooManyMeasurements { track_id: usize, max: usize },
    #[error("{num_clusters} input clusters exceed the maximum of {max}")]
    InputExceedsMax { num_clusters: usize, max: usize },
}
