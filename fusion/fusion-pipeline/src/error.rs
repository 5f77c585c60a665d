pub type Result<M> = std::result::Result<M, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{source}")]
    Geometry {
        #[from]
        source: bev_geom::Error,
    },
    #[error("{source}")]
    Radar {
        #[from]
        source: radar_track::Error,
    },
    #[error("{source}")]
    Runtime {
        #[from]
        source: skein::Error,
    },
    #[error("{source}")]
    Csv {
        #[from]
        source: csv::Error,
    },
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
    #[error("camera {0} has no homography configured")]
    UnknownCamera(u32),
}
