pub type Result<M> = std::result::Result<M, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("calibration file {path}: expected {expected} bytes, found {actual}")]
    CalibrationSize {
        path: String,
        expected: usize,
        actual: usize,
    },
    #[error("pcl constraints must be [xMin,xMax,yMin,yMax,zMin,zMax], got {0} values")]
    BadConstraints(usize),
    #[error("disparity map is empty or its size does not match {width}x{height}")]
    BadDisparity { width: usize, height: usize },
    #[error("{source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}
