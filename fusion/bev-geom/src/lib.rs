//! Calibration handling and camera/radar ground-plane geometry.
//!
//! The coordinate systems involved:
//! - **Pixel coordinates**: 2D image positions, x right, y down.
//! - **Camera 3D**: metric coordinates reconstructed from a disparity map
//!   through the `Q` reprojection matrix.
//! - **BEV (bird's-eye view)**: radar-aligned ground-plane coordinates in
//!   meters; all fusion happens here.
//!
//! Calibration matrices are little-endian float32 files, row-major:
//! `Q` (4×4, disparity to depth), `Registration` (4×2, camera 3D to radar
//! ground) and per-camera `Homography` (3×3, pixel to radar ground).

mod calibration;
mod error;
mod projection;
mod rect;

pub use calibration::{read_matrix_file, Homography, QMatrix, RegistrationMatrix};
pub use error::{Error, Result};
pub use projection::{
    CoordinateTransformer, DisparityMap, PointCloudImage, DEFAULT_FOOTPRINT, MIN_INLIER_POINTS,
};
pub use rect::{ciou, iou, GroundRect, PixelRect};
