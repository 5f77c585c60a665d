use std::io::Read;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use nalgebra::{DMatrix, Matrix3, Matrix4, Matrix4x2, Vector3};

use crate::error::{Error, Result};

/// Read `count` little-endian float32 values, verifying the exact file size.
fn read_values(path: &Path, count: usize) -> Result<Vec<f64>> {
    let expected = count * std::mem::size_of::<f32>();
    let mut file = std::fs::File::open(path)?;
    let actual = file.metadata()?.len() as usize;
    if actual != expected {
        return Err(Error::CalibrationSize {
            path: path.display().to_string(),
            expected,
            actual,
        });
    }
    let mut bytes = Vec::with_capacity(expected);
    file.read_to_end(&mut bytes)?;
    let mut values = vec![0f32; count];
    let mut cursor = std::io::Cursor::new(bytes);
    cursor.read_f32_into::<LittleEndian>(&mut values)?;
    Ok(values.into_iter().map(|v| v as f64).collect())
}

/// Read a row-major little-endian float32 matrix file of exactly
/// `rows × cols` values. A size mismatch fails configure.
pub fn read_matrix_file(path: &Path, rows: usize, cols: usize) -> Result<DMatrix<f64>> {
    let values = read_values(path, rows * cols)?;
    Ok(DMatrix::from_row_slice(rows, cols, &values))
}

/// Disparity-to-depth reprojection matrix (4×4).
#[derive(Debug, Clone)]
pub struct QMatrix(pub Matrix4<f64>);

impl QMatrix {
    pub fn from_file(path: &Path) -> Result<Self> {
        let values = read_values(path, 16)?;
        Ok(Self(Matrix4::from_row_slice(&values)))
    }

    /// Reproject one pixel with disparity `d` to camera 3D.
    pub fn reproject(&self, x: f64, y: f64, d: f64) -> [f64; 3] {
        let v = self.0 * nalgebra::Vector4::new(x, y, d, 1.0);
        let w = v[3];
        [v[0] / w, v[1] / w, v[2] / w]
    }
}

/// Camera-3D-to-radar-ground projection matrix (4×2), applied as
/// `[x̄, ȳ, z̄, 1] · R`.
#[derive(Debug, Clone)]
pub struct RegistrationMatrix(pub Matrix4x2<f64>);

impl RegistrationMatrix {
    pub fn from_file(path: &Path) -> Result<Self> {
        let values = read_values(path, 8)?;
        Ok(Self(Matrix4x2::from_row_slice(&values)))
    }

    pub fn project(&self, point: [f64; 3]) -> [f64; 2] {
        let row = nalgebra::RowVector4::new(point[0], point[1], point[2], 1.0);
        let out = row * self.0;
        [out[0], out[1]]
    }
}

/// Pixel-to-radar-ground homography (3×3).
#[derive(Debug, Clone)]
pub struct Homography(pub Matrix3<f64>);

impl Homography {
    pub fn from_file(path: &Path) -> Result<Self> {
        let values = read_values(path, 9)?;
        Ok(Self(Matrix3::from_row_slice(&values)))
    }

    pub fn identity() -> Self {
        Self(Matrix3::identity())
    }

    /// Perspective-transform one pixel position to the ground plane.
    pub fn project(&self, x: f64, y: f64) -> (f64, f64) {
        let v = self.0 * Vector3::new(x, y, 1.0);
        (v[0] / v[2], v[1] / v[2])
    }
}
