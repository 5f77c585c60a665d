use std::path::Path;

use tracing::debug;

use crate::calibration::{Homography, QMatrix, RegistrationMatrix};
use crate::error::{Error, Result};
use crate::rect::{GroundRect, PixelRect};

/// BEV footprint emitted for every projected detection, meters.
pub const DEFAULT_FOOTPRINT: (f64, f64) = (4.2, 1.7);

/// Minimum in-constraint 3D points inside a rect for a valid range fix.
pub const MIN_INLIER_POINTS: usize = 100;

/// Single-channel float disparity image, row-major.
#[derive(Debug, Clone)]
pub struct DisparityMap {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl DisparityMap {
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        if width == 0 || height == 0 || data.len() != width * height {
            return Err(Error::BadDisparity { width, height });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }
}

/// Dense camera-3D reconstruction of a disparity map.
#[derive(Debug, Clone)]
pub struct PointCloudImage {
    pub width: usize,
    pub height: usize,
    pub points: Vec<[f64; 3]>,
}

impl PointCloudImage {
    pub fn at(&self, x: usize, y: usize) -> [f64; 3] {
        self.points[y * self.width + x]
    }
}

/// Projects camera detections into radar ground coordinates, either through
/// the per-camera homography (planar assumption) or through a disparity map
/// and the registration matrix (metric).
#[derive(Debug, Clone)]
pub struct CoordinateTransformer {
    q: QMatrix,
    registration: RegistrationMatrix,
    homography: Homography,
    /// `[xMin, xMax, yMin, yMax, zMin, zMax]` camera-3D bounds.
    constraints: [i32; 6],
    footprint: (f64, f64),
}

impl CoordinateTransformer {
    pub fn new(
        q: QMatrix,
        registration: RegistrationMatrix,
        homography: Homography,
        constraints: &[i32],
    ) -> Result<Self> {
        if constraints.len() != 6 {
            return Err(Error::BadConstraints(constraints.len()));
        }
        let mut c = [0i32; 6];
        c.copy_from_slice(constraints);
        Ok(Self {
            q,
            registration,
            homography,
            constraints: c,
            footprint: DEFAULT_FOOTPRINT,
        })
    }

    /// Load all three calibration files. Read once at configure time.
    pub fn from_files(
        registration_path: &Path,
        q_path: &Path,
        homography_path: &Path,
        constraints: &[i32],
    ) -> Result<Self> {
        Self::new(
            QMatrix::from_file(q_path)?,
            RegistrationMatrix::from_file(registration_path)?,
            Homography::from_file(homography_path)?,
            constraints,
        )
    }

    /// Override the emitted BEV footprint (defaults to [`DEFAULT_FOOTPRINT`]).
    pub fn with_footprint(mut self, width: f64, height: f64) -> Self {
        self.footprint = (width, height);
        self
    }

    pub fn footprint(&self) -> (f64, f64) {
        self.footprint
    }

    /// Project a pixel rect's center through the homography and emit the
    /// fixed-size BEV box.
    pub fn pixel_to_ground(&self, rect: &PixelRect) -> GroundRect {
        let (cx, cy) = rect.center();
        let (x, y) = self.homography.project(cx, cy);
        GroundRect::new(x, y, self.footprint.0, self.footprint.1)
    }

    /// Reproject a disparity map to camera 3D, clamping every component into
    /// the configured constraint box.
    pub fn generate_point_cloud(&self, disparity: &DisparityMap) -> PointCloudImage {
        let [x_min, _x_max, y_min, _y_max, z_min, _z_max] = self.constraints.map(f64::from);
        let mut points = Vec::with_capacity(disparity.width * disparity.height);
        for y in 0..disparity.height {
            for x in 0..disparity.width {
                let mut p = self
                    .q
                    .reproject(x as f64, y as f64, disparity.at(x, y) as f64);
                // out-of-range components collapse to the lower bound, which
                // excludes them from the strict inlier test below
                if p[0] < self.constraints[0] as f64 || p[0] > self.constraints[1] as f64 {
                    p[0] = x_min;
                }
                if p[1] < self.constraints[2] as f64 || p[1] > self.constraints[3] as f64 {
                    p[1] = y_min;
                }
                if p[2] < self.constraints[4] as f64 || p[2] > self.constraints[5] as f64 {
                    p[2] = z_min;
                }
                points.push(p);
            }
        }
        PointCloudImage {
            width: disparity.width,
            height: disparity.height,
            points,
        }
    }

    /// Metric projection: reconstruct 3D from disparity, then project the
    /// in-rect mean through the registration matrix. `None` when fewer than
    /// [`MIN_INLIER_POINTS`] valid points fall inside the rect.
    pub fn camera_to_ground(
        &self,
        disparity: &DisparityMap,
        rect: &PixelRect,
    ) -> Option<GroundRect> {
        let pcl = self.generate_point_cloud(disparity);
        self.point_cloud_to_ground(&pcl, rect)
    }

    /// Same as [`CoordinateTransformer::camera_to_ground`] but starting from
    /// an already reconstructed point cloud.
    pub fn point_cloud_to_ground(
        &self,
        pcl: &PointCloudImage,
        rect: &PixelRect,
    ) -> Option<GroundRect> {
        let x_min = self.constraints[0] as f64;
        let y_min = self.constraints[2] as f64;
        let z_min = self.constraints[4] as f64;

        let x0 = rect.x.max(0) as usize;
        let y0 = rect.y.max(0) as usize;
        let x1 = ((rect.x + rect.width) as usize).min(pcl.width.saturating_sub(1));
        let y1 = ((rect.y + rect.height) as usize).min(pcl.height.saturating_sub(1));

        let mut sum = [0.0f64; 3];
        let mut count = 0usize;
        for y in y0..=y1 {
            for x in x0..=x1 {
                let p = pcl.at(x, y);
                if p[0] > x_min && p[1] > y_min && p[2] > z_min {
                    sum[0] += p[0];
                    sum[1] += p[1];
                    sum[2] += p[2];
                    count += 1;
                }
            }
        }
        if count < MIN_INLIER_POINTS {
            debug!(count, "too few in-constraint points for a range fix");
            return None;
        }
        let inv = 1.0 / count as f64;
        let mean = [sum[0] * inv, sum[1] * inv, sum[2] * inv];
        let radar = self.registration.project(mean);
        // registration output order is (y, x) on the ground plane
        Some(GroundRect::new(
            radar[1],
            radar[0],
            self.footprint.0,
            self.footprint.1,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Matrix4, Matrix4x2};

    fn identity_transformer() -> CoordinateTransformer {
        CoordinateTransformer::new(
            QMatrix(Matrix4::identity()),
            RegistrationMatrix(Matrix4x2::from_row_slice(&[
                1.0, 0.0, //
                0.0, 1.0, //
                0.0, 0.0, //
                0.0, 0.0,
            ])),
            Homography::identity(),
            &[-100, 100, -100, 100, -100, 100],
        )
        .unwrap()
    }

    #[test]
    fn pixel_projection_is_deterministic() {
        let t = identity_transformer();
        let rect = PixelRect::new(100, 200, 50, 50);
        let ground = t.pixel_to_ground(&rect);
        // identity homography: the BEV center equals the pixel center
        assert_relative_eq!(ground.x, 125.0, epsilon = 1e-9);
        assert_relative_eq!(ground.y, 225.0, epsilon = 1e-9);
        assert_relative_eq!(ground.width, 4.2, epsilon = 1e-12);
        assert_relative_eq!(ground.height, 1.7, epsilon = 1e-12);
        assert_eq!(t.pixel_to_ground(&rect), ground);
    }

    #[test]
    fn scaled_homography() {
        let t = CoordinateTransformer::new(
            QMatrix(Matrix4::identity()),
            RegistrationMatrix(Matrix4x2::zeros()),
            Homography(Matrix3::from_row_slice(&[
                0.1, 0.0, 0.0, //
                0.0, 0.1, 0.0, //
                0.0, 0.0, 1.0,
            ])),
            &[-100, 100, -100, 100, -100, 100],
        )
        .unwrap()
        .with_footprint(2.0, 1.0);
        let ground = t.pixel_to_ground(&PixelRect::new(90, 190, 20, 20));
        assert_relative_eq!(ground.x, 10.0, epsilon = 1e-9);
        assert_relative_eq!(ground.y, 20.0, epsilon = 1e-9);
        assert_relative_eq!(ground.width, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn inlier_gate_requires_a_hundred_points() {
        let t = identity_transformer();
        // 20x20 region of valid points (disparity 1 -> point (x, y, 1))
        let disparity = DisparityMap::new(32, 32, vec![1.0; 32 * 32]).unwrap();
        let small = PixelRect::new(0, 0, 5, 5); // 36 samples
        assert!(t.camera_to_ground(&disparity, &small).is_none());
        let big = PixelRect::new(1, 1, 20, 10); // 231 samples
        let ground = t.camera_to_ground(&disparity, &big).unwrap();
        // mean pixel position is (11, 6); registration maps (x,y,z) -> (x,y)
        // and the output order is swapped
        assert_relative_eq!(ground.x, 6.0, epsilon = 1e-9);
        assert_relative_eq!(ground.y, 11.0, epsilon = 1e-9);
    }

    #[test]
    fn out_of_constraint_points_are_excluded() {
        let mut t = identity_transformer();
        t.constraints = [0, 10, 0, 10, 0, 10];
        // all points reproject to (x, y, 5); columns >= 10 violate xMax and
        // collapse to xMin, failing the strict inlier test
        let disparity = DisparityMap::new(64, 64, vec![5.0; 64 * 64]).unwrap();
        let rect = PixelRect::new(0, 0, 63, 8);
        // strict bounds leave columns 1..=10 and rows 1..=8: 80 < 100
        assert!(t.camera_to_ground(&disparity, &rect).is_none());
    }
}
