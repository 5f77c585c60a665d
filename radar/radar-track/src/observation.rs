use adskalman::ObservationModel;
use nalgebra::{Matrix3, OMatrix, Vector3, Vector4, U3, U4};

/// Map a Cartesian state `[x, y, vx, vy]` into the spherical measurement
/// space `[range, azimuth, doppler]`.
///
/// The azimuth convention is piecewise: `x = 0` maps to π/2, `x > 0` to
/// `atan(y/x)`, and `x < 0` to `atan(y/x) + π`, so azimuth lies in
/// (-π/2, 3π/2).
pub fn measurement_of_state(s: &Vector4<f64>) -> Vector3<f64> {
    let (x, y, vx, vy) = (s[0], s[1], s[2], s[3]);
    let range = (x * x + y * y).sqrt();
    let azimuth = if x == 0.0 {
        std::f64::consts::FRAC_PI_2
    } else if x > 0.0 {
        (y / x).atan()
    } else {
        (y / x).atan() + std::f64::consts::PI
    };
    let doppler = (x * vx + y * vy) / range;
    Vector3::new(range, azimuth, doppler)
}

/// Inverse start-up mapping: place a state at a measurement, aiming the
/// velocity along the line of sight.
pub fn state_of_measurement(m: &Vector3<f64>) -> Vector4<f64> {
    let (range, azimuth, doppler) = (m[0], m[1], m[2]);
    Vector4::new(
        range * azimuth.cos(),
        range * azimuth.sin(),
        doppler * azimuth.cos(),
        doppler * azimuth.sin(),
    )
}

/// Jacobian of [`measurement_of_state`] evaluated at `s` (3×4).
fn jacobian_at(s: &Vector4<f64>) -> OMatrix<f64, U3, U4> {
    let (x, y, vx, vy) = (s[0], s[1], s[2], s[3]);
    let r2 = x * x + y * y;
    let r = r2.sqrt();
    #[rustfmt::skip]
    let j = OMatrix::<f64, U3, U4>::new(
        x / r,                          y / r,                          0.0,   0.0,
        -y / r2,                        x / r2,                         0.0,   0.0,
        y * (vx * y - x * vy) / r / r2, x * (vy * x - vx * y) / r / r2, x / r, y / r,
    );
    j
}

/// Observation model linearized about a prior state, for one EKF update.
///
/// `predict_observation` evaluates the full nonlinear measurement function,
/// so the innovation is exact while the gain uses the local Jacobian.
#[derive(Debug)]
pub struct SphericalObservationModel {
    observation_matrix: OMatrix<f64, U3, U4>,
    observation_matrix_transpose: OMatrix<f64, U4, U3>,
    observation_noise_covariance: Matrix3<f64>,
}

impl SphericalObservationModel {
    /// Linearize about `prior_state` with measurement noise `r` (diagonal of
    /// range/azimuth/doppler variances).
    pub fn linearized_at(prior_state: &Vector4<f64>, r: Vector3<f64>) -> Self {
        let observation_matrix = jacobian_at(prior_state);
        Self {
            observation_matrix,
            observation_matrix_transpose: observation_matrix.transpose(),
            observation_noise_covariance: Matrix3::from_diagonal(&r),
        }
    }
}

impl ObservationModel<f64, U4, U3> for SphericalObservationModel {
    fn H(&self) -> &OMatrix<f64, U3, U4> {
        &self.observation_matrix
    }
    fn HT(&self) -> &OMatrix<f64, U4, U3> {
        &self.observation_matrix_transpose
    }
    fn R(&self) -> &Matrix3<f64> {
        &self.observation_noise_covariance
    }
    fn predict_observation(&self, state: &Vector4<f64>) -> Vector3<f64> {
        measurement_of_state(state)
    }
}
