use adskalman::TransitionModelLinearNoControl;
use nalgebra::{Matrix4, U4};

/// Constant-velocity planar motion model for a fixed dt.
///
/// The state vector is `[x, y, vx, vy]`. `Q` is the constant-acceleration
/// process noise assembled from powers of `2·dt`.
#[derive(Debug)]
pub struct MotionModelFixedDt {
    pub transition_model: Matrix4<f64>,
    pub transition_model_transpose: Matrix4<f64>,
    pub transition_noise_covariance: Matrix4<f64>,
}

#[allow(non_snake_case)]
impl TransitionModelLinearNoControl<f64, U4> for MotionModelFixedDt {
    fn F(&self) -> &Matrix4<f64> {
        &self.transition_model
    }
    fn FT(&self) -> &Matrix4<f64> {
        &self.transition_model_transpose
    }
    fn Q(&self) -> &Matrix4<f64> {
        &self.transition_noise_covariance
    }
}

/// Generator for [`MotionModelFixedDt`] instances.
#[derive(Debug, Clone, Default)]
pub struct ConstantVelocityModel {}

impl ConstantVelocityModel {
    pub fn new() -> Self {
        Self {}
    }

    /// For a given `dt`, create the concrete motion model.
    pub fn calc_for_dt(&self, dt: f64) -> MotionModelFixedDt {
        #[rustfmt::skip]
        let transition_model = Matrix4::<f64>::new(
            1.0, 0.0,  dt, 0.0,
            0.0, 1.0, 0.0,  dt,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );

        let c = dt * dt * 4.0; // (2dt)^2
        let b = c * dt * 2.0; //  (2dt)^3
        let a = c * c; //         (2dt)^4
        #[rustfmt::skip]
        let transition_noise_covariance = Matrix4::<f64>::new(
            a,   0.0, b,   0.0,
            0.0, a,   0.0, b,
            b,   0.0, c,   0.0,
            0.0, b,   0.0, c,
        );

        MotionModelFixedDt {
            transition_model,
            transition_model_transpose: transition_model.transpose(),
            transition_noise_covariance,
        }
    }
}
