//! Direct position (GPS-like) measurement.

use nalgebra::{DMatrix, DVector, Matrix3, Matrix3x6, Vector3};

use super::{LeftPlus, MeasurementJacobian, MeasurementModel, RightPlus, check_noise_covariance};
use crate::error::FilterResult;
use crate::manifold::se3::SE3;
use crate::manifold::skew;

/// `h(X) = t_X`, the translation of the pose in the world frame.
#[derive(Debug, Clone, PartialEq)]
pub struct GpsMeasurement {
    covariance: Matrix3<f64>,
}

impl GpsMeasurement {
    /// Create a position model with noise covariance `R`.
    pub fn new(covariance: Matrix3<f64>) -> FilterResult<Self> {
        check_noise_covariance(
            &DMatrix::from_column_slice(3, 3, covariance.as_slice()),
            "position noise",
        )?;
        Ok(GpsMeasurement { covariance })
    }

    /// Create a position model with `R = diag(σ²)`.
    pub fn from_sigmas(sigmas: Vector3<f64>) -> Self {
        GpsMeasurement {
            covariance: Matrix3::from_diagonal(&sigmas.component_mul(&sigmas)),
        }
    }
}

impl MeasurementModel for GpsMeasurement {
    fn dimension(&self) -> usize {
        3
    }

    fn value(&self, state: &SE3) -> DVector<f64> {
        DVector::from_column_slice(state.translation().as_slice())
    }

    fn covariance(&self) -> DMatrix<f64> {
        DMatrix::from_column_slice(3, 3, self.covariance.as_slice())
    }
}

impl MeasurementJacobian<RightPlus> for GpsMeasurement {
    /// H = [ R   0 ]
    fn jacobian(&self, state: &SE3) -> DMatrix<f64> {
        let mut h = Matrix3x6::zeros();
        h.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&state.rotation_matrix());
        DMatrix::from_column_slice(3, 6, h.as_slice())
    }
}

impl MeasurementJacobian<LeftPlus> for GpsMeasurement {
    /// H = [ I   -[t]ₓ ]
    fn jacobian(&self, state: &SE3) -> DMatrix<f64> {
        let mut h = Matrix3x6::zeros();
        h.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&Matrix3::identity());
        h.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(-skew(&state.translation())));
        DMatrix::from_column_slice(3, 6, h.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ErrorConvention;
    use nalgebra::Vector6;

    fn numerical<C: ErrorConvention>(model: &GpsMeasurement, state: &SE3) -> DMatrix<f64> {
        let step = 1e-6;
        let mut jac = DMatrix::zeros(3, 6);
        for i in 0..6 {
            let mut delta = Vector6::zeros();
            delta[i] = step;
            let column = (model.value(&C::retract(state, &delta))
                - model.value(&C::retract(state, &-delta)))
                / (2.0 * step);
            jac.set_column(i, &column);
        }
        jac
    }

    #[test]
    fn test_gps_value_and_jacobians() {
        let model = GpsMeasurement::from_sigmas(Vector3::repeat(0.08));
        let x = SE3::from_translation_euler(1.5, -2.0, 0.7, -0.3, 0.1, 1.2);
        assert_eq!(
            model.value(&x),
            DVector::from_column_slice(&[1.5, -2.0, 0.7])
        );

        let right = <GpsMeasurement as MeasurementJacobian<RightPlus>>::jacobian(&model, &x);
        let left = <GpsMeasurement as MeasurementJacobian<LeftPlus>>::jacobian(&model, &x);
        assert!((numerical::<RightPlus>(&model, &x) - right).norm() < 1e-6);
        assert!((numerical::<LeftPlus>(&model, &x) - left).norm() < 1e-6);
    }

    #[test]
    fn test_gps_covariance() {
        let model = GpsMeasurement::from_sigmas(Vector3::new(0.1, 0.2, 0.3));
        let r = model.covariance();
        assert!((r[(2, 2)] - 0.09).abs() < 1e-15);
        assert_eq!(r[(0, 1)], 0.0);
        assert!(GpsMeasurement::new(-Matrix3::identity()).is_err());
    }
}
