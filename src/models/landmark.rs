//! Landmark-in-body measurement: the position of a known world point seen from the pose.

use nalgebra::{DMatrix, DVector, Matrix3, Matrix3x6, Matrix6, Vector3};

use super::{LeftPlus, MeasurementJacobian, MeasurementModel, RightPlus, check_noise_covariance};
use crate::error::FilterResult;
use crate::manifold::se3::SE3;
use crate::manifold::{LieGroup, skew};

/// `h(X) = X⁻¹ · b` for a landmark `b` fixed in the world frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkMeasurement {
    landmark: Vector3<f64>,
    covariance: Matrix3<f64>,
}

impl LandmarkMeasurement {
    /// Create a landmark model with noise covariance `R`.
    ///
    /// # Errors
    /// `InvalidArgument` if `R` is not symmetric PSD.
    pub fn new(landmark: Vector3<f64>, covariance: Matrix3<f64>) -> FilterResult<Self> {
        check_noise_covariance(
            &DMatrix::from_column_slice(3, 3, covariance.as_slice()),
            "landmark noise",
        )?;
        Ok(LandmarkMeasurement {
            landmark,
            covariance,
        })
    }

    /// Create a landmark model with `R = diag(σ²)`.
    pub fn from_sigmas(landmark: Vector3<f64>, sigmas: Vector3<f64>) -> Self {
        LandmarkMeasurement {
            landmark,
            covariance: Matrix3::from_diagonal(&sigmas.component_mul(&sigmas)),
        }
    }

    /// World-frame landmark position.
    pub fn landmark(&self) -> Vector3<f64> {
        self.landmark
    }
}

impl MeasurementModel for LandmarkMeasurement {
    fn dimension(&self) -> usize {
        3
    }

    fn value(&self, state: &SE3) -> DVector<f64> {
        let body = state.inverse(None).act(&self.landmark, None, None);
        DVector::from_column_slice(body.as_slice())
    }

    fn covariance(&self) -> DMatrix<f64> {
        DMatrix::from_column_slice(3, 3, self.covariance.as_slice())
    }
}

impl MeasurementJacobian<RightPlus> for LandmarkMeasurement {
    /// Chain rule through the inverse and the action:
    /// H = J_act_X⁻¹ · J_inv_X = [ -I   [Rᵀ(b - t)]ₓ ]
    fn jacobian(&self, state: &SE3) -> DMatrix<f64> {
        let mut jac_inverse = Matrix6::zeros();
        let mut jac_action = Matrix3x6::zeros();
        let inverse = state.inverse(Some(&mut jac_inverse));
        inverse.act(&self.landmark, Some(&mut jac_action), None);

        let h = jac_action * jac_inverse;
        DMatrix::from_column_slice(3, 6, h.as_slice())
    }
}

impl MeasurementJacobian<LeftPlus> for LandmarkMeasurement {
    /// H = Rᵀ [ -I   [b]ₓ ]
    ///
    /// Apart from the rotation the Jacobian depends only on the landmark.
    fn jacobian(&self, state: &SE3) -> DMatrix<f64> {
        let rotation_t = state.rotation_matrix().transpose();
        let mut h = Matrix3x6::zeros();
        h.fixed_view_mut::<3, 3>(0, 0).copy_from(&(-rotation_t));
        h.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(rotation_t * skew(&self.landmark)));
        DMatrix::from_column_slice(3, 6, h.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ErrorConvention;
    use nalgebra::Vector6;

    const FD_STEP: f64 = 1e-6;

    fn model() -> LandmarkMeasurement {
        LandmarkMeasurement::from_sigmas(Vector3::new(3.0, -1.0, -1.0), Vector3::repeat(0.01))
    }

    fn sample_state() -> SE3 {
        SE3::from_translation_euler(0.4, 0.2, -0.1, 0.3, -0.2, 0.8)
    }

    fn numerical<C: ErrorConvention>(model: &LandmarkMeasurement, state: &SE3) -> DMatrix<f64> {
        let mut jac = DMatrix::zeros(3, 6);
        for i in 0..6 {
            let mut delta = Vector6::zeros();
            delta[i] = FD_STEP;
            let column = (model.value(&C::retract(state, &delta))
                - model.value(&C::retract(state, &-delta)))
                / (2.0 * FD_STEP);
            jac.set_column(i, &column);
        }
        jac
    }

    #[test]
    fn test_value_at_identity_is_landmark() {
        let m = model();
        let z = m.value(&SE3::identity());
        assert_eq!(z, DVector::from_column_slice(&[3.0, -1.0, -1.0]));
    }

    #[test]
    fn test_value_matches_rotation_transpose() {
        let m = model();
        let x = sample_state();
        let expected = x.rotation_matrix().transpose() * (m.landmark() - x.translation());
        assert!((m.value(&x) - DVector::from_column_slice(expected.as_slice())).norm() < 1e-12);
    }

    #[test]
    fn test_right_plus_jacobian() {
        let m = model();
        let x = sample_state();
        let analytic = <LandmarkMeasurement as MeasurementJacobian<RightPlus>>::jacobian(&m, &x);
        assert!((numerical::<RightPlus>(&m, &x) - &analytic).norm() < 1e-6);

        let body = x.rotation_matrix().transpose() * (m.landmark() - x.translation());
        let expected_rot = skew(&body);
        for r in 0..3 {
            for c in 0..3 {
                let identity = if r == c { 1.0 } else { 0.0 };
                assert!((analytic[(r, c)] + identity).abs() < 1e-12);
                assert!((analytic[(r, c + 3)] - expected_rot[(r, c)]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_left_plus_jacobian() {
        let m = model();
        let x = sample_state();
        let analytic = <LandmarkMeasurement as MeasurementJacobian<LeftPlus>>::jacobian(&m, &x);
        assert!((numerical::<LeftPlus>(&m, &x) - analytic).norm() < 1e-6);
    }

    #[test]
    fn test_rejects_indefinite_noise() {
        let mut r = Matrix3::identity();
        r[(1, 1)] = -1e-3;
        assert!(LandmarkMeasurement::new(Vector3::zeros(), r).is_err());
        assert!(LandmarkMeasurement::new(Vector3::zeros(), Matrix3::zeros()).is_ok());
    }
}
