//! Body-twist process model on SE(3).

use nalgebra::{Matrix6, Vector6};
use tracing::debug;

use super::{LeftPlus, RightPlus, SystemJacobian, SystemModel, check_noise_covariance};
use crate::error::{FilterError, FilterResult};
use crate::linalg::{symmetrize, to_dynamic};
use crate::manifold::se3::{SE3, SE3Tangent};
use crate::manifold::{LieGroup, Tangent};

/// Integrates a body-frame twist: `X' = X · Exp(u)` with `u = ξ·dt`.
///
/// Noise is additive on the control tangent, `u_true = u + w`, `w ~ N(0, Q)`.
#[derive(Debug, Clone, PartialEq)]
pub struct LieSystemModel {
    covariance: Matrix6<f64>,
}

impl Default for LieSystemModel {
    fn default() -> Self {
        Self::noiseless()
    }
}

impl LieSystemModel {
    /// Create a model with process-noise covariance `Q`.
    ///
    /// # Errors
    /// `InvalidArgument` if `Q` is not symmetric PSD.
    pub fn new(covariance: Matrix6<f64>) -> FilterResult<Self> {
        let mut model = Self::noiseless();
        model.set_covariance(covariance)?;
        Ok(model)
    }

    /// Model with `Q = 0`.
    pub fn noiseless() -> Self {
        LieSystemModel {
            covariance: Matrix6::zeros(),
        }
    }

    /// White-noise model: `Q = diag(σ²) / dt`.
    ///
    /// # Arguments
    /// * `sigmas` - per-step standard deviations of the integrated twist, `(ρ, θ)` order
    /// * `dt` - integration step, strictly positive
    pub fn from_sigmas(sigmas: Vector6<f64>, dt: f64) -> FilterResult<Self> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(FilterError::InvalidArgument(format!(
                "time step must be positive and finite, got {dt}"
            )));
        }
        if !sigmas.iter().all(|s| s.is_finite()) {
            return Err(FilterError::InvalidArgument(
                "process noise sigmas must be finite".to_string(),
            ));
        }
        Self::new(Matrix6::from_diagonal(&sigmas.map(|s| s * s / dt)))
    }

    /// Replace `Q`.
    pub fn set_covariance(&mut self, covariance: Matrix6<f64>) -> FilterResult<()> {
        check_noise_covariance(&to_dynamic(&covariance), "process noise")?;
        self.covariance = symmetrize(&covariance);
        debug!(trace = self.covariance.trace(), "process noise set");
        Ok(())
    }
}

impl SystemModel for LieSystemModel {
    fn value(&self, state: &SE3, control: &SE3Tangent) -> SE3 {
        state.right_plus(control, None, None)
    }

    fn covariance(&self) -> Matrix6<f64> {
        self.covariance
    }
}

impl SystemJacobian<RightPlus> for LieSystemModel {
    /// F = Ad(Exp(-u))
    fn jacobian_state(&self, _state: &SE3, control: &SE3Tangent) -> Matrix6<f64> {
        control.exp(None).inverse(None).adjoint()
    }

    /// W = J_r(u)
    fn jacobian_noise(&self, _state: &SE3, control: &SE3Tangent) -> Matrix6<f64> {
        control.right_jacobian()
    }
}

impl SystemJacobian<LeftPlus> for LieSystemModel {
    /// The invariant error is untouched by a right-multiplied increment: F = I
    fn jacobian_state(&self, _state: &SE3, _control: &SE3Tangent) -> Matrix6<f64> {
        Matrix6::identity()
    }

    /// W = Ad(X · Exp(u)) J_r(u)
    fn jacobian_noise(&self, state: &SE3, control: &SE3Tangent) -> Matrix6<f64> {
        self.value(state, control).adjoint() * control.right_jacobian()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ErrorConvention;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    const FD_STEP: f64 = 1e-6;

    fn sample_state() -> SE3 {
        SE3::from_translation_euler(0.5, 1.0, -0.2, 0.1, 0.4, -0.3)
    }

    fn sample_control() -> SE3Tangent {
        SE3Tangent::from_components(0.1, 0.02, 0.05, 0.01, -0.02, 0.05)
    }

    fn numerical<C, F>(f: F, nominal: &SE3) -> Matrix6<f64>
    where
        C: ErrorConvention,
        F: Fn(&Vector6<f64>) -> SE3,
    {
        let mut jac = Matrix6::zeros();
        for i in 0..6 {
            let mut delta = Vector6::zeros();
            delta[i] = FD_STEP;
            let column =
                (C::local(&f(&delta), nominal) - C::local(&f(&-delta), nominal)) / (2.0 * FD_STEP);
            jac.set_column(i, &column);
        }
        jac
    }

    fn check_jacobians<C>(model: &LieSystemModel)
    where
        C: ErrorConvention,
        LieSystemModel: SystemJacobian<C>,
    {
        let x = sample_state();
        let u = sample_control();
        let nominal = model.value(&x, &u);

        let f_num = numerical::<C, _>(|d| model.value(&C::retract(&x, d), &u), &nominal);
        let w_num = numerical::<C, _>(
            |d| model.value(&x, &SE3Tangent::from(u.coeffs() + d)),
            &nominal,
        );
        let f = <LieSystemModel as SystemJacobian<C>>::jacobian_state(model, &x, &u);
        let w = <LieSystemModel as SystemJacobian<C>>::jacobian_noise(model, &x, &u);
        assert!((f_num - f).norm() < 1e-6, "{} F mismatch", C::NAME);
        assert!((w_num - w).norm() < 1e-6, "{} W mismatch", C::NAME);
    }

    #[test]
    fn test_value_integrates_twist() {
        let model = LieSystemModel::noiseless();
        let mut x = SE3::identity();
        let u = SE3Tangent::from_components(0.1, 0.0, 0.0, 0.0, 0.0, 0.0);
        for _ in 0..10 {
            x = model.value(&x, &u);
        }
        assert_abs_diff_eq!(
            x.translation(),
            nalgebra::Vector3::new(1.0, 0.0, 0.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_right_plus_jacobians() {
        check_jacobians::<RightPlus>(&LieSystemModel::noiseless());
    }

    #[test]
    fn test_left_plus_jacobians() {
        check_jacobians::<LeftPlus>(&LieSystemModel::noiseless());
    }

    #[test]
    fn test_zero_control_jacobians_are_identity() {
        let model = LieSystemModel::noiseless();
        let x = sample_state();
        let u = SE3Tangent::zero();
        let f = <LieSystemModel as SystemJacobian<RightPlus>>::jacobian_state(&model, &x, &u);
        let w = <LieSystemModel as SystemJacobian<RightPlus>>::jacobian_noise(&model, &x, &u);
        assert_eq!(f, Matrix6::identity());
        assert_eq!(w, Matrix6::identity());
    }

    #[test]
    fn test_from_sigmas() {
        let sigmas = Vector6::new(3e-3, 3e-3, 3e-3, 1e-2, 1e-2, 1e-2);
        let model = LieSystemModel::from_sigmas(sigmas, 0.01).unwrap();
        let q = model.covariance();
        assert_relative_eq!(q[(0, 0)], 9e-4, max_relative = 1e-12);
        assert_relative_eq!(q[(5, 5)], 1e-2, max_relative = 1e-12);
        assert_eq!(q[(0, 1)], 0.0);

        assert!(LieSystemModel::from_sigmas(sigmas, 0.0).is_err());
        assert!(LieSystemModel::from_sigmas(sigmas, f64::NAN).is_err());
    }

    #[test]
    fn test_rejects_invalid_covariance() {
        let mut q = Matrix6::identity();
        q[(2, 2)] = -1.0;
        assert!(matches!(
            LieSystemModel::new(q),
            Err(FilterError::InvalidArgument(_))
        ));
        let mut q = Matrix6::identity();
        q[(0, 3)] = 0.5;
        assert!(LieSystemModel::new(q).is_err());
    }
}
