//! System and measurement models consumed by the filters.
//!
//! # Error conventions
//!
//! A covariance on SE(3) only has a meaning together with the retraction that
//! maps its tangent samples back onto the group. Two are used in this crate:
//!
//! - [`RightPlus`]: `X_true = X · Exp(δ)`, used by the EKF, SEKF and UKFM
//! - [`LeftPlus`]: `X_true = Exp(ξ) · X`, the invariant error used by the IEKF
//!
//! Jacobians differ between the two, so the convention is a type parameter of
//! [`SystemJacobian`] and [`MeasurementJacobian`]. A model implementing only
//! `MeasurementJacobian<RightPlus>` cannot be handed to a left-plus filter; it
//! must be wrapped in an [`InvariantAdapter`] first.
//!
//! # Example
//!
//! ```rust
//! use lie_kalman::manifold::{LieGroup, se3::SE3};
//! use lie_kalman::models::{LandmarkMeasurement, MeasurementJacobian, MeasurementModel, RightPlus};
//! use nalgebra::Vector3;
//!
//! let model = LandmarkMeasurement::from_sigmas(Vector3::new(2.0, 0.0, 0.0), Vector3::repeat(0.01));
//! let z = model.value(&SE3::identity());
//! let h = <LandmarkMeasurement as MeasurementJacobian<RightPlus>>::jacobian(&model, &SE3::identity());
//! assert_eq!(z.len(), 3);
//! assert_eq!(h.shape(), (3, 6));
//! ```

use crate::error::{FilterError, FilterResult};
use crate::linalg::check_covariance;
use crate::manifold::se3::{SE3, SE3Tangent};
use crate::manifold::LieGroup;
use nalgebra::{DMatrix, DVector, Matrix6, Vector6};
use std::fmt;

pub mod adapter;
pub mod gps;
pub mod landmark;
pub mod system;

pub use adapter::InvariantAdapter;
pub use gps::GpsMeasurement;
pub use landmark::LandmarkMeasurement;
pub use system::LieSystemModel;

/// Absolute tolerances applied when validating a noise covariance handed to a model.
const NOISE_SYMMETRY_TOLERANCE: f64 = 1e-9;
const NOISE_PSD_TOLERANCE: f64 = 1e-12;

/// Reject noise covariances that are not symmetric PSD.
pub(crate) fn check_noise_covariance(covariance: &DMatrix<f64>, what: &str) -> FilterResult<()> {
    check_covariance(covariance, NOISE_SYMMETRY_TOLERANCE, NOISE_PSD_TOLERANCE)
        .map_err(|err| FilterError::InvalidArgument(format!("{what}: {err}")))
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::RightPlus {}
    impl Sealed for super::LeftPlus {}
}

/// Type-level tag naming how a tangent perturbation is applied to the state.
pub trait ErrorConvention:
    sealed::Sealed + fmt::Debug + Clone + Copy + Default + Send + Sync + 'static
{
    /// Short name used in log output.
    const NAME: &'static str;

    /// `X ⊕ δ`
    fn retract(state: &SE3, delta: &Vector6<f64>) -> SE3;

    /// `X ⊖ X_ref`, the inverse of [`ErrorConvention::retract`] around `reference`.
    fn local(state: &SE3, reference: &SE3) -> Vector6<f64>;

    /// Express a covariance of this convention in the right-plus convention at `state`.
    fn to_right_plus(state: &SE3, covariance: &Matrix6<f64>) -> Matrix6<f64>;

    /// Express a right-plus covariance at `state` in this convention.
    fn from_right_plus(state: &SE3, covariance: &Matrix6<f64>) -> Matrix6<f64>;
}

/// Right-plus (local) error: `X_true = X · Exp(δ)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RightPlus;

/// Left-plus (invariant) error: `X_true = Exp(ξ) · X`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeftPlus;

impl ErrorConvention for RightPlus {
    const NAME: &'static str = "right-plus";

    fn retract(state: &SE3, delta: &Vector6<f64>) -> SE3 {
        state.right_plus(&SE3Tangent::from(*delta), None, None)
    }

    fn local(state: &SE3, reference: &SE3) -> Vector6<f64> {
        state.right_minus(reference, None, None).coeffs()
    }

    fn to_right_plus(_state: &SE3, covariance: &Matrix6<f64>) -> Matrix6<f64> {
        *covariance
    }

    fn from_right_plus(_state: &SE3, covariance: &Matrix6<f64>) -> Matrix6<f64> {
        *covariance
    }
}

impl ErrorConvention for LeftPlus {
    const NAME: &'static str = "left-plus";

    fn retract(state: &SE3, delta: &Vector6<f64>) -> SE3 {
        state.left_plus(&SE3Tangent::from(*delta), None, None)
    }

    fn local(state: &SE3, reference: &SE3) -> Vector6<f64> {
        state.left_minus(reference, None, None).coeffs()
    }

    /// δ = Ad(X⁻¹) ξ
    fn to_right_plus(state: &SE3, covariance: &Matrix6<f64>) -> Matrix6<f64> {
        let adj_inv = state.inverse(None).adjoint();
        adj_inv * covariance * adj_inv.transpose()
    }

    /// ξ = Ad(X) δ
    fn from_right_plus(state: &SE3, covariance: &Matrix6<f64>) -> Matrix6<f64> {
        let adj = state.adjoint();
        adj * covariance * adj.transpose()
    }
}

/// Process model advancing a pose by an integrated body twist `u ∈ R⁶`.
pub trait SystemModel: fmt::Debug + Send + Sync {
    /// `X' = f(X, u)`
    fn value(&self, state: &SE3, control: &SE3Tangent) -> SE3;

    /// Process-noise covariance `Q` on the control tangent.
    fn covariance(&self) -> Matrix6<f64>;
}

/// Linearisation of a [`SystemModel`] in error convention `C`.
pub trait SystemJacobian<C: ErrorConvention>: SystemModel {
    /// `F = ∂(X' ⊖ X'_lin)/∂(X ⊖ X_lin)`
    fn jacobian_state(&self, state: &SE3, control: &SE3Tangent) -> Matrix6<f64>;

    /// `W = ∂(X' ⊖ X'_lin)/∂u`
    fn jacobian_noise(&self, state: &SE3, control: &SE3Tangent) -> Matrix6<f64>;
}

/// Observation model `z = h(X) + v`, `v ~ N(0, R)`.
pub trait MeasurementModel: fmt::Debug + Send + Sync {
    /// Dimension of `z`.
    fn dimension(&self) -> usize;

    /// Predicted measurement `h(X)`.
    fn value(&self, state: &SE3) -> DVector<f64>;

    /// Measurement-noise covariance `R`.
    fn covariance(&self) -> DMatrix<f64>;
}

/// Linearisation of a [`MeasurementModel`] in error convention `C`.
pub trait MeasurementJacobian<C: ErrorConvention>: MeasurementModel {
    /// `H = ∂h(X ⊕ δ)/∂δ` at `δ = 0`, a `dimension() × 6` matrix.
    fn jacobian(&self, state: &SE3) -> DMatrix<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::Tangent;
    use approx::assert_relative_eq;

    fn sample_pose() -> SE3 {
        SE3::from_translation_euler(1.0, -0.5, 0.3, 0.2, -0.1, 0.7)
    }

    #[test]
    fn test_retract_local_are_inverse() {
        let x = sample_pose();
        let delta = Vector6::new(0.1, -0.2, 0.05, 0.03, 0.01, -0.02);

        let y = RightPlus::retract(&x, &delta);
        assert!((RightPlus::local(&y, &x) - delta).norm() < 1e-12);

        let y = LeftPlus::retract(&x, &delta);
        assert!((LeftPlus::local(&y, &x) - delta).norm() < 1e-12);
    }

    #[test]
    fn test_left_right_errors_related_by_adjoint() {
        let x = sample_pose();
        let delta = Vector6::new(0.2, 0.1, -0.3, 0.05, -0.04, 0.02);
        let right = RightPlus::retract(&x, &delta);
        let left = LeftPlus::retract(&x, &(x.adjoint() * delta));
        assert!(right.right_minus(&left, None, None).coeffs().norm() < 1e-12);
    }

    #[test]
    fn test_covariance_transport_roundtrip() {
        let x = sample_pose();
        let a = Matrix6::from_fn(|i, j| ((i + 2 * j) % 5) as f64 * 0.1);
        let p = a * a.transpose() + Matrix6::identity();
        let left = LeftPlus::from_right_plus(&x, &p);
        let back = LeftPlus::to_right_plus(&x, &left);
        assert_relative_eq!(back, p, epsilon = 1e-10);
        assert_eq!(RightPlus::to_right_plus(&x, &p), p);
    }

    #[test]
    fn test_convention_names() {
        assert_eq!(RightPlus::NAME, "right-plus");
        assert_eq!(LeftPlus::NAME, "left-plus");
        assert!(SE3Tangent::zero().is_zero(1e-15));
    }
}
