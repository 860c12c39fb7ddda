//! Lie group primitives for filtering on SE(3).
//!
//! A filter state is a pose `X ∈ SE(3)` and its uncertainty is a Gaussian on
//! the 6-dimensional tangent space at `X`. Everything the filters need from the
//! group is collected in two traits:
//!
//! - [`LieGroup`]: composition, inverse, `Log`, the four plus / minus
//!   retractions, the adjoint and the action on points
//! - [`Tangent`]: `Exp`, the right / left Jacobians and their inverses
//!
//! | group | storage              | DoF | tangent        | action      |
//! |-------|----------------------|-----|----------------|-------------|
//! | SO(3) | unit quaternion      | 3   | `θ ∈ R³`       | `R·p`       |
//! | SE(3) | quaternion + `t ∈ R³` | 6   | `(ρ, θ) ∈ R⁶`  | `R·p + t`   |
//!
//! Jacobians follow the manif conventions: they are taken with respect to
//! right (local) perturbations `X·Exp(δ)` and are returned through
//! `Option<&mut _>` arguments so callers only pay for what they ask for.
//!
//! # Example
//!
//! ```rust
//! use lie_kalman::manifold::se3::{SE3, SE3Tangent};
//! use lie_kalman::manifold::{LieGroup, Tangent};
//! use nalgebra::{Matrix6, Vector3};
//!
//! let pose = SE3::from_translation_euler(1.0, 0.0, 0.0, 0.0, 0.0, 0.3);
//! let step = SE3Tangent::new(Vector3::new(0.1, 0.0, 0.0), Vector3::new(0.0, 0.0, 0.1));
//!
//! let mut j_step = Matrix6::zeros();
//! let moved = pose.right_plus(&step, None, Some(&mut j_step));
//! assert!(moved.is_valid(1e-12));
//! assert!((moved.right_minus(&pose, None, None).coeffs() - step.coeffs()).norm() < 1e-12);
//! ```

use nalgebra::{Matrix3, Vector3};
use std::fmt::Debug;
use thiserror::Error;

pub mod se3;
pub mod so3;

/// Errors raised when building group elements from raw data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ManifoldError {
    #[error("Invalid tangent dimension: expected {expected}, got {actual}")]
    InvalidTangentDimension { expected: usize, actual: usize },

    #[error("Invalid manifold element: {0}")]
    InvalidElement(String),
}

pub type ManifoldResult<T> = Result<T, ManifoldError>;

/// `[v]ₓ`, so that `[v]ₓ·w = v × w`.
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// A matrix Lie group acting on R³.
///
/// `DIM` is the dimension of the space acted on, `DOF` the tangent dimension
/// and `REP_SIZE` the number of stored scalars.
pub trait LieGroup: Clone + Debug + PartialEq {
    type Element: Clone + Debug + PartialEq;
    type TangentVector: Tangent<Self>;
    /// `DOF × DOF`
    type JacobianMatrix: Clone + Debug + PartialEq;
    /// `3 × DOF`, the Jacobian of the action on a point
    type ActionJacobian: Clone + Debug + PartialEq;
    type LieAlgebra: Clone + Debug + PartialEq;

    const DIM: usize;
    const DOF: usize;
    const REP_SIZE: usize;

    fn identity() -> Self::Element;

    /// `X⁻¹`, with `J = -Ad(X)`.
    fn inverse(&self, j_self: Option<&mut Self::JacobianMatrix>) -> Self::Element;

    /// `X·Y`, with `J_X = Ad(Y⁻¹)` and `J_Y = I`.
    fn compose(
        &self,
        other: &Self::Element,
        j_self: Option<&mut Self::JacobianMatrix>,
        j_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self::Element;

    /// `Log(X)`, with `J = J_r⁻¹(Log X)`.
    fn log(&self, j_self: Option<&mut Self::JacobianMatrix>) -> Self::TangentVector;

    /// `X ⊕ δ = X·Exp(δ)`
    fn right_plus(
        &self,
        delta: &Self::TangentVector,
        j_self: Option<&mut Self::JacobianMatrix>,
        j_delta: Option<&mut Self::JacobianMatrix>,
    ) -> Self::Element;

    /// `X ⊖ Y = Log(Y⁻¹·X)`
    fn right_minus(
        &self,
        other: &Self::Element,
        j_self: Option<&mut Self::JacobianMatrix>,
        j_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self::TangentVector;

    /// `ξ ⊕ X = Exp(ξ)·X`
    fn left_plus(
        &self,
        xi: &Self::TangentVector,
        j_xi: Option<&mut Self::JacobianMatrix>,
        j_self: Option<&mut Self::JacobianMatrix>,
    ) -> Self::Element;

    /// `Log(X·Y⁻¹)`
    fn left_minus(
        &self,
        other: &Self::Element,
        j_self: Option<&mut Self::JacobianMatrix>,
        j_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self::TangentVector;

    /// `X⁻¹·Y`
    fn between(
        &self,
        other: &Self::Element,
        j_self: Option<&mut Self::JacobianMatrix>,
        j_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self::Element;

    /// `X ⊙ p`
    fn act(
        &self,
        point: &Vector3<f64>,
        j_self: Option<&mut Self::ActionJacobian>,
        j_point: Option<&mut Matrix3<f64>>,
    ) -> Vector3<f64>;

    /// `Ad(X)`, defined by `X·Exp(δ) = Exp(Ad(X)·δ)·X`.
    fn adjoint(&self) -> Self::JacobianMatrix;

    fn random() -> Self::Element;

    /// Re-project onto the group after accumulated rounding.
    fn normalize(&mut self);

    /// Finite storage, unit quaternion, `RᵀR = I` and `det R > 0`, all within `tolerance`.
    fn is_valid(&self, tolerance: f64) -> bool;
}

/// Tangent space (Lie algebra in vector form) of a group `G`.
pub trait Tangent<G: LieGroup>: Clone + Debug + PartialEq {
    const DIM: usize = G::DOF;

    /// `Exp(τ)`, with `J = J_r(τ)`.
    fn exp(&self, j_self: Option<&mut G::JacobianMatrix>) -> G::Element;

    /// `Exp(τ + δ) ≈ Exp(τ)·Exp(J_r δ)`
    fn right_jacobian(&self) -> G::JacobianMatrix;

    /// `Exp(τ + δ) ≈ Exp(J_l δ)·Exp(τ)`
    fn left_jacobian(&self) -> G::JacobianMatrix;

    fn right_jacobian_inv(&self) -> G::JacobianMatrix;

    fn left_jacobian_inv(&self) -> G::JacobianMatrix;

    /// `τ^∧`
    fn hat(&self) -> G::LieAlgebra;

    fn zero() -> G::TangentVector;

    fn random() -> G::TangentVector;

    fn is_zero(&self, tolerance: f64) -> bool;

    /// Scale to unit norm; a zero vector is left untouched.
    fn normalize(&mut self);

    fn normalized(&self) -> G::TangentVector;
}
