//! Rotations in 3D.
//!
//! [`SO3`] stores a unit quaternion and [`SO3Tangent`] a rotation vector
//! `θ = φ·u` (angle times unit axis). The rotational blocks of all SE(3)
//! Jacobians are built from the functions here, and the filters evaluate them
//! at increments of order 1e-4 rad, so every closed form has a series branch
//! near zero.

use crate::manifold::{LieGroup, ManifoldError, ManifoldResult, Tangent, skew};
use nalgebra::{Matrix3, Quaternion, Rotation3, Unit, UnitQuaternion, Vector3};
use std::fmt;

/// Below this angle the Jacobian coefficients switch to their Taylor series.
pub(crate) const SMALL_ANGLE: f64 = 1e-3;

#[derive(Clone, Debug, PartialEq)]
pub struct SO3 {
    q: UnitQuaternion<f64>,
}

impl fmt::Display for SO3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [w, x, y, z] = self.coeffs();
        write!(f, "SO3(q = [{w:.4}, {x:.4}, {y:.4}, {z:.4}])")
    }
}

/// Rotation vector; its norm is the angle in radians.
#[derive(Clone, Debug, PartialEq)]
pub struct SO3Tangent {
    theta: Vector3<f64>,
}

impl fmt::Display for SO3Tangent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.theta;
        write!(f, "so3([{:.4}, {:.4}, {:.4}])", t.x, t.y, t.z)
    }
}

impl From<Vector3<f64>> for SO3Tangent {
    fn from(theta: Vector3<f64>) -> Self {
        SO3Tangent { theta }
    }
}

impl SO3 {
    pub fn new(q: UnitQuaternion<f64>) -> Self {
        SO3 { q }
    }

    /// Normalises `(w, x, y, z)`; fails on a zero or non-finite quaternion.
    pub fn try_from_quaternion(w: f64, x: f64, y: f64, z: f64) -> ManifoldResult<Self> {
        let raw = Quaternion::new(w, x, y, z);
        let norm = raw.norm();
        if !norm.is_finite() || norm < f64::EPSILON {
            return Err(ManifoldError::InvalidElement(format!(
                "quaternion norm {norm} cannot be normalised"
            )));
        }
        Ok(SO3::new(UnitQuaternion::new_normalize(raw)))
    }

    pub fn from_euler_angles(roll: f64, pitch: f64, yaw: f64) -> Self {
        SO3::new(UnitQuaternion::from_euler_angles(roll, pitch, yaw))
    }

    pub fn from_axis_angle(axis: &Vector3<f64>, angle: f64) -> Self {
        SO3::new(UnitQuaternion::from_axis_angle(
            &Unit::new_normalize(*axis),
            angle,
        ))
    }

    /// The input is projected onto the closest rotation.
    pub fn from_rotation_matrix(rotation: &Matrix3<f64>) -> Self {
        SO3::new(UnitQuaternion::from_rotation_matrix(
            &Rotation3::from_matrix(rotation),
        ))
    }

    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        self.q
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.q.to_rotation_matrix().into_inner()
    }

    /// `[w, x, y, z]`
    pub fn coeffs(&self) -> [f64; 4] {
        let q = self.q.quaternion();
        [q.w, q.i, q.j, q.k]
    }
}

impl LieGroup for SO3 {
    type Element = SO3;
    type TangentVector = SO3Tangent;
    type JacobianMatrix = Matrix3<f64>;
    type ActionJacobian = Matrix3<f64>;
    type LieAlgebra = Matrix3<f64>;

    const DIM: usize = 3;
    const DOF: usize = 3;
    const REP_SIZE: usize = 4;

    fn identity() -> SO3 {
        SO3::new(UnitQuaternion::identity())
    }

    fn inverse(&self, j_self: Option<&mut Matrix3<f64>>) -> SO3 {
        if let Some(j) = j_self {
            *j = -self.rotation_matrix();
        }
        SO3::new(self.q.inverse())
    }

    /// The product is renormalised so that `RᵀR = I` survives long chains.
    fn compose(
        &self,
        other: &SO3,
        j_self: Option<&mut Matrix3<f64>>,
        j_other: Option<&mut Matrix3<f64>>,
    ) -> SO3 {
        if let Some(j) = j_self {
            *j = other.rotation_matrix().transpose();
        }
        if let Some(j) = j_other {
            *j = Matrix3::identity();
        }
        let mut q = self.q * other.q;
        q.renormalize();
        SO3 { q }
    }

    /// `θ = 2·atan2(‖v‖, w)·v/‖v‖`, taken on the hemisphere `w ≥ 0` so that `‖θ‖ ≤ π`.
    fn log(&self, j_self: Option<&mut Matrix3<f64>>) -> SO3Tangent {
        let q = self.q.quaternion();
        let (w, v) = if q.w < 0.0 {
            (-q.w, -q.imag())
        } else {
            (q.w, q.imag())
        };
        let sin_half_sq = v.norm_squared();

        let scale = if sin_half_sq > f64::EPSILON {
            let sin_half = sin_half_sq.sqrt();
            2.0 * sin_half.atan2(w) / sin_half
        } else {
            // atan2(s, w)/s ≈ (1 - s²/(3w²))/w
            2.0 / w * (1.0 - sin_half_sq / (3.0 * w * w))
        };

        let theta = SO3Tangent::from(v * scale);
        if let Some(j) = j_self {
            *j = theta.right_jacobian_inv();
        }
        theta
    }

    fn right_plus(
        &self,
        delta: &SO3Tangent,
        j_self: Option<&mut Matrix3<f64>>,
        j_delta: Option<&mut Matrix3<f64>>,
    ) -> SO3 {
        let step = delta.exp(None);
        if let Some(j) = j_self {
            *j = step.rotation_matrix().transpose();
        }
        if let Some(j) = j_delta {
            *j = delta.right_jacobian();
        }
        self.compose(&step, None, None)
    }

    fn right_minus(
        &self,
        other: &SO3,
        j_self: Option<&mut Matrix3<f64>>,
        j_other: Option<&mut Matrix3<f64>>,
    ) -> SO3Tangent {
        let theta = other.between(self, None, None).log(None);
        if let Some(j) = j_self {
            *j = theta.right_jacobian_inv();
        }
        if let Some(j) = j_other {
            *j = -theta.left_jacobian_inv();
        }
        theta
    }

    fn left_plus(
        &self,
        xi: &SO3Tangent,
        j_xi: Option<&mut Matrix3<f64>>,
        j_self: Option<&mut Matrix3<f64>>,
    ) -> SO3 {
        if let Some(j) = j_xi {
            *j = self.rotation_matrix().transpose() * xi.right_jacobian();
        }
        if let Some(j) = j_self {
            *j = Matrix3::identity();
        }
        xi.exp(None).compose(self, None, None)
    }

    fn left_minus(
        &self,
        other: &SO3,
        j_self: Option<&mut Matrix3<f64>>,
        j_other: Option<&mut Matrix3<f64>>,
    ) -> SO3Tangent {
        let theta = self.compose(&other.inverse(None), None, None).log(None);
        if j_self.is_some() || j_other.is_some() {
            let j = theta.right_jacobian_inv() * other.rotation_matrix();
            if let Some(out) = j_other {
                *out = -j;
            }
            if let Some(out) = j_self {
                *out = j;
            }
        }
        theta
    }

    fn between(
        &self,
        other: &SO3,
        j_self: Option<&mut Matrix3<f64>>,
        j_other: Option<&mut Matrix3<f64>>,
    ) -> SO3 {
        let relative = self.inverse(None).compose(other, None, None);
        if let Some(j) = j_self {
            *j = -relative.rotation_matrix().transpose();
        }
        if let Some(j) = j_other {
            *j = Matrix3::identity();
        }
        relative
    }

    /// `R·p`, with `J_R = -R·[p]ₓ` and `J_p = R`.
    fn act(
        &self,
        point: &Vector3<f64>,
        j_self: Option<&mut Matrix3<f64>>,
        j_point: Option<&mut Matrix3<f64>>,
    ) -> Vector3<f64> {
        let r = self.rotation_matrix();
        if let Some(j) = j_self {
            *j = -r * skew(point);
        }
        if let Some(j) = j_point {
            *j = r;
        }
        r * point
    }

    fn adjoint(&self) -> Matrix3<f64> {
        self.rotation_matrix()
    }

    fn random() -> SO3 {
        SO3Tangent::from(Vector3::from_fn(|_, _| 2.0 * rand::random::<f64>() - 1.0)).exp(None)
    }

    fn normalize(&mut self) {
        self.q.renormalize();
    }

    fn is_valid(&self, tolerance: f64) -> bool {
        let q = self.q.quaternion();
        if q.coords.iter().any(|c| !c.is_finite()) || (q.norm() - 1.0).abs() > tolerance {
            return false;
        }
        let r = self.rotation_matrix();
        (r.transpose() * r - Matrix3::identity()).abs().max() <= tolerance
            && r.determinant() > 0.0
    }
}

impl SO3Tangent {
    pub fn new(theta: Vector3<f64>) -> Self {
        SO3Tangent { theta }
    }

    pub fn from_components(x: f64, y: f64, z: f64) -> Self {
        SO3Tangent::new(Vector3::new(x, y, z))
    }

    pub fn axis_angle(&self) -> Vector3<f64> {
        self.theta
    }

    pub fn angle(&self) -> f64 {
        self.theta.norm()
    }

    /// `(α, β)` such that `J_l(θ) = I + α[θ]ₓ + β[θ]ₓ²`.
    fn left_jacobian_coefficients(&self) -> (f64, f64) {
        let angle_sq = self.theta.norm_squared();
        let angle = angle_sq.sqrt();
        if angle < SMALL_ANGLE {
            (0.5 - angle_sq / 24.0, 1.0 / 6.0 - angle_sq / 120.0)
        } else {
            let sin_half = (0.5 * angle).sin();
            (
                2.0 * sin_half * sin_half / angle_sq,
                (angle - angle.sin()) / (angle_sq * angle),
            )
        }
    }

    /// `γ` such that `J_l⁻¹(θ) = I - ½[θ]ₓ + γ[θ]ₓ²`.
    fn left_jacobian_inv_coefficient(&self) -> f64 {
        let angle_sq = self.theta.norm_squared();
        let angle = angle_sq.sqrt();
        if angle < SMALL_ANGLE {
            1.0 / 12.0 + angle_sq / 720.0
        } else {
            1.0 / angle_sq - (1.0 + angle.cos()) / (2.0 * angle * angle.sin())
        }
    }
}

impl Tangent<SO3> for SO3Tangent {
    fn exp(&self, j_self: Option<&mut Matrix3<f64>>) -> SO3 {
        let q = if self.theta.norm_squared() > f64::EPSILON {
            UnitQuaternion::from_scaled_axis(self.theta)
        } else {
            let half = 0.5 * self.theta;
            UnitQuaternion::new_normalize(Quaternion::new(1.0, half.x, half.y, half.z))
        };
        if let Some(j) = j_self {
            *j = self.right_jacobian();
        }
        SO3 { q }
    }

    /// `J_r(θ) = J_l(θ)ᵀ`
    fn right_jacobian(&self) -> Matrix3<f64> {
        self.left_jacobian().transpose()
    }

    fn left_jacobian(&self) -> Matrix3<f64> {
        let (alpha, beta) = self.left_jacobian_coefficients();
        let k = self.hat();
        Matrix3::identity() + alpha * k + beta * k * k
    }

    fn right_jacobian_inv(&self) -> Matrix3<f64> {
        self.left_jacobian_inv().transpose()
    }

    fn left_jacobian_inv(&self) -> Matrix3<f64> {
        let gamma = self.left_jacobian_inv_coefficient();
        let k = self.hat();
        Matrix3::identity() - 0.5 * k + gamma * k * k
    }

    fn hat(&self) -> Matrix3<f64> {
        skew(&self.theta)
    }

    fn zero() -> SO3Tangent {
        SO3Tangent::new(Vector3::zeros())
    }

    fn random() -> SO3Tangent {
        SO3Tangent::new(Vector3::from_fn(|_, _| 0.2 * rand::random::<f64>() - 0.1))
    }

    fn is_zero(&self, tolerance: f64) -> bool {
        self.theta.norm() < tolerance
    }

    fn normalize(&mut self) {
        *self = self.normalized();
    }

    fn normalized(&self) -> SO3Tangent {
        let norm = self.theta.norm();
        if norm > f64::EPSILON {
            SO3Tangent::new(self.theta / norm)
        } else {
            self.clone()
        }
    }
}
