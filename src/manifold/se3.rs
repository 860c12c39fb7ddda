//! Rigid motions in 3D.
//!
//! [`SE3`] is the state of every filter in this crate: a rotation [`SO3`] and
//! a translation `t`, acting on points as `R·p + t`. Its covariance lives in
//! the tangent space, described by [`SE3Tangent`] with the translational part
//! first: `τ = (ρ, θ)`.

use crate::manifold::so3::{SMALL_ANGLE, SO3, SO3Tangent};
use crate::manifold::{LieGroup, ManifoldError, ManifoldResult, Tangent, skew};
use nalgebra::{Matrix3, Matrix3x6, Matrix4, Matrix6, Quaternion, UnitQuaternion, Vector3, Vector6};
use std::fmt;

/// The Q-block coefficients lose about five digits to cancellation, so their
/// series branch reaches further than the SO(3) one.
const Q_SERIES_ANGLE: f64 = 10.0 * SMALL_ANGLE;

#[derive(Clone, Debug, PartialEq)]
pub struct SE3 {
    rotation: SO3,
    t: Vector3<f64>,
}

impl fmt::Display for SE3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [w, x, y, z] = self.rotation.coeffs();
        write!(
            f,
            "SE3(t = [{:.4}, {:.4}, {:.4}], q = [{w:.4}, {x:.4}, {y:.4}, {z:.4}])",
            self.t.x, self.t.y, self.t.z
        )
    }
}

/// `τ = (ρ, θ)`; `Exp(τ)` moves by `J_l(θ)·ρ` and rotates by `Exp(θ)`.
#[derive(Clone, Debug, PartialEq)]
pub struct SE3Tangent {
    tau: Vector6<f64>,
}

impl fmt::Display for SE3Tangent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = &self.tau;
        write!(
            f,
            "se3(rho = [{:.4}, {:.4}, {:.4}], theta = [{:.4}, {:.4}, {:.4}])",
            v[0], v[1], v[2], v[3], v[4], v[5]
        )
    }
}

impl From<Vector6<f64>> for SE3Tangent {
    fn from(tau: Vector6<f64>) -> Self {
        SE3Tangent { tau }
    }
}

impl SE3 {
    pub fn new(translation: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        SE3::from_parts(translation, SO3::new(rotation))
    }

    pub fn from_parts(translation: Vector3<f64>, rotation: SO3) -> Self {
        SE3 {
            rotation,
            t: translation,
        }
    }

    /// The quaternion is normalised. Non-finite input yields an element that
    /// fails [`LieGroup::is_valid`].
    pub fn from_translation_quaternion(
        x: f64,
        y: f64,
        z: f64,
        qw: f64,
        qx: f64,
        qy: f64,
        qz: f64,
    ) -> Self {
        SE3::new(
            Vector3::new(x, y, z),
            UnitQuaternion::from_quaternion(Quaternion::new(qw, qx, qy, qz)),
        )
    }

    pub fn from_translation_euler(x: f64, y: f64, z: f64, roll: f64, pitch: f64, yaw: f64) -> Self {
        SE3::from_parts(
            Vector3::new(x, y, z),
            SO3::from_euler_angles(roll, pitch, yaw),
        )
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.t
    }

    pub fn rotation(&self) -> &SO3 {
        &self.rotation
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.rotation_matrix()
    }

    pub fn rotation_quaternion(&self) -> UnitQuaternion<f64> {
        self.rotation.quaternion()
    }

    /// Homogeneous 4×4 form `[R t; 0 1]`.
    pub fn matrix(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&self.rotation_matrix());
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.t);
        m
    }
}

/// `[A B; 0 A]`, the shape shared by the adjoint and the SE(3) Jacobians.
fn upper_block_triangular(diagonal: &Matrix3<f64>, corner: &Matrix3<f64>) -> Matrix6<f64> {
    let mut m = Matrix6::zeros();
    m.fixed_view_mut::<3, 3>(0, 0).copy_from(diagonal);
    m.fixed_view_mut::<3, 3>(3, 3).copy_from(diagonal);
    m.fixed_view_mut::<3, 3>(0, 3).copy_from(corner);
    m
}

impl LieGroup for SE3 {
    type Element = SE3;
    type TangentVector = SE3Tangent;
    type JacobianMatrix = Matrix6<f64>;
    type ActionJacobian = Matrix3x6<f64>;
    type LieAlgebra = Matrix4<f64>;

    const DIM: usize = 3;
    const DOF: usize = 6;
    const REP_SIZE: usize = 7;

    fn identity() -> SE3 {
        SE3::from_parts(Vector3::zeros(), SO3::identity())
    }

    /// `[Rᵀ  -Rᵀt]`
    fn inverse(&self, j_self: Option<&mut Matrix6<f64>>) -> SE3 {
        if let Some(j) = j_self {
            *j = -self.adjoint();
        }
        let rotation = self.rotation.inverse(None);
        let t = -rotation.act(&self.t, None, None);
        SE3::from_parts(t, rotation)
    }

    /// `[R_a·R_b  t_a + R_a·t_b]`
    fn compose(
        &self,
        other: &SE3,
        j_self: Option<&mut Matrix6<f64>>,
        j_other: Option<&mut Matrix6<f64>>,
    ) -> SE3 {
        if let Some(j) = j_self {
            *j = other.inverse(None).adjoint();
        }
        if let Some(j) = j_other {
            *j = Matrix6::identity();
        }
        SE3 {
            rotation: self.rotation.compose(&other.rotation, None, None),
            t: self.t + self.rotation.act(&other.t, None, None),
        }
    }

    /// `τ = (J_l⁻¹(θ)·t, Log R)`
    fn log(&self, j_self: Option<&mut Matrix6<f64>>) -> SE3Tangent {
        let theta = self.rotation.log(None);
        let rho = theta.left_jacobian_inv() * self.t;
        let tau = SE3Tangent::new(rho, theta.axis_angle());
        if let Some(j) = j_self {
            *j = tau.right_jacobian_inv();
        }
        tau
    }

    fn right_plus(
        &self,
        delta: &SE3Tangent,
        j_self: Option<&mut Matrix6<f64>>,
        j_delta: Option<&mut Matrix6<f64>>,
    ) -> SE3 {
        let step = delta.exp(None);
        if let Some(j) = j_self {
            *j = step.inverse(None).adjoint();
        }
        if let Some(j) = j_delta {
            *j = delta.right_jacobian();
        }
        self.compose(&step, None, None)
    }

    fn right_minus(
        &self,
        other: &SE3,
        j_self: Option<&mut Matrix6<f64>>,
        j_other: Option<&mut Matrix6<f64>>,
    ) -> SE3Tangent {
        let tau = other.between(self, None, None).log(None);
        if let Some(j) = j_self {
            *j = tau.right_jacobian_inv();
        }
        if let Some(j) = j_other {
            *j = -tau.left_jacobian_inv();
        }
        tau
    }

    fn left_plus(
        &self,
        xi: &SE3Tangent,
        j_xi: Option<&mut Matrix6<f64>>,
        j_self: Option<&mut Matrix6<f64>>,
    ) -> SE3 {
        if let Some(j) = j_xi {
            *j = self.inverse(None).adjoint() * xi.right_jacobian();
        }
        if let Some(j) = j_self {
            *j = Matrix6::identity();
        }
        xi.exp(None).compose(self, None, None)
    }

    fn left_minus(
        &self,
        other: &SE3,
        j_self: Option<&mut Matrix6<f64>>,
        j_other: Option<&mut Matrix6<f64>>,
    ) -> SE3Tangent {
        let xi = self.compose(&other.inverse(None), None, None).log(None);
        if j_self.is_some() || j_other.is_some() {
            let j = xi.right_jacobian_inv() * other.adjoint();
            if let Some(out) = j_other {
                *out = -j;
            }
            if let Some(out) = j_self {
                *out = j;
            }
        }
        xi
    }

    fn between(
        &self,
        other: &SE3,
        j_self: Option<&mut Matrix6<f64>>,
        j_other: Option<&mut Matrix6<f64>>,
    ) -> SE3 {
        let relative = self.inverse(None).compose(other, None, None);
        if let Some(j) = j_self {
            *j = -relative.inverse(None).adjoint();
        }
        if let Some(j) = j_other {
            *j = Matrix6::identity();
        }
        relative
    }

    /// `R·p + t`, with `J_X = [R  -R·[p]ₓ]` and `J_p = R`.
    fn act(
        &self,
        point: &Vector3<f64>,
        j_self: Option<&mut Matrix3x6<f64>>,
        j_point: Option<&mut Matrix3<f64>>,
    ) -> Vector3<f64> {
        let r = self.rotation_matrix();
        if let Some(j) = j_self {
            j.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
            j.fixed_view_mut::<3, 3>(0, 3)
                .copy_from(&(-r * skew(point)));
        }
        if let Some(j) = j_point {
            *j = r;
        }
        r * point + self.t
    }

    /// `[R  [t]ₓ·R; 0  R]`
    fn adjoint(&self) -> Matrix6<f64> {
        let r = self.rotation_matrix();
        upper_block_triangular(&r, &(skew(&self.t) * r))
    }

    fn random() -> SE3 {
        use rand::Rng;
        let mut rng = rand::rng();
        let t = Vector3::from_fn(|_, _| rng.random_range(-1.0..1.0));
        SE3::from_parts(t, SO3::random())
    }

    fn normalize(&mut self) {
        self.rotation.normalize();
    }

    fn is_valid(&self, tolerance: f64) -> bool {
        self.t.iter().all(|v| v.is_finite()) && self.rotation.is_valid(tolerance)
    }
}

impl SE3Tangent {
    pub fn new(rho: Vector3<f64>, theta: Vector3<f64>) -> Self {
        SE3Tangent {
            tau: Vector6::new(rho.x, rho.y, rho.z, theta.x, theta.y, theta.z),
        }
    }

    pub fn from_components(
        rho_x: f64,
        rho_y: f64,
        rho_z: f64,
        theta_x: f64,
        theta_y: f64,
        theta_z: f64,
    ) -> Self {
        SE3Tangent::from(Vector6::new(rho_x, rho_y, rho_z, theta_x, theta_y, theta_z))
    }

    /// Build from exactly six values `(ρ, θ)`.
    pub fn from_slice(values: &[f64]) -> ManifoldResult<Self> {
        if values.len() != 6 {
            return Err(ManifoldError::InvalidTangentDimension {
                expected: 6,
                actual: values.len(),
            });
        }
        Ok(SE3Tangent::from(Vector6::from_column_slice(values)))
    }

    pub fn rho(&self) -> Vector3<f64> {
        self.tau.fixed_rows::<3>(0).into_owned()
    }

    pub fn theta(&self) -> Vector3<f64> {
        self.tau.fixed_rows::<3>(3).into_owned()
    }

    pub fn coeffs(&self) -> Vector6<f64> {
        self.tau
    }

    fn rotation_part(&self) -> SO3Tangent {
        SO3Tangent::new(self.theta())
    }

    /// Upper-right block of the SE(3) left Jacobian (Barfoot's `Q(ρ, θ)`):
    ///
    /// ```text
    /// Q = ½P + a·(TP + PT + TPT) + b·(T²P + PT² − 3TPT) + c·(TPT² + T²PT)
    /// ```
    ///
    /// with `P = [ρ]ₓ`, `T = [θ]ₓ`, `a = (φ − sin φ)/φ³`,
    /// `b = (φ² + 2cos φ − 2)/(2φ⁴)` and `c = (2φ − 3sin φ + φcos φ)/(2φ⁵)`.
    pub fn q_matrix(rho: &Vector3<f64>, theta: &Vector3<f64>) -> Matrix3<f64> {
        let phi_sq = theta.norm_squared();
        let phi = phi_sq.sqrt();

        let (a, b, c) = if phi < Q_SERIES_ANGLE {
            let phi_4 = phi_sq * phi_sq;
            (
                1.0 / 6.0 - phi_sq / 120.0 + phi_4 / 5040.0,
                1.0 / 24.0 - phi_sq / 720.0 + phi_4 / 40320.0,
                1.0 / 120.0 - phi_sq / 2520.0,
            )
        } else {
            let (sin, cos) = phi.sin_cos();
            let phi_3 = phi_sq * phi;
            (
                (phi - sin) / phi_3,
                (phi_sq + 2.0 * cos - 2.0) / (2.0 * phi_sq * phi_sq),
                (2.0 * phi - 3.0 * sin + phi * cos) / (2.0 * phi_3 * phi_sq),
            )
        };

        let p = skew(rho);
        let t = skew(theta);
        let tp = t * p;
        let tpt = tp * t;
        let tt = t * t;

        0.5 * p
            + a * (tp + p * t + tpt)
            + b * (tt * p + p * tt - 3.0 * tpt)
            + c * (tpt * t + t * tpt)
    }
}

impl Tangent<SE3> for SE3Tangent {
    /// `Exp(τ) = [Exp(θ)  J_l(θ)·ρ]`
    fn exp(&self, j_self: Option<&mut Matrix6<f64>>) -> SE3 {
        let theta = self.rotation_part();
        if let Some(j) = j_self {
            *j = self.right_jacobian();
        }
        SE3::from_parts(theta.left_jacobian() * self.rho(), theta.exp(None))
    }

    /// `J_r(τ) = J_l(−τ)`
    fn right_jacobian(&self) -> Matrix6<f64> {
        SE3Tangent::from(-self.tau).left_jacobian()
    }

    /// `[J_l(θ)  Q; 0  J_l(θ)]`
    fn left_jacobian(&self) -> Matrix6<f64> {
        let jl = self.rotation_part().left_jacobian();
        upper_block_triangular(&jl, &Self::q_matrix(&self.rho(), &self.theta()))
    }

    fn right_jacobian_inv(&self) -> Matrix6<f64> {
        SE3Tangent::from(-self.tau).left_jacobian_inv()
    }

    /// `[J_l⁻¹  −J_l⁻¹·Q·J_l⁻¹; 0  J_l⁻¹]`
    fn left_jacobian_inv(&self) -> Matrix6<f64> {
        let jl_inv = self.rotation_part().left_jacobian_inv();
        let q = Self::q_matrix(&self.rho(), &self.theta());
        upper_block_triangular(&jl_inv, &(-jl_inv * q * jl_inv))
    }

    /// `[[θ]ₓ ρ; 0 0]`
    fn hat(&self) -> Matrix4<f64> {
        let mut m = Matrix4::zeros();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&skew(&self.theta()));
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.rho());
        m
    }

    fn zero() -> SE3Tangent {
        SE3Tangent::from(Vector6::zeros())
    }

    fn random() -> SE3Tangent {
        use rand::Rng;
        let mut rng = rand::rng();
        let rho = Vector3::from_fn(|_, _| rng.random_range(-1.0..1.0));
        let theta = Vector3::from_fn(|_, _| rng.random_range(-0.2..0.2));
        SE3Tangent::new(rho, theta)
    }

    fn is_zero(&self, tolerance: f64) -> bool {
        self.tau.norm() < tolerance
    }

    fn normalize(&mut self) {
        *self = self.normalized();
    }

    fn normalized(&self) -> SE3Tangent {
        let norm = self.tau.norm();
        if norm > f64::EPSILON {
            SE3Tangent::from(self.tau / norm)
        } else {
            self.clone()
        }
    }
}
