//! Kalman filters whose state lives on SE(3).
//!
//! Four variants share the [`KalmanFilter`] contract:
//! - [`EKF`]: extended Kalman filter, right-plus error, dense covariance
//! - [`SEKF`]: square-root EKF, right-plus error, upper-triangular factor `S` with `P = SᵀS`
//! - [`IEKF`]: invariant EKF, left-plus (invariant) error, dense covariance
//! - [`UKFM`]: unscented Kalman filter on manifolds, right-plus error, Jacobian-free
//!
//! Every operation is transactional: new values are computed into locals and
//! only committed when the whole step succeeded. A failing step returns an error
//! and leaves state and covariance exactly as they were.
//!
//! `covariance()` always reports the right-plus covariance at the current mean,
//! whatever the filter stores internally, so filters can be compared directly.
//!
//! # Example
//!
//! ```rust
//! use lie_kalman::filters::{EKF, KalmanFilter};
//! use lie_kalman::manifold::se3::SE3Tangent;
//! use lie_kalman::models::{LandmarkMeasurement, LieSystemModel, MeasurementModel};
//! use nalgebra::{Vector3, Vector6};
//!
//! let mut ekf = EKF::default();
//! let motion = LieSystemModel::from_sigmas(Vector6::repeat(1e-3), 0.01).unwrap();
//! let landmark = LandmarkMeasurement::from_sigmas(Vector3::new(2.0, 0.0, 0.0), Vector3::repeat(0.01));
//!
//! let u = SE3Tangent::from_components(0.001, 0.0, 0.0, 0.0, 0.0, 0.0);
//! ekf.propagate(&motion, &u, None).unwrap();
//! let z = landmark.value(&ekf.state());
//! let innovation = ekf.update(&landmark, &z).unwrap();
//! assert!(innovation.residual.norm() < 1e-12);
//! ```

use nalgebra::{DMatrix, DVector, Matrix6, Vector6};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::{FilterError, FilterResult};
use crate::linalg::{
    check_covariance, cholesky, symmetrize, symmetrize_dynamic, to_dynamic, to_matrix6,
};
use crate::manifold::LieGroup;
use crate::manifold::se3::{SE3, SE3Tangent};
use crate::models::{ErrorConvention, MeasurementJacobian, MeasurementModel, SystemJacobian};

pub mod ekf;
pub mod iekf;
pub mod sekf;
pub mod ukfm;

pub use ekf::EKF;
pub use iekf::IEKF;
pub use sekf::SEKF;
pub use ukfm::{SigmaWeights, UKFM, UkfmConfig};

/// Filter variant, used for logging and by the scenario driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterType {
    Ekf,
    Sekf,
    Iekf,
    Ukfm,
}

impl FilterType {
    /// All variants in a fixed order.
    pub const ALL: [FilterType; 4] = [
        FilterType::Ekf,
        FilterType::Sekf,
        FilterType::Iekf,
        FilterType::Ukfm,
    ];
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterType::Ekf => write!(f, "EKF"),
            FilterType::Sekf => write!(f, "SEKF"),
            FilterType::Iekf => write!(f, "IEKF"),
            FilterType::Ukfm => write!(f, "UKFM"),
        }
    }
}

impl FromStr for FilterType {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ekf" => Ok(FilterType::Ekf),
            "sekf" => Ok(FilterType::Sekf),
            "iekf" => Ok(FilterType::Iekf),
            "ukfm" => Ok(FilterType::Ukfm),
            other => Err(FilterError::InvalidArgument(format!(
                "unknown filter type '{other}'"
            ))),
        }
    }
}

/// Validation tolerances shared by all filters.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    /// Largest absolute asymmetry accepted by `set_covariance`
    pub symmetry_tolerance: f64,
    /// Relative tolerance on negative eigenvalues accepted by `set_covariance`
    pub psd_tolerance: f64,
    /// Tolerance of the group-membership check in `set_state`
    pub group_tolerance: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            symmetry_tolerance: 1e-8,
            psd_tolerance: 1e-9,
            group_tolerance: 1e-9,
        }
    }
}

impl FilterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_symmetry_tolerance(mut self, tolerance: f64) -> Self {
        self.symmetry_tolerance = tolerance;
        self
    }

    pub fn with_psd_tolerance(mut self, tolerance: f64) -> Self {
        self.psd_tolerance = tolerance;
        self
    }

    pub fn with_group_tolerance(mut self, tolerance: f64) -> Self {
        self.group_tolerance = tolerance;
        self
    }
}

/// Innovation of a successful update.
#[derive(Debug, Clone, PartialEq)]
pub struct Innovation {
    /// `ν = z - ẑ`
    pub residual: DVector<f64>,
    /// Innovation covariance `S` (or `P_zz` for the UKFM)
    pub covariance: DMatrix<f64>,
}

impl Innovation {
    /// Normalised innovation squared `νᵀ S⁻¹ ν`, `None` if `S` is not positive definite.
    pub fn nis(&self) -> Option<f64> {
        let chol = cholesky(&self.covariance).ok()?;
        Some(self.residual.dot(&chol.solve(&self.residual)))
    }
}

/// Common interface of the SE(3) filters.
///
/// `Convention` fixes which linearisations the filter accepts: a model must
/// implement [`SystemJacobian`] / [`MeasurementJacobian`] for it.
pub trait KalmanFilter {
    /// Error convention of the internal covariance.
    type Convention: ErrorConvention;

    fn filter_type(&self) -> FilterType;

    /// Current mean.
    fn state(&self) -> SE3;

    /// Right-plus covariance at the current mean, symmetric.
    fn covariance(&self) -> Matrix6<f64>;

    /// Replace the mean.
    ///
    /// # Errors
    /// `InvalidArgument` if `state` is not a valid SE(3) element.
    fn set_state(&mut self, state: SE3) -> FilterResult<()>;

    /// Replace the covariance (right-plus, at the current mean).
    ///
    /// # Errors
    /// `InvalidArgument` if `covariance` is not symmetric PSD within tolerance.
    fn set_covariance(&mut self, covariance: Matrix6<f64>) -> FilterResult<()>;

    /// Advance the mean by `control` and inflate the covariance by the process noise.
    ///
    /// # Arguments
    /// * `model` - system model linearised in this filter's convention
    /// * `control` - integrated twist `u = ξ·dt`
    /// * `dt` - step length; required by the IEKF, validated when given
    fn propagate<S>(&mut self, model: &S, control: &SE3Tangent, dt: Option<f64>) -> FilterResult<()>
    where
        S: SystemJacobian<Self::Convention>;

    /// Correct the mean with observation `measurement`.
    ///
    /// # Errors
    /// `NumericalFailure` if the innovation covariance is not positive definite,
    /// `DimensionMismatch` if the model's shapes disagree with its dimension.
    fn update<M>(&mut self, model: &M, measurement: &DVector<f64>) -> FilterResult<Innovation>
    where
        M: MeasurementJacobian<Self::Convention>;
}

/// Check group membership and return a re-normalised copy.
pub(crate) fn validated_state(mut state: SE3, config: &FilterConfig) -> FilterResult<SE3> {
    if !state.is_valid(config.group_tolerance) {
        return Err(FilterError::InvalidArgument(format!(
            "state is not a valid SE(3) element: {state}"
        )));
    }
    state.normalize();
    Ok(state)
}

/// Check symmetry and PSD and return the symmetrised copy.
pub(crate) fn validated_covariance(
    covariance: &Matrix6<f64>,
    config: &FilterConfig,
) -> FilterResult<Matrix6<f64>> {
    check_covariance(
        &to_dynamic(covariance),
        config.symmetry_tolerance,
        config.psd_tolerance,
    )
    .map_err(|err| FilterError::InvalidArgument(format!("covariance: {err}")))?;
    Ok(symmetrize(covariance))
}

/// Validate an optional step length.
pub(crate) fn validated_time_step(dt: Option<f64>) -> FilterResult<Option<f64>> {
    match dt {
        Some(value) if !(value.is_finite() && value > 0.0) => Err(FilterError::InvalidArgument(
            format!("time step must be positive and finite, got {value}"),
        )),
        other => Ok(other),
    }
}

pub(crate) fn ensure_finite_covariance(covariance: &Matrix6<f64>, what: &str) -> FilterResult<()> {
    if covariance.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(FilterError::NumericalFailure(format!(
            "{what} produced a non-finite covariance"
        )))
    }
}

/// Shapes of `z`, `h(X)` and `R` against the declared measurement dimension.
pub(crate) fn check_measurement<M: MeasurementModel + ?Sized>(
    model: &M,
    measurement: &DVector<f64>,
    predicted: &DVector<f64>,
    noise: &DMatrix<f64>,
) -> FilterResult<()> {
    let dimension = model.dimension();
    if measurement.len() != dimension {
        return Err(FilterError::length_mismatch(
            "measurement",
            dimension,
            measurement.len(),
        ));
    }
    if predicted.len() != dimension {
        return Err(FilterError::length_mismatch(
            "predicted measurement",
            dimension,
            predicted.len(),
        ));
    }
    if noise.shape() != (dimension, dimension) {
        return Err(FilterError::shape_mismatch(
            "measurement covariance",
            (dimension, dimension),
            noise.shape(),
        ));
    }
    if !measurement.iter().all(|v| v.is_finite()) {
        return Err(FilterError::InvalidArgument(
            "measurement has non-finite entries".to_string(),
        ));
    }
    Ok(())
}

/// P⁺ = (I - KH) P (I - KH)ᵀ + K R Kᵀ
pub(crate) fn joseph_update(
    covariance: &DMatrix<f64>,
    gain: &DMatrix<f64>,
    jacobian: &DMatrix<f64>,
    noise: &DMatrix<f64>,
) -> DMatrix<f64> {
    let n = covariance.nrows();
    let i_kh = DMatrix::<f64>::identity(n, n) - gain * jacobian;
    let updated = &i_kh * covariance * i_kh.transpose() + gain * noise * gain.transpose();
    symmetrize_dynamic(&updated)
}

/// Propagation shared by the EKF and the IEKF:
/// `X' = f(X, u)`, `P' = F P Fᵀ + W Q Wᵀ`.
pub(crate) fn linearized_propagate<C, S>(
    state: &SE3,
    covariance: &Matrix6<f64>,
    model: &S,
    control: &SE3Tangent,
) -> FilterResult<(SE3, Matrix6<f64>)>
where
    C: ErrorConvention,
    S: SystemJacobian<C> + ?Sized,
{
    let f = <S as SystemJacobian<C>>::jacobian_state(model, state, control);
    let w = <S as SystemJacobian<C>>::jacobian_noise(model, state, control);
    let q = model.covariance();

    let next_state = model.value(state, control);
    let next_covariance = symmetrize(&(f * covariance * f.transpose() + w * q * w.transpose()));
    ensure_finite_covariance(&next_covariance, "propagation")?;
    Ok((next_state, next_covariance))
}

/// Result of a linearised update, committed by the caller.
pub(crate) struct LinearizedUpdate {
    pub state: SE3,
    pub covariance: Matrix6<f64>,
    pub innovation: Innovation,
}

/// Update shared by the EKF and the IEKF: Cholesky gain, retraction in
/// convention `C`, Joseph-form covariance.
pub(crate) fn linearized_update<C, M>(
    state: &SE3,
    covariance: &Matrix6<f64>,
    model: &M,
    measurement: &DVector<f64>,
) -> FilterResult<LinearizedUpdate>
where
    C: ErrorConvention,
    M: MeasurementJacobian<C> + ?Sized,
{
    let predicted = model.value(state);
    let noise = model.covariance();
    check_measurement(model, measurement, &predicted, &noise)?;

    let h = <M as MeasurementJacobian<C>>::jacobian(model, state);
    if h.shape() != (model.dimension(), 6) {
        return Err(FilterError::shape_mismatch(
            "measurement jacobian",
            (model.dimension(), 6),
            h.shape(),
        ));
    }

    let residual = measurement - predicted;
    let p = to_dynamic(covariance);
    let hp = &h * &p;
    let innovation_covariance = symmetrize_dynamic(&(&hp * h.transpose() + &noise));
    let chol = cholesky(&innovation_covariance).map_err(|err| {
        debug!(convention = C::NAME, "innovation covariance rejected: {err}");
        FilterError::NumericalFailure(format!("innovation covariance: {err}"))
    })?;

    // K = P Hᵀ S⁻¹, solved as Kᵀ = S⁻¹ H P
    let gain = chol.solve(&hp).transpose();
    let correction = Vector6::from_column_slice((&gain * &residual).as_slice());
    if !correction.iter().all(|v| v.is_finite()) {
        return Err(FilterError::NumericalFailure(
            "state correction is not finite".to_string(),
        ));
    }

    let next_covariance = to_matrix6(&joseph_update(&p, &gain, &h, &noise))?;
    ensure_finite_covariance(&next_covariance, "update")?;

    Ok(LinearizedUpdate {
        state: C::retract(state, &correction),
        covariance: next_covariance,
        innovation: Innovation {
            residual,
            covariance: innovation_covariance,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_type_display_and_parse() {
        for filter in FilterType::ALL {
            let parsed: FilterType = filter.to_string().parse().unwrap();
            assert_eq!(parsed, filter);
        }
        assert_eq!(" Ukfm ".parse::<FilterType>().unwrap(), FilterType::Ukfm);
        assert!("kf".parse::<FilterType>().is_err());
    }

    #[test]
    fn test_filter_config_builders() {
        let config = FilterConfig::new()
            .with_symmetry_tolerance(1e-6)
            .with_psd_tolerance(1e-7)
            .with_group_tolerance(1e-5);
        assert_eq!(config.symmetry_tolerance, 1e-6);
        assert_eq!(config.psd_tolerance, 1e-7);
        assert_eq!(config.group_tolerance, 1e-5);
    }

    #[test]
    fn test_innovation_nis() {
        let innovation = Innovation {
            residual: DVector::from_column_slice(&[1.0, 2.0]),
            covariance: DMatrix::from_diagonal(&DVector::from_column_slice(&[1.0, 4.0])),
        };
        assert!((innovation.nis().unwrap() - 2.0).abs() < 1e-12);

        let singular = Innovation {
            residual: DVector::from_column_slice(&[1.0]),
            covariance: DMatrix::zeros(1, 1),
        };
        assert!(singular.nis().is_none());
    }

    #[test]
    fn test_validated_time_step() {
        assert_eq!(validated_time_step(None).unwrap(), None);
        assert_eq!(validated_time_step(Some(0.01)).unwrap(), Some(0.01));
        assert!(validated_time_step(Some(0.0)).is_err());
        assert!(validated_time_step(Some(-1.0)).is_err());
        assert!(validated_time_step(Some(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_validated_covariance() {
        let config = FilterConfig::default();
        let mut p = Matrix6::identity();
        p[(0, 1)] = 1e-10;
        let sym = validated_covariance(&p, &config).unwrap();
        assert_eq!(sym, sym.transpose());

        p[(0, 1)] = 1e-3;
        assert!(matches!(
            validated_covariance(&p, &config),
            Err(FilterError::InvalidArgument(_))
        ));

        let mut indefinite = Matrix6::identity();
        indefinite[(4, 4)] = -0.1;
        assert!(validated_covariance(&indefinite, &config).is_err());
    }

    #[test]
    fn test_joseph_update_matches_optimal_form() {
        let p = DMatrix::from_diagonal(&DVector::from_column_slice(&[2.0, 1.0]));
        let h = DMatrix::from_row_slice(1, 2, &[1.0, 0.5]);
        let r = DMatrix::from_element(1, 1, 0.5);
        let s = &h * &p * h.transpose() + &r;
        let gain = &p * h.transpose() / s[(0, 0)];
        let joseph = joseph_update(&p, &gain, &h, &r);
        let optimal = &p - &gain * &h * &p;
        assert!((joseph - optimal).norm() < 1e-12);
    }
}
