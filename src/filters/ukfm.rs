//! Unscented Kalman filter on manifolds.
//!
//! Sigma points are drawn in the right-plus tangent space of the mean,
//! `χᵢ = X · Exp(±γ Lᵢ)` with `L Lᵀ = P` and `γ = √(n + λ)`, pushed through the
//! model and mapped back with `Log(X'⁻¹ · χᵢ')`. No Jacobian is ever evaluated:
//! process noise enters through a second set of sigma points on the control.
//!
//! Weights follow the scaled unscented transform:
//!
//! | weight        | value                      |
//! |---------------|----------------------------|
//! | `λ`           | `α²(n + κ) - n`            |
//! | `w_m⁰`        | `λ / (n + λ)`              |
//! | `w_c⁰`        | `w_m⁰ + 1 - α² + β`        |
//! | `w_mⁱ = w_cⁱ` | `1 / (2(n + λ))`           |

use nalgebra::{DMatrix, DVector, Matrix6, Vector6};
use tracing::debug;

use super::{
    FilterConfig, FilterType, Innovation, KalmanFilter, check_measurement,
    ensure_finite_covariance, validated_covariance, validated_state, validated_time_step,
};
use crate::error::{FilterError, FilterResult};
use crate::linalg::{cholesky, psd_sqrt_lower, symmetrize, symmetrize_dynamic, to_dynamic, to_matrix6};
use crate::manifold::LieGroup;
use crate::manifold::se3::{SE3, SE3Tangent};
use crate::models::{
    ErrorConvention, MeasurementJacobian, MeasurementModel, RightPlus, SystemJacobian, SystemModel,
};

/// Dimension of the SE(3) tangent space.
const STATE_DIM: usize = 6;

/// Scaling parameters of the unscented transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UkfmConfig {
    /// Spread of the sigma points, `0 < α ≤ 1`
    pub alpha: f64,
    /// Prior knowledge of the distribution, 2 is optimal for Gaussians
    pub beta: f64,
    /// Secondary scaling
    pub kappa: f64,
}

impl Default for UkfmConfig {
    fn default() -> Self {
        Self {
            alpha: 1e-3,
            beta: 2.0,
            kappa: 0.0,
        }
    }
}

impl UkfmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    pub fn with_kappa(mut self, kappa: f64) -> Self {
        self.kappa = kappa;
        self
    }
}

/// Sigma-point weights for an `n`-dimensional tangent space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SigmaWeights {
    pub lambda: f64,
    /// `γ = √(n + λ)`
    pub scale: f64,
    pub mean_center: f64,
    pub covariance_center: f64,
    /// Weight of every non-central point, identical for mean and covariance
    pub other: f64,
}

impl SigmaWeights {
    /// # Errors
    /// `InvalidArgument` for non-finite parameters or a non-positive `n + λ`.
    pub fn new(dimension: usize, config: &UkfmConfig) -> FilterResult<Self> {
        let UkfmConfig { alpha, beta, kappa } = *config;
        if !(alpha.is_finite() && alpha > 0.0 && beta.is_finite() && kappa.is_finite()) {
            return Err(FilterError::InvalidArgument(format!(
                "invalid unscented parameters: {config:?}"
            )));
        }
        let weights = Self::scaled(dimension, config);
        if weights.scale.is_nan() || weights.scale <= 0.0 {
            return Err(FilterError::InvalidArgument(format!(
                "n + lambda must be positive, got {}",
                weights.lambda + dimension as f64
            )));
        }
        Ok(weights)
    }

    /// Weights without parameter validation.
    fn scaled(dimension: usize, config: &UkfmConfig) -> Self {
        let UkfmConfig { alpha, beta, kappa } = *config;
        let n = dimension as f64;
        // n + λ formed directly, avoiding the cancellation in α²(n + κ) - n + n
        let spread = alpha * alpha * (n + kappa);
        let lambda = spread - n;
        let mean_center = lambda / spread;
        SigmaWeights {
            lambda,
            scale: spread.sqrt(),
            mean_center,
            covariance_center: mean_center + 1.0 - alpha * alpha + beta,
            other: 1.0 / (2.0 * spread),
        }
    }
}

/// UKF on SE(3), right-plus error.
#[derive(Debug, Clone)]
pub struct UKFM {
    state: SE3,
    covariance: Matrix6<f64>,
    config: FilterConfig,
    unscented: UkfmConfig,
    weights: SigmaWeights,
}

impl Default for UKFM {
    fn default() -> Self {
        let unscented = UkfmConfig::default();
        UKFM {
            state: SE3::identity(),
            covariance: Matrix6::identity(),
            config: FilterConfig::default(),
            weights: SigmaWeights::scaled(STATE_DIM, &unscented),
            unscented,
        }
    }
}

impl UKFM {
    /// Create a filter with default unscented parameters.
    pub fn new(state: SE3, covariance: Matrix6<f64>) -> FilterResult<Self> {
        Self::with_config(
            state,
            covariance,
            FilterConfig::default(),
            UkfmConfig::default(),
        )
    }

    pub fn with_config(
        state: SE3,
        covariance: Matrix6<f64>,
        config: FilterConfig,
        unscented: UkfmConfig,
    ) -> FilterResult<Self> {
        let weights = SigmaWeights::new(STATE_DIM, &unscented)?;
        let state = validated_state(state, &config)?;
        let covariance = validated_covariance(&covariance, &config)?;
        Ok(UKFM {
            state,
            covariance,
            config,
            unscented,
            weights,
        })
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn unscented_config(&self) -> &UkfmConfig {
        &self.unscented
    }

    pub fn weights(&self) -> &SigmaWeights {
        &self.weights
    }

    /// Tangent offsets `±γ Lᵢ`: all positive columns first, then all negative ones.
    fn sigma_offsets(&self, covariance: &Matrix6<f64>, what: &str) -> FilterResult<Vec<Vector6<f64>>> {
        let lower = psd_sqrt_lower(&to_dynamic(covariance)).map_err(|err| {
            FilterError::NumericalFailure(format!("square root of {what}: {err}"))
        })?;
        let columns: Vec<Vector6<f64>> = (0..STATE_DIM)
            .map(|i| Vector6::from_column_slice(lower.column(i).as_slice()) * self.weights.scale)
            .collect();
        Ok(columns
            .iter()
            .copied()
            .chain(columns.iter().map(|c| -c))
            .collect())
    }

    /// Jacobian-free propagation, usable with any [`SystemModel`].
    ///
    /// Both sigma sets are centred on `X' = f(X, u)`, so the central point adds
    /// nothing to the covariance sums.
    pub fn propagate_unscented<S>(
        &mut self,
        model: &S,
        control: &SE3Tangent,
        dt: Option<f64>,
    ) -> FilterResult<()>
    where
        S: SystemModel + ?Sized,
    {
        validated_time_step(dt)?;
        let next = model.value(&self.state, control);
        let weight = self.weights.other;

        let mut covariance = Matrix6::zeros();
        for offset in self.sigma_offsets(&self.covariance, "state covariance")? {
            let sigma = RightPlus::retract(&self.state, &offset);
            let delta = RightPlus::local(&model.value(&sigma, control), &next);
            covariance += weight * delta * delta.transpose();
        }

        let control_coeffs = control.coeffs();
        for offset in self.sigma_offsets(&model.covariance(), "process noise")? {
            let perturbed = SE3Tangent::from(control_coeffs + offset);
            let delta = RightPlus::local(&model.value(&self.state, &perturbed), &next);
            covariance += weight * delta * delta.transpose();
        }

        let covariance = symmetrize(&covariance);
        ensure_finite_covariance(&covariance, "propagation")
            .inspect_err(|err| debug!(filter = "UKFM", "propagation rejected: {err}"))?;

        self.state = next;
        self.covariance = covariance;
        Ok(())
    }

    /// Jacobian-free update, usable with any [`MeasurementModel`].
    pub fn update_unscented<M>(
        &mut self,
        model: &M,
        measurement: &DVector<f64>,
    ) -> FilterResult<Innovation>
    where
        M: MeasurementModel + ?Sized,
    {
        let predicted = model.value(&self.state);
        let noise = model.covariance();
        check_measurement(model, measurement, &predicted, &noise)?;
        let dimension = model.dimension();

        let offsets = self.sigma_offsets(&self.covariance, "state covariance")?;
        let mut outputs = Vec::with_capacity(offsets.len());
        for offset in &offsets {
            let z = model.value(&RightPlus::retract(&self.state, offset));
            if z.len() != dimension {
                return Err(FilterError::length_mismatch(
                    "sigma point measurement",
                    dimension,
                    z.len(),
                ));
            }
            outputs.push(z);
        }

        // Sums are expanded around z₀ rather than ẑ: with a small α the centre
        // weight is of order -1/α², and Σ w_c (zᵢ - ẑ)(zᵢ - ẑ)ᵀ reduces exactly to
        // Σ wᵢ dᵢ dᵢᵀ + (w_c⁰ + Σ wᵢ - 2) m mᵀ with dᵢ = zᵢ - z₀ and m = ẑ - z₀.
        let weight = self.weights.other;
        let deviations: Vec<DVector<f64>> = outputs.iter().map(|z| z - &predicted).collect();
        let mut shift = DVector::<f64>::zeros(dimension);
        for d in &deviations {
            shift += weight * d;
        }
        let mean = &predicted + &shift;

        let shift_weight =
            self.weights.covariance_center + weight * deviations.len() as f64 - 2.0;
        let mut p_zz = shift_weight * &shift * shift.transpose();
        let mut p_xz = DMatrix::<f64>::zeros(STATE_DIM, dimension);
        for (offset, d) in offsets.iter().zip(&deviations) {
            let offset = DVector::from_column_slice(offset.as_slice());
            p_zz += weight * d * d.transpose();
            // the offsets come in ± pairs, so Σ wᵢ δᵢ mᵀ vanishes
            p_xz += weight * &offset * d.transpose();
        }
        let p_zz = symmetrize_dynamic(&(p_zz + &noise));

        let chol = cholesky(&p_zz).map_err(|err| {
            debug!(filter = "UKFM", "innovation covariance rejected: {err}");
            FilterError::NumericalFailure(format!("innovation covariance: {err}"))
        })?;
        let gain = chol.solve(&p_xz.transpose()).transpose();

        let residual = measurement - &mean;
        let correction = Vector6::from_column_slice((&gain * &residual).as_slice());
        if !correction.iter().all(|v| v.is_finite()) {
            return Err(FilterError::NumericalFailure(
                "state correction is not finite".to_string(),
            ));
        }

        let reduction = to_matrix6(&(&gain * &p_zz * gain.transpose()))?;
        let covariance = symmetrize(&(self.covariance - reduction));
        ensure_finite_covariance(&covariance, "update")?;

        self.state = RightPlus::retract(&self.state, &correction);
        self.covariance = covariance;
        Ok(Innovation {
            residual,
            covariance: p_zz,
        })
    }
}

impl KalmanFilter for UKFM {
    type Convention = RightPlus;

    fn filter_type(&self) -> FilterType {
        FilterType::Ukfm
    }

    fn state(&self) -> SE3 {
        self.state.clone()
    }

    fn covariance(&self) -> Matrix6<f64> {
        self.covariance
    }

    fn set_state(&mut self, state: SE3) -> FilterResult<()> {
        self.state = validated_state(state, &self.config)?;
        Ok(())
    }

    fn set_covariance(&mut self, covariance: Matrix6<f64>) -> FilterResult<()> {
        self.covariance = validated_covariance(&covariance, &self.config)?;
        Ok(())
    }

    fn propagate<S>(&mut self, model: &S, control: &SE3Tangent, dt: Option<f64>) -> FilterResult<()>
    where
        S: SystemJacobian<RightPlus>,
    {
        self.propagate_unscented(model, control, dt)
    }

    fn update<M>(&mut self, model: &M, measurement: &DVector<f64>) -> FilterResult<Innovation>
    where
        M: MeasurementJacobian<RightPlus>,
    {
        self.update_unscented(model, measurement)
    }
}
