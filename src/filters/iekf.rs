//! Invariant extended Kalman filter.
//!
//! The error is left-invariant, `X_true = Exp(ξ) · X`. For the body-twist
//! process model the error dynamics do not depend on the estimate (`F = I`),
//! which is what makes the filter consistent from poor initial guesses.
//!
//! Internally the covariance of `ξ` is stored. [`KalmanFilter::covariance`]
//! and [`KalmanFilter::set_covariance`] work in the right-plus convention like
//! every other filter; [`IEKF::invariant_covariance`] exposes the stored one.

use nalgebra::{DVector, Matrix6};
use tracing::{debug, trace};

use super::{
    FilterConfig, FilterType, Innovation, KalmanFilter, linearized_propagate, linearized_update,
    validated_covariance, validated_state, validated_time_step,
};
use crate::error::{FilterError, FilterResult};
use crate::linalg::symmetrize;
use crate::manifold::LieGroup;
use crate::manifold::se3::{SE3, SE3Tangent};
use crate::models::{ErrorConvention, LeftPlus, MeasurementJacobian, SystemJacobian};

#[derive(Debug, Clone)]
pub struct IEKF {
    state: SE3,
    invariant_covariance: Matrix6<f64>,
    config: FilterConfig,
}

impl Default for IEKF {
    fn default() -> Self {
        IEKF {
            state: SE3::identity(),
            invariant_covariance: Matrix6::identity(),
            config: FilterConfig::default(),
        }
    }
}

impl IEKF {
    /// Create a filter from an initial mean and a right-plus covariance.
    pub fn new(state: SE3, covariance: Matrix6<f64>) -> FilterResult<Self> {
        Self::with_config(state, covariance, FilterConfig::default())
    }

    pub fn with_config(
        state: SE3,
        covariance: Matrix6<f64>,
        config: FilterConfig,
    ) -> FilterResult<Self> {
        let state = validated_state(state, &config)?;
        let covariance = validated_covariance(&covariance, &config)?;
        Ok(IEKF {
            invariant_covariance: symmetrize(&LeftPlus::from_right_plus(&state, &covariance)),
            state,
            config,
        })
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Covariance of the left-invariant error `ξ`.
    pub fn invariant_covariance(&self) -> Matrix6<f64> {
        self.invariant_covariance
    }

    /// Replace the covariance of `ξ` directly; the mean is left untouched.
    pub fn set_invariant_covariance(&mut self, covariance: Matrix6<f64>) -> FilterResult<()> {
        self.invariant_covariance = validated_covariance(&covariance, &self.config)?;
        Ok(())
    }
}

impl KalmanFilter for IEKF {
    type Convention = LeftPlus;

    fn filter_type(&self) -> FilterType {
        FilterType::Iekf
    }

    fn state(&self) -> SE3 {
        self.state.clone()
    }

    fn covariance(&self) -> Matrix6<f64> {
        symmetrize(&LeftPlus::to_right_plus(
            &self.state,
            &self.invariant_covariance,
        ))
    }

    /// The invariant covariance is re-expressed at the new mean so that
    /// [`KalmanFilter::covariance`] is unchanged by the call.
    fn set_state(&mut self, state: SE3) -> FilterResult<()> {
        let state = validated_state(state, &self.config)?;
        let covariance = LeftPlus::to_right_plus(&self.state, &self.invariant_covariance);
        self.invariant_covariance = symmetrize(&LeftPlus::from_right_plus(&state, &covariance));
        self.state = state;
        Ok(())
    }

    fn set_covariance(&mut self, covariance: Matrix6<f64>) -> FilterResult<()> {
        let covariance = validated_covariance(&covariance, &self.config)?;
        self.invariant_covariance = symmetrize(&LeftPlus::from_right_plus(&self.state, &covariance));
        Ok(())
    }

    /// `dt` is mandatory for the invariant filter; a missing or non-positive
    /// step is rejected before anything is touched.
    ///
    /// The step length only gates and traces the call. `control` already holds
    /// `ξ·dt` and the model's `Q` is already discretised, so `dt` does not enter
    /// the transported process noise `W Q Wᵀ`.
    fn propagate<S>(&mut self, model: &S, control: &SE3Tangent, dt: Option<f64>) -> FilterResult<()>
    where
        S: SystemJacobian<LeftPlus>,
    {
        let dt = validated_time_step(dt)?.ok_or_else(|| {
            debug!(filter = "IEKF", "propagation without a time step rejected");
            FilterError::InvalidArgument("invariant filter requires a time step".to_string())
        })?;

        let (state, covariance) = linearized_propagate::<LeftPlus, S>(
            &self.state,
            &self.invariant_covariance,
            model,
            control,
        )
        .inspect_err(|err| debug!(filter = "IEKF", "propagation rejected: {err}"))?;

        trace!(dt, trace = covariance.trace(), "invariant covariance propagated");
        self.state = state;
        self.invariant_covariance = covariance;
        Ok(())
    }

    fn update<M>(&mut self, model: &M, measurement: &DVector<f64>) -> FilterResult<Innovation>
    where
        M: MeasurementJacobian<LeftPlus>,
    {
        let step = linearized_update::<LeftPlus, M>(
            &self.state,
            &self.invariant_covariance,
            model,
            measurement,
        )
        .inspect_err(|err| debug!(filter = "IEKF", "update rejected: {err}"))?;
        self.state = step.state;
        self.invariant_covariance = step.covariance;
        Ok(step.innovation)
    }
}
