//! Extended Kalman filter with right-plus error.

use nalgebra::{DVector, Matrix6};
use tracing::debug;

use super::{
    FilterConfig, FilterType, Innovation, KalmanFilter, linearized_propagate, linearized_update,
    validated_covariance, validated_state, validated_time_step,
};
use crate::error::FilterResult;
use crate::manifold::LieGroup;
use crate::manifold::se3::{SE3, SE3Tangent};
use crate::models::{MeasurementJacobian, RightPlus, SystemJacobian};

/// EKF on SE(3).
///
/// The mean is corrected on the right, `X ← X · Exp(K ν)`, and the covariance is
/// updated in Joseph form so that it stays PSD under rounding.
#[derive(Debug, Clone)]
pub struct EKF {
    state: SE3,
    covariance: Matrix6<f64>,
    config: FilterConfig,
}

impl Default for EKF {
    fn default() -> Self {
        EKF {
            state: SE3::identity(),
            covariance: Matrix6::identity(),
            config: FilterConfig::default(),
        }
    }
}

impl EKF {
    /// Create a filter from an initial mean and right-plus covariance.
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
        Ok(EKF {
            state,
            covariance,
            config,
        })
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }
}

impl KalmanFilter for EKF {
    type Convention = RightPlus;

    fn filter_type(&self) -> FilterType {
        FilterType::Ekf
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
        validated_time_step(dt)?;
        let (state, covariance) =
            linearized_propagate::<RightPlus, S>(&self.state, &self.covariance, model, control)
                .inspect_err(|err| debug!(filter = "EKF", "propagation rejected: {err}"))?;
        self.state = state;
        self.covariance = covariance;
        Ok(())
    }

    fn update<M>(&mut self, model: &M, measurement: &DVector<f64>) -> FilterResult<Innovation>
    where
        M: MeasurementJacobian<RightPlus>,
    {
        let step =
            linearized_update::<RightPlus, M>(&self.state, &self.covariance, model, measurement)
                .inspect_err(|err| debug!(filter = "EKF", "update rejected: {err}"))?;
        self.state = step.state;
        self.covariance = step.covariance;
        Ok(step.innovation)
    }
}
