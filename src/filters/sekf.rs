//! Square-root extended Kalman filter.
//!
//! The covariance is carried as an upper-triangular factor `S` with `P = SᵀS`.
//! Both steps are a single QR triangularisation of a stacked pre-array, so `P`
//! can never lose positive semi-definiteness.
//!
//! Propagation:
//! ```text
//!   [ S · Fᵀ   ]   QR   [ S' ]
//!   [ U_Q · Wᵀ ]  ───►  [ 0  ]          U_Qᵀ U_Q = Q
//! ```
//!
//! Update:
//! ```text
//!   [ U_R     0 ]   QR   [ B₁₁  B₁₂ ]
//!   [ S · Hᵀ  S ]  ───►  [ 0    B₂₂ ]   U_Rᵀ U_R = R
//! ```
//! with `B₁₁ᵀB₁₁ = H P Hᵀ + R`, `Kᵀ = B₁₁⁻¹ B₁₂` and `S⁺ = B₂₂`.

use nalgebra::{DMatrix, DVector, Matrix6, Vector6};
use tracing::debug;

use super::{
    FilterConfig, FilterType, Innovation, KalmanFilter, check_measurement,
    ensure_finite_covariance, validated_covariance, validated_state, validated_time_step,
};
use crate::error::{FilterError, FilterResult};
use crate::linalg::{psd_sqrt_upper, symmetrize, to_dynamic, to_matrix6, triangularize};
use crate::manifold::LieGroup;
use crate::manifold::se3::{SE3, SE3Tangent};
use crate::models::{ErrorConvention, MeasurementJacobian, RightPlus, SystemJacobian};

/// Relative size below which a diagonal entry of `B₁₁` counts as zero.
const SINGULAR_PIVOT_TOLERANCE: f64 = 1e-13;

/// Square-root EKF on SE(3), right-plus error.
#[derive(Debug, Clone)]
pub struct SEKF {
    state: SE3,
    sqrt_covariance: Matrix6<f64>,
    config: FilterConfig,
}

impl Default for SEKF {
    fn default() -> Self {
        SEKF {
            state: SE3::identity(),
            sqrt_covariance: Matrix6::identity(),
            config: FilterConfig::default(),
        }
    }
}

impl SEKF {
    /// Create a filter from an initial mean and right-plus covariance.
    pub fn new(state: SE3, covariance: Matrix6<f64>) -> FilterResult<Self> {
        Self::with_config(state, covariance, FilterConfig::default())
    }

    pub fn with_config(
        state: SE3,
        covariance: Matrix6<f64>,
        config: FilterConfig,
    ) -> FilterResult<Self> {
        let mut filter = SEKF {
            state: validated_state(state, &config)?,
            sqrt_covariance: Matrix6::identity(),
            config,
        };
        filter.set_covariance(covariance)?;
        Ok(filter)
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Upper-triangular factor `S`, `P = SᵀS`.
    pub fn covariance_sqrt(&self) -> Matrix6<f64> {
        self.sqrt_covariance
    }

    /// Replace the factor directly.
    ///
    /// Entries below the diagonal must vanish within the symmetry tolerance; rows
    /// with a negative diagonal are flipped, which leaves `SᵀS` unchanged.
    pub fn set_covariance_sqrt(&mut self, sqrt_covariance: Matrix6<f64>) -> FilterResult<()> {
        if !sqrt_covariance.iter().all(|v| v.is_finite()) {
            return Err(FilterError::InvalidArgument(
                "covariance factor has non-finite entries".to_string(),
            ));
        }
        let mut upper = sqrt_covariance;
        for j in 0..6 {
            for i in (j + 1)..6 {
                if upper[(i, j)].abs() > self.config.symmetry_tolerance {
                    return Err(FilterError::InvalidArgument(format!(
                        "covariance factor is not upper triangular at ({i}, {j})"
                    )));
                }
                upper[(i, j)] = 0.0;
            }
        }
        for i in 0..6 {
            if upper[(i, i)] < 0.0 {
                upper.row_mut(i).neg_mut();
            }
        }
        self.sqrt_covariance = upper;
        Ok(())
    }
}

impl KalmanFilter for SEKF {
    type Convention = RightPlus;

    fn filter_type(&self) -> FilterType {
        FilterType::Sekf
    }

    fn state(&self) -> SE3 {
        self.state.clone()
    }

    fn covariance(&self) -> Matrix6<f64> {
        symmetrize(&(self.sqrt_covariance.transpose() * self.sqrt_covariance))
    }

    fn set_state(&mut self, state: SE3) -> FilterResult<()> {
        self.state = validated_state(state, &self.config)?;
        Ok(())
    }

    fn set_covariance(&mut self, covariance: Matrix6<f64>) -> FilterResult<()> {
        let covariance = validated_covariance(&covariance, &self.config)?;
        let upper = psd_sqrt_upper(&to_dynamic(&covariance))
            .map_err(|err| FilterError::InvalidArgument(format!("covariance: {err}")))?;
        self.sqrt_covariance = to_matrix6(&upper)?;
        Ok(())
    }

    fn propagate<S>(&mut self, model: &S, control: &SE3Tangent, dt: Option<f64>) -> FilterResult<()>
    where
        S: SystemJacobian<RightPlus>,
    {
        validated_time_step(dt)?;
        let f = model.jacobian_state(&self.state, control);
        let w = model.jacobian_noise(&self.state, control);
        let noise_sqrt = psd_sqrt_upper(&to_dynamic(&model.covariance())).map_err(|err| {
            debug!(filter = "SEKF", "process noise factor failed: {err}");
            FilterError::InvalidArgument(format!("process noise: {err}"))
        })?;

        let mut pre_array = DMatrix::<f64>::zeros(12, 6);
        pre_array
            .view_mut((0, 0), (6, 6))
            .copy_from(&(self.sqrt_covariance * f.transpose()));
        pre_array
            .view_mut((6, 0), (6, 6))
            .copy_from(&(noise_sqrt * to_dynamic(&w.transpose())));

        let sqrt_covariance = to_matrix6(&triangularize(&pre_array)?)?;
        ensure_finite_covariance(&sqrt_covariance, "propagation")?;

        self.state = model.value(&self.state, control);
        self.sqrt_covariance = sqrt_covariance;
        Ok(())
    }

    fn update<M>(&mut self, model: &M, measurement: &DVector<f64>) -> FilterResult<Innovation>
    where
        M: MeasurementJacobian<RightPlus>,
    {
        let predicted = model.value(&self.state);
        let noise = model.covariance();
        check_measurement(model, measurement, &predicted, &noise)?;
        let m = model.dimension();
        let h = model.jacobian(&self.state);
        if h.shape() != (m, 6) {
            return Err(FilterError::shape_mismatch(
                "measurement jacobian",
                (m, 6),
                h.shape(),
            ));
        }

        let noise_sqrt = psd_sqrt_upper(&noise)
            .map_err(|err| FilterError::InvalidArgument(format!("measurement noise: {err}")))?;
        let sqrt_p = to_dynamic(&self.sqrt_covariance);

        let mut pre_array = DMatrix::<f64>::zeros(m + 6, m + 6);
        pre_array.view_mut((0, 0), (m, m)).copy_from(&noise_sqrt);
        pre_array
            .view_mut((m, 0), (6, m))
            .copy_from(&(&sqrt_p * h.transpose()));
        pre_array.view_mut((m, m), (6, 6)).copy_from(&sqrt_p);

        let post_array = triangularize(&pre_array)?;
        let b11 = post_array.view((0, 0), (m, m)).into_owned();
        let b12 = post_array.view((0, m), (m, 6)).into_owned();
        let b22 = post_array.view((m, m), (6, 6)).into_owned();

        // pivots are judged against the pre-array so a collapsed H P Hᵀ + R is caught
        let pivot_scale = pre_array.abs().max().max(f64::MIN_POSITIVE);
        let pivot_min = b11.diagonal().abs().min();
        if pivot_min <= SINGULAR_PIVOT_TOLERANCE * pivot_scale {
            debug!(
                filter = "SEKF",
                pivot_min, "innovation factor is singular, update rejected"
            );
            return Err(FilterError::NumericalFailure(format!(
                "innovation factor is singular (smallest pivot {pivot_min:e})"
            )));
        }

        let gain_t = b11.solve_upper_triangular(&b12).ok_or_else(|| {
            FilterError::NumericalFailure("triangular solve for the gain failed".to_string())
        })?;

        let residual = measurement - predicted;
        let correction = Vector6::from_column_slice((gain_t.transpose() * &residual).as_slice());
        if !correction.iter().all(|v| v.is_finite()) {
            return Err(FilterError::NumericalFailure(
                "state correction is not finite".to_string(),
            ));
        }
        let sqrt_covariance = to_matrix6(&b22)?;
        ensure_finite_covariance(&sqrt_covariance, "update")?;

        self.state = RightPlus::retract(&self.state, &correction);
        self.sqrt_covariance = sqrt_covariance;
        Ok(Innovation {
            residual,
            covariance: b11.transpose() * &b11,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::EKF;
    use crate::models::{GpsMeasurement, LandmarkMeasurement, LieSystemModel, MeasurementModel};
    use nalgebra::{Matrix3, Vector3};

    fn initial_covariance() -> Matrix6<f64> {
        let a = Matrix6::from_fn(|i, j| ((i * 7 + j * 3) % 11) as f64 * 0.02);
        a * a.transpose() + Matrix6::identity() * 0.05
    }

    #[test]
    fn test_factor_reconstructs_covariance() {
        let p = initial_covariance();
        let sekf = SEKF::new(SE3::identity(), p).unwrap();
        let s = sekf.covariance_sqrt();
        for j in 0..6 {
            for i in (j + 1)..6 {
                assert_eq!(s[(i, j)], 0.0);
            }
        }
        assert!((sekf.covariance() - p).norm() < 1e-12);
    }

    #[test]
    fn test_matches_ekf_single_cycle() {
        let x = SE3::from_translation_euler(0.3, -0.2, 0.5, 0.1, 0.2, -0.3);
        let p = initial_covariance();
        let mut ekf = EKF::new(x.clone(), p).unwrap();
        let mut sekf = SEKF::new(x, p).unwrap();

        let motion = LieSystemModel::from_sigmas(Vector6::repeat(1e-2), 0.1).unwrap();
        let u = SE3Tangent::from_components(0.1, 0.0, 0.02, 0.0, 0.01, 0.05);
        ekf.propagate(&motion, &u, Some(0.1)).unwrap();
        sekf.propagate(&motion, &u, Some(0.1)).unwrap();
        assert!((ekf.covariance() - sekf.covariance()).norm() < 1e-10);

        let model =
            LandmarkMeasurement::from_sigmas(Vector3::new(2.0, 1.0, 0.5), Vector3::repeat(0.05));
        let z = model.value(&SE3::identity());
        let a = ekf.update(&model, &z).unwrap();
        let b = sekf.update(&model, &z).unwrap();

        assert!((a.covariance - b.covariance).norm() < 1e-10);
        assert!(
            ekf.state()
                .right_minus(&sekf.state(), None, None)
                .coeffs()
                .norm()
                < 1e-10
        );
        assert!((ekf.covariance() - sekf.covariance()).norm() < 1e-10);
    }

    #[test]
    fn test_zero_noise_singular_update_fails() {
        let mut sekf = SEKF::new(SE3::identity(), Matrix6::zeros()).unwrap();
        let gps = GpsMeasurement::new(Matrix3::zeros()).unwrap();
        let err = sekf
            .update(&gps, &DVector::from_column_slice(&[1.0, 0.0, 0.0]))
            .unwrap_err();
        assert!(err.is_numerical_failure());
        assert_eq!(sekf.state(), SE3::identity());
        assert_eq!(sekf.covariance_sqrt(), Matrix6::zeros());
    }

    #[test]
    fn test_set_covariance_sqrt() {
        let mut sekf = SEKF::default();
        let mut s = Matrix6::identity() * 2.0;
        s[(1, 1)] = -3.0;
        s[(1, 4)] = 0.5;
        sekf.set_covariance_sqrt(s).unwrap();
        assert_eq!(sekf.covariance_sqrt()[(1, 1)], 3.0);
        assert_eq!(sekf.covariance_sqrt()[(1, 4)], -0.5);
        assert!((sekf.covariance() - s.transpose() * s).norm() < 1e-12);

        let mut lower = Matrix6::identity();
        lower[(3, 1)] = 0.1;
        assert!(sekf.set_covariance_sqrt(lower).is_err());
    }

    #[test]
    fn test_propagate_with_zero_noise_keeps_factor_triangular() {
        let mut sekf = SEKF::new(SE3::identity(), initial_covariance()).unwrap();
        let u = SE3Tangent::from_components(0.5, 0.1, 0.0, 0.2, -0.1, 0.3);
        sekf.propagate(&LieSystemModel::noiseless(), &u, None)
            .unwrap();
        let s = sekf.covariance_sqrt();
        for i in 0..6 {
            assert!(s[(i, i)] >= 0.0);
            for j in 0..i {
                assert!(s[(i, j)].abs() < 1e-15);
            }
        }
    }
}
