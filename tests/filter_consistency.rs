//! Long-run behaviour on the localization scenario
//!
//! All filters replay the same recorded tape. Besides the terminal consistency
//! bound, every step is checked for a valid group element and a symmetric PSD
//! covariance.

use std::sync::OnceLock;

use lie_kalman::manifold::se3::SE3;
use lie_kalman::models::{
    GpsMeasurement, LandmarkMeasurement, LieSystemModel, MeasurementJacobian, SystemJacobian,
};
use lie_kalman::{EKF, IEKF, KalmanFilter, SEKF, UKFM};
use nalgebra::Matrix6;

use scenario_utils::*;

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// 350 s at 100 Hz
const LONG_RUN_STEPS: usize = 35_000;
const LONG_RUN_SEED: u64 = 0x5e3;

fn long_run_tape() -> &'static Tape {
    static TAPE: OnceLock<Tape> = OnceLock::new();
    TAPE.get_or_init(|| record_tape(LONG_RUN_SEED, LONG_RUN_STEPS, moderate_covariance()))
}

fn consistent_over_long_run<F>(mut filter: F) -> TestResult
where
    F: KalmanFilter,
    LieSystemModel: SystemJacobian<F::Convention>,
    LandmarkMeasurement: MeasurementJacobian<F::Convention>,
    GpsMeasurement: MeasurementJacobian<F::Convention>,
{
    let tape = long_run_tape();
    let mut step_index = 0usize;

    replay_with(&mut filter, tape, |f, _| {
        let state = f.state();
        let p = f.covariance();
        assert!(orthogonality_error(&state) <= 1e-12, "step {step_index}");
        assert!(state.rotation_matrix().determinant() > 0.0);
        assert!(max_asymmetry(&p) <= 1e-14, "step {step_index}");
        if step_index % 100 == 0 {
            let scale = p.abs().max().max(1.0);
            assert!(min_eigenvalue(&p) >= -1e-12 * scale, "step {step_index}");
        }
        step_index += 1;
    })?;

    let error = log_error(&filter.state(), &tape.final_truth()).norm();
    let predicted = filter.covariance().trace().sqrt();
    assert!(
        error <= 5.0 * predicted,
        "{}: final error {error:e} exceeds 5 sigma ({predicted:e})",
        filter.filter_type()
    );
    Ok(())
}

#[test]
fn test_ekf_long_run_consistency() -> TestResult {
    consistent_over_long_run(EKF::default())
}

#[test]
fn test_sekf_long_run_consistency() -> TestResult {
    consistent_over_long_run(SEKF::default())
}

#[test]
fn test_iekf_long_run_consistency() -> TestResult {
    consistent_over_long_run(IEKF::default())
}

#[test]
fn test_ukfm_long_run_consistency() -> TestResult {
    consistent_over_long_run(UKFM::default())
}

type Trajectory = Vec<(SE3, Matrix6<f64>)>;

fn trajectory<F>(mut filter: F, tape: &Tape) -> Result<Trajectory, Box<dyn std::error::Error>>
where
    F: KalmanFilter,
    LieSystemModel: SystemJacobian<F::Convention>,
    LandmarkMeasurement: MeasurementJacobian<F::Convention>,
    GpsMeasurement: MeasurementJacobian<F::Convention>,
{
    let mut recorded = Vec::with_capacity(tape.steps.len());
    replay_with(&mut filter, tape, |f, _| recorded.push((f.state(), f.covariance())))?;
    Ok(recorded)
}

#[test]
fn test_square_root_matches_ekf_over_thousand_steps() -> TestResult {
    let tape = record_tape(7, 1_000, moderate_covariance());
    let ekf = trajectory(EKF::default(), &tape)?;
    let sekf = trajectory(SEKF::default(), &tape)?;

    assert_eq!(ekf.len(), 1_000);
    for (k, ((x_e, p_e), (x_s, p_s))) in ekf.iter().zip(&sekf).enumerate() {
        assert!(log_error(x_s, x_e).norm() < 1e-8, "state differs at step {k}");
        assert!((p_e - p_s).abs().max() < 1e-8, "covariance differs at step {k}");
    }
    Ok(())
}

/// Started at the truth, the invariant filter tracks the EKF up to terms of
/// the order of the estimation error: both the covariance gap and the state
/// gap must shrink with the largest error seen so far.
#[test]
fn test_invariant_covariance_matches_ekf_from_zero_error() -> TestResult {
    let mut tape = record_tape(11, 500, moderate_covariance());
    tape.initial_estimate = tape.initial_truth.clone();

    let ekf = trajectory(EKF::default(), &tape)?;
    let iekf = trajectory(IEKF::default(), &tape)?;

    let mut largest_error = 0.0_f64;
    for (k, (step, ((x_e, p_e), (x_i, p_i)))) in
        tape.steps.iter().zip(ekf.iter().zip(&iekf)).enumerate()
    {
        largest_error = largest_error.max(log_error(x_e, &step.truth).norm());

        let relative_gap = (p_e - p_i).norm() / p_e.norm().max(1e-12);
        let state_gap = log_error(x_i, x_e).norm();
        assert!(
            relative_gap <= 5.0 * largest_error,
            "covariance gap {relative_gap:e} at step {k}, error {largest_error:e}"
        );
        assert!(
            state_gap <= largest_error,
            "state gap {state_gap:e} at step {k}, error {largest_error:e}"
        );
    }
    Ok(())
}

#[test]
fn test_tape_is_reproducible() {
    let a = record_tape(3, 50, moderate_covariance());
    let b = record_tape(3, 50, moderate_covariance());
    assert_eq!(a.initial_estimate, b.initial_estimate);
    for (sa, sb) in a.steps.iter().zip(&b.steps) {
        assert_eq!(sa.truth, sb.truth);
        assert_eq!(sa.control, sb.control);
        assert_eq!(sa.landmarks, sb.landmarks);
        assert_eq!(sa.gps, sb.gps);
    }
    assert!(a.steps[0].landmarks.is_some() && a.steps[1].landmarks.is_none());
    assert!(a.steps[0].gps.is_some() && a.steps[5].gps.is_none());
}
