//! Kalman filtering on the SE(3) Lie group.
//!
//! The crate is layered bottom-up:
//! - [`manifold`]: SO(3) and SE(3) with exp/log, adjoints and analytic Jacobians
//! - [`linalg`]: symmetrisation, PSD checks, Cholesky and QR helpers
//! - [`models`]: process and measurement models, linearised per error convention
//! - [`filters`]: EKF, square-root EKF, invariant EKF and UKF on manifolds

pub mod error;
pub mod filters;
pub mod linalg;
pub mod logger;
pub mod manifold;
pub mod models;

pub use error::{FilterError, FilterResult};
pub use filters::{
    EKF, FilterConfig, FilterType, IEKF, Innovation, KalmanFilter, SEKF, UKFM, UkfmConfig,
};
pub use logger::{init_logger, init_logger_with_level};
