//! Error types for the lie-kalman library
//!
//! Filters surface exactly three kinds of failure: a bad argument at the entry
//! point, a numerical breakdown inside a step, and a model whose shapes do not
//! match what it declared. All errors use the `thiserror` crate.

use crate::{linalg::LinAlgError, manifold::ManifoldError};
use thiserror::Error;

/// Main result type used throughout the lie-kalman library
pub type FilterResult<T> = Result<T, FilterError>;

/// Main error type for the lie-kalman library
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    /// Caller supplied a non-PSD covariance, a non-group state or a bad scalar
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A Cholesky / QR factorisation broke down; state and covariance are unchanged
    #[error("Numerical failure: {0}")]
    NumericalFailure(String),

    /// A model returned a vector or matrix of the wrong shape
    #[error("Dimension mismatch in {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: String,
        expected: String,
        actual: String,
    },
}

impl FilterError {
    /// Shape mismatch helper for `rows x cols` quantities.
    pub fn shape_mismatch(
        what: &str,
        expected: (usize, usize),
        actual: (usize, usize),
    ) -> Self {
        FilterError::DimensionMismatch {
            what: what.to_string(),
            expected: format!("{}x{}", expected.0, expected.1),
            actual: format!("{}x{}", actual.0, actual.1),
        }
    }

    /// Length mismatch helper for vectors.
    pub fn length_mismatch(what: &str, expected: usize, actual: usize) -> Self {
        FilterError::DimensionMismatch {
            what: what.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// True for the `numerical-failure` kind.
    pub fn is_numerical_failure(&self) -> bool {
        matches!(self, FilterError::NumericalFailure(_))
    }
}

impl From<ManifoldError> for FilterError {
    fn from(err: ManifoldError) -> Self {
        FilterError::InvalidArgument(err.to_string())
    }
}

impl From<LinAlgError> for FilterError {
    fn from(err: LinAlgError) -> Self {
        match err {
            LinAlgError::DimensionMismatch {
                expected_rows,
                expected_cols,
                rows,
                cols,
            } => FilterError::shape_mismatch("matrix", (expected_rows, expected_cols), (rows, cols)),
            other => FilterError::NumericalFailure(other.to_string()),
        }
    }
}
