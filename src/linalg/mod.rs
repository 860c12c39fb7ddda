//! Dense linear algebra for covariance handling.
//!
//! This module provides the numerical safeguards shared by every filter:
//! - Symmetrisation and symmetry / positive semi-definiteness checks
//! - Cholesky factors and PSD square roots that tolerate singular inputs
//! - QR triangularisation with a non-negative diagonal (square-root filtering)
//!
//! Everything operates on nalgebra dense matrices. Fixed-size 6×6 covariances are
//! converted with [`to_dynamic`] / [`to_matrix6`] at the call sites that need the
//! dynamic routines.

use nalgebra::{DMatrix, Matrix6, SymmetricEigen};
use thiserror::Error;

pub mod cholesky;
pub mod qr;

pub use cholesky::*;
pub use qr::*;

/// Linear algebra specific error types
#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    /// Matrix is not positive definite (Cholesky breakdown)
    #[error("Matrix is not positive definite: {0}")]
    NotPositiveDefinite(String),

    /// Matrix is singular or triangular solve broke down
    #[error("Matrix is singular: {0}")]
    Singular(String),

    /// Matrix is not symmetric within tolerance
    #[error("Matrix is not symmetric: max asymmetry {asymmetry:e} exceeds {tolerance:e}")]
    NotSymmetric { asymmetry: f64, tolerance: f64 },

    /// Matrix has the wrong shape for the requested operation
    #[error("Dimension mismatch: expected {expected_rows}x{expected_cols}, got {rows}x{cols}")]
    DimensionMismatch {
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },
}

/// Result type for linear algebra operations
pub type LinAlgResult<T> = Result<T, LinAlgError>;

/// P ← ½(P + Pᵀ)
pub fn symmetrize(matrix: &Matrix6<f64>) -> Matrix6<f64> {
    0.5 * (matrix + matrix.transpose())
}

/// Dynamic-size counterpart of [`symmetrize`].
pub fn symmetrize_dynamic(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    0.5 * (matrix + matrix.transpose())
}

/// Largest absolute difference between `m` and `mᵀ`.
pub fn max_asymmetry(matrix: &DMatrix<f64>) -> f64 {
    (matrix - matrix.transpose()).abs().max()
}

/// Check that `matrix` is square and symmetric within an absolute tolerance.
pub fn check_symmetric(matrix: &DMatrix<f64>, tolerance: f64) -> LinAlgResult<()> {
    check_square(matrix, matrix.nrows())?;
    let asymmetry = max_asymmetry(matrix);
    if asymmetry.is_nan() || asymmetry > tolerance {
        return Err(LinAlgError::NotSymmetric {
            asymmetry,
            tolerance,
        });
    }
    Ok(())
}

/// Check the shape of a square matrix.
pub fn check_square(matrix: &DMatrix<f64>, dimension: usize) -> LinAlgResult<()> {
    if matrix.nrows() != dimension || matrix.ncols() != dimension {
        return Err(LinAlgError::DimensionMismatch {
            expected_rows: dimension,
            expected_cols: dimension,
            rows: matrix.nrows(),
            cols: matrix.ncols(),
        });
    }
    Ok(())
}

/// Smallest eigenvalue of the symmetric part of `matrix`.
pub fn min_eigenvalue(matrix: &DMatrix<f64>) -> f64 {
    SymmetricEigen::new(symmetrize_dynamic(matrix))
        .eigenvalues
        .min()
}

/// Check positive semi-definiteness of the symmetric part of `matrix`.
///
/// Eigenvalues down to `-tolerance * max(1, max|mᵢⱼ|)` are accepted as rounding noise.
pub fn check_positive_semidefinite(matrix: &DMatrix<f64>, tolerance: f64) -> LinAlgResult<()> {
    if !matrix.iter().all(|v| v.is_finite()) {
        return Err(LinAlgError::NotPositiveDefinite(
            "matrix has non-finite entries".to_string(),
        ));
    }
    let scale = matrix.abs().max().max(1.0);
    let min_eig = min_eigenvalue(matrix);
    if min_eig < -tolerance * scale {
        return Err(LinAlgError::NotPositiveDefinite(format!(
            "smallest eigenvalue {min_eig:e}"
        )));
    }
    Ok(())
}

/// Symmetry and positive semi-definiteness in one call, as required of every
/// covariance handed to a filter or model.
pub fn check_covariance(
    matrix: &DMatrix<f64>,
    symmetry_tolerance: f64,
    psd_tolerance: f64,
) -> LinAlgResult<()> {
    check_symmetric(matrix, symmetry_tolerance)?;
    check_positive_semidefinite(matrix, psd_tolerance)
}

/// Convenience predicate around [`check_symmetric`].
pub fn is_symmetric(matrix: &DMatrix<f64>, tolerance: f64) -> bool {
    check_symmetric(matrix, tolerance).is_ok()
}

/// Convenience predicate around [`check_positive_semidefinite`].
pub fn is_positive_semidefinite(matrix: &DMatrix<f64>, tolerance: f64) -> bool {
    check_positive_semidefinite(matrix, tolerance).is_ok()
}

/// Copy a 6×6 matrix into a dynamic one.
pub fn to_dynamic(matrix: &Matrix6<f64>) -> DMatrix<f64> {
    DMatrix::from_column_slice(6, 6, matrix.as_slice())
}

/// Copy a dynamic 6×6 matrix into a fixed one.
pub fn to_matrix6(matrix: &DMatrix<f64>) -> LinAlgResult<Matrix6<f64>> {
    check_square(matrix, 6)?;
    Ok(Matrix6::from_column_slice(matrix.as_slice()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetrize_removes_asymmetry() {
        let mut p = Matrix6::identity();
        p[(0, 1)] = 1e-3;
        let s = symmetrize(&p);
        assert_eq!(s, s.transpose());
        assert_eq!(s[(0, 1)], 5e-4);
    }

    #[test]
    fn test_check_symmetric() {
        let mut m = DMatrix::<f64>::identity(3, 3);
        assert!(check_symmetric(&m, 1e-12).is_ok());
        m[(2, 0)] = 1e-6;
        assert!(matches!(
            check_symmetric(&m, 1e-9),
            Err(LinAlgError::NotSymmetric { .. })
        ));
        let rect = DMatrix::<f64>::zeros(2, 3);
        assert!(matches!(
            check_symmetric(&rect, 1e-9),
            Err(LinAlgError::DimensionMismatch { .. })
        ));
        assert!(is_symmetric(&m, 1e-5));
        assert!(!is_symmetric(&m, 1e-7));
    }

    #[test]
    fn test_positive_semidefinite_checks() {
        let zero = DMatrix::<f64>::zeros(4, 4);
        assert!(is_positive_semidefinite(&zero, 1e-12));

        let mut indefinite = DMatrix::<f64>::identity(3, 3);
        indefinite[(2, 2)] = -0.5;
        assert!(!is_positive_semidefinite(&indefinite, 1e-12));

        let mut nan = DMatrix::<f64>::identity(2, 2);
        nan[(0, 0)] = f64::NAN;
        assert!(!is_positive_semidefinite(&nan, 1e-12));
    }

    #[test]
    fn test_fixed_dynamic_roundtrip() {
        let p = Matrix6::from_fn(|i, j| (i * 6 + j) as f64);
        let back = to_matrix6(&to_dynamic(&p)).unwrap();
        assert_eq!(p, back);
        assert!(to_matrix6(&DMatrix::zeros(3, 3)).is_err());
    }
}
