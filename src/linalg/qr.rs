//! QR triangularisation for square-root covariance updates.

use nalgebra::DMatrix;

use super::{LinAlgError, LinAlgResult};

/// Upper-triangular `R` (n×n) of a tall `m×n` matrix `A` (m ≥ n), with
/// `RᵀR = AᵀA` and a non-negative diagonal.
///
/// Householder QR leaves the sign of each diagonal entry arbitrary; rows with a
/// negative diagonal are flipped, which leaves `RᵀR` unchanged.
pub fn triangularize(matrix: &DMatrix<f64>) -> LinAlgResult<DMatrix<f64>> {
    let (rows, cols) = matrix.shape();
    if rows < cols {
        return Err(LinAlgError::DimensionMismatch {
            expected_rows: cols,
            expected_cols: cols,
            rows,
            cols,
        });
    }
    if !matrix.iter().all(|v| v.is_finite()) {
        return Err(LinAlgError::Singular(
            "cannot triangularize a matrix with non-finite entries".to_string(),
        ));
    }

    let mut upper = matrix.clone().qr().r();
    for (i, mut row) in upper.row_iter_mut().enumerate() {
        if row[i] < 0.0 {
            row.neg_mut();
        }
    }
    Ok(upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triangularize_preserves_gram_matrix() {
        let a = DMatrix::from_row_slice(
            4,
            3,
            &[1.0, -2.0, 0.5, 0.3, 0.8, -1.1, -0.7, 0.1, 2.0, 1.5, 0.4, 0.2],
        );
        let r = triangularize(&a).unwrap();
        assert_eq!(r.shape(), (3, 3));
        assert!((r.transpose() * &r - a.transpose() * &a).norm() < 1e-12);
        for i in 0..3 {
            assert!(r[(i, i)] >= 0.0);
            for j in 0..i {
                assert_eq!(r[(i, j)], 0.0);
            }
        }
    }

    #[test]
    fn test_triangularize_rejects_wide_matrix() {
        let a = DMatrix::<f64>::zeros(2, 3);
        assert!(matches!(
            triangularize(&a),
            Err(LinAlgError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_triangularize_rejects_nan() {
        let mut a = DMatrix::<f64>::identity(3, 3);
        a[(1, 2)] = f64::NAN;
        assert!(triangularize(&a).is_err());
    }
}
