//! Cholesky factorisations and PSD square roots.
//!
//! `cholesky_*` require a strictly positive definite input and are used where a
//! breakdown must surface as a numerical failure (innovation covariances).
//! `psd_sqrt_*` accept singular PSD inputs such as a zero process noise and fall
//! back to a symmetric eigen decomposition.

use nalgebra::{Cholesky, DMatrix, Dyn, SymmetricEigen};

use super::{LinAlgError, LinAlgResult, check_positive_semidefinite, symmetrize_dynamic, triangularize};

/// Tolerance used by the PSD square roots when deciding that an eigenvalue is
/// rounding noise rather than a genuinely negative direction.
const PSD_EIGEN_TOLERANCE: f64 = 1e-10;

/// Cholesky decomposition of a symmetric positive definite matrix (lower triangle is read).
pub fn cholesky(matrix: &DMatrix<f64>) -> LinAlgResult<Cholesky<f64, Dyn>> {
    if !matrix.iter().all(|v| v.is_finite()) {
        return Err(LinAlgError::NotPositiveDefinite(
            "matrix has non-finite entries".to_string(),
        ));
    }
    Cholesky::new(matrix.clone()).ok_or_else(|| {
        LinAlgError::NotPositiveDefinite(format!(
            "Cholesky factorisation failed for {}x{} matrix",
            matrix.nrows(),
            matrix.ncols()
        ))
    })
}

/// Lower factor `L` with `L Lᵀ = matrix`.
pub fn cholesky_lower(matrix: &DMatrix<f64>) -> LinAlgResult<DMatrix<f64>> {
    Ok(cholesky(matrix)?.l())
}

/// Upper factor `U` with `Uᵀ U = matrix`.
pub fn cholesky_upper(matrix: &DMatrix<f64>) -> LinAlgResult<DMatrix<f64>> {
    Ok(cholesky(matrix)?.l().transpose())
}

/// Upper-triangular `U` with non-negative diagonal and `Uᵀ U = matrix` for any
/// symmetric PSD `matrix`, including singular ones.
pub fn psd_sqrt_upper(matrix: &DMatrix<f64>) -> LinAlgResult<DMatrix<f64>> {
    let symmetric = symmetrize_dynamic(matrix);
    if let Ok(upper) = cholesky_upper(&symmetric) {
        return Ok(upper);
    }

    check_positive_semidefinite(&symmetric, PSD_EIGEN_TOLERANCE)?;

    // A = Λ^½ Vᵀ satisfies AᵀA = V Λ Vᵀ; QR brings it back to triangular form.
    let eigen = SymmetricEigen::new(symmetric);
    let sqrt_values = eigen.eigenvalues.map(|value| value.max(0.0).sqrt());
    let mut root = eigen.eigenvectors.transpose();
    for (mut row, scale) in root.row_iter_mut().zip(sqrt_values.iter()) {
        row *= *scale;
    }
    triangularize(&root)
}

/// Lower-triangular `L` with non-negative diagonal and `L Lᵀ = matrix` for any
/// symmetric PSD `matrix`. Columns keep the natural order of the Cholesky factor.
pub fn psd_sqrt_lower(matrix: &DMatrix<f64>) -> LinAlgResult<DMatrix<f64>> {
    Ok(psd_sqrt_upper(matrix)?.transpose())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spd_matrix() -> DMatrix<f64> {
        let a = DMatrix::from_row_slice(3, 3, &[2.0, 0.5, 0.1, 0.0, 1.5, -0.3, 0.4, 0.2, 1.0]);
        &a * a.transpose() + DMatrix::identity(3, 3) * 0.1
    }

    #[test]
    fn test_cholesky_factors_reconstruct() {
        let p = spd_matrix();
        let lower = cholesky_lower(&p).unwrap();
        let upper = cholesky_upper(&p).unwrap();
        assert!((&lower * lower.transpose() - &p).norm() < 1e-12);
        assert!((upper.transpose() * &upper - &p).norm() < 1e-12);
        assert_eq!(upper[(1, 0)], 0.0);
        assert_eq!(upper[(2, 0)], 0.0);
        assert_eq!(upper[(2, 1)], 0.0);
    }

    #[test]
    fn test_cholesky_rejects_zero_and_indefinite() {
        assert!(matches!(
            cholesky(&DMatrix::zeros(3, 3)),
            Err(LinAlgError::NotPositiveDefinite(_))
        ));
        let mut indefinite = DMatrix::<f64>::identity(2, 2);
        indefinite[(1, 1)] = -1.0;
        assert!(cholesky(&indefinite).is_err());
    }

    #[test]
    fn test_psd_sqrt_of_zero_matrix() {
        let upper = psd_sqrt_upper(&DMatrix::zeros(6, 6)).unwrap();
        assert!(upper.norm() < 1e-15);
    }

    #[test]
    fn test_psd_sqrt_of_singular_matrix() {
        let v = DMatrix::from_column_slice(4, 1, &[1.0, -2.0, 0.5, 3.0]);
        let p = &v * v.transpose();
        let upper = psd_sqrt_upper(&p).unwrap();
        assert!((upper.transpose() * &upper - &p).norm() < 1e-10);
        for i in 0..4 {
            assert!(upper[(i, i)] >= 0.0);
            for j in 0..i {
                assert_eq!(upper[(i, j)], 0.0);
            }
        }
        let lower = psd_sqrt_lower(&p).unwrap();
        assert!((&lower * lower.transpose() - &p).norm() < 1e-10);
    }

    #[test]
    fn test_psd_sqrt_rejects_indefinite() {
        let mut indefinite = DMatrix::<f64>::identity(3, 3);
        indefinite[(0, 0)] = -0.1;
        assert!(psd_sqrt_upper(&indefinite).is_err());
    }
}
