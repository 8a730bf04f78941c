//! Dense linear-algebra helpers over `nalgebra` used by the multivariate distributions and the
//! Kalman update.
//!
//! Matrices are stored row-major in node values.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use rand::RngCore;
use statrs::distribution::Normal;

pub type CholeskyFactor = Cholesky<f64, Dyn>;

const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// Build a square matrix from row-major values.
pub fn square_from_row_slice(values: &[f64]) -> Result<DMatrix<f64>, String> {
    let n = (values.len() as f64).sqrt().round() as usize;
    if n * n != values.len() {
        return Err(format!("{} values do not form a square matrix", values.len()));
    }
    Ok(DMatrix::from_row_slice(n, n, values))
}

/// Flatten a matrix to row-major values.
pub fn to_row_major(m: &DMatrix<f64>) -> Vec<f64> {
    m.transpose().iter().cloned().collect()
}

/// Cholesky factorization; fails when the matrix is not symmetric positive definite.
pub fn cholesky(m: DMatrix<f64>) -> Result<CholeskyFactor, String> {
    if !m.is_square() {
        return Err(format!("matrix of shape {}x{} is not square", m.nrows(), m.ncols()));
    }
    if m.iter().any(|v| !v.is_finite()) {
        return Err("matrix has non-finite entries".to_string());
    }
    Cholesky::new(m).ok_or_else(|| "matrix is not positive definite".to_string())
}

/// Invert a symmetric positive definite matrix through its Cholesky factor.
pub fn inverse_spd(m: DMatrix<f64>) -> Result<DMatrix<f64>, String> {
    let chol = cholesky(m)?;
    Ok(symmetrize(chol.inverse()))
}

/// Log determinant from a Cholesky factor.
pub fn log_det(chol: &CholeskyFactor) -> f64 {
    let l = chol.l_dirty();
    2.0 * (0..l.nrows()).map(|i| l[(i, i)].ln()).sum::<f64>()
}

/// `(m + mᵀ) / 2`, removing round-off asymmetry.
pub fn symmetrize(m: DMatrix<f64>) -> DMatrix<f64> {
    let t = m.transpose();
    (m + t) * 0.5
}

/// Log density of `x` under `N(mean, Σ)` with `chol` the Cholesky factor of `Σ`.
pub fn mvn_log_density(x: &DVector<f64>, mean: &DVector<f64>, chol: &CholeskyFactor) -> f64 {
    let r = x - mean;
    let solved = chol.solve(&r);
    let quad = r.dot(&solved);
    -0.5 * (x.len() as f64 * LN_2PI + log_det(chol) + quad)
}

/// Draw from `N(mean, Σ)` with `chol` the Cholesky factor of `Σ`.
pub fn sample_mvn(mean: &DVector<f64>, chol: &CholeskyFactor, rng: &mut dyn RngCore) -> DVector<f64> {
    use rand::distributions::Distribution;

    let std_normal = Normal::standard();
    let z = DVector::from_iterator(mean.len(), (0..mean.len()).map(|_| std_normal.sample(&mut *rng)));
    mean + chol.l_dirty().lower_triangle() * z
}
