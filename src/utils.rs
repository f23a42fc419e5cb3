//! Shared numerical helpers used across the crate.
//!
//! Purpose
//! -------
//! Collect the small, dependency-light routines that more than one module
//! needs: the sentinel log-probability returned on numerical pathologies,
//! univariate and multivariate Gaussian log-densities, and a couple of
//! vector utilities.
//!
//! Key behaviors
//! -------------
//! - [`MIN_LOG_PROB`] is the most-negative representable `f64`. Likelihood
//!   and prior evaluators return it instead of raising when they encounter
//!   NaN/Inf predictions or degenerate variances, so sampling loops stay
//!   exception-free on invalid-but-expected proposals.
//! - [`gauss_ln_pdf`] wraps `statrs` and maps any invalid configuration
//!   (non-finite mean, non-positive sigma) to [`MIN_LOG_PROB`].
//! - [`mvn_ln_pdf`] evaluates a multivariate normal log-density through an
//!   explicit Cholesky factorization; a non-positive-definite covariance
//!   yields [`MIN_LOG_PROB`].
//!
//! Conventions
//! -----------
//! - All Gaussian helpers take a *standard deviation* or full covariance,
//!   never a variance, unless the name says otherwise.

use nalgebra::{Cholesky, DMatrix, DVector};
use statrs::distribution::{Continuous, Normal};

/// Sentinel log-probability for numerically invalid configurations.
///
/// Returned by likelihood and prior evaluators instead of an error so that
/// an outer sampler can reject the proposal and move on.
pub const MIN_LOG_PROB: f64 = f64::MIN;

/// ln(2π), precomputed for Gaussian normalizing constants.
pub const LN_2PI: f64 = 1.837877066409345483560659472811;

/// Univariate Gaussian log-density.
///
/// Returns [`MIN_LOG_PROB`] when `sigma` is non-positive or any argument is
/// non-finite, matching the crate-wide sentinel policy.
pub fn gauss_ln_pdf(mean: f64, sigma: f64, x: f64) -> f64 {
    if !mean.is_finite() || !sigma.is_finite() || !x.is_finite() || sigma <= 0.0 {
        return MIN_LOG_PROB;
    }
    match Normal::new(mean, sigma) {
        Ok(dist) => dist.ln_pdf(x),
        Err(_) => MIN_LOG_PROB,
    }
}

/// Multivariate Gaussian log-density via Cholesky factorization.
///
/// Evaluates `ln N(x; mean, cov)` as
/// `-0.5 (k ln 2π + ln |cov| + rᵀ cov⁻¹ r)` with `r = x − mean`, using one
/// Cholesky factorization for both the determinant and the solve.
///
/// Returns [`MIN_LOG_PROB`] when the covariance is not positive definite or
/// when any intermediate quantity is non-finite.
pub fn mvn_ln_pdf(mean: &DVector<f64>, cov: &DMatrix<f64>, x: &DVector<f64>) -> f64 {
    debug_assert_eq!(mean.len(), x.len());
    debug_assert_eq!(cov.nrows(), mean.len());
    let chol = match Cholesky::new(cov.clone()) {
        Some(c) => c,
        None => return MIN_LOG_PROB,
    };
    let k = mean.len() as f64;
    let ln_det: f64 = chol.l().diagonal().iter().map(|d| 2.0 * d.ln()).sum();
    let resid = x - mean;
    let solved = chol.solve(&resid);
    let maha = resid.dot(&solved);
    let ll = -0.5 * (k * LN_2PI + ln_det + maha);
    if ll.is_finite() {
        ll
    } else {
        MIN_LOG_PROB
    }
}

/// Transpose a rectangular `[row][col]` vector-of-vectors into `[col][row]`.
///
/// Used when turning per-interval parameter vectors into per-parameter
/// series for the Gaussian-process layer. Panics in debug builds if the
/// rows are ragged.
pub fn transpose_vecs(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    if rows.is_empty() {
        return Vec::new();
    }
    let cols = rows[0].len();
    let mut out = vec![Vec::with_capacity(rows.len()); cols];
    for row in rows {
        debug_assert_eq!(row.len(), cols);
        for (c, v) in row.iter().enumerate() {
            out[c].push(*v);
        }
    }
    out
}

/// True when every element of the slice is finite.
pub fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn gauss_ln_pdf_matches_standard_normal_at_zero() {
        // ln N(0; 0, 1) = -0.5 ln(2π)
        assert_relative_eq!(gauss_ln_pdf(0.0, 1.0, 0.0), -0.5 * LN_2PI, epsilon = 1e-12);
    }

    #[test]
    fn gauss_ln_pdf_sentinels_on_bad_sigma() {
        assert_eq!(gauss_ln_pdf(0.0, 0.0, 1.0), MIN_LOG_PROB);
        assert_eq!(gauss_ln_pdf(0.0, -1.0, 1.0), MIN_LOG_PROB);
        assert_eq!(gauss_ln_pdf(f64::NAN, 1.0, 1.0), MIN_LOG_PROB);
    }

    #[test]
    fn mvn_ln_pdf_reduces_to_univariate() {
        let mean = DVector::from_vec(vec![1.5]);
        let cov = DMatrix::from_vec(1, 1, vec![4.0]);
        let x = DVector::from_vec(vec![0.5]);
        assert_relative_eq!(
            mvn_ln_pdf(&mean, &cov, &x),
            gauss_ln_pdf(1.5, 2.0, 0.5),
            epsilon = 1e-12
        );
    }

    #[test]
    fn mvn_ln_pdf_sentinels_on_non_psd() {
        let mean = DVector::zeros(2);
        let cov = DMatrix::from_vec(2, 2, vec![1.0, 2.0, 2.0, 1.0]);
        let x = DVector::zeros(2);
        assert_eq!(mvn_ln_pdf(&mean, &cov, &x), MIN_LOG_PROB);
    }

    #[test]
    fn transpose_vecs_flips_layout() {
        let rows = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]];
        let cols = transpose_vecs(&rows);
        assert_eq!(cols, vec![vec![1.0, 3.0, 5.0], vec![2.0, 4.0, 6.0]]);
    }
}
