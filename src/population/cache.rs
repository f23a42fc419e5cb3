//! Cached sufficient statistics for the Bayesian linear regression.
//!
//! One [`RegressionCache`] per cluster. The container maintains, per
//! shared-parameter slot, the stacked design matrix products an external
//! Bayesian-linear-regression posterior update consumes:
//!
//! - `x_t_k_inv` — `Xᵀ K⁻¹` (design transpose times covariance inverse),
//! - `x_t_k_inv_x` — `Xᵀ K⁻¹ X`,
//! - `x_blocks` — the raw per-series design blocks,
//! - `k_inv` — the per-series GP covariance inverses (drifting slots),
//! - `y_t_k_inv_y` — the `yᵀ K⁻¹ y` accumulator for the regression
//!   likelihood.
//!
//! For non-drifting slots `K` is the identity and the products collapse
//! to plain `Xᵀ` / `Xᵀ X`.

use nalgebra::DMatrix;

/// Per-cluster regression cache; rebuilt exactly when the design or the
/// GP hyperparameters of a slot change.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionCache {
    /// `Xᵀ K⁻¹`, indexed by slot.
    pub x_t_k_inv: Vec<DMatrix<f64>>,
    /// `Xᵀ K⁻¹ X`, indexed by slot.
    pub x_t_k_inv_x: Vec<DMatrix<f64>>,
    /// Raw design blocks, indexed `[slot][series]`.
    pub x_blocks: Vec<Vec<DMatrix<f64>>>,
    /// GP covariance inverses, indexed `[slot][series]`.
    pub k_inv: Vec<Vec<DMatrix<f64>>>,
    /// `yᵀ K⁻¹ y` accumulators, indexed by slot.
    pub y_t_k_inv_y: Vec<f64>,
}

impl RegressionCache {
    /// Empty cache sized for `num_slots` shared-parameter slots over
    /// `num_series` series.
    pub fn new(num_slots: usize, num_series: usize) -> Self {
        RegressionCache {
            x_t_k_inv: vec![DMatrix::zeros(0, 0); num_slots],
            x_t_k_inv_x: vec![DMatrix::zeros(0, 0); num_slots],
            x_blocks: vec![vec![DMatrix::zeros(0, 0); num_series]; num_slots],
            k_inv: vec![vec![DMatrix::zeros(0, 0); num_series]; num_slots],
            y_t_k_inv_y: vec![0.0; num_slots],
        }
    }

    /// Zero the `yᵀ K⁻¹ y` accumulators before a fresh pass.
    pub fn reset_y_stats(&mut self) {
        for v in self.y_t_k_inv_y.iter_mut() {
            *v = 0.0;
        }
    }
}
