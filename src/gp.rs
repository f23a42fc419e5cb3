//! Gaussian-process primitives for parameter drift.
//!
//! This module provides:
//! - A [`SquaredExponential`] covariance function with per-slot scale and
//!   signal variance.
//! - A [`GpPrior`] over a fixed input grid with a constant mean function:
//!   log-density evaluation, sampling, and the noiseless predictive
//!   posterior mean at new inputs.
//!
//! Conventions:
//! - Inputs are one-dimensional (timestamp indices); the series container
//!   places one independent GP per drifting parameter slot.
//! - The predictive path is deterministic: drift extension consumes the
//!   posterior **mean**, never a sample. Sampling exists only for drawing
//!   fresh parameter paths from the prior.

use crate::utils::{mvn_ln_pdf, MIN_LOG_PROB};
use nalgebra::{Cholesky, DMatrix, DVector};
use rand::Rng;

/// Squared-exponential covariance function.
///
/// `k(x, x') = σ² · exp(−(x − x')² / (2ℓ²))` with length scale `ℓ` and
/// signal variance `σ²`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SquaredExponential {
    pub scale: f64,
    pub signal_variance: f64,
}

impl SquaredExponential {
    pub fn new(scale: f64, signal_variance: f64) -> Self {
        SquaredExponential { scale, signal_variance }
    }

    /// Evaluate the kernel at distance `r = x − x'`.
    pub fn weight(&self, r: f64) -> f64 {
        self.signal_variance * (-(r * r) / (2.0 * self.scale * self.scale)).exp()
    }

    /// Covariance matrix between two input grids.
    pub fn covariance(&self, rows: &[f64], cols: &[f64]) -> DMatrix<f64> {
        DMatrix::from_fn(rows.len(), cols.len(), |i, j| self.weight(rows[i] - cols[j]))
    }
}

/// A Gaussian-process prior with constant mean over a fixed input grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GpPrior {
    mean: f64,
    kernel: SquaredExponential,
    inputs: Vec<f64>,
}

impl GpPrior {
    pub fn new(mean: f64, kernel: SquaredExponential, inputs: Vec<f64>) -> Self {
        GpPrior { mean, kernel, inputs }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn set_mean(&mut self, mean: f64) {
        self.mean = mean;
    }

    pub fn kernel(&self) -> &SquaredExponential {
        &self.kernel
    }

    pub fn set_kernel(&mut self, kernel: SquaredExponential) {
        self.kernel = kernel;
    }

    pub fn inputs(&self) -> &[f64] {
        &self.inputs
    }

    /// Log-density of a full output path under the prior.
    ///
    /// Returns [`MIN_LOG_PROB`] on a dimension mismatch or a
    /// non-positive-definite covariance, per the crate sentinel policy.
    pub fn ln_pdf(&self, outputs: &[f64]) -> f64 {
        if outputs.len() != self.inputs.len() {
            return MIN_LOG_PROB;
        }
        let mean = DVector::from_element(self.inputs.len(), self.mean);
        let cov = self.kernel.covariance(&self.inputs, &self.inputs);
        mvn_ln_pdf(&mean, &cov, &DVector::from_column_slice(outputs))
    }

    /// Draw one output path from the prior.
    ///
    /// Returns `None` when the covariance is not positive definite.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Vec<f64>> {
        let cov = self.kernel.covariance(&self.inputs, &self.inputs);
        let chol = Cholesky::new(cov)?;
        let z = DVector::from_fn(self.inputs.len(), |_, _| standard_normal(rng));
        let path = chol.l() * z;
        Some(path.iter().map(|v| v + self.mean).collect())
    }

    /// Noiseless predictive posterior mean at `test_inputs`, conditioned on
    /// `(train_inputs, train_outputs)`.
    ///
    /// `μ* = m + K*ᵀ K⁻¹ (y − m)`; one Cholesky factorization serves the
    /// solve. Returns `None` when the training covariance is not positive
    /// definite.
    pub fn posterior_mean(
        &self,
        train_inputs: &[f64],
        train_outputs: &[f64],
        test_inputs: &[f64],
    ) -> Option<Vec<f64>> {
        debug_assert_eq!(train_inputs.len(), train_outputs.len());
        let k_train = self.kernel.covariance(train_inputs, train_inputs);
        let chol = Cholesky::new(k_train)?;
        let centered = DVector::from_fn(train_outputs.len(), |i, _| train_outputs[i] - self.mean);
        let alpha = chol.solve(&centered);
        let k_cross = self.kernel.covariance(test_inputs, train_inputs);
        let mu = k_cross * alpha;
        Some(mu.iter().map(|v| v + self.mean).collect())
    }
}

/// One standard-normal draw via Box–Muller; keeps the `rand` surface to
/// uniform sampling so no extra distribution crate is pulled in here.
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
