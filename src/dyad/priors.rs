//! Log-prior evaluation for a series container.
//!
//! Three priors, one per parameter family:
//! - an independent-Gaussian prior over fixed dynamics parameters,
//! - an independent-Gaussian prior over polynomial trend coefficients,
//! - a Gaussian-process prior over drifting dynamics parameters.
//!
//! All three follow the crate sentinel policy: any NaN/Inf mean,
//! non-positive variance, or degenerate GP hyperparameter yields
//! [`MIN_LOG_PROB`] instead of an error, so an outer sampler can reject
//! the proposal and continue.

use crate::dyad::errors::DyadResult;
use crate::dyad::series::Dyad;
use crate::utils::{gauss_ln_pdf, MIN_LOG_PROB};

/// Degeneracy threshold for GP hyperparameters.
const GP_HYPER_EPS: f64 = 1e-7;

impl Dyad {
    /// Independent-Gaussian log-prior over the fixed dynamics parameters.
    ///
    /// Zero when no prior has been configured; the sentinel on any
    /// NaN/Inf mean or variance, or a negative variance.
    pub fn clo_log_prior(&self) -> f64 {
        if self.clo_means.is_empty() || self.clo_variances.is_empty() {
            return 0.0;
        }
        debug_assert!(!self.drift);
        debug_assert_eq!(self.clo_means.len(), self.clo_variances.len());
        let mut total = 0.0;
        for (slot, (&mean, &variance)) in
            self.clo_means.iter().zip(self.clo_variances.iter()).enumerate()
        {
            if !mean.is_finite() || !variance.is_finite() || variance < 0.0 {
                return MIN_LOG_PROB;
            }
            for clo in &self.clos {
                let value = clo.params()[slot];
                let term = gauss_ln_pdf(mean, variance.sqrt(), value);
                if term == MIN_LOG_PROB {
                    return MIN_LOG_PROB;
                }
                total += term;
            }
        }
        total
    }

    /// Independent-Gaussian log-prior over the polynomial coefficients.
    pub fn polynomial_log_prior(&self) -> f64 {
        if self.polynomial_means.is_empty() || self.polynomial_variances.is_empty() {
            return 0.0;
        }
        let mut total = 0.0;
        for (osc, coefs) in self.polynomial_coefs.iter().enumerate() {
            for (term, &value) in coefs.iter().enumerate() {
                let mean = self.polynomial_means[osc][term];
                let variance = self.polynomial_variances[osc][term];
                if !mean.is_finite() || !variance.is_finite() || variance <= 0.0 {
                    return MIN_LOG_PROB;
                }
                let contribution = gauss_ln_pdf(mean, variance.sqrt(), value);
                if contribution == MIN_LOG_PROB {
                    return MIN_LOG_PROB;
                }
                total += contribution;
            }
        }
        total
    }

    /// Gaussian-process log-prior over the drifting parameter paths.
    ///
    /// Zero when drift is disabled. Degenerate hyperparameters (scale or
    /// signal variance at or below the numerical floor) yield the
    /// sentinel. Requires `init_gp` to have run.
    pub fn drift_log_prior(&mut self) -> DyadResult<f64> {
        if !self.drift {
            return Ok(0.0);
        }
        for (&scale, &sigvar) in self.gp_scales.iter().zip(self.gp_sigvars.iter()) {
            if scale <= GP_HYPER_EPS || sigvar <= GP_HYPER_EPS {
                return Ok(MIN_LOG_PROB);
            }
        }
        self.update_gp()?;
        let outputs = self.gp_outputs();
        let mut total = 0.0;
        for (prior, path) in self.gp_priors.iter().zip(outputs.iter()) {
            let term = prior.ln_pdf(path);
            if term == MIN_LOG_PROB {
                return Ok(MIN_LOG_PROB);
            }
            total += term;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oscillator::{CoupledOscillator, Parameterization};
    use approx::assert_relative_eq;
    use nalgebra::DVector;
    use ndarray::Array1;
    use std::collections::BTreeMap;

    fn dyad(num_times: usize, drift: bool) -> Dyad {
        let times: Vec<f64> = (0..num_times).map(|t| t as f64).collect();
        let unit = CoupledOscillator::new::<rand::rngs::StdRng>(
            2,
            5.0,
            0.1,
            Parameterization::Real,
            None,
        )
        .unwrap();
        let clos = if drift { vec![unit; num_times - 1] } else { vec![unit] };
        Dyad::new(
            times,
            DVector::zeros(4),
            clos,
            vec!["affect".to_string()],
            Array1::from_elem(1, 0.5),
            Some(1),
            Vec::new(),
            &BTreeMap::new(),
            0,
            false,
        )
        .unwrap()
    }

    #[test]
    fn unconfigured_priors_contribute_nothing() {
        let mut d = dyad(4, false);
        assert_eq!(d.clo_log_prior(), 0.0);
        assert_eq!(d.polynomial_log_prior(), 0.0);
        assert_eq!(d.drift_log_prior().unwrap(), 0.0);
    }

    #[test]
    fn clo_prior_sums_per_parameter_densities() {
        let mut d = dyad(4, false);
        let p = d.num_clo_params();
        for slot in 0..p {
            d.set_clo_mean(slot, 0.0).unwrap();
            d.set_clo_variance(slot, 4.0).unwrap();
        }
        let expected: f64 = (0..p)
            .map(|slot| {
                crate::utils::gauss_ln_pdf(0.0, 2.0, d.oscillators()[0].params()[slot])
            })
            .sum();
        assert_relative_eq!(d.clo_log_prior(), expected, epsilon = 1e-10);
    }

    #[test]
    fn negative_variance_hits_the_sentinel() {
        let mut d = dyad(4, false);
        d.set_clo_mean(0, 0.0).unwrap();
        d.set_clo_variance(0, -1.0).unwrap();
        for slot in 1..d.num_clo_params() {
            d.set_clo_mean(slot, 0.0).unwrap();
            d.set_clo_variance(slot, 1.0).unwrap();
        }
        assert_eq!(d.clo_log_prior(), MIN_LOG_PROB);
    }

    #[test]
    fn polynomial_prior_sentinels_on_zero_variance() {
        let mut d = dyad(4, false);
        d.set_polynomial_mean(0, 0, 0.0).unwrap();
        d.set_polynomial_var(0, 0, 0.0).unwrap();
        assert_eq!(d.polynomial_log_prior(), MIN_LOG_PROB);
    }

    #[test]
    fn drift_prior_sentinels_on_degenerate_scale() {
        let mut d = dyad(5, true);
        let p = d.num_clo_params();
        d.init_gp(vec![1.0; p], vec![1.0; p], vec![0.0; p]).unwrap();
        d.set_gp_scale(0, 0.0).unwrap();
        assert_eq!(d.drift_log_prior().unwrap(), MIN_LOG_PROB);
    }

    #[test]
    fn drift_prior_is_finite_for_sane_hyperparameters() {
        let mut d = dyad(5, true);
        let p = d.num_clo_params();
        d.init_gp(vec![1.5; p], vec![1.0; p], vec![0.0; p]).unwrap();
        let value = d.drift_log_prior().unwrap();
        assert!(value.is_finite());
        assert!(value > MIN_LOG_PROB);
    }
}
