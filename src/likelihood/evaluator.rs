//! Gaussian observation likelihood for one series.
//!
//! Purpose
//! -------
//! Compare the predicted observable trajectories of a series container to
//! the observed data and accumulate an independent-Gaussian log-density
//! over every valid (non-missing) pair. The evaluator borrows the
//! observed data and owns only its evaluation window: a start index and
//! an optional sparse time-index subset.
//!
//! Key behaviors
//! -------------
//! - Missing observations (`NaN` in the data) are skipped.
//! - Any numerical pathology — a failed state update, a non-finite
//!   prediction, a non-positive/non-finite noise sigma — immediately
//!   yields [`MIN_LOG_PROB`] rather than an error, so an outer sampler
//!   can reject the proposal and continue.

use crate::data::SeriesData;
use crate::dyad::Dyad;
use crate::utils::MIN_LOG_PROB;
use crate::utils::LN_2PI;

/// Likelihood evaluator over one series' observed data.
#[derive(Debug, Clone)]
pub struct Likelihood<'a> {
    data: &'a SeriesData,
    start_index: usize,
    time_indices: Option<Vec<usize>>,
}

impl<'a> Likelihood<'a> {
    /// Dense evaluator from `start_index` to the end of the grid.
    pub fn new(data: &'a SeriesData, start_index: usize) -> Self {
        Likelihood { data, start_index, time_indices: None }
    }

    /// Restrict evaluation to a sparse, sorted time-index subset.
    pub fn with_time_indices(mut self, indices: Vec<usize>) -> Self {
        self.time_indices = Some(indices);
        self
    }

    pub fn data(&self) -> &SeriesData {
        self.data
    }

    pub fn start_index(&self) -> usize {
        self.start_index
    }

    /// Log-probability of the observed data under the series' current
    /// parameters.
    ///
    /// Predictions come from the series' state accessor (dense, or
    /// subsetted when time indices were supplied); observed values are
    /// looked up by observable name and per-oscillator component.
    pub fn log_prob(&self, dyad: &mut Dyad) -> f64 {
        let (predictions, time_positions): (Vec<_>, Vec<usize>) = match &self.time_indices {
            Some(indices) => match dyad.states_at(indices) {
                Ok(states) => (states, indices.clone()),
                Err(_) => return MIN_LOG_PROB,
            },
            None => match dyad.states() {
                Ok(states) => (states.to_vec(), (0..states.len()).collect()),
                Err(_) => return MIN_LOG_PROB,
            },
        };

        let num_oscillators = dyad.num_oscillators();
        let obs_names: Vec<String> = dyad.obs_names().to_vec();
        let sigmas = dyad.noise_sigmas().clone();
        let mut total = 0.0;
        for (row, &time_index) in predictions.iter().zip(time_positions.iter()) {
            if time_index < self.start_index {
                continue;
            }
            for (obs_index, name) in obs_names.iter().enumerate() {
                let observed = match self.data.observables.get(name) {
                    Some(series) => series,
                    None => continue,
                };
                let sigma = sigmas[obs_index];
                if !sigma.is_finite() || sigma <= 0.0 {
                    return MIN_LOG_PROB;
                }
                let norm = -0.5 * (LN_2PI + 2.0 * sigma.ln());
                for osc in 0..num_oscillators {
                    let value = match observed.get(osc).and_then(|s| s.get(time_index)) {
                        Some(v) if v.is_finite() => *v,
                        _ => continue,
                    };
                    let predicted = row[obs_index][osc];
                    if !predicted.is_finite() {
                        return MIN_LOG_PROB;
                    }
                    let z = (value - predicted) / sigma;
                    total += norm - 0.5 * z * z;
                }
            }
        }
        total
    }
}
