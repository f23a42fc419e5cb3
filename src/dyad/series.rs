//! The per-series state-space container ("dyad").
//!
//! Purpose
//! -------
//! Own everything one observed series contributes to the model: the
//! timestamp grid, the dynamics units (one per sub-interval when
//! parameters drift, a single shared unit otherwise), the cached hidden /
//! polynomial / observable state trajectories, the observation mapping,
//! the priors over fixed and drifting parameters, the per-slot predictor
//! vectors for the hierarchical regression, and any outcome variables.
//!
//! Key behaviors
//! -------------
//! - State trajectories are updated lazily along the chain hidden →
//!   polynomial → observable, driven by `changed_index` (first stale
//!   interval) and two dirty flags. All accessors that may recompute take
//!   `&mut self`; nothing recomputes behind a shared reference.
//! - `clo_params_for(times)` extends the parameter sequence to a longer
//!   grid: replication when drift is off, the GP posterior **mean** when
//!   drift is on — deterministic by design, never a sample.
//! - Predictor vectors concatenate a constant 1.0 with moderator values,
//!   deduplicating per-oscillator values for shared moderators.
//!
//! Invariants & assumptions
//! ------------------------
//! - `clos.len() == 1` without drift, `times.len() − 1` with drift; all
//!   units share one parameterization and parameter count.
//! - With drift enabled there is exactly one GP prior per parameter slot
//!   and the GP input grid tracks the interval count.
//! - Polynomial coefficients, when present, hold one vector of length
//!   degree+1 per oscillator.

use crate::data::SeriesData;
use crate::dyad::errors::{DyadError, DyadResult};
use crate::gp::{GpPrior, SquaredExponential};
use crate::oscillator::{integrate_states, integrate_states_at, CoupledOscillator};
use nalgebra::DVector;
use ndarray::Array1;
use std::collections::BTreeMap;

/// Default observation-noise standard deviation.
pub const DEFAULT_NOISE_SIGMA: f64 = 0.5;

/// Default prior variance for outcome slots.
const DEFAULT_OUTCOME_VARIANCE: f64 = 10.0;

/// Threshold below which a GP hyperparameter update is treated as a no-op.
const GP_CHANGE_EPS: f64 = 1e-7;

/// One observed series' full state-space model.
///
/// Fields are `pub(crate)` so the prior, sampling and persistence modules
/// can operate on the same record; external code goes through the methods.
#[derive(Debug, Clone)]
pub struct Dyad {
    pub(crate) times: Vec<f64>,
    pub(crate) clos: Vec<CoupledOscillator>,
    pub(crate) drift: bool,
    pub(crate) num_oscillators: usize,
    pub(crate) ignore_dynamics: bool,
    pub(crate) group_index: usize,

    // Cached trajectories; `clo_states[0]` doubles as the initial state.
    pub(crate) clo_states: Vec<DVector<f64>>,
    pub(crate) poly_states: Vec<DVector<f64>>,
    pub(crate) obs_states: Vec<Vec<DVector<f64>>>,
    pub(crate) changed_index: usize,
    pub(crate) poly_dirty: bool,
    pub(crate) obs_dirty: bool,

    // Observation model.
    pub(crate) obs_names: Vec<String>,
    pub(crate) obs_coefs: Vec<Vec<Array1<f64>>>,
    pub(crate) noise_sigmas: Array1<f64>,

    // Independent Gaussian prior over fixed dynamics parameters.
    pub(crate) clo_means: Vec<f64>,
    pub(crate) clo_variances: Vec<f64>,

    // Gaussian-process drift bookkeeping.
    pub(crate) gp_priors: Vec<GpPrior>,
    pub(crate) gp_scales: Vec<f64>,
    pub(crate) gp_sigvars: Vec<f64>,
    pub(crate) gp_changed: Vec<bool>,
    pub(crate) gp_initialized: bool,

    // Per-slot predictors for the hierarchical regression.
    pub(crate) predictors: Vec<Array1<f64>>,

    // Polynomial trend.
    pub(crate) polynomial_coefs: Vec<Array1<f64>>,
    pub(crate) polynomial_means: Vec<Array1<f64>>,
    pub(crate) polynomial_variances: Vec<Array1<f64>>,

    // Outcome variables, indexed `[outcome-type][oscillator]`.
    pub(crate) outcome_names: Vec<String>,
    pub(crate) outcome_means: Vec<Array1<f64>>,
    pub(crate) outcome_variances: Vec<Array1<f64>>,
    pub(crate) outcomes: Vec<Array1<f64>>,
}

impl Dyad {
    /// Construct a series container.
    ///
    /// `clos` must hold a single unit (constant parameters) or one unit
    /// per sub-interval (drifting parameters); it may be empty only for an
    /// outcome-only model (`ignore_dynamics = true`), in which case the
    /// oscillator count comes from the initial state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        times: Vec<f64>,
        init_state: DVector<f64>,
        clos: Vec<CoupledOscillator>,
        obs_names: Vec<String>,
        noise_sigmas: Array1<f64>,
        polynomial_degree: Option<usize>,
        outcome_names: Vec<String>,
        outcome_values: &BTreeMap<String, Vec<f64>>,
        group_index: usize,
        ignore_dynamics: bool,
    ) -> DyadResult<Self> {
        if times.len() < 2 {
            return Err(DyadError::TooFewTimestamps { len: times.len() });
        }
        if clos.is_empty() && !ignore_dynamics {
            return Err(DyadError::BadUnitCount { units: 0, times: times.len() });
        }
        let num_oscillators = if clos.is_empty() {
            init_state.len() / 2
        } else {
            clos[0].num_oscillators()
        };
        if init_state.len() != 2 * num_oscillators {
            return Err(DyadError::BadInitStateLength {
                expected: 2 * num_oscillators,
                actual: init_state.len(),
            });
        }
        if !clos.is_empty() && clos.len() != 1 && clos.len() != times.len() - 1 {
            return Err(DyadError::BadUnitCount { units: clos.len(), times: times.len() });
        }
        if noise_sigmas.len() != obs_names.len() {
            return Err(DyadError::NoiseSigmaMismatch {
                observables: obs_names.len(),
                sigmas: noise_sigmas.len(),
            });
        }
        let drift = clos.len() > 1;

        let obs_coefs = obs_names
            .iter()
            .map(|_| (0..num_oscillators).map(|_| Array1::from_elem(1, 1.0)).collect())
            .collect();

        let polynomial_coefs = match polynomial_degree {
            Some(degree) => {
                (0..num_oscillators).map(|_| Array1::zeros(degree + 1)).collect()
            }
            None => Vec::new(),
        };

        let num_outcome_types = outcome_names.len();
        let mut outcomes =
            vec![Array1::zeros(num_oscillators); num_outcome_types];
        for (type_index, name) in outcome_names.iter().enumerate() {
            if let Some(values) = outcome_values.get(name) {
                for (k, v) in values.iter().take(num_oscillators).enumerate() {
                    outcomes[type_index][k] = *v;
                }
            }
        }

        let mut clo_states = vec![DVector::zeros(2 * num_oscillators); times.len()];
        clo_states[0] = init_state;

        Ok(Dyad {
            times,
            clos,
            drift,
            num_oscillators,
            ignore_dynamics,
            group_index,
            clo_states,
            poly_states: Vec::new(),
            obs_states: Vec::new(),
            changed_index: 0,
            poly_dirty: true,
            obs_dirty: true,
            obs_names,
            obs_coefs,
            noise_sigmas,
            clo_means: Vec::new(),
            clo_variances: Vec::new(),
            gp_priors: Vec::new(),
            gp_scales: Vec::new(),
            gp_sigvars: Vec::new(),
            gp_changed: Vec::new(),
            gp_initialized: false,
            predictors: Vec::new(),
            polynomial_coefs,
            polynomial_means: Vec::new(),
            polynomial_variances: Vec::new(),
            outcome_names,
            outcome_means: vec![Array1::zeros(num_oscillators); num_outcome_types],
            outcome_variances: vec![
                Array1::from_elem(num_oscillators, DEFAULT_OUTCOME_VARIANCE);
                num_outcome_types
            ],
            outcomes,
        })
    }

    // ---- plain accessors ----

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn num_oscillators(&self) -> usize {
        self.num_oscillators
    }

    pub fn allow_drift(&self) -> bool {
        self.drift
    }

    pub fn ignore_dynamics(&self) -> bool {
        self.ignore_dynamics
    }

    pub fn group_index(&self) -> usize {
        self.group_index
    }

    pub fn set_group_index(&mut self, group: usize) {
        self.group_index = group;
    }

    pub fn oscillators(&self) -> &[CoupledOscillator] {
        &self.clos
    }

    /// Number of distinct dynamics-unit parameter sets (1 without drift).
    pub fn num_distinct_units(&self) -> usize {
        self.clos.len()
    }

    pub fn num_clo_params(&self) -> usize {
        self.clos.first().map_or(0, |c| c.num_params())
    }

    pub fn uses_modal(&self) -> bool {
        self.clos.first().map_or(false, |c| c.form().is_modal())
    }

    pub fn obs_names(&self) -> &[String] {
        &self.obs_names
    }

    pub fn outcome_names(&self) -> &[String] {
        &self.outcome_names
    }

    pub fn noise_sigmas(&self) -> &Array1<f64> {
        &self.noise_sigmas
    }

    pub fn set_noise_sigma(&mut self, index: usize, value: f64) -> DyadResult<()> {
        if index >= self.noise_sigmas.len() {
            return Err(DyadError::IndexOutOfBounds {
                what: "noise sigma",
                index,
                len: self.noise_sigmas.len(),
            });
        }
        self.noise_sigmas[index] = value;
        Ok(())
    }

    pub fn set_noise_sigmas(&mut self, sigmas: Array1<f64>) -> DyadResult<()> {
        if sigmas.len() != self.obs_names.len() {
            return Err(DyadError::NoiseSigmaMismatch {
                observables: self.obs_names.len(),
                sigmas: sigmas.len(),
            });
        }
        self.noise_sigmas = sigmas;
        Ok(())
    }

    /// The initial hidden state (position of the state cache at time 0).
    pub fn init_state(&self) -> &DVector<f64> {
        &self.clo_states[0]
    }

    /// Overwrite one component of the initial state and mark the whole
    /// trajectory stale.
    pub fn set_init_state_component(&mut self, index: usize, value: f64) -> DyadResult<()> {
        if index >= self.clo_states[0].len() {
            return Err(DyadError::IndexOutOfBounds {
                what: "initial state",
                index,
                len: self.clo_states[0].len(),
            });
        }
        self.clo_states[0][index] = value;
        self.mark_states_stale();
        Ok(())
    }

    /// Invalidate every cached trajectory from time zero on.
    pub fn mark_states_stale(&mut self) {
        self.changed_index = 0;
        self.poly_dirty = true;
        self.obs_dirty = true;
    }

    // ---- dynamics-parameter access ----

    /// Parameter `slot` of the first dynamics unit.
    pub fn clo_param(&self, slot: usize) -> DyadResult<f64> {
        let clo = self.clos.first().ok_or(DyadError::IndexOutOfBounds {
            what: "dynamics unit",
            index: 0,
            len: 0,
        })?;
        Ok(clo.get_param(slot)?)
    }

    /// Parameter `slot` of the unit covering interval `interval`.
    pub fn clo_param_at(&self, slot: usize, interval: usize) -> DyadResult<f64> {
        if interval >= self.clos.len() {
            return Err(DyadError::IndexOutOfBounds {
                what: "dynamics unit",
                index: interval,
                len: self.clos.len(),
            });
        }
        Ok(self.clos[interval].get_param(slot)?)
    }

    /// Write parameter `slot` of the unit covering `interval`.
    pub fn set_clo_param_at(&mut self, slot: usize, interval: usize, value: f64) -> DyadResult<()> {
        if interval >= self.clos.len() {
            return Err(DyadError::IndexOutOfBounds {
                what: "dynamics unit",
                index: interval,
                len: self.clos.len(),
            });
        }
        self.clos[interval].set_param(slot, value)?;
        self.mark_states_stale();
        Ok(())
    }

    /// Write parameter `slot` of every dynamics unit.
    pub fn set_clo_param_all(&mut self, slot: usize, value: f64) -> DyadResult<()> {
        for clo in &mut self.clos {
            clo.set_param(slot, value)?;
        }
        self.mark_states_stale();
        Ok(())
    }

    /// Flat parameter lookup across dynamics, polynomial and outcome
    /// slots, mirroring the regression-target layout: dynamics parameters
    /// first (unit of `interval`, or the first unit when `None`), then
    /// polynomial coefficients, then outcome values.
    pub fn param_value(&self, index: usize, interval: Option<usize>) -> DyadResult<f64> {
        let num_clo = self.num_clo_params();
        if index < num_clo {
            return match interval {
                Some(t) => self.clo_param_at(index, t),
                None => self.clo_param(index),
            };
        }
        let poly_total = self.num_polynomial_coefs();
        if index < num_clo + poly_total {
            let local = index - num_clo;
            let per_osc = self.polynomial_dim_per_osc();
            return Ok(self.polynomial_coefs[local / per_osc][local % per_osc]);
        }
        let outcome_index = index - num_clo - poly_total;
        self.outcome(outcome_index)
    }

    // ---- observation mapping ----

    /// Length of each observation-coefficient vector; zero for the
    /// single-observable identity mapping.
    pub fn obs_coef_dim(&self) -> usize {
        if self.obs_names.len() == 1 {
            return 0;
        }
        self.obs_coefs[0][0].len()
    }

    /// Number of free observation coefficients (the first observable is
    /// pinned to the identity mapping).
    pub fn num_obs_coefs(&self) -> usize {
        debug_assert!(!self.obs_names.is_empty());
        (self.obs_names.len() - 1) * self.num_oscillators * self.obs_coef_dim()
    }

    pub fn obs_coefs(&self) -> &[Vec<Array1<f64>>] {
        &self.obs_coefs
    }

    pub fn set_obs_coef(&mut self, obs: usize, osc: usize, coef: Array1<f64>) -> DyadResult<()> {
        if obs >= self.obs_coefs.len() || osc >= self.obs_coefs[obs].len() {
            return Err(DyadError::IndexOutOfBounds {
                what: "observation coefficient",
                index: obs * self.num_oscillators + osc,
                len: self.obs_coefs.len() * self.num_oscillators,
            });
        }
        self.obs_coefs[obs][osc] = coef;
        self.obs_dirty = true;
        Ok(())
    }

    pub fn set_obs_coef_entry(
        &mut self,
        obs: usize,
        osc: usize,
        entry: usize,
        value: f64,
    ) -> DyadResult<()> {
        if obs >= self.obs_coefs.len()
            || osc >= self.obs_coefs[obs].len()
            || entry >= self.obs_coefs[obs][osc].len()
        {
            return Err(DyadError::IndexOutOfBounds {
                what: "observation coefficient entry",
                index: entry,
                len: self.obs_coefs.get(obs).and_then(|o| o.get(osc)).map_or(0, |c| c.len()),
            });
        }
        self.obs_coefs[obs][osc][entry] = value;
        self.obs_dirty = true;
        Ok(())
    }

    // ---- polynomial trend ----

    pub fn polynomial_coefs(&self) -> &[Array1<f64>] {
        &self.polynomial_coefs
    }

    /// Coefficients per oscillator (degree + 1), zero when no trend.
    pub fn polynomial_dim_per_osc(&self) -> usize {
        self.polynomial_coefs.first().map_or(0, |c| c.len())
    }

    pub fn num_polynomial_coefs(&self) -> usize {
        self.polynomial_coefs.iter().map(|c| c.len()).sum()
    }

    pub fn polynomial_degree(&self) -> Option<usize> {
        self.polynomial_coefs.first().map(|c| c.len() - 1)
    }

    pub fn set_polynomial_coef(&mut self, osc: usize, term: usize, value: f64) -> DyadResult<()> {
        if osc >= self.polynomial_coefs.len() || term >= self.polynomial_coefs[osc].len() {
            return Err(DyadError::IndexOutOfBounds {
                what: "polynomial coefficient",
                index: osc * self.polynomial_dim_per_osc() + term,
                len: self.num_polynomial_coefs(),
            });
        }
        self.polynomial_coefs[osc][term] = value;
        self.poly_dirty = true;
        self.obs_dirty = true;
        Ok(())
    }

    pub fn set_polynomial_mean(&mut self, osc: usize, term: usize, value: f64) -> DyadResult<()> {
        self.ensure_polynomial_prior_storage();
        if osc >= self.polynomial_means.len() || term >= self.polynomial_means[osc].len() {
            return Err(DyadError::IndexOutOfBounds {
                what: "polynomial prior mean",
                index: osc * self.polynomial_dim_per_osc() + term,
                len: self.num_polynomial_coefs(),
            });
        }
        self.polynomial_means[osc][term] = value;
        Ok(())
    }

    pub fn set_polynomial_var(&mut self, osc: usize, term: usize, value: f64) -> DyadResult<()> {
        self.ensure_polynomial_prior_storage();
        if osc >= self.polynomial_variances.len() || term >= self.polynomial_variances[osc].len() {
            return Err(DyadError::IndexOutOfBounds {
                what: "polynomial prior variance",
                index: osc * self.polynomial_dim_per_osc() + term,
                len: self.num_polynomial_coefs(),
            });
        }
        self.polynomial_variances[osc][term] = value;
        Ok(())
    }

    fn ensure_polynomial_prior_storage(&mut self) {
        let dim = self.polynomial_dim_per_osc();
        if self.polynomial_means.len() != self.num_oscillators {
            self.polynomial_means = vec![Array1::zeros(dim); self.num_oscillators];
        }
        if self.polynomial_variances.len() != self.num_oscillators {
            self.polynomial_variances = vec![Array1::zeros(dim); self.num_oscillators];
        }
    }

    // ---- outcomes ----

    pub fn num_outcome_types(&self) -> usize {
        self.outcome_means.len()
    }

    /// Total outcome scalar count (types × oscillators).
    pub fn num_outcomes(&self) -> usize {
        self.outcome_means.iter().map(|m| m.len()).sum()
    }

    pub fn outcome_osc_index(&self, index: usize) -> usize {
        index % self.num_oscillators
    }

    pub fn outcome_type_index(&self, index: usize) -> usize {
        index / self.num_oscillators
    }

    pub fn outcome(&self, index: usize) -> DyadResult<f64> {
        let (t, k) = self.split_outcome_index(index)?;
        Ok(self.outcomes[t][k])
    }

    pub fn set_outcome(&mut self, index: usize, value: f64) -> DyadResult<()> {
        let (t, k) = self.split_outcome_index(index)?;
        self.outcomes[t][k] = value;
        Ok(())
    }

    pub fn outcome_mean(&self, index: usize) -> DyadResult<f64> {
        let (t, k) = self.split_outcome_index(index)?;
        Ok(self.outcome_means[t][k])
    }

    pub fn set_outcome_mean(&mut self, index: usize, value: f64) -> DyadResult<()> {
        let (t, k) = self.split_outcome_index(index)?;
        self.outcome_means[t][k] = value;
        Ok(())
    }

    pub fn outcome_var(&self, index: usize) -> DyadResult<f64> {
        let (t, k) = self.split_outcome_index(index)?;
        Ok(self.outcome_variances[t][k])
    }

    pub fn set_outcome_var(&mut self, index: usize, value: f64) -> DyadResult<()> {
        let (t, k) = self.split_outcome_index(index)?;
        self.outcome_variances[t][k] = value;
        Ok(())
    }

    fn split_outcome_index(&self, index: usize) -> DyadResult<(usize, usize)> {
        let t = self.outcome_type_index(index);
        let k = self.outcome_osc_index(index);
        if t >= self.outcomes.len() {
            return Err(DyadError::IndexOutOfBounds {
                what: "outcome",
                index,
                len: self.num_outcomes(),
            });
        }
        Ok((t, k))
    }

    // ---- fixed-parameter prior plumbing ----

    pub fn set_clo_mean(&mut self, slot: usize, mean: f64) -> DyadResult<()> {
        let num_params = self.num_clo_params();
        if self.clo_means.len() != num_params {
            self.clo_means.resize(num_params, 0.0);
        }
        if slot >= num_params {
            return Err(DyadError::IndexOutOfBounds {
                what: "dynamics prior mean",
                index: slot,
                len: num_params,
            });
        }
        self.clo_means[slot] = mean;
        Ok(())
    }

    pub fn clo_mean(&self, slot: usize) -> DyadResult<f64> {
        self.clo_means.get(slot).copied().ok_or(DyadError::IndexOutOfBounds {
            what: "dynamics prior mean",
            index: slot,
            len: self.clo_means.len(),
        })
    }

    pub fn set_clo_variance(&mut self, slot: usize, variance: f64) -> DyadResult<()> {
        let num_params = self.num_clo_params();
        if self.clo_variances.len() != num_params {
            self.clo_variances.resize(num_params, 0.0);
        }
        if slot >= num_params {
            return Err(DyadError::IndexOutOfBounds {
                what: "dynamics prior variance",
                index: slot,
                len: num_params,
            });
        }
        self.clo_variances[slot] = variance;
        Ok(())
    }

    pub fn clo_variance(&self, slot: usize) -> DyadResult<f64> {
        self.clo_variances.get(slot).copied().ok_or(DyadError::IndexOutOfBounds {
            what: "dynamics prior variance",
            index: slot,
            len: self.clo_variances.len(),
        })
    }

    // ---- Gaussian-process drift ----

    /// Install one GP prior per parameter slot over the interval-index
    /// grid and enable drift.
    pub fn init_gp(
        &mut self,
        gp_scales: Vec<f64>,
        gp_sigvars: Vec<f64>,
        gp_means: Vec<f64>,
    ) -> DyadResult<()> {
        let num_params = self.num_clo_params();
        if gp_scales.len() != num_params {
            return Err(DyadError::DimensionMismatch {
                what: "gp scales",
                expected: num_params,
                actual: gp_scales.len(),
            });
        }
        if gp_sigvars.len() != num_params || gp_means.len() != num_params {
            return Err(DyadError::DimensionMismatch {
                what: "gp hyperparameters",
                expected: num_params,
                actual: gp_sigvars.len().max(gp_means.len()),
            });
        }
        let inputs: Vec<f64> = (0..self.times.len() - 1).map(|i| i as f64).collect();
        self.gp_priors = gp_means
            .iter()
            .zip(gp_scales.iter().zip(gp_sigvars.iter()))
            .map(|(&mean, (&scale, &sigvar))| {
                GpPrior::new(mean, SquaredExponential::new(scale, sigvar), inputs.clone())
            })
            .collect();
        self.gp_scales = gp_scales;
        self.gp_sigvars = gp_sigvars;
        self.gp_changed = vec![false; num_params];
        self.gp_initialized = true;
        self.drift = true;
        Ok(())
    }

    /// Push pending hyperparameter changes into the per-slot kernels.
    pub fn update_gp(&mut self) -> DyadResult<()> {
        if !self.gp_initialized {
            return Err(DyadError::GpNotInitialized);
        }
        for (slot, changed) in self.gp_changed.iter_mut().enumerate() {
            if *changed {
                self.gp_priors[slot].set_kernel(SquaredExponential::new(
                    self.gp_scales[slot],
                    self.gp_sigvars[slot],
                ));
                *changed = false;
            }
        }
        Ok(())
    }

    pub fn gp_scales(&self) -> &[f64] {
        &self.gp_scales
    }

    pub fn gp_sigvars(&self) -> &[f64] {
        &self.gp_sigvars
    }

    pub fn gp_priors(&self) -> &[GpPrior] {
        &self.gp_priors
    }

    pub fn set_gp_scale(&mut self, slot: usize, scale: f64) -> DyadResult<()> {
        if slot >= self.gp_scales.len() {
            return Err(DyadError::IndexOutOfBounds {
                what: "gp scale",
                index: slot,
                len: self.gp_scales.len(),
            });
        }
        if (scale - self.gp_scales[slot]).abs() > GP_CHANGE_EPS {
            self.gp_scales[slot] = scale;
            self.gp_changed[slot] = true;
        }
        Ok(())
    }

    pub fn set_gp_sigvar(&mut self, slot: usize, sigvar: f64) -> DyadResult<()> {
        if slot >= self.gp_sigvars.len() {
            return Err(DyadError::IndexOutOfBounds {
                what: "gp signal variance",
                index: slot,
                len: self.gp_sigvars.len(),
            });
        }
        if (sigvar - self.gp_sigvars[slot]).abs() > GP_CHANGE_EPS {
            self.gp_sigvars[slot] = sigvar;
            self.gp_changed[slot] = true;
        }
        Ok(())
    }

    pub fn set_gp_mean(&mut self, slot: usize, mean: f64) -> DyadResult<()> {
        if slot >= self.gp_priors.len() {
            return Err(DyadError::IndexOutOfBounds {
                what: "gp mean",
                index: slot,
                len: self.gp_priors.len(),
            });
        }
        self.gp_priors[slot].set_mean(mean);
        Ok(())
    }

    /// GP input grid (interval indices).
    pub fn gp_inputs(&self) -> DyadResult<&[f64]> {
        self.gp_priors
            .first()
            .map(|p| p.inputs())
            .ok_or(DyadError::GpNotInitialized)
    }

    /// Per-parameter output series across the distinct dynamics units,
    /// indexed `[slot][interval]`.
    pub fn gp_outputs(&self) -> Vec<Vec<f64>> {
        let rows: Vec<Vec<f64>> = self.clos.iter().map(|clo| clo.params().to_vec()).collect();
        crate::utils::transpose_vecs(&rows)
    }

    // ---- predictors ----

    /// Build the per-slot covariate vectors from moderator data.
    ///
    /// Slot `c` gets `[1.0, moderator values…]` following `mod_names[c]`;
    /// a moderator whose values coincide across oscillators contributes a
    /// single entry. Each outcome slot gets the bare `[1.0]` intercept.
    pub fn init_predictors(
        &mut self,
        data: &SeriesData,
        mod_names: &[Vec<String>],
    ) -> DyadResult<()> {
        self.predictors.clear();
        self.predictors.reserve(mod_names.len() + self.num_outcomes());
        for names in mod_names {
            let mut entries = vec![1.0];
            for name in names {
                let values = data
                    .moderators
                    .get(name)
                    .ok_or_else(|| DyadError::MissingModerator { name: name.clone() })?;
                if data.is_shared_moderator(name) {
                    entries.push(values[0]);
                } else {
                    entries.extend_from_slice(values);
                }
            }
            self.predictors.push(Array1::from_vec(entries));
        }
        for _ in 0..self.num_outcomes() {
            self.predictors.push(Array1::from_elem(1, 1.0));
        }
        Ok(())
    }

    pub fn predictors(&self) -> DyadResult<&[Array1<f64>]> {
        if self.predictors.is_empty() {
            return Err(DyadError::PredictorsNotInitialized);
        }
        Ok(&self.predictors)
    }

    pub fn predictors_mut(&mut self) -> &mut Vec<Array1<f64>> {
        &mut self.predictors
    }

    // ---- parameter extension over new time grids ----

    /// Per-interval parameter vectors for an extended timestamp grid.
    ///
    /// Without drift the last known parameter vector is replicated; with
    /// drift each slot's GP predictive posterior is trained on the known
    /// `(interval, value)` pairs and evaluated at the new intervals. The
    /// posterior **mean** is used, never a draw: the model requires a
    /// single deterministic extension.
    pub fn clo_params_for(&mut self, times: &[f64]) -> DyadResult<Vec<Vec<f64>>> {
        if times.len() < 2 {
            return Ok(Vec::new());
        }
        let new_count = times.len() - 1;
        let last = self.clos.last().ok_or(DyadError::BadUnitCount {
            units: 0,
            times: times.len(),
        })?;
        if !self.drift {
            let params = last.params().to_vec();
            return Ok(vec![params; new_count]);
        }
        self.update_gp()?;
        let old_count = self.clos.len();
        let num_params = self.num_clo_params();
        let mut all_params: Vec<Vec<f64>> =
            self.clos.iter().map(|c| c.params().to_vec()).collect();
        if new_count <= old_count {
            all_params.truncate(new_count);
            return Ok(all_params);
        }
        let train_inputs: Vec<f64> = (0..old_count).map(|i| times[i]).collect();
        let test_inputs: Vec<f64> = (old_count..new_count).map(|i| times[i]).collect();
        let outputs = self.gp_outputs();
        let mut predicted = vec![vec![0.0; num_params]; new_count - old_count];
        for slot in 0..num_params {
            let mu = self.gp_priors[slot]
                .posterior_mean(&train_inputs, &outputs[slot], &test_inputs)
                .ok_or(DyadError::GpNotInitialized)?;
            for (row, value) in predicted.iter_mut().zip(mu.iter()) {
                row[slot] = *value;
            }
        }
        all_params.extend(predicted);
        Ok(all_params)
    }

    /// Grow the timestamp grid, extending the dynamics units via
    /// [`Dyad::clo_params_for`] and marking every trajectory stale.
    pub fn extend_times(&mut self, times: Vec<f64>) -> DyadResult<()> {
        if times.len() <= self.times.len() {
            self.times = times;
            let t = self.times.len();
            self.clo_states.truncate(t);
            if self.drift {
                self.clos.truncate(t.saturating_sub(1));
            }
            self.mark_states_stale();
            return Ok(());
        }
        if self.drift {
            let form = self.clos[0].form();
            let params = self.clo_params_for(&times)?;
            let mut clos = Vec::with_capacity(params.len());
            for p in params {
                clos.push(CoupledOscillator::from_params(Array1::from_vec(p), form)?);
            }
            self.clos = clos;
        }
        self.times = times;
        self.mark_states_stale();
        Ok(())
    }

    // ---- lazy state updates ----

    /// Observable trajectories over the full grid, recomputing whatever is
    /// stale. Indexed `[time][observable] -> per-oscillator vector`.
    pub fn states(&mut self) -> DyadResult<&[Vec<DVector<f64>>]> {
        self.update_obs_states()?;
        Ok(&self.obs_states)
    }

    /// Observable trajectories at a sparse subset of time indices,
    /// propagated from the cached state at the first listed index. Leaves
    /// the dense caches untouched beyond bringing the hidden states up to
    /// date.
    pub fn states_at(&mut self, indices: &[usize]) -> DyadResult<Vec<Vec<DVector<f64>>>> {
        if indices.is_empty() {
            return Ok(Vec::new());
        }
        self.update_clo_states()?;
        let first = indices[0];
        if first >= self.times.len() {
            return Err(DyadError::IndexOutOfBounds {
                what: "time index",
                index: first,
                len: self.times.len(),
            });
        }
        let subset = if self.ignore_dynamics {
            indices
                .iter()
                .map(|&i| {
                    self.clo_states.get(i).cloned().ok_or(DyadError::IndexOutOfBounds {
                        what: "time index",
                        index: i,
                        len: self.times.len(),
                    })
                })
                .collect::<DyadResult<Vec<_>>>()?
        } else {
            let init = self.clo_states[first].clone();
            integrate_states_at(&mut self.clos, &self.times, &init, indices, self.drift)?
        };
        let times: Vec<f64> = indices.iter().map(|&i| self.times[i]).collect();
        let source = if self.polynomial_coefs.is_empty() {
            subset
        } else {
            self.compute_poly_states(&subset, &times)
        };
        Ok(self.compute_obs_states(&source))
    }

    /// Bring the hidden-state cache up to date.
    pub fn update_clo_states(&mut self) -> DyadResult<()> {
        let last = self.times.len() - 1;
        if self.ignore_dynamics {
            let dim = self.clo_states[0].len();
            for state in self.clo_states.iter_mut() {
                *state = DVector::zeros(dim);
            }
            self.changed_index = last;
            self.poly_dirty = true;
            self.obs_dirty = true;
            return Ok(());
        }
        if self.changed_index != last {
            self.poly_dirty = true;
            self.obs_dirty = true;
            let init = self.clo_states[0].clone();
            integrate_states(
                &mut self.clos,
                &self.times,
                &init,
                &mut self.clo_states,
                self.changed_index,
                self.drift,
            )?;
            self.changed_index = last;
        }
        if self.changed_index != last {
            return Err(DyadError::StaleStates);
        }
        Ok(())
    }

    fn update_poly_states(&mut self) -> DyadResult<()> {
        if self.polynomial_coefs.is_empty() {
            return Ok(());
        }
        self.update_clo_states()?;
        if self.poly_dirty {
            let times = self.times.clone();
            self.poly_states = self.compute_poly_states(&self.clo_states, &times);
            self.poly_dirty = false;
        }
        Ok(())
    }

    fn update_obs_states(&mut self) -> DyadResult<()> {
        self.update_clo_states()?;
        self.update_poly_states()?;
        if self.obs_dirty {
            self.obs_states = if self.polynomial_coefs.is_empty() {
                self.compute_obs_states(&self.clo_states)
            } else {
                self.compute_obs_states(&self.poly_states)
            };
            self.obs_dirty = false;
        }
        Ok(())
    }

    /// Add the polynomial trend to the position components. The result has
    /// one entry per oscillator (velocities are dropped).
    fn compute_poly_states(
        &self,
        clo_states: &[DVector<f64>],
        times: &[f64],
    ) -> Vec<DVector<f64>> {
        debug_assert_eq!(clo_states.len(), times.len());
        let n = self.num_oscillators;
        times
            .iter()
            .zip(clo_states.iter())
            .map(|(&t, state)| {
                DVector::from_fn(n, |j, _| {
                    let trend: f64 = self.polynomial_coefs[j]
                        .iter()
                        .enumerate()
                        .map(|(k, c)| c * t.powi(k as i32))
                        .sum();
                    trend + state[j]
                })
            })
            .collect()
    }

    /// Map hidden (or trend-adjusted) states to observable values.
    ///
    /// With a zero coefficient dimension the single observable reads the
    /// positions directly; with dimension one each value is scaled; with
    /// dimension two the first entry acts as an intercept.
    fn compute_obs_states(&self, source: &[DVector<f64>]) -> Vec<Vec<DVector<f64>>> {
        let n = self.num_oscillators;
        let dim = self.obs_coef_dim();
        source
            .iter()
            .map(|pred| {
                self.obs_coefs
                    .iter()
                    .enumerate()
                    .map(|(j, coefs)| {
                        DVector::from_fn(n, |k, _| {
                            let state = pred[k];
                            if dim == 0 {
                                debug_assert_eq!(j, 0);
                                state
                            } else {
                                let mut acc = 0.0;
                                for (e, c) in coefs[k].iter().enumerate() {
                                    let input = if dim == 2 && e == 0 { 1.0 } else { state };
                                    acc += c * input;
                                }
                                acc
                            }
                        })
                    })
                    .collect()
            })
            .collect()
    }

    /// Sanity checks on the current parameter set (modal form only):
    /// angles within `[-π, π]` and the first mode angle below the second.
    pub fn has_valid_params(&self) -> bool {
        if !self.uses_modal() {
            return true;
        }
        let n = self.num_oscillators;
        for clo in &self.clos {
            for k in 0..n {
                let angle = clo.params()[k];
                if !(-std::f64::consts::PI..=std::f64::consts::PI).contains(&angle) {
                    return false;
                }
            }
            if clo.params()[0] > clo.params()[1] {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oscillator::Parameterization;
    use approx::assert_relative_eq;

    pub(crate) fn simple_dyad(num_times: usize, drift: bool) -> Dyad {
        let times: Vec<f64> = (0..num_times).map(|t| t as f64).collect();
        let unit = CoupledOscillator::new::<rand::rngs::StdRng>(
            2,
            5.0,
            0.2,
            Parameterization::Real,
            None,
        )
        .unwrap();
        let clos = if drift {
            vec![unit; num_times - 1]
        } else {
            vec![unit]
        };
        Dyad::new(
            times,
            DVector::from_vec(vec![1.0, -0.5, 0.0, 0.1]),
            clos,
            vec!["affect".to_string()],
            Array1::from_elem(1, 0.5),
            None,
            Vec::new(),
            &BTreeMap::new(),
            0,
            false,
        )
        .unwrap()
    }

    #[test]
    fn states_update_lazily_and_only_once() {
        let mut dyad = simple_dyad(6, false);
        let first = dyad.states().unwrap().to_vec();
        assert_eq!(first.len(), 6);
        assert_eq!(dyad.changed_index, 5);
        // A parameter write invalidates; the next read recomputes.
        dyad.set_clo_param_all(0, 2.0).unwrap();
        assert_eq!(dyad.changed_index, 0);
        let second = dyad.states().unwrap().to_vec();
        assert_eq!(dyad.changed_index, 5);
        assert!((first[3][0][0] - second[3][0][0]).abs() > 1e-9);
    }

    #[test]
    fn single_observable_reads_positions_directly() {
        let mut dyad = simple_dyad(4, false);
        let states = dyad.states().unwrap().to_vec();
        assert_relative_eq!(states[0][0][0], 1.0);
        assert_relative_eq!(states[0][0][1], -0.5);
    }

    #[test]
    fn polynomial_trend_shifts_positions() {
        let times: Vec<f64> = (0..4).map(|t| t as f64).collect();
        let unit = CoupledOscillator::new::<rand::rngs::StdRng>(
            2,
            5.0,
            0.0,
            Parameterization::Real,
            None,
        )
        .unwrap();
        let mut dyad = Dyad::new(
            times,
            DVector::zeros(4),
            vec![unit],
            vec!["affect".to_string()],
            Array1::from_elem(1, 0.5),
            Some(1),
            Vec::new(),
            &BTreeMap::new(),
            0,
            false,
        )
        .unwrap();
        dyad.set_polynomial_coef(0, 0, 2.0).unwrap();
        dyad.set_polynomial_coef(0, 1, 0.5).unwrap();
        let states = dyad.states().unwrap().to_vec();
        // Zero initial state: the observable is exactly the trend.
        assert_relative_eq!(states[0][0][0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(states[3][0][0], 3.5, epsilon = 1e-12);
        assert_relative_eq!(states[3][0][1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn predictors_concatenate_intercept_and_moderators() {
        let mut dyad = simple_dyad(4, false);
        let mut data = SeriesData::default();
        data.moderators.insert("age".to_string(), vec![30.0, 30.0]);
        data.moderators.insert("score".to_string(), vec![1.0, 2.0]);
        let mod_names = vec![
            vec!["age".to_string(), "score".to_string()];
            dyad.num_clo_params()
        ];
        dyad.init_predictors(&data, &mod_names).unwrap();
        let preds = dyad.predictors().unwrap();
        assert_eq!(preds.len(), dyad.num_clo_params());
        // Shared moderator contributes once; the other per oscillator.
        assert_eq!(preds[0].to_vec(), vec![1.0, 30.0, 1.0, 2.0]);
    }

    #[test]
    fn missing_moderator_is_an_error() {
        let mut dyad = simple_dyad(4, false);
        let data = SeriesData::default();
        let mod_names = vec![vec!["absent".to_string()]];
        let err = dyad.init_predictors(&data, &mod_names);
        assert!(matches!(err, Err(DyadError::MissingModerator { .. })));
    }

    #[test]
    fn non_drift_extension_replicates_last_params() {
        let mut dyad = simple_dyad(4, false);
        let times: Vec<f64> = (0..7).map(|t| t as f64).collect();
        let params = dyad.clo_params_for(&times).unwrap();
        assert_eq!(params.len(), 6);
        let reference = dyad.oscillators()[0].params().to_vec();
        for row in &params {
            assert_eq!(row, &reference);
        }
    }

    #[test]
    fn drift_extension_uses_the_posterior_mean() {
        let mut dyad = simple_dyad(5, true);
        let p = dyad.num_clo_params();
        dyad.init_gp(vec![2.0; p], vec![1.0; p], vec![0.0; p]).unwrap();
        // Give slot 0 a gentle trend across intervals.
        for (i, value) in [1.0, 1.1, 1.2, 1.3].iter().enumerate() {
            dyad.set_clo_param_at(0, i, *value).unwrap();
        }
        let times: Vec<f64> = (0..7).map(|t| t as f64).collect();
        let a = dyad.clo_params_for(&times).unwrap();
        let b = dyad.clo_params_for(&times).unwrap();
        assert_eq!(a, b); // deterministic extension
        assert_eq!(a.len(), 6);
        // The extension continues smoothly from the last training value.
        assert!((a[4][0] - 1.3).abs() < 0.5);
    }

    #[test]
    fn states_at_matches_dense_states_without_drift() {
        let mut dyad = simple_dyad(6, false);
        let dense = dyad.states().unwrap().to_vec();
        let sparse = dyad.states_at(&[0, 2, 5]).unwrap();
        for (s, d) in sparse.iter().zip([0usize, 2, 5].iter().map(|&i| &dense[i])) {
            for k in 0..2 {
                assert_relative_eq!(s[0][k], d[0][k], epsilon = 1e-8);
            }
        }
    }
}
