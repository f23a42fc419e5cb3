//! The population container: many series sharing hierarchical regression
//! parameters.
//!
//! Purpose
//! -------
//! Own the full collection of series containers, group them into clusters
//! that share a [`GroupParams`] regression record per shared-parameter
//! slot, and maintain the per-cluster [`RegressionCache`] sufficient
//! statistics an external Bayesian-linear-regression update consumes.
//! The container never computes the posterior itself.
//!
//! Key behaviors
//! -------------
//! - Construction builds one dyad per series id over the training prefix
//!   of its timestamps, validates and pads predictor dimensionality
//!   across the population, seeds polynomial offsets from the data, and
//!   initializes GP bookkeeping when drift is enabled.
//! - `update_lss_mean` / `update_lss_variance` push the current cluster
//!   regression state into one series, with the slot split: fixed
//!   dynamics slot → direct broadcast, drifting slot → GP mean/variance,
//!   polynomial slot → coefficient or prior, outcome slot → prior mean.
//! - `init_design_matrix` / `update_covariance_matrix` maintain the
//!   stacked designs and covariance inverses; the latter must rerun
//!   whenever a slot's GP hyperparameters change.
//!
//! Invariants & assumptions
//! ------------------------
//! - Every series' covariate vector for a slot has the same
//!   dimensionality across the population (enforced by repeat-last
//!   padding at construction).
//! - Cluster cache matrices are mutated only by the init/update methods
//!   here, never concurrently with a likelihood batch.

use crate::data::SeriesData;
use crate::dyad::{Dyad, DEFAULT_NOISE_SIGMA};
use crate::gp::SquaredExponential;
use crate::oscillator::{
    param_length, CoupledOscillator, Parameterization, DEFAULT_DAMPING, DEFAULT_PERIOD,
};
use crate::population::cache::RegressionCache;
use crate::population::errors::{PopError, PopResult};
use crate::population::group::GroupParams;
use nalgebra::{DMatrix, DVector};
use ndarray::Array1;
use rand::Rng;
use std::path::PathBuf;

/// Construction-time configuration for a [`Population`].
///
/// Mirrors the knobs a fit driver exposes; [`Default`] gives the standard
/// two-oscillator, single-cluster, fixed-parameter setup.
#[derive(Debug, Clone)]
pub struct PopulationOptions {
    /// GP length scale shared by all drifting slots at start.
    pub gp_scale: f64,
    /// Prior sigma for dynamics-parameter slots.
    pub clo_sigma: f64,
    /// Prior sigma for polynomial slots.
    pub poly_sigma: f64,
    /// Prior sigma for outcome slots.
    pub outcome_sigma: f64,
    /// Observable names, shared across the population.
    pub obs_names: Vec<String>,
    /// True when dynamics parameters are fixed (no hierarchical prior on
    /// them; regression values are broadcast directly).
    pub fixed_clo: bool,
    /// Fraction of each series' timestamps used for training.
    pub training_fraction: f64,
    pub num_oscillators: usize,
    pub init_period: f64,
    pub init_damping: f64,
    /// Observation-noise sigmas, one per observable.
    pub noise_sigmas: Array1<f64>,
    /// Enable per-interval parameter drift with GP priors.
    pub allow_drift: bool,
    /// Cluster count.
    pub num_groups: usize,
    /// Polynomial trend degree, if any.
    pub polynomial_degree: Option<usize>,
    pub outcome_names: Vec<String>,
    /// Outcome-only model: zero hidden dynamics.
    pub ignore_dynamics: bool,
    /// Use the modal parameterization.
    pub use_modal: bool,
    /// Optional file of cluster labels (whitespace separated, one per
    /// cluster index), used to name per-cluster output directories.
    pub grouping_file: Option<PathBuf>,
}

impl Default for PopulationOptions {
    fn default() -> Self {
        PopulationOptions {
            gp_scale: 1.0,
            clo_sigma: 1.0,
            poly_sigma: 1.0,
            outcome_sigma: 1.0,
            obs_names: vec!["observable".to_string()],
            fixed_clo: false,
            training_fraction: 0.8,
            num_oscillators: 2,
            init_period: DEFAULT_PERIOD,
            init_damping: DEFAULT_DAMPING,
            noise_sigmas: Array1::from_elem(1, DEFAULT_NOISE_SIGMA),
            allow_drift: false,
            num_groups: 1,
            polynomial_degree: None,
            outcome_names: Vec::new(),
            ignore_dynamics: false,
            use_modal: false,
            grouping_file: None,
        }
    }
}

/// The population-level parameter-sharing container.
#[derive(Debug, Clone)]
pub struct Population {
    pub(crate) ids: Vec<usize>,
    pub(crate) dyads: Vec<Dyad>,
    pub(crate) mod_names: Vec<Vec<String>>,
    pub(crate) clo_param_size: usize,
    pub(crate) polynomial_coef_size: usize,
    pub(crate) outcome_size: usize,
    pub(crate) groups: Vec<GroupParams>,
    pub(crate) caches: Vec<RegressionCache>,
    pub(crate) fixed_clo: bool,
    pub(crate) num_groups: usize,
    pub(crate) group_labels: Vec<String>,
}

impl Population {
    /// Build the population from per-series ids, slot moderator-name
    /// lists, initial states and observed data.
    ///
    /// `rng` seeds the small parameter jitter applied to drifting units so
    /// the GP training outputs are not exactly constant.
    pub fn new<R: Rng + ?Sized>(
        ids: Vec<usize>,
        mod_names: Vec<Vec<String>>,
        init_states: Vec<DVector<f64>>,
        data: &[SeriesData],
        options: &PopulationOptions,
        rng: &mut R,
    ) -> PopResult<Self> {
        if ids.is_empty() {
            return Err(PopError::EmptyPopulation);
        }
        if ids.len() != data.len() || ids.len() != init_states.len() {
            return Err(PopError::SeriesCountMismatch {
                ids: ids.len(),
                data: data.len(),
                init_states: init_states.len(),
            });
        }
        if !(options.training_fraction > 0.0 && options.training_fraction <= 1.0) {
            return Err(PopError::BadTrainingFraction { value: options.training_fraction });
        }
        let form = if options.use_modal {
            Parameterization::Modal
        } else {
            Parameterization::Real
        };
        let clo_param_size = if options.ignore_dynamics {
            0
        } else {
            param_length(options.num_oscillators, form)
        };

        let mut population = Population {
            ids,
            dyads: Vec::with_capacity(data.len()),
            mod_names,
            clo_param_size,
            polynomial_coef_size: 0,
            outcome_size: 0,
            groups: Vec::new(),
            caches: Vec::new(),
            fixed_clo: options.fixed_clo,
            num_groups: options.num_groups.max(1),
            group_labels: Vec::new(),
        };
        population.init_dyads(&init_states, data, options, form, rng)?;
        population.check_predictors_dimension()?;

        let reference = &population.dyads[0];
        population.polynomial_coef_size = reference.num_polynomial_coefs();
        population.outcome_size = reference.num_outcomes();
        let moderated = population.clo_param_size + population.polynomial_coef_size;
        if population.mod_names.len() != moderated {
            return Err(PopError::ModeratorSlotMismatch {
                expected: moderated,
                actual: population.mod_names.len(),
            });
        }
        let predictors = reference.predictors()?.to_vec();
        let num_slots = predictors.len();
        let num_outcomes = population.outcome_size;

        let weight = 1.0 / population.num_groups as f64;
        population.groups = (0..population.num_groups)
            .map(|_| {
                let mut group = GroupParams::zeros(&predictors, num_outcomes, weight);
                if !options.fixed_clo {
                    for (slot, variance) in group.variances.iter_mut().enumerate() {
                        *variance = if slot < population.clo_param_size {
                            options.clo_sigma * options.clo_sigma
                        } else if slot < population.clo_param_size + population.polynomial_coef_size
                        {
                            options.poly_sigma * options.poly_sigma
                        } else {
                            options.outcome_sigma * options.outcome_sigma
                        };
                    }
                }
                group
            })
            .collect();
        population.caches = (0..population.num_groups)
            .map(|_| RegressionCache::new(num_slots, population.dyads.len()))
            .collect();

        population.update_means()?;
        population.update_variances()?;
        if !options.fixed_clo {
            population.init_design_matrix()?;
        }

        if let Some(path) = &options.grouping_file {
            let content = std::fs::read_to_string(path)
                .map_err(|_| PopError::CannotOpen { path: path.display().to_string() })?;
            population.group_labels =
                content.split_whitespace().map(str::to_string).collect();
        }
        Ok(population)
    }

    /// Build one dyad per series over its training-prefix grid.
    fn init_dyads<R: Rng + ?Sized>(
        &mut self,
        init_states: &[DVector<f64>],
        data: &[SeriesData],
        options: &PopulationOptions,
        form: Parameterization,
        rng: &mut R,
    ) -> PopResult<()> {
        for (series, (record, init_state)) in data.iter().zip(init_states.iter()).enumerate() {
            let length =
                ((record.times.len() as f64) * options.training_fraction).ceil() as usize;
            let length = length.max(2);
            let start = record.times.first().copied().unwrap_or(0.0);
            let times: Vec<f64> = (0..length).map(|i| start + i as f64).collect();

            let clos = if options.ignore_dynamics {
                Vec::new()
            } else {
                let unit = CoupledOscillator::new::<R>(
                    options.num_oscillators,
                    options.init_period,
                    options.init_damping,
                    form,
                    None,
                )?;
                if options.allow_drift {
                    vec![unit; times.len() - 1]
                } else {
                    vec![unit]
                }
            };

            let group_index = if self.num_groups > 1 { record.group_index } else { 0 };
            if group_index >= self.num_groups {
                return Err(PopError::GroupIndexOutOfBounds {
                    series,
                    group: group_index,
                    num_groups: self.num_groups,
                });
            }

            let mut dyad = Dyad::new(
                times,
                init_state.clone(),
                clos,
                options.obs_names.clone(),
                options.noise_sigmas.clone(),
                options.polynomial_degree,
                options.outcome_names.clone(),
                &record.outcomes,
                group_index,
                options.ignore_dynamics,
            )?;
            dyad.init_predictors(record, &self.mod_names)?;

            if options.polynomial_degree.is_some() {
                if let Some(first_obs) = options.obs_names.first() {
                    if let Some(means) = record.observable_means(first_obs) {
                        for (osc, mean) in means.iter().enumerate() {
                            dyad.set_polynomial_coef(osc, 0, *mean)?;
                        }
                    }
                }
            }

            if options.allow_drift && self.clo_param_size > 0 {
                // Tiny jitter keeps per-interval GP training outputs from
                // being exactly constant.
                for interval in 0..dyad.num_distinct_units() {
                    for slot in 0..self.clo_param_size {
                        let value = dyad.clo_param_at(slot, interval)?;
                        dyad.set_clo_param_at(slot, interval, value + rng.gen::<f64>() * 1e-4)?;
                    }
                }
                dyad.init_gp(
                    vec![options.gp_scale; self.clo_param_size],
                    vec![options.clo_sigma; self.clo_param_size],
                    vec![0.0; self.clo_param_size],
                )?;
            }
            self.dyads.push(dyad);
        }
        Ok(())
    }

    // ---- accessors ----

    pub fn ids(&self) -> &[usize] {
        &self.ids
    }

    pub fn num_series(&self) -> usize {
        self.dyads.len()
    }

    pub fn dyads(&self) -> &[Dyad] {
        &self.dyads
    }

    pub fn dyads_mut(&mut self) -> &mut [Dyad] {
        &mut self.dyads
    }

    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    pub fn fixed_clo(&self) -> bool {
        self.fixed_clo
    }

    pub fn clo_param_size(&self) -> usize {
        self.clo_param_size
    }

    pub fn num_polynomial_params(&self) -> usize {
        self.polynomial_coef_size
    }

    pub fn num_outcomes(&self) -> usize {
        self.outcome_size
    }

    pub fn allow_drift(&self) -> bool {
        self.dyads.first().map_or(false, Dyad::allow_drift)
    }

    pub fn group_params(&self) -> &[GroupParams] {
        &self.groups
    }

    pub fn group_params_mut(&mut self) -> &mut [GroupParams] {
        &mut self.groups
    }

    pub fn set_group_params(&mut self, groups: Vec<GroupParams>) {
        self.groups = groups;
    }

    pub fn group_labels(&self) -> &[String] {
        &self.group_labels
    }

    /// Total predictor-coefficient count of one cluster.
    pub fn pred_coef_size(&self, group: usize) -> PopResult<usize> {
        let group = self.group(group)?;
        Ok(group.pred_coef_size())
    }

    /// Addressable shared-parameter count of one cluster: predictor
    /// coefficients plus (unless dynamics are fixed or excluded) the
    /// per-slot variances.
    pub fn shared_param_size(&self, group: usize, exclude_variance: bool) -> PopResult<usize> {
        let record = self.group(group)?;
        let mut size = record.pred_coef_size();
        if !self.fixed_clo && !exclude_variance {
            size += record.variances.len();
        }
        Ok(size)
    }

    pub(crate) fn group(&self, group: usize) -> PopResult<&GroupParams> {
        self.groups.get(group).ok_or(PopError::IndexOutOfBounds {
            what: "group",
            index: group,
            len: self.groups.len(),
        })
    }

    /// `Xᵀ K⁻¹` per slot of one cluster.
    pub fn x_t_k_inv(&self, group: usize) -> PopResult<&[DMatrix<f64>]> {
        self.cache(group).map(|c| c.x_t_k_inv.as_slice())
    }

    /// `Xᵀ K⁻¹ X` per slot of one cluster.
    pub fn x_t_k_inv_x(&self, group: usize) -> PopResult<&[DMatrix<f64>]> {
        self.cache(group).map(|c| c.x_t_k_inv_x.as_slice())
    }

    /// `yᵀ K⁻¹ y` per slot of one cluster.
    pub fn y_t_k_inv_y(&self, group: usize) -> PopResult<&[f64]> {
        self.cache(group).map(|c| c.y_t_k_inv_y.as_slice())
    }

    fn cache(&self, group: usize) -> PopResult<&RegressionCache> {
        self.caches.get(group).ok_or(PopError::IndexOutOfBounds {
            what: "group cache",
            index: group,
            len: self.caches.len(),
        })
    }

    /// Broadcast one observation-noise sigma to every series.
    pub fn set_noise_sigma(&mut self, index: usize, value: f64) -> PopResult<()> {
        for dyad in &mut self.dyads {
            dyad.set_noise_sigma(index, value)?;
        }
        Ok(())
    }

    /// Mean initial state across the population.
    pub fn init_state_mean(&self) -> DVector<f64> {
        let dim = self.dyads[0].init_state().len();
        let mut mean = DVector::zeros(dim);
        for dyad in &self.dyads {
            mean += dyad.init_state();
        }
        mean / self.dyads.len() as f64
    }

    // ---- predictor-dimension policy ----

    /// Force a consistent covariate dimensionality per slot across the
    /// population by repeating each short vector's last entry. The target
    /// is the maximum of the observed dimensionalities and any preset
    /// coefficient length. A documented smoothing-over-heterogeneity
    /// policy: a series lacking a per-oscillator moderator value inherits
    /// its last one.
    pub fn check_predictors_dimension(&mut self) -> PopResult<()> {
        let num_slots = self.dyads[0].predictors()?.len();
        for slot in 0..num_slots {
            let mut target = 0usize;
            for dyad in &self.dyads {
                target = target.max(dyad.predictors()?[slot].len());
            }
            if let Some(group) = self.groups.first() {
                if slot < group.pred_coefs.len() {
                    target = target.max(group.pred_coefs[slot].len());
                }
            }
            for dyad in &mut self.dyads {
                let preds = dyad.predictors_mut();
                let current = &preds[slot];
                if current.len() < target {
                    let mut padded = current.to_vec();
                    let last = *padded.last().expect("predictor vectors are non-empty");
                    padded.resize(target, last);
                    preds[slot] = Array1::from_vec(padded);
                }
            }
        }
        Ok(())
    }

    // ---- regression-state propagation ----

    /// Push the owning cluster's regression state into series `i`'s
    /// effective parameter values (means only).
    pub fn update_lss_mean(&mut self, index: usize) -> PopResult<()> {
        if index >= self.dyads.len() {
            return Err(PopError::IndexOutOfBounds {
                what: "series",
                index,
                len: self.dyads.len(),
            });
        }
        let group_index = self.dyads[index].group_index();
        let group = self.group(group_index)?.clone();
        let clo_size = self.clo_param_size;
        let moderated = clo_size + self.polynomial_coef_size;
        let dyad = &mut self.dyads[index];
        let predictors = dyad.predictors()?.to_vec();
        debug_assert_eq!(predictors.len(), group.pred_coefs.len());

        let fixed_clo = self.fixed_clo;
        for slot in 0..group.pred_coefs.len() {
            if slot < clo_size {
                let value = predictors[slot].dot(&group.pred_coefs[slot]);
                if dyad.allow_drift() {
                    dyad.set_gp_mean(slot, value)?;
                } else if fixed_clo {
                    dyad.set_clo_param_all(slot, value)?;
                } else {
                    dyad.set_clo_mean(slot, value)?;
                }
            } else if slot < moderated {
                let value = predictors[slot].dot(&group.pred_coefs[slot]);
                let local = slot - clo_size;
                let per_osc = dyad.polynomial_dim_per_osc();
                let (osc, term) = (local / per_osc, local % per_osc);
                if fixed_clo {
                    dyad.set_polynomial_coef(osc, term, value)?;
                } else {
                    dyad.set_polynomial_mean(osc, term, value)?;
                }
            } else {
                debug_assert_eq!(group.pred_coefs[slot].len(), 1);
                let value = group.pred_coefs[slot][0];
                dyad.set_outcome_mean(slot - moderated, value)?;
            }
        }
        Ok(())
    }

    /// Push the owning cluster's regression variances into series `i`.
    pub fn update_lss_variance(&mut self, index: usize) -> PopResult<()> {
        if index >= self.dyads.len() {
            return Err(PopError::IndexOutOfBounds {
                what: "series",
                index,
                len: self.dyads.len(),
            });
        }
        let group_index = self.dyads[index].group_index();
        let group = self.group(group_index)?.clone();
        let clo_size = self.clo_param_size;
        let moderated = clo_size + self.polynomial_coef_size;
        let dyad = &mut self.dyads[index];
        debug_assert_eq!(group.variances.len(), group.pred_coefs.len());

        for (slot, &variance) in group.variances.iter().enumerate() {
            if slot < clo_size {
                if dyad.allow_drift() {
                    dyad.set_gp_sigvar(slot, variance)?;
                    dyad.update_gp()?;
                } else {
                    dyad.set_clo_variance(slot, variance)?;
                }
            } else if slot < moderated {
                let local = slot - clo_size;
                let per_osc = dyad.polynomial_dim_per_osc();
                dyad.set_polynomial_var(local / per_osc, local % per_osc, variance)?;
            } else {
                dyad.set_outcome_var(slot - moderated, variance)?;
            }
        }
        Ok(())
    }

    /// Apply [`Population::update_lss_mean`] to every series; call after
    /// any change to the group regression coefficients.
    pub fn update_means(&mut self) -> PopResult<()> {
        for index in 0..self.dyads.len() {
            self.update_lss_mean(index)?;
        }
        Ok(())
    }

    /// Apply [`Population::update_lss_variance`] to every series.
    pub fn update_variances(&mut self) -> PopResult<()> {
        for index in 0..self.dyads.len() {
            self.update_lss_variance(index)?;
        }
        Ok(())
    }

    // ---- GP hyperparameter propagation ----

    pub fn update_gp_scale(&mut self, series: usize, slot: usize, value: f64) -> PopResult<()> {
        self.check_gp_indices(series, slot)?;
        self.dyads[series].set_gp_scale(slot, value)?;
        self.dyads[series].update_gp()?;
        Ok(())
    }

    pub fn update_gp_sigvar(&mut self, series: usize, slot: usize, value: f64) -> PopResult<()> {
        self.check_gp_indices(series, slot)?;
        self.dyads[series].set_gp_sigvar(slot, value)?;
        self.dyads[series].update_gp()?;
        Ok(())
    }

    /// Broadcast per-slot GP hyperparameters to every series.
    pub fn update_gps(&mut self, gp_scales: &[f64], gp_sigvars: &[f64]) -> PopResult<()> {
        debug_assert_eq!(gp_scales.len(), gp_sigvars.len());
        for series in 0..self.dyads.len() {
            for (slot, (&scale, &sigvar)) in
                gp_scales.iter().zip(gp_sigvars.iter()).enumerate()
            {
                self.update_gp_scale(series, slot, scale)?;
                self.update_gp_sigvar(series, slot, sigvar)?;
            }
        }
        Ok(())
    }

    fn check_gp_indices(&self, series: usize, slot: usize) -> PopResult<()> {
        if series >= self.dyads.len() {
            return Err(PopError::IndexOutOfBounds {
                what: "series",
                index: series,
                len: self.dyads.len(),
            });
        }
        if slot >= self.clo_param_size {
            return Err(PopError::IndexOutOfBounds {
                what: "dynamics slot",
                index: slot,
                len: self.clo_param_size,
            });
        }
        Ok(())
    }

    // ---- regression caches ----

    /// GP covariance inverse for one series/slot, with unit signal
    /// variance — the slot variance is carried by the regression, not the
    /// kernel.
    fn covariance_matrix_inv(&self, series: usize, slot: usize) -> PopResult<DMatrix<f64>> {
        let dyad = &self.dyads[series];
        let inputs = dyad.gp_inputs().map_err(PopError::from)?;
        let kernel = SquaredExponential::new(dyad.gp_scales()[slot], 1.0);
        let cov = kernel.covariance(inputs, inputs);
        cov.try_inverse().ok_or(PopError::SingularGpCovariance { series, slot })
    }

    /// Build the stacked design matrices and their products per cluster
    /// and slot: one row per time point for drifting dynamics slots, one
    /// row per series otherwise.
    pub fn init_design_matrix(&mut self) -> PopResult<()> {
        let drift = self.allow_drift();
        let num_slots = self.groups[0].pred_coefs.len();
        let num_series = self.dyads.len();

        for slot in 0..num_slots {
            // Row count per cluster.
            let mut lengths = vec![0usize; self.num_groups];
            for dyad in &self.dyads {
                let rows = if drift && slot < self.clo_param_size {
                    dyad.times().len() - 1
                } else {
                    1
                };
                lengths[dyad.group_index()] += rows;
            }
            let width = self.dyads[0].predictors()?[slot].len();
            let mut stacked: Vec<DMatrix<f64>> = lengths
                .iter()
                .map(|&rows| DMatrix::zeros(rows, width))
                .collect();
            let mut offsets = vec![0usize; self.num_groups];

            for series in 0..num_series {
                let dyad = &self.dyads[series];
                let group = dyad.group_index();
                let rows = if drift && slot < self.clo_param_size {
                    dyad.times().len() - 1
                } else {
                    1
                };
                let pred = &dyad.predictors()?[slot];
                let block = DMatrix::from_fn(rows, width, |_, c| pred[c]);
                for r in 0..rows {
                    for c in 0..width {
                        stacked[group][(offsets[group] + r, c)] = block[(r, c)];
                    }
                }
                offsets[group] += rows;
                self.caches[group].x_blocks[slot][series] = block;
            }

            for group in 0..self.num_groups {
                self.caches[group].x_t_k_inv[slot] = stacked[group].transpose();
                self.caches[group].x_t_k_inv_x[slot] =
                    stacked[group].transpose() * &stacked[group];
            }
        }

        if drift {
            self.update_covariance_matrix()?;
        }
        Ok(())
    }

    /// Refresh the per-series covariance inverses and the `Xᵀ K⁻¹` /
    /// `Xᵀ K⁻¹ X` products for the drifting dynamics slots. Must run after
    /// any GP hyperparameter change.
    pub fn update_covariance_matrix(&mut self) -> PopResult<()> {
        if !self.allow_drift() {
            return Err(PopError::NotDrifting);
        }
        let num_series = self.dyads.len();
        for slot in 0..self.clo_param_size {
            let width = self.groups[0].pred_coefs[slot].len();
            let mut totals = vec![0usize; self.num_groups];
            for dyad in &self.dyads {
                totals[dyad.group_index()] += dyad.times().len() - 1;
            }
            for group in 0..self.num_groups {
                self.caches[group].x_t_k_inv[slot] = DMatrix::zeros(width, totals[group]);
                self.caches[group].x_t_k_inv_x[slot] = DMatrix::zeros(width, width);
            }
            let mut offsets = vec![0usize; self.num_groups];
            for series in 0..num_series {
                let group = self.dyads[series].group_index();
                let k_inv = self.covariance_matrix_inv(series, slot)?;
                let block = self.caches[group].x_blocks[slot][series].clone();
                let temp = block.transpose() * &k_inv;
                self.caches[group].x_t_k_inv_x[slot] += &temp * &block;
                let cols = temp.ncols();
                for c in 0..cols {
                    for r in 0..width {
                        self.caches[group].x_t_k_inv[slot][(r, offsets[group] + c)] =
                            temp[(r, c)];
                    }
                }
                offsets[group] += cols;
                self.caches[group].k_inv[slot][series] = k_inv;
            }
        }
        Ok(())
    }

    /// Flatten current parameter values per cluster and slot into the
    /// regression targets, indexed `[cluster][slot][..]`. For drifting
    /// slots the per-interval values are stacked and the `yᵀ K⁻¹ y`
    /// sufficient statistic is accumulated on the side.
    pub fn lss_params(&mut self) -> PopResult<Vec<Vec<Vec<f64>>>> {
        let drift = self.allow_drift();
        let num_slots =
            self.clo_param_size + self.polynomial_coef_size + self.outcome_size;
        let mut result = vec![vec![Vec::new(); num_slots]; self.num_groups];
        if drift {
            for cache in &mut self.caches {
                cache.reset_y_stats();
            }
        }
        for series in 0..self.dyads.len() {
            let group = self.dyads[series].group_index();
            if drift {
                let mut y_per_slot =
                    vec![Vec::with_capacity(self.dyads[series].num_distinct_units());
                        self.clo_param_size];
                for interval in 0..self.dyads[series].num_distinct_units() {
                    for slot in 0..self.clo_param_size {
                        let value = self.dyads[series].clo_param_at(slot, interval)?;
                        y_per_slot[slot].push(value);
                        result[group][slot].push(value);
                    }
                }
                for (slot, y) in y_per_slot.iter().enumerate() {
                    let k_inv = &self.caches[group].k_inv[slot][series];
                    let y_vec = DVector::from_column_slice(y);
                    let solved = k_inv * &y_vec;
                    self.caches[group].y_t_k_inv_y[slot] += y_vec.dot(&solved);
                }
            } else {
                for slot in 0..self.clo_param_size {
                    result[group][slot].push(self.dyads[series].clo_param(slot)?);
                }
            }
            for slot in self.clo_param_size..num_slots {
                result[group][slot].push(self.dyads[series].param_value(slot, None)?);
            }
        }
        Ok(result)
    }
}
