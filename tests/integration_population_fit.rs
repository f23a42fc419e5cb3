//! Integration tests for the population fitting pipeline.
//!
//! Purpose
//! -------
//! - Validate the end-to-end path: observed data records, through
//!   population construction and predictor setup, to regression-state
//!   propagation, likelihood evaluation (serial and parallel), adapter
//!   access, and directory round-trips.
//! - Exercise realistic configurations (moderated slots, polynomial
//!   trends, drifting parameters, multiple clusters) rather than toy
//!   edge cases only.
//!
//! Coverage
//! --------
//! - `population`: construction, predictor padding, mean/variance
//!   propagation under fixed and priored dynamics, design-matrix and
//!   covariance-cache maintenance, regression-target flattening,
//!   population write/read.
//! - `likelihood`: dense evaluation, thread-count invariance.
//! - `adapters`: round-trips against live containers.
//! - `dyad` + `oscillator`: exercised throughout as the underlying
//!   machinery.
//!
//! Exclusions
//! ----------
//! - Fine-grained validation of the dynamics unit, GP primitives and
//!   prior evaluators — covered by unit tests in their modules.
//! - Any outer optimizer or sampler; the tests drive the same entry
//!   points such a driver would.

use approx::assert_relative_eq;
use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_dyads::adapters::{DyadAdapter, ParamAdapter, SharedParamAdapter};
use rust_dyads::data::SeriesData;
use rust_dyads::likelihood::{individual_likelihoods, Likelihood};
use rust_dyads::population::{Population, PopulationOptions};

const NUM_SERIES: usize = 6;
const NUM_TIMES: usize = 10;

/// Build one observed series: two oscillators' damped trajectories plus
/// moderators and an outcome, with one missing observation.
fn series_record(index: usize) -> SeriesData {
    let times: Vec<f64> = (0..NUM_TIMES).map(|t| t as f64).collect();
    let phase = 0.3 * index as f64;
    let mut observed = vec![Vec::new(), Vec::new()];
    for &t in &times {
        observed[0].push((0.9f64).powf(t) * (1.2 * t + phase).cos());
        observed[1].push((0.9f64).powf(t) * (1.2 * t + phase).sin());
    }
    observed[1][4] = f64::NAN;

    let mut data = SeriesData { times, ..SeriesData::default() };
    data.observables.insert("affect".to_string(), observed);
    data.moderators.insert("age".to_string(), vec![25.0 + index as f64; 2]);
    data.moderators
        .insert("score".to_string(), vec![0.5 * index as f64, 0.5 * index as f64 + 1.0]);
    data.outcomes.insert("satisfaction".to_string(), vec![3.0, 4.0]);
    data.group_index = index % 2;
    data
}

fn base_options() -> PopulationOptions {
    PopulationOptions {
        obs_names: vec!["affect".to_string()],
        training_fraction: 1.0,
        outcome_names: vec!["satisfaction".to_string()],
        polynomial_degree: Some(1),
        ..PopulationOptions::default()
    }
}

fn moderated_slot_names(population_slots: usize) -> Vec<Vec<String>> {
    (0..population_slots)
        .map(|slot| {
            if slot % 2 == 0 {
                vec!["age".to_string()]
            } else {
                vec!["age".to_string(), "score".to_string()]
            }
        })
        .collect()
}

fn build_population(options: &PopulationOptions) -> (Population, Vec<SeriesData>) {
    let data: Vec<SeriesData> = (0..NUM_SERIES).map(series_record).collect();
    let ids: Vec<usize> = (1..=NUM_SERIES).collect();
    let init_states = vec![DVector::from_vec(vec![1.0, 0.0, 0.0, 0.5]); NUM_SERIES];
    // 8 dynamics slots + 4 polynomial slots for degree 1 over 2 oscillators.
    let mod_names = moderated_slot_names(12);
    let mut rng = StdRng::seed_from_u64(2024);
    let population =
        Population::new(ids, mod_names, init_states, &data, options, &mut rng).unwrap();
    (population, data)
}

#[test]
fn construction_pads_predictors_to_a_common_width() {
    let (population, _) = build_population(&base_options());
    let width_per_slot: Vec<usize> =
        population.dyads()[0].predictors().unwrap().iter().map(|p| p.len()).collect();
    for dyad in population.dyads() {
        let widths: Vec<usize> =
            dyad.predictors().unwrap().iter().map(|p| p.len()).collect();
        assert_eq!(widths, width_per_slot);
    }
    // The "score" moderator differs across oscillators, so odd slots
    // carry intercept + age + two score entries.
    assert_eq!(width_per_slot[1], 4);
    assert_eq!(width_per_slot[0], 2);
}

#[test]
fn update_means_broadcasts_under_fixed_dynamics() {
    let options = PopulationOptions { fixed_clo: true, ..base_options() };
    let (mut population, _) = build_population(&options);

    // Give cluster 0's first dynamics slot a pure-intercept regression.
    population.group_params_mut()[0].pred_coefs[0][0] = 1.75;
    population.group_params_mut()[1].pred_coefs[0][0] = 1.75;
    population.update_means().unwrap();

    for dyad in population.dyads() {
        for interval in 0..dyad.num_distinct_units() {
            assert_relative_eq!(
                dyad.clo_param_at(0, interval).unwrap(),
                1.75,
                epsilon = 1e-12
            );
        }
    }
}

#[test]
fn update_means_sets_prior_means_under_priored_dynamics() {
    let (mut population, _) = build_population(&base_options());
    population.group_params_mut()[0].pred_coefs[0][0] = 0.6;
    population.update_means().unwrap();
    population.update_variances().unwrap();

    let cluster_zero_member = population
        .dyads()
        .iter()
        .position(|d| d.group_index() == 0)
        .unwrap();
    let dyad = &population.dyads()[cluster_zero_member];
    assert_relative_eq!(dyad.clo_mean(0).unwrap(), 0.6, epsilon = 1e-12);
    // Variance comes from the options' clo sigma squared.
    assert_relative_eq!(dyad.clo_variance(0).unwrap(), 1.0, epsilon = 1e-12);
}

#[test]
fn likelihood_batch_is_thread_count_invariant() {
    let (population, data) = build_population(&base_options());
    let likelihoods: Vec<Likelihood<'_>> =
        data.iter().map(|d| Likelihood::new(d, 0)).collect();

    let mut serial_pop = population.clone();
    let serial = individual_likelihoods(serial_pop.dyads_mut(), &likelihoods, 1);

    let mut parallel_pop = population.clone();
    let parallel = individual_likelihoods(parallel_pop.dyads_mut(), &likelihoods, 4);

    assert_eq!(serial.len(), NUM_SERIES);
    for (a, b) in serial.iter().zip(parallel.iter()) {
        assert!(a.is_finite());
        assert_relative_eq!(a, b, epsilon = 1e-12);
    }
}

#[test]
fn drifting_population_maintains_regression_caches() {
    let options = PopulationOptions {
        allow_drift: true,
        gp_scale: 0.8,
        clo_sigma: 0.8,
        ..base_options()
    };
    let (mut population, _) = build_population(&options);
    assert!(population.allow_drift());

    // Drifting dynamics slots stack one row per interval and member.
    let intervals = NUM_TIMES - 1;
    let members_of_zero = population
        .dyads()
        .iter()
        .filter(|d| d.group_index() == 0)
        .count();
    let x_t = population.x_t_k_inv(0).unwrap();
    assert_eq!(x_t[0].ncols(), members_of_zero * intervals);
    let x_t_x = population.x_t_k_inv_x(0).unwrap();
    assert_eq!(x_t_x[0].nrows(), x_t_x[0].ncols());

    // Flattening accumulates a positive quadratic form per slot.
    let targets = population.lss_params().unwrap();
    assert_eq!(targets.len(), 2);
    assert_eq!(targets[0][0].len(), members_of_zero * intervals);
    let y_stats = population.y_t_k_inv_y(0).unwrap().to_vec();
    assert!(y_stats[0] > 0.0);

    // A hyperparameter change plus a cache refresh keeps shapes intact.
    let p = population.clo_param_size();
    population.update_gps(&vec![0.6; p], &vec![0.9; p]).unwrap();
    population.update_covariance_matrix().unwrap();
    let x_t_after = population.x_t_k_inv(0).unwrap();
    assert_eq!(x_t_after[0].ncols(), members_of_zero * intervals);
}

#[test]
fn adapters_round_trip_against_live_containers() {
    let (mut population, _) = build_population(&base_options());

    let shared = SharedParamAdapter;
    let shared_size = shared.size(&population);
    assert_eq!(
        shared_size,
        population.shared_param_size(0, false).unwrap() * population.num_groups()
    );
    for index in [0, shared_size / 2, shared_size - 1] {
        shared.set(&mut population, index, 0.125 + index as f64).unwrap();
        assert_relative_eq!(
            shared.get(&population, index).unwrap(),
            0.125 + index as f64,
            epsilon = 1e-12
        );
    }

    let series = DyadAdapter;
    let dyad = &mut population.dyads_mut()[0];
    let series_size = series.size(dyad);
    assert_eq!(series_size, dyad.num_clo_params() + dyad.init_state().len());
    for index in 0..series_size {
        series.set(dyad, index, 0.01 * index as f64 + 0.3).unwrap();
        assert_relative_eq!(
            series.get(dyad, index).unwrap(),
            0.01 * index as f64 + 0.3,
            epsilon = 1e-12
        );
    }
}

#[test]
fn population_write_then_read_round_trips_group_state() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut population, data) = build_population(&base_options());

    // Make the group state distinctive before writing.
    population.group_params_mut()[0].pred_coefs[0][0] = 0.42;
    population.group_params_mut()[1].variances[2] = 2.5;
    population.update_means().unwrap();
    population.write(tmp.path()).unwrap();

    let (mut restored, _) = build_population(&base_options());
    restored.read(tmp.path(), &data).unwrap();

    assert_relative_eq!(
        restored.group_params()[0].pred_coefs[0][0],
        0.42,
        epsilon = 1e-10
    );
    assert_relative_eq!(restored.group_params()[1].variances[2], 2.5, epsilon = 1e-10);

    // Per-series parameters survive the round trip too.
    let original_params = population.dyads()[0].oscillators()[0].params().to_vec();
    let restored_params = restored.dyads()[0].oscillators()[0].params().to_vec();
    for (a, b) in original_params.iter().zip(restored_params.iter()) {
        assert_relative_eq!(a, b, epsilon = 1e-9);
    }
}

#[test]
fn zero_noise_free_match_recovers_the_normalizer_sum() {
    // A single-series population whose data equal the model predictions.
    let options = PopulationOptions {
        obs_names: vec!["affect".to_string()],
        training_fraction: 1.0,
        ..PopulationOptions::default()
    };
    let mut record = series_record(0);
    record.group_index = 0;
    let ids = vec![7];
    let init_states = vec![DVector::from_vec(vec![1.0, 0.0, 0.0, 0.5])];
    let mod_names = vec![vec!["age".to_string()]; 8];
    let mut rng = StdRng::seed_from_u64(1);
    let mut population = Population::new(
        ids,
        mod_names,
        init_states,
        std::slice::from_ref(&record),
        &options,
        &mut rng,
    )
    .unwrap();

    let sigma: f64 = 0.5; // the default noise sigma
    let states = population.dyads_mut()[0].states().unwrap().to_vec();
    let mut observed = vec![Vec::new(), Vec::new()];
    for row in &states {
        for (osc, slot) in observed.iter_mut().enumerate() {
            slot.push(row[0][osc]);
        }
    }
    record.observables.insert("affect".to_string(), observed);

    let ll = Likelihood::new(&record, 0).log_prob(&mut population.dyads_mut()[0]);
    let terms = (NUM_TIMES * 2) as f64;
    let expected = terms * -0.5 * (rust_dyads::utils::LN_2PI + (sigma * sigma).ln());
    assert_relative_eq!(ll, expected, epsilon = 1e-8);
}
