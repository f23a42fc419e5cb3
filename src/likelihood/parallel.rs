//! Thread-parallel likelihood evaluation over a population.
//!
//! The batch partitions the series indices into contiguous blocks — block
//! count = min(requested threads, available hardware parallelism, series
//! count) — and evaluates each block sequentially on its own scoped
//! thread, writing into a disjoint slice of the output vector. No locks
//! are needed: every thread owns its slice of series, likelihood configs
//! and output, and the population's cached matrices are read-only during
//! the pass. The scope joins all workers before returning; the
//! single-threaded fall-back is the same sequential loop.

use crate::dyad::Dyad;
use crate::likelihood::evaluator::Likelihood;
use crate::population::Population;

/// Evaluate each series' likelihood, in parallel over contiguous blocks.
///
/// `likelihoods[i]` is applied to `dyads[i]`; the two slices must have
/// equal length. Returns one log-probability per series, in series order,
/// identical (up to floating-point evaluation order, which the
/// shared-nothing partition keeps fixed) for any thread count.
pub fn individual_likelihoods(
    dyads: &mut [Dyad],
    likelihoods: &[Likelihood<'_>],
    num_threads: usize,
) -> Vec<f64> {
    let n = dyads.len();
    debug_assert_eq!(likelihoods.len(), n);
    let mut out = vec![0.0; n];
    if n == 0 {
        return out;
    }
    let hardware = std::thread::available_parallelism().map(|p| p.get()).unwrap_or(1);
    let blocks = num_threads.max(1).min(hardware).min(n);
    if blocks == 1 {
        evaluate_block(dyads, likelihoods, &mut out);
        return out;
    }
    let chunk = n.div_ceil(blocks);
    std::thread::scope(|scope| {
        let work = dyads
            .chunks_mut(chunk)
            .zip(likelihoods.chunks(chunk))
            .zip(out.chunks_mut(chunk));
        for ((dyad_block, likelihood_block), out_block) in work {
            scope.spawn(move || evaluate_block(dyad_block, likelihood_block, out_block));
        }
    });
    out
}

/// Convenience form over a whole population.
pub fn population_likelihoods(
    population: &mut Population,
    likelihoods: &[Likelihood<'_>],
    num_threads: usize,
) -> Vec<f64> {
    individual_likelihoods(population.dyads_mut(), likelihoods, num_threads)
}

fn evaluate_block(dyads: &mut [Dyad], likelihoods: &[Likelihood<'_>], out: &mut [f64]) {
    for ((dyad, likelihood), slot) in dyads.iter_mut().zip(likelihoods).zip(out.iter_mut()) {
        *slot = likelihood.log_prob(dyad);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SeriesData;
    use crate::oscillator::{CoupledOscillator, Parameterization};
    use approx::assert_relative_eq;
    use nalgebra::DVector;
    use ndarray::Array1;
    use std::collections::BTreeMap;

    fn build_series(offset: f64) -> (Dyad, SeriesData) {
        let times: Vec<f64> = (0..6).map(|t| t as f64).collect();
        let unit = CoupledOscillator::new::<rand::rngs::StdRng>(
            2,
            5.0,
            0.15,
            Parameterization::Real,
            None,
        )
        .unwrap();
        let mut dyad = Dyad::new(
            times.clone(),
            DVector::from_vec(vec![1.0 + offset, -0.5, 0.2, 0.0]),
            vec![unit],
            vec!["affect".to_string()],
            Array1::from_elem(1, 0.5),
            None,
            Vec::new(),
            &BTreeMap::new(),
            0,
            false,
        )
        .unwrap();
        let states = dyad.states().unwrap().to_vec();
        let mut observed = vec![Vec::new(), Vec::new()];
        for row in &states {
            for (osc, slot) in observed.iter_mut().enumerate() {
                // Slightly perturbed observations keep the z-terms alive.
                slot.push(row[0][osc] + 0.1 * offset);
            }
        }
        let mut data = SeriesData { times, ..SeriesData::default() };
        data.observables.insert("affect".to_string(), observed);
        (dyad, data)
    }

    #[test]
    fn single_and_multi_threaded_batches_agree() {
        let built: Vec<(Dyad, SeriesData)> =
            (0..7).map(|i| build_series(i as f64 * 0.3)).collect();
        let data: Vec<SeriesData> = built.iter().map(|(_, d)| d.clone()).collect();
        let mut dyads_a: Vec<Dyad> = built.iter().map(|(d, _)| d.clone()).collect();
        let mut dyads_b: Vec<Dyad> = built.iter().map(|(d, _)| d.clone()).collect();
        let likelihoods: Vec<Likelihood<'_>> =
            data.iter().map(|d| Likelihood::new(d, 0)).collect();

        let serial = individual_likelihoods(&mut dyads_a, &likelihoods, 1);
        let parallel = individual_likelihoods(&mut dyads_b, &likelihoods, 4);
        assert_eq!(serial.len(), parallel.len());
        for (a, b) in serial.iter().zip(parallel.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn oversubscribed_thread_count_is_clamped() {
        let built: Vec<(Dyad, SeriesData)> = (0..3).map(|_| build_series(0.0)).collect();
        let data: Vec<SeriesData> = built.iter().map(|(_, d)| d.clone()).collect();
        let mut dyads: Vec<Dyad> = built.iter().map(|(d, _)| d.clone()).collect();
        let likelihoods: Vec<Likelihood<'_>> =
            data.iter().map(|d| Likelihood::new(d, 0)).collect();
        let values = individual_likelihoods(&mut dyads, &likelihoods, 64);
        assert_eq!(values.len(), 3);
        for v in values {
            assert!(v.is_finite());
        }
    }

    #[test]
    fn empty_population_yields_an_empty_vector() {
        let values = individual_likelihoods(&mut [], &[], 4);
        assert!(values.is_empty());
    }
}
