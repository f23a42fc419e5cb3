//! Flat-parameter adapters.
//!
//! An external optimizer or sampler wants to address the heterogeneous
//! parameter set of a container as one contiguous vector of scalars. The
//! [`ParamAdapter`] trait fixes the contract — `size`, bounds-checked
//! `get`, and `set` that invalidates whatever caches the mutated field
//! owns — and three adapters implement it:
//!
//! - [`DyadAdapter`]: one series' dynamics-unit parameters across its
//!   distinct parameter sets (one set without drift, one per interval
//!   with), followed by the initial-state components;
//! - [`SharedParamAdapter`]: a population's cluster regression state —
//!   predictor coefficients, then variances — with the cluster selected
//!   by dividing the flat index by the per-cluster size;
//! - [`PersonParamAdapter`]: a fixed list of dynamics-parameter
//!   positions, each write applied to every interval of one series at
//!   once.

use crate::dyad::{Dyad, DyadError, DyadResult};
use crate::population::{PopError, PopResult, Population};

/// Uniform flat-vector access to a container's free parameters.
pub trait ParamAdapter {
    type Target;
    type Error;

    /// Total addressable scalar count.
    fn size(&self, target: &Self::Target) -> usize;

    /// Current value at flattened index `index`.
    fn get(&self, target: &Self::Target, index: usize) -> Result<f64, Self::Error>;

    /// Mutate the value at `index`, invalidating dependent caches.
    fn set(&self, target: &mut Self::Target, index: usize, value: f64)
        -> Result<(), Self::Error>;
}

/// Series-level adapter: distinct dynamics-parameter sets, then the
/// initial state.
#[derive(Debug, Clone, Copy, Default)]
pub struct DyadAdapter;

impl DyadAdapter {
    fn split(&self, dyad: &Dyad, index: usize) -> DyadResult<DyadSlot> {
        let per_unit = dyad.num_clo_params();
        let dynamic = per_unit * dyad.num_distinct_units();
        if index < dynamic {
            return Ok(DyadSlot::Unit { interval: index / per_unit, slot: index % per_unit });
        }
        let state_index = index - dynamic;
        if state_index < dyad.init_state().len() {
            return Ok(DyadSlot::InitState(state_index));
        }
        Err(DyadError::IndexOutOfBounds {
            what: "flat parameter",
            index,
            len: self.size(dyad),
        })
    }
}

enum DyadSlot {
    Unit { interval: usize, slot: usize },
    InitState(usize),
}

impl ParamAdapter for DyadAdapter {
    type Target = Dyad;
    type Error = DyadError;

    fn size(&self, dyad: &Dyad) -> usize {
        dyad.num_clo_params() * dyad.num_distinct_units() + dyad.init_state().len()
    }

    fn get(&self, dyad: &Dyad, index: usize) -> DyadResult<f64> {
        match self.split(dyad, index)? {
            DyadSlot::Unit { interval, slot } => dyad.clo_param_at(slot, interval),
            DyadSlot::InitState(k) => Ok(dyad.init_state()[k]),
        }
    }

    fn set(&self, dyad: &mut Dyad, index: usize, value: f64) -> DyadResult<()> {
        match self.split(dyad, index)? {
            DyadSlot::Unit { interval, slot } => dyad.set_clo_param_at(slot, interval, value),
            DyadSlot::InitState(k) => dyad.set_init_state_component(k, value),
        }
    }
}

/// Population-level adapter over cluster regression parameters:
/// predictor-coefficient components first, then the per-slot variances,
/// cluster after cluster.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedParamAdapter;

impl SharedParamAdapter {
    fn per_cluster(&self, population: &Population) -> usize {
        population.shared_param_size(0, false).unwrap_or(0)
    }

    fn split(
        &self,
        population: &Population,
        index: usize,
    ) -> PopResult<(usize, SharedSlot)> {
        let per_cluster = self.per_cluster(population);
        if per_cluster == 0 || index >= per_cluster * population.num_groups() {
            return Err(PopError::IndexOutOfBounds {
                what: "shared parameter",
                index,
                len: per_cluster * population.num_groups(),
            });
        }
        let cluster = index / per_cluster;
        let local = index % per_cluster;
        let group = population.group(cluster)?;
        match group.locate_coef(local) {
            Some((slot, entry)) => Ok((cluster, SharedSlot::Coef { slot, entry })),
            None => Ok((cluster, SharedSlot::Variance(local - group.pred_coef_size()))),
        }
    }
}

enum SharedSlot {
    Coef { slot: usize, entry: usize },
    Variance(usize),
}

impl ParamAdapter for SharedParamAdapter {
    type Target = Population;
    type Error = PopError;

    fn size(&self, population: &Population) -> usize {
        self.per_cluster(population) * population.num_groups()
    }

    fn get(&self, population: &Population, index: usize) -> PopResult<f64> {
        let (cluster, slot) = self.split(population, index)?;
        let group = population.group(cluster)?;
        Ok(match slot {
            SharedSlot::Coef { slot, entry } => group.pred_coefs[slot][entry],
            SharedSlot::Variance(v) => group.variances[v],
        })
    }

    fn set(&self, population: &mut Population, index: usize, value: f64) -> PopResult<()> {
        let (cluster, slot) = self.split(population, index)?;
        let group = &mut population.group_params_mut()[cluster];
        match slot {
            SharedSlot::Coef { slot, entry } => group.pred_coefs[slot][entry] = value,
            SharedSlot::Variance(v) => group.variances[v] = value,
        }
        Ok(())
    }
}

/// Person-level adapter: a fixed list of dynamics-parameter positions,
/// each representing one scalar for the whole series — writes go to every
/// interval simultaneously.
#[derive(Debug, Clone, Default)]
pub struct PersonParamAdapter {
    positions: Vec<usize>,
}

impl PersonParamAdapter {
    pub fn new(positions: Vec<usize>) -> Self {
        PersonParamAdapter { positions }
    }

    pub fn positions(&self) -> &[usize] {
        &self.positions
    }
}

impl ParamAdapter for PersonParamAdapter {
    type Target = Dyad;
    type Error = DyadError;

    fn size(&self, _dyad: &Dyad) -> usize {
        self.positions.len()
    }

    fn get(&self, dyad: &Dyad, index: usize) -> DyadResult<f64> {
        let slot = *self.positions.get(index).ok_or(DyadError::IndexOutOfBounds {
            what: "person parameter",
            index,
            len: self.positions.len(),
        })?;
        dyad.clo_param(slot)
    }

    fn set(&self, dyad: &mut Dyad, index: usize, value: f64) -> DyadResult<()> {
        let slot = *self.positions.get(index).ok_or(DyadError::IndexOutOfBounds {
            what: "person parameter",
            index,
            len: self.positions.len(),
        })?;
        dyad.set_clo_param_all(slot, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SeriesData;
    use crate::oscillator::{CoupledOscillator, Parameterization};
    use crate::population::PopulationOptions;
    use nalgebra::DVector;
    use ndarray::Array1;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeMap;

    fn dyad(drift: bool) -> Dyad {
        let num_times = 4;
        let times: Vec<f64> = (0..num_times).map(|t| t as f64).collect();
        let unit =
            CoupledOscillator::new::<StdRng>(2, 5.0, 0.1, Parameterization::Real, None).unwrap();
        let clos = if drift { vec![unit; num_times - 1] } else { vec![unit] };
        Dyad::new(
            times,
            DVector::zeros(4),
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

    fn population() -> Population {
        let mut rng = StdRng::seed_from_u64(5);
        let data: Vec<SeriesData> = (0..3)
            .map(|i| {
                let mut d = SeriesData {
                    times: (0..6).map(|t| t as f64).collect(),
                    ..SeriesData::default()
                };
                d.moderators.insert("age".to_string(), vec![20.0 + i as f64; 2]);
                d.observables.insert(
                    "observable".to_string(),
                    vec![vec![0.1; 6], vec![0.2; 6]],
                );
                d
            })
            .collect();
        let options = PopulationOptions {
            training_fraction: 1.0,
            ..PopulationOptions::default()
        };
        let mod_names = vec![vec!["age".to_string()]; 8];
        Population::new(
            vec![1, 2, 3],
            mod_names,
            vec![DVector::zeros(4); 3],
            &data,
            &options,
            &mut rng,
        )
        .unwrap()
    }

    #[test]
    fn dyad_adapter_round_trips_and_counts_free_scalars() {
        let mut d = dyad(false);
        let adapter = DyadAdapter;
        // 8 dynamics parameters (one shared set) + 4 state components.
        assert_eq!(adapter.size(&d), 12);
        for i in 0..adapter.size(&d) {
            adapter.set(&mut d, i, 0.5 + i as f64 * 0.01).unwrap();
            assert_eq!(adapter.get(&d, i).unwrap(), 0.5 + i as f64 * 0.01);
        }
        assert!(adapter.get(&d, adapter.size(&d)).is_err());
    }

    #[test]
    fn dyad_adapter_addresses_each_interval_under_drift() {
        let mut d = dyad(true);
        let adapter = DyadAdapter;
        // 3 intervals × 8 parameters + 4 state components.
        assert_eq!(adapter.size(&d), 28);
        adapter.set(&mut d, 8, 2.5).unwrap(); // second interval, slot 0
        assert_eq!(d.clo_param_at(0, 1).unwrap(), 2.5);
        assert_eq!(d.clo_param_at(0, 0).unwrap(), adapter.get(&d, 0).unwrap());
    }

    #[test]
    fn shared_adapter_spans_coefficients_then_variances() {
        let mut p = population();
        let adapter = SharedParamAdapter;
        let coef_size = p.pred_coef_size(0).unwrap();
        let total = p.shared_param_size(0, false).unwrap();
        assert_eq!(adapter.size(&p), total);
        for i in 0..adapter.size(&p) {
            adapter.set(&mut p, i, 0.25 + i as f64 * 0.1).unwrap();
            assert_eq!(adapter.get(&p, i).unwrap(), 0.25 + i as f64 * 0.1);
        }
        // The tail indices land in the variance block.
        assert_eq!(
            p.group_params()[0].variances[0],
            adapter.get(&p, coef_size).unwrap()
        );
    }

    #[test]
    fn person_adapter_broadcasts_to_every_interval() {
        let mut d = dyad(true);
        let adapter = PersonParamAdapter::new(vec![0, 4]);
        assert_eq!(adapter.size(&d), 2);
        adapter.set(&mut d, 0, 3.25).unwrap();
        for interval in 0..d.num_distinct_units() {
            assert_eq!(d.clo_param_at(0, interval).unwrap(), 3.25);
        }
        assert_eq!(adapter.get(&d, 0).unwrap(), 3.25);
        assert!(adapter.get(&d, 2).is_err());
    }

    #[test]
    fn dyad_and_person_adapters_cover_disjoint_views() {
        let d = dyad(false);
        let full = DyadAdapter;
        let person = PersonParamAdapter::new((0..d.num_clo_params()).collect());
        // The person adapter is a view over the dynamics block; the series
        // adapter covers dynamics plus the initial state.
        assert_eq!(
            full.size(&d),
            person.size(&d) * d.num_distinct_units() + d.init_state().len()
        );
    }
}
