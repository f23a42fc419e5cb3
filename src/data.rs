//! External per-series data records.
//!
//! The data provider (file parser, database, simulation — outside this
//! crate) hands the model one [`SeriesData`] per series: timestamps, the
//! observed trajectories keyed by observable name, the moderator
//! covariates keyed by moderator name, scalar outcome values keyed by
//! outcome name, and a group index. The core reads this once at
//! construction and again inside the likelihood evaluator's data lookup.
//!
//! Conventions:
//! - Observed trajectories are indexed `[oscillator][time]`; `NaN` marks a
//!   missing observation and is skipped by the likelihood.
//! - Moderator maps carry one value per oscillator; a moderator whose
//!   values coincide across oscillators is treated as shared when
//!   predictors are built.
//! - `BTreeMap` keys give deterministic iteration order for persistence
//!   and tests.

use std::collections::BTreeMap;

/// Everything the model consumes about one observed series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesData {
    /// Observation timestamps, strictly increasing.
    pub times: Vec<f64>,
    /// Observable name → `[oscillator][time]` values; `NaN` = missing.
    pub observables: BTreeMap<String, Vec<Vec<f64>>>,
    /// Moderator name → per-oscillator covariate values.
    pub moderators: BTreeMap<String, Vec<f64>>,
    /// Outcome name → per-oscillator response values.
    pub outcomes: BTreeMap<String, Vec<f64>>,
    /// Cluster assignment of this series.
    pub group_index: usize,
}

impl SeriesData {
    /// Per-oscillator mean of the named observable, ignoring missing
    /// entries. Used to seed polynomial trend offsets.
    pub fn observable_means(&self, name: &str) -> Option<Vec<f64>> {
        let series = self.observables.get(name)?;
        Some(
            series
                .iter()
                .map(|osc| {
                    let valid: Vec<f64> =
                        osc.iter().copied().filter(|v| v.is_finite()).collect();
                    if valid.is_empty() {
                        0.0
                    } else {
                        valid.iter().sum::<f64>() / valid.len() as f64
                    }
                })
                .collect(),
        )
    }

    /// True when the named moderator carries one effective value for all
    /// oscillators (all entries numerically equal).
    pub fn is_shared_moderator(&self, name: &str) -> bool {
        match self.moderators.get(name) {
            Some(values) => values.windows(2).all(|w| (w[0] - w[1]).abs() <= f64::EPSILON),
            None => true,
        }
    }
}
