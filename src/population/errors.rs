//! Errors for the population container (construction validation, cache
//! maintenance, and population-level persistence).

use crate::dyad::errors::DyadError;

/// Result alias for population-container operations.
pub type PopResult<T> = Result<T, PopError>;

/// Unified error type for the population container.
#[derive(Debug, Clone, PartialEq)]
pub enum PopError {
    /// Error bubbled up from a series container.
    Dyad(DyadError),

    // ---- Construction validation ----
    /// Series-id, data and initial-state counts disagree.
    SeriesCountMismatch { ids: usize, data: usize, init_states: usize },

    /// A population needs at least one series.
    EmptyPopulation,

    /// A series carries a cluster index outside the configured range.
    GroupIndexOutOfBounds { series: usize, group: usize, num_groups: usize },

    /// The training fraction must lie in (0, 1].
    BadTrainingFraction { value: f64 },

    /// The per-slot moderator-name lists do not cover the moderated
    /// (dynamics + polynomial) parameter slots.
    ModeratorSlotMismatch { expected: usize, actual: usize },

    /// A generic index is out of bounds.
    IndexOutOfBounds { what: &'static str, index: usize, len: usize },

    // ---- Regression caches ----
    /// An operation that requires drifting parameters ran on a
    /// fixed-parameter population.
    NotDrifting,

    /// A per-series GP covariance matrix could not be inverted.
    SingularGpCovariance { series: usize, slot: usize },

    // ---- Persistence ----
    /// A persisted file could not be opened or created.
    CannotOpen { path: String },

    /// A persisted file exists but its contents do not parse.
    Malformed { path: String, reason: String },
}

impl From<DyadError> for PopError {
    fn from(err: DyadError) -> Self {
        PopError::Dyad(err)
    }
}

impl From<crate::oscillator::OscError> for PopError {
    fn from(err: crate::oscillator::OscError) -> Self {
        PopError::Dyad(DyadError::Osc(err))
    }
}

impl std::error::Error for PopError {}

impl std::fmt::Display for PopError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PopError::Dyad(err) => write!(f, "Population Error: {}", err),
            PopError::SeriesCountMismatch { ids, data, init_states } => write!(
                f,
                "Population Error: {} ids, {} data records and {} initial states disagree",
                ids, data, init_states
            ),
            PopError::EmptyPopulation => {
                write!(f, "Population Error: no series supplied")
            }
            PopError::GroupIndexOutOfBounds { series, group, num_groups } => write!(
                f,
                "Population Error: series {} has group {} but only {} groups exist",
                series, group, num_groups
            ),
            PopError::BadTrainingFraction { value } => {
                write!(f, "Population Error: training fraction {} outside (0, 1]", value)
            }
            PopError::ModeratorSlotMismatch { expected, actual } => write!(
                f,
                "Population Error: {} moderator-name lists supplied, {} moderated slots",
                actual, expected
            ),
            PopError::IndexOutOfBounds { what, index, len } => {
                write!(f, "Population Error: {} index {} out of bounds (len = {})", what, index, len)
            }
            PopError::NotDrifting => {
                write!(f, "Population Error: operation requires drifting parameters")
            }
            PopError::SingularGpCovariance { series, slot } => write!(
                f,
                "Population Error: GP covariance for series {} slot {} is singular",
                series, slot
            ),
            PopError::CannotOpen { path } => {
                write!(f, "Population Error: can't open file {}", path)
            }
            PopError::Malformed { path, reason } => {
                write!(f, "Population Error: malformed file {}: {}", path, reason)
            }
        }
    }
}
