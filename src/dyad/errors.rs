//! Errors for the per-series state-space container (configuration and
//! dimension checks, persistence failures, and violated lazy-cache
//! invariants).
//!
//! [`DyadError`] wraps [`OscError`] from the dynamics layer via `From`, so
//! container code can use `?` across both layers. I/O variants always
//! carry the offending path.

use crate::oscillator::errors::OscError;

/// Result alias for series-container operations.
pub type DyadResult<T> = Result<T, DyadError>;

/// Unified error type for the series container.
#[derive(Debug, Clone, PartialEq)]
pub enum DyadError {
    /// Error bubbled up from a dynamics unit.
    Osc(OscError),

    // ---- Configuration / dimensions ----
    /// Fewer than two timestamps.
    TooFewTimestamps { len: usize },

    /// Initial state length is not twice the oscillator count.
    BadInitStateLength { expected: usize, actual: usize },

    /// Dynamics-unit count incompatible with the timestamp grid.
    BadUnitCount { units: usize, times: usize },

    /// Observable-name and noise-sigma counts differ.
    NoiseSigmaMismatch { observables: usize, sigmas: usize },

    /// A generic index is out of bounds.
    IndexOutOfBounds { what: &'static str, index: usize, len: usize },

    /// Two lengths that must agree do not.
    DimensionMismatch { what: &'static str, expected: usize, actual: usize },

    /// A required moderator is absent from the supplied data.
    MissingModerator { name: String },

    // ---- Lazy-cache / GP invariants ----
    /// A Gaussian-process operation ran before `init_gp`.
    GpNotInitialized,

    /// Predictors were requested before `init_predictors`.
    PredictorsNotInitialized,

    /// The hidden-state cache failed to reach a clean state.
    StaleStates,

    // ---- Persistence ----
    /// A persisted file could not be opened or created.
    CannotOpen { path: String },

    /// A persisted file exists but its contents do not parse.
    Malformed { path: String, reason: String },
}

impl From<OscError> for DyadError {
    fn from(err: OscError) -> Self {
        DyadError::Osc(err)
    }
}

impl std::error::Error for DyadError {}

impl std::fmt::Display for DyadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DyadError::Osc(err) => write!(f, "Dyad Error: {}", err),
            DyadError::TooFewTimestamps { len } => {
                write!(f, "Dyad Error: need at least two timestamps, got {}", len)
            }
            DyadError::BadInitStateLength { expected, actual } => write!(
                f,
                "Dyad Error: initial state has length {}, expected {}",
                actual, expected
            ),
            DyadError::BadUnitCount { units, times } => write!(
                f,
                "Dyad Error: {} dynamics units incompatible with {} timestamps",
                units, times
            ),
            DyadError::NoiseSigmaMismatch { observables, sigmas } => write!(
                f,
                "Dyad Error: {} observables but {} noise sigmas",
                observables, sigmas
            ),
            DyadError::IndexOutOfBounds { what, index, len } => {
                write!(f, "Dyad Error: {} index {} out of bounds (len = {})", what, index, len)
            }
            DyadError::DimensionMismatch { what, expected, actual } => {
                write!(f, "Dyad Error: {} has length {}, expected {}", what, actual, expected)
            }
            DyadError::MissingModerator { name } => {
                write!(f, "Dyad Error: data does not have moderator {}", name)
            }
            DyadError::GpNotInitialized => {
                write!(f, "Dyad Error: GP prior is not initialized")
            }
            DyadError::PredictorsNotInitialized => {
                write!(f, "Dyad Error: predictors are not initialized")
            }
            DyadError::StaleStates => {
                write!(f, "Dyad Error: hidden states failed to update")
            }
            DyadError::CannotOpen { path } => {
                write!(f, "Dyad Error: can't open file {}", path)
            }
            DyadError::Malformed { path, reason } => {
                write!(f, "Dyad Error: malformed file {}: {}", path, reason)
            }
        }
    }
}
