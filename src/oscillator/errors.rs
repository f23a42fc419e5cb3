//! Errors for the coupled-oscillator dynamics unit (parameter validation,
//! modal-decomposition failures, and state-propagation invariants).
//!
//! This module defines [`OscError`], used across the dynamics unit and the
//! batch propagation routines. It implements `Display`/`Error` and is
//! wrapped by the higher-level container error types via `From`.
//!
//! ## Conventions
//! - **Indices are 0-based.**
//! - Natural frequencies must be **strictly positive**; mode angles live in
//!   `[-π, π]`.
//! - Closed-form propagation requires every mode to be **underdamped**
//!   (`ζ < 1`); overdamped parameter sets are reported, never silently
//!   propagated as NaN.

/// Result alias for oscillator operations that may produce [`OscError`].
pub type OscResult<T> = Result<T, OscError>;

/// Unified error type for the coupled-oscillator dynamics unit.
///
/// Covers parameter-buffer validation, modal-decomposition failures, and
/// batch-propagation preconditions. Configuration errors are raised at the
/// point of detection; callers treat modal failures as a signal that the
/// proposed parameter set is invalid.
#[derive(Debug, Clone, PartialEq)]
pub enum OscError {
    // ---- Parameter buffer validation ----
    /// Parameter index is outside the buffer.
    ParamIndexOutOfBounds { index: usize, len: usize },

    /// The parameter buffer is empty or has a length inconsistent with the
    /// oscillator count and parameterization.
    BadParamLength { expected: usize, actual: usize },

    /// The modal parameterization only supports two oscillators.
    ModalUnsupported { num_oscillators: usize },

    /// A mode angle is outside `[-π, π]`.
    ModeAngleOutOfRange { index: usize, value: f64 },

    // ---- Modal decomposition ----
    /// A natural frequency is not strictly positive.
    NonPositiveFrequency { index: usize, value: f64 },

    /// A mode is not underdamped (`ζ ≥ 1`); the closed-form solution does
    /// not apply.
    OverdampedMode { index: usize, ratio: f64 },

    /// The modal matrix is not invertible for the current mode angles.
    SingularModalMatrix,

    /// A mode-shape radius collapsed to zero.
    DegenerateModeShape { index: usize },

    // ---- Batch propagation ----
    /// No dynamics units were supplied to a propagation routine.
    EmptyOscillatorSequence,

    /// `start_index` exceeds the number of intervals.
    StartIndexOutOfBounds { start: usize, intervals: usize },

    /// The timestamp grid and the dynamics-unit sequence disagree.
    TimeGridMismatch { times: usize, units: usize },

    /// A propagation interval has a non-positive duration.
    NonPositiveInterval { index: usize, dt: f64 },

    /// An explicit time-index entry is out of range or not increasing.
    BadTimeIndex { position: usize, index: usize },
}

impl std::error::Error for OscError {}

impl std::fmt::Display for OscError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OscError::ParamIndexOutOfBounds { index, len } => {
                write!(f, "Oscillator Error: parameter index {} out of bounds (len = {})", index, len)
            }
            OscError::BadParamLength { expected, actual } => {
                write!(f, "Oscillator Error: parameter buffer has length {}, expected {}", actual, expected)
            }
            OscError::ModalUnsupported { num_oscillators } => write!(
                f,
                "Oscillator Error: modal parameterization supports 2 oscillators, got {}",
                num_oscillators
            ),
            OscError::ModeAngleOutOfRange { index, value } => {
                write!(f, "Oscillator Error: mode angle {} = {} outside [-pi, pi]", index, value)
            }
            OscError::NonPositiveFrequency { index, value } => {
                write!(f, "Oscillator Error: natural frequency {} = {} is not positive", index, value)
            }
            OscError::OverdampedMode { index, ratio } => {
                write!(f, "Oscillator Error: mode {} has damping ratio {} >= 1", index, ratio)
            }
            OscError::SingularModalMatrix => {
                write!(f, "Oscillator Error: modal matrix is not invertible")
            }
            OscError::DegenerateModeShape { index } => {
                write!(f, "Oscillator Error: mode shape {} has zero radius", index)
            }
            OscError::EmptyOscillatorSequence => {
                write!(f, "Oscillator Error: empty dynamics-unit sequence")
            }
            OscError::StartIndexOutOfBounds { start, intervals } => write!(
                f,
                "Oscillator Error: start index {} exceeds interval count {}",
                start, intervals
            ),
            OscError::TimeGridMismatch { times, units } => write!(
                f,
                "Oscillator Error: {} timestamps incompatible with {} dynamics units",
                times, units
            ),
            OscError::NonPositiveInterval { index, dt } => {
                write!(f, "Oscillator Error: interval {} has non-positive duration {}", index, dt)
            }
            OscError::BadTimeIndex { position, index } => write!(
                f,
                "Oscillator Error: time-index entry {} (value {}) is out of range or not increasing",
                position, index
            ),
        }
    }
}
