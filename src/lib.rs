//! rust_dyads — hierarchical coupled-oscillator models for dyadic time series.
//!
//! Purpose
//! -------
//! Fit a hierarchical, time-varying linear dynamical model ("coupled
//! oscillators") to multiple parallel time series ("dyads"). Serve as the
//! crate root for Rust callers and, when the `python-bindings` feature is
//! enabled, as the PyO3 bridge exposing the dynamics unit to Python via
//! the `_rust_dyads` extension module.
//!
//! Key behaviors
//! -------------
//! - Re-export the core modules (`oscillator`, `dyad`, `population`,
//!   `likelihood`, `adapters`, `gp`, `data`) as the public crate surface.
//! - Define the `#[pyclass]` wrapper and `#[pymodule]` initializer for
//!   the `_rust_dyads` Python extension.
//!
//! Invariants & assumptions
//! ------------------------
//! - All numerical work lives in the inner modules; this file performs
//!   only FFI glue, input validation, and error mapping.
//! - The crate exposes no optimization or sampling loop of its own: an
//!   external driver addresses parameters through the adapters, evaluates
//!   `log_prob` / `individual_likelihoods`, and propagates group
//!   regression state with `update_means` / `update_variances`.
//!
//! Conventions
//! -----------
//! - State vectors are `[positions | velocities]` of length twice the
//!   oscillator count.
//! - Numerical pathologies inside likelihood/prior evaluation yield the
//!   sentinel `utils::MIN_LOG_PROB` instead of errors; configuration and
//!   I/O problems are typed errors that propagate.
//! - Randomized operations take a caller-supplied `rand::Rng`, so runs
//!   are reproducible under a seed.
//!
//! Testing notes
//! -------------
//! - Core numerical behavior is covered by unit tests in the inner
//!   modules; `tests/` exercises the population pipeline end to end.

pub mod adapters;
pub mod data;
pub mod dyad;
pub mod gp;
pub mod likelihood;
pub mod oscillator;
pub mod population;
pub mod utils;

#[cfg(feature = "python-bindings")]
use pyo3::{exceptions::PyValueError, prelude::*};

#[cfg(feature = "python-bindings")]
use crate::oscillator::{integrate_states, CoupledOscillator, Parameterization};

/// Oscillator — Python-facing wrapper for a coupled-oscillator dynamics
/// unit.
///
/// Purpose
/// -------
/// Expose parameter access and forward state propagation to Python
/// callers while preserving the core invariants and error handling.
///
/// Key behaviors
/// -------------
/// - Build a [`CoupledOscillator`] in the real or modal parameterization
///   from a period/damping guess.
/// - Forward `get_param` / `set_param` with the crate's bounds checks,
///   mapping errors to Python `ValueError`s.
/// - Propagate an initial state across a timestamp grid and return the
///   trajectory as nested lists.
///
/// Notes
/// -----
/// - Native Rust callers should use [`CoupledOscillator`] directly; this
///   type exists solely for the PyO3 binding surface.
#[cfg(feature = "python-bindings")]
#[pyclass(module = "rust_dyads")]
pub struct Oscillator {
    inner: CoupledOscillator,
}

#[cfg(feature = "python-bindings")]
#[pymethods]
impl Oscillator {
    #[new]
    #[pyo3(
        signature = (num_oscillators = 2, period = 5.0, damping = 0.0, modal = false),
        text_signature = "(num_oscillators=2, period=5.0, damping=0.0, modal=False)"
    )]
    pub fn new(
        num_oscillators: usize,
        period: f64,
        damping: f64,
        modal: bool,
    ) -> PyResult<Self> {
        let form = if modal { Parameterization::Modal } else { Parameterization::Real };
        let inner = CoupledOscillator::new::<rand::rngs::StdRng>(
            num_oscillators,
            period,
            damping,
            form,
            None,
        )
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
        Ok(Oscillator { inner })
    }

    #[getter]
    pub fn num_params(&self) -> usize {
        self.inner.num_params()
    }

    #[getter]
    pub fn num_oscillators(&self) -> usize {
        self.inner.num_oscillators()
    }

    pub fn get_param(&self, index: usize) -> PyResult<f64> {
        self.inner.get_param(index).map_err(|e| PyValueError::new_err(e.to_string()))
    }

    pub fn set_param(&mut self, index: usize, value: f64) -> PyResult<()> {
        self.inner.set_param(index, value).map_err(|e| PyValueError::new_err(e.to_string()))
    }

    #[getter]
    pub fn params(&self) -> Vec<f64> {
        self.inner.params().to_vec()
    }

    /// Propagate `initial_state` across `times`, returning one state per
    /// timestamp.
    pub fn propagate(
        &mut self,
        initial_state: Vec<f64>,
        times: Vec<f64>,
    ) -> PyResult<Vec<Vec<f64>>> {
        if initial_state.len() != 2 * self.inner.num_oscillators() {
            return Err(PyValueError::new_err(
                "initial_state must have length 2 * num_oscillators",
            ));
        }
        let init = nalgebra::DVector::from_vec(initial_state);
        let mut states = Vec::new();
        let clos = std::slice::from_mut(&mut self.inner);
        integrate_states(clos, &times, &init, &mut states, 0, false)
            .map_err(|e| PyValueError::new_err(e.to_string()))?;
        Ok(states.into_iter().map(|s| s.iter().copied().collect()).collect())
    }
}

/// Number of parameters for `n` coupled oscillators.
#[cfg(feature = "python-bindings")]
#[pyfunction]
#[pyo3(signature = (num_oscillators, modal = false))]
fn param_length(num_oscillators: usize, modal: bool) -> usize {
    let form = if modal { Parameterization::Modal } else { Parameterization::Real };
    crate::oscillator::param_length(num_oscillators, form)
}

#[cfg(feature = "python-bindings")]
#[pymodule]
fn _rust_dyads(_py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<Oscillator>()?;
    m.add_function(wrap_pyfunction!(param_length, m)?)?;
    Ok(())
}
