//! Coupled-oscillator dynamics units and batch state propagation.
//!
//! The dynamics unit ([`CoupledOscillator`]) is the leaf of the model
//! hierarchy: a single linear system of `n` coupled damped oscillators in
//! either the real or the modal parameterization, with lazily maintained
//! derived caches. The propagation routines ([`integrate_states`],
//! [`integrate_states_at`]) walk a sequence of units over a timestamp
//! grid; everything above this module (series containers, populations)
//! treats them as primitives.

pub mod dynamics;
pub mod errors;
pub mod params;
pub mod propagate;

pub use dynamics::{CacheStatus, CoupledOscillator};
pub use errors::{OscError, OscResult};
pub use params::{
    initial_params, param_length, unconstrained_tail_start, Parameterization, DEFAULT_DAMPING,
    DEFAULT_PERIOD,
};
pub use propagate::{integrate_states, integrate_states_at};
