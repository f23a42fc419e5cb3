//! The per-series state-space container and its supporting pieces.
//!
//! [`Dyad`] owns one observed series' dynamics units, cached state
//! trajectories, observation mapping, priors and predictors. The
//! submodules split the implementation the way the concerns split:
//! construction, accessors and the lazy state machinery in
//! [`series`]; log-prior evaluation in [`priors`]; bounded prior
//! sampling in [`sampling`]; directory round-tripping in [`persist`].

pub mod errors;
pub mod persist;
pub mod priors;
pub mod sampling;
pub mod series;

pub use errors::{DyadError, DyadResult};
pub use sampling::MAX_SAMPLE_TRIES;
pub use series::{Dyad, DEFAULT_NOISE_SIGMA};
