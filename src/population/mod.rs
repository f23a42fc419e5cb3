//! The population-level parameter-sharing container.
//!
//! [`Population`] owns every series container, the per-cluster shared
//! regression records ([`GroupParams`]) and the cached regression
//! sufficient statistics ([`RegressionCache`]). An external sampler or
//! optimizer drives it through `update_means`/`update_variances`, the GP
//! hyperparameter updates, and the design-matrix maintenance calls.

pub mod cache;
pub mod errors;
pub mod group;
pub mod persist;
#[allow(clippy::module_inception)]
pub mod population;

pub use cache::RegressionCache;
pub use errors::{PopError, PopResult};
pub use group::GroupParams;
pub use population::{Population, PopulationOptions};
