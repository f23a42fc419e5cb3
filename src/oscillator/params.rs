//! Parameter layout for coupled-oscillator dynamics units.
//!
//! Purpose
//! -------
//! Define the two parameterizations of a bank of `n` coupled damped
//! oscillators, the length formula for their flat parameter buffers, and
//! the default/initial parameter construction used when a fit starts from
//! a period/damping guess.
//!
//! Layout
//! ------
//! - **Real form**, length `n(n + 2)`:
//!   `[f_1..f_n | cf_(1,2)..cf_(n,n-1) | d_1..d_n | cd_(1,2)..cd_(n,n-1)]`
//!   where `f_i` is the squared angular frequency of oscillator `i`, the
//!   `cf` block holds the `n(n-1)` cross-coupling stiffness terms in
//!   row-major `(i, j≠i)` order, `d_i` the dampings, and the `cd` block the
//!   damping cross-couplings in the same order.
//! - **Modal form**, length `n(n + 1)`, currently `n = 2` only:
//!   `[θ_1, θ_2 | ω_1, ω_2 | d_1, d_2]` — mode angles, natural frequencies,
//!   modal dampings.

use crate::oscillator::errors::{OscError, OscResult};
use ndarray::Array1;
use rand::Rng;
use std::f64::consts::PI;

/// Default oscillation period used when no initial guess is supplied.
pub const DEFAULT_PERIOD: f64 = 5.0;

/// Default damping used when no initial guess is supplied.
pub const DEFAULT_DAMPING: f64 = 0.0;

/// How a dynamics unit's flat parameter buffer is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameterization {
    /// Stiffness/damping entries of the real-coordinate system matrix.
    Real,
    /// Mode angles plus per-mode natural frequencies and dampings.
    Modal,
}

impl Parameterization {
    /// True for the modal form.
    pub const fn is_modal(&self) -> bool {
        matches!(self, Parameterization::Modal)
    }
}

/// Number of parameters for `n` coupled oscillators under the given form.
///
/// Real form: `n(n + 2)` (frequencies + stiffness couplings + dampings +
/// damping couplings). Modal form: `n(n + 1)` (angles + frequencies +
/// dampings). For `n = 2` these are 8 and 6.
pub const fn param_length(num_oscillators: usize, form: Parameterization) -> usize {
    match form {
        Parameterization::Real => num_oscillators * (num_oscillators + 2),
        Parameterization::Modal => num_oscillators * (num_oscillators + 1),
    }
}

/// Build the initial parameter buffer for a bank of oscillators.
///
/// Real form: every frequency slot gets `(2π / period)²`, every damping
/// slot gets `damping`, and all coupling slots start at zero. Modal form
/// (`n = 2` only): mode angles start at `0.1` and `π/2 + 0.1`, frequencies
/// at `2π / period`, dampings at `damping`.
///
/// When `rng` is supplied, each entry is jittered by a uniform relative
/// perturbation of up to 10%, which breaks ties between otherwise
/// identical units at fit start.
///
/// # Errors
/// [`OscError::ModalUnsupported`] for a modal request with `n ≠ 2`.
pub fn initial_params<R: Rng + ?Sized>(
    num_oscillators: usize,
    period: f64,
    damping: f64,
    form: Parameterization,
    rng: Option<&mut R>,
) -> OscResult<Array1<f64>> {
    let n = num_oscillators;
    let freq = 2.0 * PI / period;
    let mut params = Array1::zeros(param_length(n, form));
    match form {
        Parameterization::Real => {
            let couples = n * (n - 1);
            for i in 0..n {
                params[i] = freq * freq;
            }
            for i in 0..n {
                params[n + couples + i] = damping;
            }
        }
        Parameterization::Modal => {
            if n != 2 {
                return Err(OscError::ModalUnsupported { num_oscillators: n });
            }
            params[0] = 0.1;
            params[1] = PI / 2.0 + 0.1;
            for i in 0..n {
                params[n + i] = freq;
                params[2 * n + i] = damping;
            }
        }
    }
    if let Some(rng) = rng {
        for p in params.iter_mut() {
            *p += rng.gen::<f64>() * 0.1 * *p;
        }
    }
    Ok(params)
}

/// Offset of the sign-unconstrained tail of a parameter buffer.
///
/// Prior sampling rejects negative draws for every slot before this offset;
/// the last `n` entries (modal form: the damping block, real form: the
/// damping cross-couplings) may take either sign.
pub const fn unconstrained_tail_start(num_oscillators: usize, form: Parameterization) -> usize {
    param_length(num_oscillators, form) - num_oscillators
}
