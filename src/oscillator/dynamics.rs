//! The coupled-oscillator dynamics unit.
//!
//! Purpose
//! -------
//! Model a single linear dynamical system of `n` coupled damped
//! oscillators,
//!
//! ```text
//!   M ẍ = −K x − D ẋ
//! ```
//!
//! in one of two parameterizations (see [`Parameterization`]), and expose
//! the state-propagation primitives the series container builds on: the
//! real-coordinate system matrix for matrix-exponential propagation, and
//! the closed-form underdamped solution in modal coordinates.
//!
//! Key behaviors
//! -------------
//! - Parameter access is bounds-checked; every mutation invalidates all
//!   derived caches through an explicit [`CacheStatus`] record.
//! - The system matrix, the modal eigenstructure, and the per-call trig
//!   cache are rebuilt lazily, each guarded by its own flag.
//! - A non-invertible modal matrix or an overdamped mode is reported as an
//!   error and leaves the previously derived caches in place; callers must
//!   treat this as "the proposed parameter set is invalid".
//!
//! Invariants & assumptions
//! ------------------------
//! - The parameter buffer length always equals
//!   [`param_length`]`(n, form)`.
//! - The modal form is limited to two oscillators.
//! - State vectors are laid out `[x_1..x_n | ẋ_1..ẋ_n]`.

use crate::oscillator::errors::{OscError, OscResult};
use crate::oscillator::params::{initial_params, param_length, Parameterization};
use nalgebra::{DMatrix, DVector};
use ndarray::Array1;
use rand::Rng;
use std::f64::consts::PI;

/// Tolerance for detecting a mode angle numerically at ±π/2.
const ANGLE_EPS: f64 = 1e-7;

/// Explicit record of which derived caches are stale.
///
/// Replaces implicit cross-field invalidation with named transitions:
/// [`CacheStatus::mark_all`] on any parameter mutation, and each
/// recompute-on-read path clears exactly its own flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatus {
    /// The real-coordinate system matrix needs a rebuild.
    pub system_matrix: bool,
    /// The modal eigenstructure (mode shapes, frequencies, ratios) needs a
    /// rebuild.
    pub modal: bool,
    /// The time-dependent trig cache needs a rebuild.
    pub trig: bool,
}

impl CacheStatus {
    /// All three caches stale — the state of a freshly built unit.
    pub const fn all_dirty() -> Self {
        CacheStatus { system_matrix: true, modal: true, trig: true }
    }

    /// Invalidate everything; called on every parameter mutation.
    pub fn mark_all(&mut self) {
        self.system_matrix = true;
        self.modal = true;
        self.trig = true;
    }
}

/// Cached trigonometric terms for the closed-form modal solution.
///
/// Valid for a single elapsed time `dt`; rebuilt whenever the caller
/// disables caching, the parameters changed, or `dt` differs from the
/// cached one.
#[derive(Debug, Clone, PartialEq)]
struct TrigCache {
    dt: f64,
    cos_shift: DVector<f64>,
    sin_shift: DVector<f64>,
    cos_val: DVector<f64>,
    sin_val: DVector<f64>,
    decay_exp: DVector<f64>,
}

impl TrigCache {
    fn empty(n: usize) -> Self {
        TrigCache {
            dt: f64::NAN,
            cos_shift: DVector::zeros(n),
            sin_shift: DVector::zeros(n),
            cos_val: DVector::zeros(n),
            sin_val: DVector::zeros(n),
            decay_exp: DVector::zeros(n),
        }
    }
}

/// A single linear dynamical system of `n` coupled damped oscillators.
///
/// Owns its flat parameter buffer and all derived caches. See the module
/// docs for the parameter layouts and the cache discipline.
#[derive(Debug, Clone)]
pub struct CoupledOscillator {
    n: usize,
    form: Parameterization,
    params: Array1<f64>,
    status: CacheStatus,
    /// 2n×2n real-coordinate state matrix.
    system_matrix: DMatrix<f64>,
    /// n×n mass-normalized mode shapes (columns).
    modal_matrix: DMatrix<f64>,
    modal_matrix_inv: DMatrix<f64>,
    /// Diagonal of the modal mass matrix, `diag(α, 1)`.
    mass_diag: DVector<f64>,
    natural_freqs: DVector<f64>,
    damped_freqs: DVector<f64>,
    damping_ratios: DVector<f64>,
    trig: TrigCache,
}

impl CoupledOscillator {
    /// Build a unit from an initial period/damping guess.
    ///
    /// Passing `rng` jitters each parameter by up to 10% (see
    /// [`initial_params`]).
    pub fn new<R: Rng + ?Sized>(
        num_oscillators: usize,
        period: f64,
        damping: f64,
        form: Parameterization,
        rng: Option<&mut R>,
    ) -> OscResult<Self> {
        let params = initial_params(num_oscillators, period, damping, form, rng)?;
        Self::from_params(params, form)
    }

    /// Build a unit from an existing parameter buffer.
    ///
    /// The oscillator count is inferred from the buffer length; a length
    /// not matching `param_length(n, form)` for any `n ≥ 1` is rejected.
    pub fn from_params(params: Array1<f64>, form: Parameterization) -> OscResult<Self> {
        let n = infer_num_oscillators(params.len(), form)?;
        if form.is_modal() && n != 2 {
            return Err(OscError::ModalUnsupported { num_oscillators: n });
        }
        Ok(CoupledOscillator {
            n,
            form,
            params,
            status: CacheStatus::all_dirty(),
            system_matrix: DMatrix::zeros(2 * n, 2 * n),
            modal_matrix: DMatrix::zeros(n, n),
            modal_matrix_inv: DMatrix::zeros(n, n),
            mass_diag: DVector::from_element(n, 1.0),
            natural_freqs: DVector::zeros(n),
            damped_freqs: DVector::zeros(n),
            damping_ratios: DVector::zeros(n),
            trig: TrigCache::empty(n),
        })
    }

    /// Number of oscillators.
    pub fn num_oscillators(&self) -> usize {
        self.n
    }

    /// Length of the flat parameter buffer.
    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    /// The active parameterization.
    pub fn form(&self) -> Parameterization {
        self.form
    }

    /// The flat parameter buffer.
    pub fn params(&self) -> &Array1<f64> {
        &self.params
    }

    /// Current cache staleness; exposed for diagnostics and tests.
    pub fn cache_status(&self) -> CacheStatus {
        self.status
    }

    /// Bounds-checked parameter read.
    pub fn get_param(&self, index: usize) -> OscResult<f64> {
        if index >= self.params.len() {
            return Err(OscError::ParamIndexOutOfBounds { index, len: self.params.len() });
        }
        Ok(self.params[index])
    }

    /// Bounds-checked parameter write.
    ///
    /// Always stores the value and marks all three caches stale. For the
    /// real form the system matrix is rebuilt eagerly when it was clean
    /// before the write (cheap for the small matrices involved). For the
    /// modal form the affected half of the eigenstructure is rebuilt
    /// immediately: the mode shapes when a mode angle changed, the
    /// frequency/damping derivation otherwise. A rebuild failure is
    /// returned to the caller; the previously derived caches stay in place
    /// and the unit remains marked dirty, so the error is a signal that the
    /// written parameter set is invalid — not something to ignore.
    pub fn set_param(&mut self, index: usize, value: f64) -> OscResult<()> {
        if index >= self.params.len() {
            return Err(OscError::ParamIndexOutOfBounds { index, len: self.params.len() });
        }
        if self.form.is_modal() && index < self.n && !(-PI..=PI).contains(&value) {
            return Err(OscError::ModeAngleOutOfRange { index, value });
        }
        let system_was_clean = !self.status.system_matrix;
        let modal_was_clean = !self.status.modal;
        self.params[index] = value;
        self.status.mark_all();
        match self.form {
            Parameterization::Real => {
                if system_was_clean {
                    self.rebuild_system_matrix_real();
                    self.status.system_matrix = false;
                }
            }
            Parameterization::Modal => {
                if modal_was_clean {
                    if index < self.n {
                        self.rebuild_mode_shapes()?;
                    } else {
                        self.rebuild_frequencies()?;
                    }
                    self.status.modal = false;
                }
            }
        }
        Ok(())
    }

    /// The lazily recomputed real-coordinate system matrix.
    ///
    /// Layout: top-right n×n identity block (velocities), bottom-left
    /// `−M⁻¹K`, bottom-right `−M⁻¹D`. For the real form the mass matrix is
    /// the identity and `K`/`D` come straight from the parameter blocks;
    /// for the modal form they are reassembled from the eigenstructure.
    pub fn system_matrix(&mut self) -> OscResult<&DMatrix<f64>> {
        if self.status.system_matrix {
            match self.form {
                Parameterization::Real => self.rebuild_system_matrix_real(),
                Parameterization::Modal => self.rebuild_system_matrix_from_modal()?,
            }
            self.status.system_matrix = false;
        }
        Ok(&self.system_matrix)
    }

    /// Rebuild the modal eigenstructure if stale.
    ///
    /// Needed before [`CoupledOscillator::get_modal_state`] or
    /// [`CoupledOscillator::get_state`].
    pub fn update_modal_representation(&mut self) -> OscResult<()> {
        if !self.status.modal {
            return Ok(());
        }
        self.rebuild_mode_shapes()?;
        self.rebuild_frequencies()?;
        self.status.modal = false;
        self.status.trig = true;
        Ok(())
    }

    /// Advance a modal-coordinate state by `dt` with the closed-form
    /// underdamped solution, one independent mode at a time.
    ///
    /// For mode `k` with natural frequency `ω`, damping ratio `ζ` and
    /// damped frequency `ω_d = ω√(1−ζ²)`:
    ///
    /// ```text
    ///   q(dt) = e^{−ζω dt} [ q₀/√(1−ζ²) · cos(ω_d dt − ψ) + q̇₀/ω_d · sin(ω_d dt) ]
    ///   q̇(dt) = −ζω q(dt) + e^{−ζω dt} [ −q₀/√(1−ζ²) · ω_d sin(ω_d dt − ψ) + q̇₀ cos(ω_d dt) ]
    /// ```
    ///
    /// with phase `ψ = atan(ζ/√(1−ζ²))`. The trig terms are cached; pass
    /// `use_cache = true` when propagating many intervals of identical
    /// length with unchanged parameters.
    pub fn get_modal_state(
        &mut self,
        state: &DVector<f64>,
        dt: f64,
        use_cache: bool,
    ) -> OscResult<DVector<f64>> {
        self.update_modal_representation()?;
        if !use_cache || self.status.trig || self.trig.dt != dt {
            self.rebuild_trig_cache(dt);
            self.status.trig = false;
        }
        let n = self.n;
        let mut next = DVector::zeros(2 * n);
        for k in 0..n {
            let zeta = self.damping_ratios[k];
            let sq = (1.0 - zeta * zeta).sqrt();
            let w_n = self.natural_freqs[k];
            let w_d = self.damped_freqs[k];
            let q0 = state[k];
            let v0 = state[n + k];
            let term_1 = q0 / sq;
            let term_2 = v0 / w_d;
            let decay = self.trig.decay_exp[k];
            let pos =
                decay * (term_1 * self.trig.cos_shift[k] + term_2 * self.trig.sin_val[k]);
            let vel = -zeta * w_n * pos
                + decay * (-term_1 * w_d * self.trig.sin_shift[k] + v0 * self.trig.cos_val[k]);
            next[k] = pos;
            next[n + k] = vel;
        }
        Ok(next)
    }

    /// Change basis between modal and real coordinates.
    ///
    /// `to_real = true` applies the modal matrix (`x = Φ q`), `false` its
    /// inverse (`q = Φ⁻¹ x`); positions and velocities transform with the
    /// same matrix. The modal representation must be up to date.
    pub fn get_state(&self, state: &DVector<f64>, to_real: bool) -> DVector<f64> {
        debug_assert!(!self.status.modal, "modal representation is stale");
        let n = self.n;
        let basis = if to_real { &self.modal_matrix } else { &self.modal_matrix_inv };
        let mut out = DVector::zeros(2 * n);
        for r in 0..n {
            let mut pos = 0.0;
            let mut vel = 0.0;
            for c in 0..n {
                pos += basis[(r, c)] * state[c];
                vel += basis[(r, c)] * state[n + c];
            }
            out[r] = pos;
            out[n + r] = vel;
        }
        out
    }

    // ---- cache rebuilds ----

    /// Real form: assemble `K`/`D` from the parameter blocks and write the
    /// bottom half of the system matrix. Mass is the identity.
    fn rebuild_system_matrix_real(&mut self) {
        let n = self.n;
        let couples = n * (n - 1);
        self.system_matrix.fill(0.0);
        for i in 0..n {
            self.system_matrix[(i, n + i)] = 1.0;
        }
        // Stiffness: K(i,i) = f_i + sum_j cf_ij, K(i,j) = -cf_ij.
        let mut cf = n;
        let mut cd = 2 * n + couples;
        for i in 0..n {
            let mut k_diag = self.params[i];
            let mut d_diag = self.params[n + couples + i];
            for j in 0..n {
                if j == i {
                    continue;
                }
                let k_ij = self.params[cf];
                let d_ij = self.params[cd];
                cf += 1;
                cd += 1;
                k_diag += k_ij;
                d_diag += d_ij;
                self.system_matrix[(n + i, j)] = k_ij;
                self.system_matrix[(n + i, n + j)] = d_ij;
            }
            self.system_matrix[(n + i, i)] = -k_diag;
            self.system_matrix[(n + i, n + i)] = -d_diag;
        }
    }

    /// Modal form: reassemble `K = Φ⁻ᵀ diag(ω²) Φ⁻¹`, `D = Φ⁻ᵀ diag(d) Φ⁻¹`
    /// and write `−M⁻¹K` / `−M⁻¹D` into the bottom blocks.
    fn rebuild_system_matrix_from_modal(&mut self) -> OscResult<()> {
        self.update_modal_representation()?;
        let n = self.n;
        let damping_start = self.params.len() - n;
        let inv_t = self.modal_matrix_inv.transpose();
        let w_sq = DMatrix::from_diagonal(&self.natural_freqs.map(|w| w * w));
        let d_diag = DMatrix::from_diagonal(&DVector::from_fn(n, |k, _| {
            self.params[damping_start + k]
        }));
        let stiffness = &inv_t * w_sq * &self.modal_matrix_inv;
        let damping = &inv_t * d_diag * &self.modal_matrix_inv;
        self.system_matrix.fill(0.0);
        for i in 0..n {
            self.system_matrix[(i, n + i)] = 1.0;
            let m_inv = 1.0 / self.mass_diag[i];
            for j in 0..n {
                self.system_matrix[(n + i, j)] = -m_inv * stiffness[(i, j)];
                self.system_matrix[(n + i, n + j)] = -m_inv * damping[(i, j)];
            }
        }
        Ok(())
    }

    /// Recompute the mass-normalized mode shapes from the mode angles.
    ///
    /// The modal mass is `M = diag(α, 1)` with `α = −tan θ₁ · tan θ₂`;
    /// when either angle sits numerically at ±π/2, or the product
    /// vanishes, `α` is forced to 1 (the companion angle is left
    /// untouched). Each column is `r_k (cos θ_k, sin θ_k)` with
    /// `r_k = 1/√|α cos²θ_k + sin²θ_k|`, so that `ΦᵀMΦ = I`.
    fn rebuild_mode_shapes(&mut self) -> OscResult<()> {
        let n = self.n;
        let angles: Vec<f64> = (0..n).map(|k| self.params[k]).collect();
        let mut alpha = -1.0;
        for angle in &angles {
            if (angle - PI / 2.0).abs() < ANGLE_EPS || (angle + PI / 2.0).abs() < ANGLE_EPS {
                alpha = 1.0;
                break;
            }
            alpha *= angle.tan();
        }
        if alpha == 0.0 {
            alpha = 1.0;
        }
        let mut shapes = DMatrix::zeros(n, n);
        for (k, angle) in angles.iter().enumerate() {
            let (sin_t, cos_t) = angle.sin_cos();
            let mut radius_sq = cos_t * cos_t * alpha + sin_t * sin_t;
            if radius_sq < 0.0 {
                radius_sq = -radius_sq;
            }
            if radius_sq == 0.0 {
                return Err(OscError::DegenerateModeShape { index: k });
            }
            let radius = (1.0 / radius_sq).sqrt();
            shapes[(0, k)] = radius * cos_t;
            shapes[(1, k)] = radius * sin_t;
        }
        let inverse = shapes.clone().try_inverse().ok_or(OscError::SingularModalMatrix)?;
        self.modal_matrix = shapes;
        self.modal_matrix_inv = inverse;
        self.mass_diag[0] = alpha;
        self.mass_diag[1] = 1.0;
        self.status.trig = true;
        Ok(())
    }

    /// Recompute natural/damped frequencies and damping ratios from the
    /// frequency and damping blocks.
    fn rebuild_frequencies(&mut self) -> OscResult<()> {
        let n = self.n;
        let damping_start = self.params.len() - n;
        for k in 0..n {
            let w_n = self.params[n + k];
            if w_n <= 0.0 {
                return Err(OscError::NonPositiveFrequency { index: k, value: w_n });
            }
            let zeta = self.params[damping_start + k] / (2.0 * w_n);
            if zeta * zeta >= 1.0 {
                return Err(OscError::OverdampedMode { index: k, ratio: zeta });
            }
            self.natural_freqs[k] = w_n;
            self.damping_ratios[k] = zeta;
            self.damped_freqs[k] = w_n * (1.0 - zeta * zeta).sqrt();
        }
        self.status.trig = true;
        Ok(())
    }

    fn rebuild_trig_cache(&mut self, dt: f64) {
        for k in 0..self.n {
            let zeta = self.damping_ratios[k];
            let sq = (1.0 - zeta * zeta).sqrt();
            let psi = (zeta / sq).atan();
            let w_d = self.damped_freqs[k];
            self.trig.cos_shift[k] = (w_d * dt - psi).cos();
            self.trig.sin_shift[k] = (w_d * dt - psi).sin();
            self.trig.cos_val[k] = (w_d * dt).cos();
            self.trig.sin_val[k] = (w_d * dt).sin();
            self.trig.decay_exp[k] = (-zeta * self.natural_freqs[k] * dt).exp();
        }
        self.trig.dt = dt;
    }
}

/// Solve `param_length(n, form) == len` for `n`.
fn infer_num_oscillators(len: usize, form: Parameterization) -> OscResult<usize> {
    let mut n = 1;
    loop {
        let expected = param_length(n, form);
        if expected == len {
            return Ok(n);
        }
        if expected > len {
            return Err(OscError::BadParamLength { expected, actual: len });
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn real_unit() -> CoupledOscillator {
        CoupledOscillator::new::<rand::rngs::StdRng>(
            2,
            5.0,
            0.0,
            Parameterization::Real,
            None,
        )
        .unwrap()
    }

    fn modal_unit(damping: f64) -> CoupledOscillator {
        CoupledOscillator::new::<rand::rngs::StdRng>(
            2,
            5.0,
            damping,
            Parameterization::Modal,
            None,
        )
        .unwrap()
    }

    #[test]
    fn set_then_get_round_trips_every_index() {
        let mut clo = real_unit();
        for i in 0..clo.num_params() {
            clo.set_param(i, 0.25 + i as f64).unwrap();
            assert_eq!(clo.get_param(i).unwrap(), 0.25 + i as f64);
        }
        let err = clo.get_param(clo.num_params());
        assert!(matches!(err, Err(OscError::ParamIndexOutOfBounds { .. })));
    }

    #[test]
    fn set_param_marks_caches_and_rebuilds_real_eagerly() {
        let mut clo = real_unit();
        clo.system_matrix().unwrap();
        assert!(!clo.cache_status().system_matrix);
        clo.set_param(0, 2.0).unwrap();
        // The eager rebuild leaves the system matrix usable in place.
        assert!(!clo.cache_status().system_matrix);
        assert_relative_eq!(clo.system_matrix().unwrap()[(2, 0)], -2.0, epsilon = 1e-12);
    }

    #[test]
    fn system_matrix_has_identity_velocity_block() {
        let mut clo = real_unit();
        let f = (2.0 * PI / 5.0).powi(2);
        let a = clo.system_matrix().unwrap();
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(a[(i, 2 + j)], expected);
            }
        }
        assert_relative_eq!(a[(2, 0)], -f, epsilon = 1e-12);
        assert_relative_eq!(a[(3, 1)], -f, epsilon = 1e-12);
    }

    #[test]
    fn coupling_terms_enter_diagonal_and_off_diagonal() {
        let mut clo = real_unit();
        clo.set_param(2, 0.3).unwrap(); // cf_(0,1)
        clo.set_param(3, 0.4).unwrap(); // cf_(1,0)
        let f = (2.0 * PI / 5.0).powi(2);
        let a = clo.system_matrix().unwrap();
        assert_relative_eq!(a[(2, 0)], -(f + 0.3), epsilon = 1e-12);
        assert_relative_eq!(a[(2, 1)], 0.3, epsilon = 1e-12);
        assert_relative_eq!(a[(3, 0)], 0.4, epsilon = 1e-12);
        assert_relative_eq!(a[(3, 1)], -(f + 0.4), epsilon = 1e-12);
    }

    #[test]
    fn modal_closed_form_matches_matrix_exponential() {
        let mut clo = modal_unit(0.2);
        clo.update_modal_representation().unwrap();
        let x0 = DVector::from_vec(vec![1.0, -0.5, 0.2, 0.1]);
        let dt = 0.7;

        // Closed form: real -> modal -> advance -> real.
        let q0 = clo.get_state(&x0, false);
        let q1 = clo.get_modal_state(&q0, dt, false).unwrap();
        let x1_modal = clo.get_state(&q1, true);

        // Matrix exponential of the reassembled system matrix.
        let a = clo.system_matrix().unwrap().clone();
        let x1_exp = (a * dt).exp() * &x0;

        for k in 0..4 {
            assert_relative_eq!(x1_modal[k], x1_exp[k], epsilon = 1e-8);
        }
    }

    #[test]
    fn undamped_modal_state_conserves_initial_condition_at_dt_zero() {
        let mut clo = modal_unit(0.0);
        clo.update_modal_representation().unwrap();
        let q0 = DVector::from_vec(vec![0.8, -0.3, 0.1, 0.4]);
        let q = clo.get_modal_state(&q0, 0.0, false).unwrap();
        for k in 0..4 {
            assert_relative_eq!(q[k], q0[k], epsilon = 1e-12);
        }
    }

    #[test]
    fn overdamped_mode_is_reported() {
        let mut clo = modal_unit(0.0);
        clo.update_modal_representation().unwrap();
        // Natural frequency ~1.2566; damping 10 gives zeta ~ 3.98.
        let err = clo.set_param(4, 10.0);
        assert!(matches!(err, Err(OscError::OverdampedMode { index: 0, .. })));
        // The previous derivation stays usable after the failed write.
        assert!(clo.damping_ratios[0] < 1.0);
    }

    #[test]
    fn mode_angle_bounds_are_enforced() {
        let mut clo = modal_unit(0.0);
        let err = clo.set_param(0, 4.0);
        assert!(matches!(err, Err(OscError::ModeAngleOutOfRange { index: 0, .. })));
        assert_relative_eq!(clo.get_param(0).unwrap(), 0.1);
    }

    #[test]
    fn right_angle_mode_forces_unit_mass() {
        let mut clo = modal_unit(0.0);
        clo.set_param(0, PI / 2.0).unwrap();
        clo.update_modal_representation().unwrap();
        assert_relative_eq!(clo.mass_diag[0], 1.0);
    }

    #[test]
    fn trig_cache_reuse_matches_fresh_evaluation() {
        let mut clo = modal_unit(0.1);
        clo.update_modal_representation().unwrap();
        let q0 = DVector::from_vec(vec![0.5, 0.2, -0.1, 0.3]);
        let fresh = clo.get_modal_state(&q0, 0.5, false).unwrap();
        let cached = clo.get_modal_state(&q0, 0.5, true).unwrap();
        for k in 0..4 {
            assert_relative_eq!(fresh[k], cached[k], epsilon = 1e-14);
        }
    }
}
