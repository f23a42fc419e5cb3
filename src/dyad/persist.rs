//! Directory persistence for a series container.
//!
//! A dyad round-trips through a directory of whitespace-delimited text
//! files: `params.txt` (one row per distinct dynamics unit),
//! `states.txt`, `obs.txt` (observable names + coefficient rows),
//! `obs_states.txt`, and — when the corresponding feature is active —
//! `poly_coefs.txt`, `poly_states.txt`, `gp_params.txt`, `outcomes.txt`,
//! `priors.txt`, plus `noise_sigmas.txt` and `group.txt`. The contract is
//! round-trip equivalence up to text-formatting precision, not a frozen
//! byte format.
//!
//! Presence of `gp_params.txt` marks a drifting model on read, mirroring
//! how the drift flag is implied rather than stored.

use crate::dyad::errors::{DyadError, DyadResult};
use crate::dyad::series::Dyad;
use crate::oscillator::{param_length, CoupledOscillator, Parameterization};
use nalgebra::DVector;
use ndarray::Array1;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

impl Dyad {
    /// Write every field of this dyad into `dir`, creating it if needed.
    ///
    /// Hidden and observable states are brought up to date first so the
    /// persisted trajectories match the persisted parameters.
    pub fn write(&mut self, dir: &Path) -> DyadResult<()> {
        fs::create_dir_all(dir).map_err(|_| cannot_open(dir))?;
        self.update_all_states()?;

        let mut params = String::new();
        for clo in &self.clos {
            push_row(&mut params, clo.params().iter());
        }
        write_file(&dir.join("params.txt"), &params)?;

        let mut states = String::new();
        for state in &self.clo_states {
            push_row(&mut states, state.iter());
        }
        write_file(&dir.join("states.txt"), &states)?;

        let mut obs = String::new();
        let _ = writeln!(obs, "{}", self.obs_names.join(" "));
        for per_obs in &self.obs_coefs {
            for coef in per_obs {
                push_row(&mut obs, coef.iter());
            }
        }
        write_file(&dir.join("obs.txt"), &obs)?;

        let mut obs_states = String::new();
        let header: Vec<String> = self
            .obs_names
            .iter()
            .flat_map(|name| {
                (0..self.num_oscillators).map(move |k| format!("{}-{}", name, k))
            })
            .collect();
        let _ = writeln!(obs_states, "{}", header.join(" "));
        for per_time in &self.obs_states {
            let row: Vec<f64> =
                per_time.iter().flat_map(|per_obs| per_obs.iter().copied()).collect();
            push_row(&mut obs_states, row.iter());
        }
        write_file(&dir.join("obs_states.txt"), &obs_states)?;

        if !self.polynomial_coefs.is_empty() {
            let mut poly = String::new();
            for coef in &self.polynomial_coefs {
                push_row(&mut poly, coef.iter());
            }
            write_file(&dir.join("poly_coefs.txt"), &poly)?;

            let mut poly_states = String::new();
            for state in &self.poly_states {
                push_row(&mut poly_states, state.iter());
            }
            write_file(&dir.join("poly_states.txt"), &poly_states)?;
        }

        if self.gp_initialized {
            let mut gp = String::new();
            push_row(&mut gp, self.gp_scales.iter());
            push_row(&mut gp, self.gp_sigvars.iter());
            let means: Vec<f64> = self.gp_priors.iter().map(|p| p.mean()).collect();
            push_row(&mut gp, means.iter());
            write_file(&dir.join("gp_params.txt"), &gp)?;
        }

        if !self.outcomes.is_empty() {
            let mut out = String::new();
            let _ = writeln!(out, "{}", self.outcome_names.join(" "));
            for values in &self.outcomes {
                push_row(&mut out, values.iter());
            }
            write_file(&dir.join("outcomes.txt"), &out)?;
        }

        if !self.clo_means.is_empty() {
            let mut priors = String::new();
            push_row(&mut priors, self.clo_means.iter());
            push_row(&mut priors, self.clo_variances.iter());
            write_file(&dir.join("priors.txt"), &priors)?;
        }

        let mut sigmas = String::new();
        push_row(&mut sigmas, self.noise_sigmas.iter());
        write_file(&dir.join("noise_sigmas.txt"), &sigmas)?;

        write_file(&dir.join("group.txt"), &format!("{}\n", self.group_index))?;
        Ok(())
    }

    /// Reconstruct a dyad from a directory written by [`Dyad::write`].
    ///
    /// Timestamps are regenerated as consecutive integers from
    /// `start_time`; drift is enabled exactly when `gp_params.txt` exists.
    pub fn read(dir: &Path, start_time: f64) -> DyadResult<Dyad> {
        let params_path = dir.join("params.txt");
        let param_rows = read_float_rows(&params_path)?;
        if param_rows.is_empty() {
            return Err(malformed(&params_path, "no parameter rows"));
        }
        let form = form_for_len(&params_path, param_rows[0].len())?;
        let mut clos = Vec::with_capacity(param_rows.len());
        for row in &param_rows {
            if row.len() != param_rows[0].len() {
                return Err(malformed(&params_path, "ragged parameter rows"));
            }
            clos.push(CoupledOscillator::from_params(
                Array1::from_vec(row.clone()),
                form,
            )?);
        }

        let states_path = dir.join("states.txt");
        let state_rows = read_float_rows(&states_path)?;
        if state_rows.is_empty() {
            return Err(malformed(&states_path, "no state rows"));
        }
        let mut clo_states: Vec<DVector<f64>> =
            state_rows.iter().map(|r| DVector::from_vec(r.clone())).collect();
        // The grid follows the unit count for a drifting model; otherwise
        // the persisted states define it.
        let num_times =
            if clos.len() > 1 { clos.len() + 1 } else { clo_states.len() };
        clo_states.resize(num_times, DVector::zeros(state_rows[0].len()));
        let times: Vec<f64> = (0..num_times).map(|i| start_time + i as f64).collect();

        let obs_path = dir.join("obs.txt");
        let obs_content = read_to_string(&obs_path)?;
        let mut obs_lines = obs_content.lines();
        let obs_names: Vec<String> = obs_lines
            .next()
            .ok_or_else(|| malformed(&obs_path, "missing observable names"))?
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let coef_rows: Vec<Vec<f64>> = obs_lines
            .filter(|l| !l.trim().is_empty())
            .map(|l| parse_floats(&obs_path, l))
            .collect::<DyadResult<_>>()?;

        let noise_path = dir.join("noise_sigmas.txt");
        let noise_rows = read_float_rows(&noise_path)?;
        let noise_sigmas = Array1::from_vec(
            noise_rows
                .first()
                .ok_or_else(|| malformed(&noise_path, "missing sigmas"))?
                .clone(),
        );

        let group_path = dir.join("group.txt");
        let group_index: usize = read_to_string(&group_path)?
            .split_whitespace()
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| malformed(&group_path, "missing group index"))?;

        let poly_rows = optional_float_rows(&dir.join("poly_coefs.txt"))?;
        let polynomial_degree =
            poly_rows.as_ref().and_then(|rows| rows.first().map(|r| r.len() - 1));

        let (outcome_names, outcome_values) = match optional_string(&dir.join("outcomes.txt"))? {
            Some(content) => {
                let path = dir.join("outcomes.txt");
                let mut lines = content.lines();
                let names: Vec<String> = lines
                    .next()
                    .ok_or_else(|| malformed(&path, "missing outcome names"))?
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
                let mut values = BTreeMap::new();
                for (name, line) in names.iter().zip(lines) {
                    values.insert(name.clone(), parse_floats(&path, line)?);
                }
                (names, values)
            }
            None => (Vec::new(), BTreeMap::new()),
        };

        let mut dyad = Dyad::new(
            times,
            clo_states[0].clone(),
            clos,
            obs_names,
            noise_sigmas,
            polynomial_degree,
            outcome_names,
            &outcome_values,
            group_index,
            false,
        )?;
        dyad.clo_states = clo_states;

        if !coef_rows.is_empty() {
            let n = dyad.num_oscillators();
            if coef_rows.len() != dyad.obs_names().len() * n {
                return Err(malformed(&obs_path, "coefficient row count mismatch"));
            }
            for (i, row) in coef_rows.iter().enumerate() {
                dyad.set_obs_coef(i / n, i % n, Array1::from_vec(row.clone()))?;
            }
        }

        if let Some(rows) = poly_rows {
            for (osc, row) in rows.iter().enumerate() {
                for (term, value) in row.iter().enumerate() {
                    dyad.set_polynomial_coef(osc, term, *value)?;
                }
            }
        }

        if let Some(gp_rows) = optional_float_rows(&dir.join("gp_params.txt"))? {
            let gp_path = dir.join("gp_params.txt");
            if gp_rows.len() < 2 {
                return Err(malformed(&gp_path, "expected scale and variance rows"));
            }
            let scales = gp_rows[0].clone();
            let sigvars = gp_rows[1].clone();
            let means = gp_rows
                .get(2)
                .cloned()
                .unwrap_or_else(|| vec![0.0; scales.len()]);
            dyad.init_gp(scales, sigvars, means)?;
        }

        if let Some(prior_rows) = optional_float_rows(&dir.join("priors.txt"))? {
            let priors_path = dir.join("priors.txt");
            if prior_rows.len() < 2 {
                return Err(malformed(&priors_path, "expected mean and variance rows"));
            }
            for (slot, value) in prior_rows[0].iter().enumerate() {
                dyad.set_clo_mean(slot, *value)?;
            }
            for (slot, value) in prior_rows[1].iter().enumerate() {
                dyad.set_clo_variance(slot, *value)?;
            }
        }

        dyad.mark_states_stale();
        Ok(dyad)
    }

    fn update_all_states(&mut self) -> DyadResult<()> {
        self.states()?;
        Ok(())
    }
}

/// Pick the parameterization whose length formula matches a row.
fn form_for_len(path: &Path, len: usize) -> DyadResult<Parameterization> {
    for n in 1..=len {
        if param_length(n, Parameterization::Real) == len {
            return Ok(Parameterization::Real);
        }
        if param_length(n, Parameterization::Modal) == len && n == 2 {
            return Ok(Parameterization::Modal);
        }
        if param_length(n, Parameterization::Real) > len {
            break;
        }
    }
    Err(malformed(path, "parameter row length fits no oscillator count"))
}

fn push_row<'a, I: Iterator<Item = &'a f64>>(buffer: &mut String, values: I) {
    let row: Vec<String> = values.map(|v| format!("{:.12e}", v)).collect();
    let _ = writeln!(buffer, "{}", row.join(" "));
}

fn write_file(path: &Path, content: &str) -> DyadResult<()> {
    fs::write(path, content).map_err(|_| cannot_open(path))
}

fn read_to_string(path: &Path) -> DyadResult<String> {
    fs::read_to_string(path).map_err(|_| cannot_open(path))
}

fn read_float_rows(path: &Path) -> DyadResult<Vec<Vec<f64>>> {
    let content = read_to_string(path)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| parse_floats(path, l))
        .collect()
}

fn optional_float_rows(path: &Path) -> DyadResult<Option<Vec<Vec<f64>>>> {
    if !path.exists() {
        return Ok(None);
    }
    read_float_rows(path).map(Some)
}

fn optional_string(path: &Path) -> DyadResult<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    read_to_string(path).map(Some)
}

fn parse_floats(path: &Path, line: &str) -> DyadResult<Vec<f64>> {
    line.split_whitespace()
        .map(|token| {
            token.parse::<f64>().map_err(|_| {
                malformed(path, &format!("bad float token '{}'", token))
            })
        })
        .collect()
}

fn cannot_open(path: &Path) -> DyadError {
    DyadError::CannotOpen { path: path.display().to_string() }
}

fn malformed(path: &Path, reason: &str) -> DyadError {
    DyadError::Malformed { path: path.display().to_string(), reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oscillator::CoupledOscillator;
    use approx::assert_relative_eq;

    fn sample_dyad() -> Dyad {
        let times: Vec<f64> = (0..5).map(|t| t as f64).collect();
        let unit = CoupledOscillator::new::<rand::rngs::StdRng>(
            2,
            5.0,
            0.3,
            Parameterization::Real,
            None,
        )
        .unwrap();
        let mut dyad = Dyad::new(
            times,
            DVector::from_vec(vec![0.5, -0.2, 0.1, 0.0]),
            vec![unit],
            vec!["affect".to_string(), "arousal".to_string()],
            Array1::from_vec(vec![0.4, 0.6]),
            Some(1),
            Vec::new(),
            &BTreeMap::new(),
            3,
            false,
        )
        .unwrap();
        // Two observables: coefficient vectors carry intercept + slope.
        for obs in 0..2 {
            for osc in 0..2 {
                dyad.set_obs_coef(obs, osc, Array1::from_vec(vec![0.1, 0.9])).unwrap();
            }
        }
        dyad.set_polynomial_coef(0, 0, 1.25).unwrap();
        dyad.set_polynomial_coef(1, 1, -0.5).unwrap();
        dyad
    }

    #[test]
    fn write_then_read_round_trips_parameters_and_coefs() {
        let tmp = tempfile::tempdir().unwrap();
        let mut original = sample_dyad();
        original.write(tmp.path()).unwrap();
        let restored = Dyad::read(tmp.path(), 0.0).unwrap();

        assert_eq!(restored.num_oscillators(), 2);
        assert_eq!(restored.group_index(), 3);
        assert_eq!(restored.obs_names(), original.obs_names());
        assert!(!restored.allow_drift());

        let a = original.oscillators()[0].params();
        let b = restored.oscillators()[0].params();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_relative_eq!(x, y, epsilon = 1e-10);
        }
        for obs in 0..2 {
            for osc in 0..2 {
                for k in 0..2 {
                    assert_relative_eq!(
                        original.obs_coefs()[obs][osc][k],
                        restored.obs_coefs()[obs][osc][k],
                        epsilon = 1e-10
                    );
                }
            }
        }
        assert_relative_eq!(restored.polynomial_coefs()[0][0], 1.25, epsilon = 1e-10);
        assert_relative_eq!(restored.polynomial_coefs()[1][1], -0.5, epsilon = 1e-10);
        for (x, y) in original.noise_sigmas().iter().zip(restored.noise_sigmas().iter()) {
            assert_relative_eq!(x, y, epsilon = 1e-10);
        }
    }

    #[test]
    fn gp_file_presence_round_trips_drift() {
        let tmp = tempfile::tempdir().unwrap();
        let times: Vec<f64> = (0..4).map(|t| t as f64).collect();
        let unit = CoupledOscillator::new::<rand::rngs::StdRng>(
            2,
            5.0,
            0.2,
            Parameterization::Real,
            None,
        )
        .unwrap();
        let mut dyad = Dyad::new(
            times,
            DVector::zeros(4),
            vec![unit; 3],
            vec!["affect".to_string()],
            Array1::from_elem(1, 0.5),
            None,
            Vec::new(),
            &BTreeMap::new(),
            0,
            false,
        )
        .unwrap();
        let p = dyad.num_clo_params();
        dyad.init_gp(vec![2.0; p], vec![0.7; p], vec![0.1; p]).unwrap();
        dyad.write(tmp.path()).unwrap();

        let restored = Dyad::read(tmp.path(), 0.0).unwrap();
        assert!(restored.allow_drift());
        assert_eq!(restored.num_distinct_units(), 3);
        for (x, y) in dyad.gp_scales().iter().zip(restored.gp_scales().iter()) {
            assert_relative_eq!(x, y, epsilon = 1e-10);
        }
        assert_relative_eq!(restored.gp_priors()[0].mean(), 0.1, epsilon = 1e-10);
    }

    #[test]
    fn missing_directory_reports_the_path() {
        let err = Dyad::read(Path::new("/nonexistent/dyad"), 0.0);
        assert!(matches!(err, Err(DyadError::CannotOpen { .. })));
    }

    #[test]
    fn modal_row_length_selects_modal_form() {
        assert_eq!(
            form_for_len(Path::new("x"), 6).unwrap(),
            Parameterization::Modal
        );
        assert_eq!(
            form_for_len(Path::new("x"), 8).unwrap(),
            Parameterization::Real
        );
        assert!(form_for_len(Path::new("x"), 7).is_err());
    }
}
