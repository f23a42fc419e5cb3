//! Directory persistence for a population.
//!
//! Layout: `ids.txt` (series ids), `params.txt` (per cluster: one
//! coefficient row per slot, then a variance row, then a weight row), and
//! one `NNNN/` subdirectory per series id containing that dyad's files
//! (see [`crate::dyad::persist`]). When cluster labels were supplied, the
//! per-series directories nest under the label of the owning cluster.
//! Round-trip equivalence is the contract, not a frozen byte format.

use crate::data::SeriesData;
use crate::population::errors::{PopError, PopResult};
use crate::population::group::GroupParams;
use crate::population::population::Population;
use crate::dyad::Dyad;
use ndarray::Array1;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

impl Population {
    /// Write the population into `dir`, creating it if needed.
    pub fn write(&mut self, dir: &Path) -> PopResult<()> {
        fs::create_dir_all(dir).map_err(|_| cannot_open(dir))?;

        let mut ids = String::new();
        for id in &self.ids {
            let _ = writeln!(ids, "{}", id);
        }
        fs::write(dir.join("ids.txt"), ids).map_err(|_| cannot_open(dir))?;

        let mut params = String::new();
        let _ = writeln!(params, "{}", self.groups.len());
        for group in &self.groups {
            for coefs in &group.pred_coefs {
                push_row(&mut params, coefs.iter());
            }
            push_row(&mut params, group.variances.iter());
            let _ = writeln!(params, "{:.12e}", group.weight);
        }
        fs::write(dir.join("params.txt"), params).map_err(|_| cannot_open(dir))?;

        for index in 0..self.dyads.len() {
            let path = self.series_dir(dir, index);
            self.dyads[index].write(&path)?;
        }
        Ok(())
    }

    /// Reconstruct a population from a directory written by
    /// [`Population::write`]. The observed data supplies moderators for
    /// predictor reconstruction and the per-series start times.
    pub fn read(&mut self, dir: &Path, data: &[SeriesData]) -> PopResult<()> {
        let ids_path = dir.join("ids.txt");
        let ids_content =
            fs::read_to_string(&ids_path).map_err(|_| cannot_open(&ids_path))?;
        let ids: Vec<usize> = ids_content
            .split_whitespace()
            .map(|t| {
                t.parse().map_err(|_| malformed(&ids_path, "bad id token"))
            })
            .collect::<PopResult<_>>()?;
        if ids.len() != self.dyads.len() || data.len() != self.dyads.len() {
            return Err(PopError::SeriesCountMismatch {
                ids: ids.len(),
                data: data.len(),
                init_states: self.dyads.len(),
            });
        }
        self.ids = ids;

        for index in 0..self.dyads.len() {
            let path = self.series_dir(dir, index);
            let start_time = data[index].times.first().copied().unwrap_or(0.0);
            let mut dyad = Dyad::read(&path, start_time)?;
            dyad.init_predictors(&data[index], self.mod_names())?;
            self.dyads[index] = dyad;
        }
        self.check_predictors_dimension()?;
        self.read_group_params(&dir.join("params.txt"))?;
        if !self.fixed_clo() {
            self.init_design_matrix()?;
        }
        self.update_means()?;
        self.update_variances()?;
        Ok(())
    }

    pub fn mod_names(&self) -> &[Vec<String>] {
        &self.mod_names
    }

    fn series_dir(&self, dir: &Path, index: usize) -> PathBuf {
        let leaf = format!("{:04}", self.ids[index]);
        match self.group_labels.get(self.dyads[index].group_index()) {
            Some(label) => dir.join(label).join(leaf),
            None => dir.join(leaf),
        }
    }

    fn read_group_params(&mut self, path: &Path) -> PopResult<()> {
        let content = fs::read_to_string(path).map_err(|_| cannot_open(path))?;
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        let num_groups: usize = lines
            .next()
            .and_then(|l| l.trim().parse().ok())
            .ok_or_else(|| malformed(path, "missing group count"))?;
        if num_groups != self.groups.len() {
            return Err(malformed(path, "group count mismatch"));
        }
        let num_slots = self.groups[0].pred_coefs.len();
        let mut parsed: Vec<GroupParams> = Vec::with_capacity(num_groups);
        for _ in 0..num_groups {
            let mut pred_coefs = Vec::with_capacity(num_slots);
            for _ in 0..num_slots {
                let row = parse_row(path, lines.next())?;
                pred_coefs.push(Array1::from_vec(row));
            }
            let variances = parse_row(path, lines.next())?;
            let weight_row = parse_row(path, lines.next())?;
            let weight = *weight_row
                .first()
                .ok_or_else(|| malformed(path, "missing group weight"))?;
            parsed.push(GroupParams { pred_coefs, variances, weight });
        }
        self.set_group_params(parsed);
        Ok(())
    }
}

fn parse_row(path: &Path, line: Option<&str>) -> PopResult<Vec<f64>> {
    let line = line.ok_or_else(|| malformed(path, "truncated group parameters"))?;
    line.split_whitespace()
        .map(|t| t.parse::<f64>().map_err(|_| malformed(path, "bad float token")))
        .collect()
}

fn push_row<'a, I: Iterator<Item = &'a f64>>(buffer: &mut String, values: I) {
    let row: Vec<String> = values.map(|v| format!("{:.12e}", v)).collect();
    let _ = writeln!(buffer, "{}", row.join(" "));
}

fn cannot_open(path: &Path) -> PopError {
    PopError::CannotOpen { path: path.display().to_string() }
}

fn malformed(path: &Path, reason: &str) -> PopError {
    PopError::Malformed { path: path.display().to_string(), reason: reason.to_string() }
}
