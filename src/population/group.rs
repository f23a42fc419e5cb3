//! Cluster-level shared parameters.
//!
//! Each cluster owns one [`GroupParams`] record: a predictor-coefficient
//! vector and a scalar variance per shared-parameter slot (dynamics
//! parameters, polynomial coefficients, outcomes), plus the cluster
//! weight. Together they form a linear regression of slot value on a
//! series' moderator covariates.

use ndarray::Array1;

/// Shared regression parameters of one cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupParams {
    /// Predictor coefficients, one vector per shared-parameter slot.
    pub pred_coefs: Vec<Array1<f64>>,
    /// Regression variance per slot.
    pub variances: Vec<f64>,
    /// Mixture weight of this cluster.
    pub weight: f64,
}

impl GroupParams {
    /// Zero-coefficient record sized after a set of predictor vectors;
    /// outcome slots (`num_outcomes` trailing entries) always carry the
    /// bare intercept.
    pub fn zeros(predictors: &[Array1<f64>], num_outcomes: usize, weight: f64) -> Self {
        let num_slots = predictors.len();
        let moderated = num_slots - num_outcomes;
        let pred_coefs = predictors
            .iter()
            .enumerate()
            .map(|(slot, pred)| {
                if slot < moderated {
                    Array1::zeros(pred.len())
                } else {
                    Array1::zeros(1)
                }
            })
            .collect();
        GroupParams { pred_coefs, variances: vec![0.0; num_slots], weight }
    }

    /// Total number of predictor-coefficient scalars across slots.
    pub fn pred_coef_size(&self) -> usize {
        self.pred_coefs.iter().map(|c| c.len()).sum()
    }

    /// Locate the (slot, entry) pair behind a flat coefficient index.
    pub fn locate_coef(&self, mut index: usize) -> Option<(usize, usize)> {
        for (slot, coefs) in self.pred_coefs.iter().enumerate() {
            if index < coefs.len() {
                return Some((slot, index));
            }
            index -= coefs.len();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeros_sizes_slots_and_pins_outcome_intercepts() {
        let predictors = vec![
            Array1::from_vec(vec![1.0, 2.0, 3.0]),
            Array1::from_vec(vec![1.0, 2.0]),
            Array1::from_vec(vec![1.0]),
        ];
        let params = GroupParams::zeros(&predictors, 1, 0.5);
        assert_eq!(params.pred_coefs[0].len(), 3);
        assert_eq!(params.pred_coefs[1].len(), 2);
        assert_eq!(params.pred_coefs[2].len(), 1);
        assert_eq!(params.variances.len(), 3);
        assert_eq!(params.pred_coef_size(), 6);
    }

    #[test]
    fn locate_coef_walks_the_flat_layout() {
        let predictors =
            vec![Array1::from_vec(vec![1.0, 2.0]), Array1::from_vec(vec![1.0])];
        let params = GroupParams::zeros(&predictors, 0, 1.0);
        assert_eq!(params.locate_coef(0), Some((0, 0)));
        assert_eq!(params.locate_coef(1), Some((0, 1)));
        assert_eq!(params.locate_coef(2), Some((1, 0)));
        assert_eq!(params.locate_coef(3), None);
    }
}
