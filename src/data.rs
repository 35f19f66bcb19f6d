use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use crate::error::{Result, SurvNetError};

/// survival data - times, events, and patient features
///
/// samples are reordered by ascending time at construction so the risk set of
/// sample `i` is the suffix starting at `at_risk[i]`; the at-risk index is
/// precomputed once and never changes afterwards
#[derive(Debug, Clone)]
pub struct SurvivalData {
    times: Array1<f64>,      // time to event/censoring, ascending
    events: Vec<bool>,       // true = event, false = censored
    covariates: Array2<f64>, // patient features (n_samples x n_features)
    at_risk: Vec<usize>,     // first index of each sample's tie group
}

impl SurvivalData {
    /// make new survival data from raw vecs/arrays
    pub fn new(
        times: Vec<f64>,
        events: Vec<bool>,
        covariates: Array2<f64>,
    ) -> Result<Self> {
        let n_samples = times.len();

        if events.len() != n_samples {
            return Err(SurvNetError::invalid_dimensions(
                format!("times len ({}) != events len ({})", n_samples, events.len())
            ));
        }

        if covariates.nrows() != n_samples {
            return Err(SurvNetError::invalid_dimensions(
                format!("covariates rows ({}) != n_samples ({})", covariates.nrows(), n_samples)
            ));
        }

        if times.iter().any(|&t| t <= 0.0 || !t.is_finite()) {
            return Err(SurvNetError::invalid_survival_data(
                "survival times must be positive & finite"
            ));
        }

        // sort everything by ascending time
        let mut order: Vec<usize> = (0..n_samples).collect();
        order.sort_by(|&a, &b| times[a].partial_cmp(&times[b]).unwrap());

        let sorted_times: Vec<f64> = order.iter().map(|&i| times[i]).collect();
        let sorted_events: Vec<bool> = order.iter().map(|&i| events[i]).collect();
        let sorted_covariates = covariates.select(ndarray::Axis(0), &order);

        // at_risk[i] points at the start of i's tie group; the risk set for
        // sample i is every index >= at_risk[i]
        let mut at_risk = vec![0usize; n_samples];
        for i in 1..n_samples {
            at_risk[i] = if sorted_times[i] == sorted_times[i - 1] {
                at_risk[i - 1]
            } else {
                i
            };
        }

        Ok(Self {
            times: Array1::from(sorted_times),
            events: sorted_events,
            covariates: sorted_covariates,
            at_risk,
        })
    }

    /// how many patients
    pub fn n_samples(&self) -> usize {
        self.times.len()
    }

    /// how many features per patient
    pub fn n_features(&self) -> usize {
        self.covariates.ncols()
    }

    /// how many observed (uncensored) events
    pub fn n_events(&self) -> usize {
        self.events.iter().filter(|&&e| e).count()
    }

    /// survival/censoring times, ascending
    pub fn times(&self) -> ArrayView1<'_, f64> {
        self.times.view()
    }

    /// event indicators (true = event, false = censored)
    pub fn events(&self) -> &[bool] {
        &self.events
    }

    /// patient feature matrix, rows in time order
    pub fn covariates(&self) -> ArrayView2<'_, f64> {
        self.covariates.view()
    }

    /// precomputed at-risk index vector
    pub fn at_risk(&self) -> &[usize] {
        &self.at_risk
    }

    /// grab a subset of patients by indices (into the time-sorted order)
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        if indices.iter().any(|&i| i >= self.n_samples()) {
            return Err(SurvNetError::invalid_dimensions(
                "subset index out of bounds"
            ));
        }

        let times: Vec<f64> = indices.iter().map(|&i| self.times[i]).collect();
        let events: Vec<bool> = indices.iter().map(|&i| self.events[i]).collect();
        let covariates = self.covariates.select(ndarray::Axis(0), indices);

        Self::new(times, events, covariates)
    }

    /// standardize features (mean=0, std=1) - modifies in place
    pub fn standardize_covariates(&mut self) -> Result<(Array1<f64>, Array1<f64>)> {
        let means = self.covariates.mean_axis(ndarray::Axis(0)).unwrap();
        let stds = self.covariates.std_axis(ndarray::Axis(0), 0.0);

        for j in 0..self.n_features() {
            if stds[j] == 0.0 {
                return Err(SurvNetError::numerical_error(
                    format!("feature {} has zero variance - can't standardize", j)
                ));
            }

            // z-score normalization
            for i in 0..self.n_samples() {
                self.covariates[[i, j]] = (self.covariates[[i, j]] - means[j]) / stds[j];
            }
        }

        Ok((means, stds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn create_test_data() -> SurvivalData {
        let times = vec![3.0, 1.0, 5.0, 2.0, 4.0];
        let events = vec![true, true, false, false, true];
        let covariates = Array2::from_shape_vec((5, 2), vec![
            5.0, 6.0,
            1.0, 2.0,
            9.0, 10.0,
            3.0, 4.0,
            7.0, 8.0,
        ]).unwrap();

        SurvivalData::new(times, events, covariates).unwrap()
    }

    #[test]
    fn test_sorted_by_time() {
        let data = create_test_data();
        assert_eq!(data.n_samples(), 5);
        assert_eq!(data.n_features(), 2);
        assert_eq!(data.times().to_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(data.events(), &[true, false, true, true, false]);
        // covariates follow their rows through the sort
        assert_eq!(data.covariates()[[0, 0]], 1.0);
        assert_eq!(data.covariates()[[4, 1]], 10.0);
    }

    #[test]
    fn test_at_risk_without_ties() {
        let data = create_test_data();
        assert_eq!(data.at_risk(), &[0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_at_risk_with_ties() {
        let times = vec![1.0, 2.0, 2.0, 2.0, 3.0];
        let events = vec![true; 5];
        let covariates = Array2::zeros((5, 1));
        let data = SurvivalData::new(times, events, covariates).unwrap();

        assert_eq!(data.at_risk(), &[0, 1, 1, 1, 4]);
    }

    #[test]
    fn test_invalid_dimensions() {
        let times = vec![1.0, 2.0];
        let events = vec![true]; // wrong length
        let covariates = Array2::zeros((2, 2));

        assert!(SurvivalData::new(times, events, covariates).is_err());
    }

    #[test]
    fn test_invalid_times() {
        let times = vec![-1.0, 2.0]; // negative time
        let events = vec![true, false];
        let covariates = Array2::zeros((2, 2));

        assert!(SurvivalData::new(times, events, covariates).is_err());
    }

    #[test]
    fn test_subset() {
        let data = create_test_data();
        let subset = data.subset(&[0, 2, 4]).unwrap();

        assert_eq!(subset.n_samples(), 3);
        assert_eq!(subset.times().to_vec(), vec![1.0, 3.0, 5.0]);
        assert_eq!(subset.n_events(), 2);
    }

    #[test]
    fn test_standardization() {
        let mut data = create_test_data();
        let (means, _stds) = data.standardize_covariates().unwrap();

        for j in 0..data.n_features() {
            let col_mean = data.covariates().column(j).mean().unwrap();
            assert_relative_eq!(col_mean, 0.0, epsilon = 1e-10);
        }

        assert_relative_eq!(means[0], 5.0, epsilon = 1e-10);
        assert_relative_eq!(means[1], 6.0, epsilon = 1e-10);
    }
}
