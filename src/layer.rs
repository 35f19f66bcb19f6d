use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::Rng;

use crate::activation::Activation;
use crate::error::{Result, SurvNetError};

/// fully-connected layer with a nonlinear activation
#[derive(Debug, Clone)]
pub struct HiddenLayer {
    pub(crate) weights: Array2<f64>, // n_in x n_out
    pub(crate) bias: Array1<f64>,    // n_out
    activation: Activation,
}

impl HiddenLayer {
    /// new layer with Glorot-uniform weights and zero bias
    pub fn new(n_in: usize, n_out: usize, activation: Activation, rng: &mut impl Rng) -> Self {
        let weights = init_weights(n_in, n_out, activation, rng);
        Self {
            weights,
            bias: Array1::zeros(n_out),
            activation,
        }
    }

    pub fn n_in(&self) -> usize {
        self.weights.nrows()
    }

    pub fn n_out(&self) -> usize {
        self.weights.ncols()
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    /// forward pass: returns (pre-activations, activations) for a batch
    pub fn forward(&self, input: ArrayView2<f64>) -> (Array2<f64>, Array2<f64>) {
        let mut pre = input.dot(&self.weights);
        for mut row in pre.rows_mut() {
            row += &self.bias;
        }
        let act = pre.mapv(|z| self.activation.apply(z));
        (pre, act)
    }

    /// re-randomize weights and zero the bias
    pub fn reset(&mut self, rng: &mut impl Rng) {
        self.weights = init_weights(self.n_in(), self.n_out(), self.activation, rng);
        self.bias.fill(0.0);
    }
}

fn init_weights(n_in: usize, n_out: usize, activation: Activation, rng: &mut impl Rng) -> Array2<f64> {
    // Glorot uniform; sigmoid gets the usual 4x widening
    let mut limit = (6.0 / (n_in as f64 + n_out as f64)).sqrt();
    if activation == Activation::Sigmoid {
        limit *= 4.0;
    }
    Array2::from_shape_fn((n_in, n_out), |_| rng.gen_range(-limit..limit))
}

/// scale activations by a binary mask in train mode (inverted dropout);
/// eval mode skips this entirely, which keeps expectations matched
pub(crate) fn apply_dropout_mask(
    activations: &mut Array2<f64>,
    mask: &Array2<f64>,
    keep_prob: f64,
) {
    *activations *= mask;
    *activations /= keep_prob;
}

/// linear risk-score output layer; owns the Cox partial-likelihood cost
#[derive(Debug, Clone)]
pub struct RiskLayer {
    pub(crate) weights: Array1<f64>, // n_in
    pub(crate) bias: f64,
}

impl RiskLayer {
    pub fn new(n_in: usize, rng: &mut impl Rng) -> Self {
        let limit = (6.0 / (n_in as f64 + 1.0)).sqrt();
        Self {
            weights: Array1::from_shape_fn(n_in, |_| rng.gen_range(-limit..limit)),
            bias: 0.0,
        }
    }

    pub fn n_in(&self) -> usize {
        self.weights.len()
    }

    /// per-sample risk scores for a batch
    pub fn scores(&self, input: ArrayView2<f64>) -> Array1<f64> {
        input.dot(&self.weights) + self.bias
    }

    /// Cox partial-likelihood cost for a batch of risk scores
    pub fn cost(&self, scores: ArrayView1<f64>, events: &[bool], at_risk: &[usize]) -> Result<f64> {
        cox_cost(scores, events, at_risk)
    }

    pub fn reset(&mut self, rng: &mut impl Rng) {
        let limit = (6.0 / (self.weights.len() as f64 + 1.0)).sqrt();
        self.weights.mapv_inplace(|_| rng.gen_range(-limit..limit));
        self.bias = 0.0;
    }
}

/// suffix log-sum-exp of the scores: lse[r] = log sum_{j >= r} exp(scores[j])
fn suffix_log_sum_exp(scores: ArrayView1<f64>) -> Vec<f64> {
    let n = scores.len();
    let mut lse = vec![0.0; n];
    if n == 0 {
        return lse;
    }
    lse[n - 1] = scores[n - 1];
    for i in (0..n - 1).rev() {
        let (a, b) = (scores[i], lse[i + 1]);
        let m = a.max(b);
        lse[i] = m + ((a - m).exp() + (b - m).exp()).ln();
    }
    lse
}

fn check_cox_inputs(scores: ArrayView1<f64>, events: &[bool], at_risk: &[usize]) -> Result<()> {
    let n = scores.len();
    if events.len() != n || at_risk.len() != n {
        return Err(SurvNetError::invalid_dimensions(
            "scores, events, and at-risk indices must have same length"
        ));
    }
    if at_risk.iter().enumerate().any(|(i, &r)| r > i) {
        return Err(SurvNetError::invalid_survival_data(
            "at-risk index must point at or before its own sample"
        ));
    }
    Ok(())
}

/// negative log partial likelihood, normalized by the number of observed
/// events; samples must be in ascending time order with suffix risk sets
///
/// each observed sample i contributes log(exp(s_i) / sum_{j in risk set} exp(s_j));
/// the denominator goes through a log-sum-exp so large scores don't overflow
pub fn cox_cost(scores: ArrayView1<f64>, events: &[bool], at_risk: &[usize]) -> Result<f64> {
    check_cox_inputs(scores, events, at_risk)?;

    let n_events = events.iter().filter(|&&e| e).count();
    if n_events == 0 {
        return Ok(0.0);
    }

    let lse = suffix_log_sum_exp(scores);
    let mut log_likelihood = 0.0;
    for i in 0..scores.len() {
        if events[i] {
            log_likelihood += scores[i] - lse[at_risk[i]];
        }
    }

    Ok(-log_likelihood / n_events as f64)
}

/// cost plus its gradient w.r.t. the risk scores
pub fn cox_cost_gradient(
    scores: ArrayView1<f64>,
    events: &[bool],
    at_risk: &[usize],
) -> Result<(f64, Array1<f64>)> {
    check_cox_inputs(scores, events, at_risk)?;

    let n = scores.len();
    let n_events = events.iter().filter(|&&e| e).count();
    if n_events == 0 {
        return Ok((0.0, Array1::zeros(n)));
    }
    let d = n_events as f64;

    let lse = suffix_log_sum_exp(scores);
    let mut log_likelihood = 0.0;
    let mut grad = Array1::zeros(n);

    for i in 0..n {
        if !events[i] {
            continue;
        }
        log_likelihood += scores[i] - lse[at_risk[i]];
        grad[i] -= 1.0 / d;
        // every member of i's risk set picks up its softmax share;
        // the exponent is <= 0 so this never overflows
        for k in at_risk[i]..n {
            grad[k] += (scores[k] - lse[at_risk[i]]).exp() / d;
        }
    }

    Ok((-log_likelihood / d, grad))
}
