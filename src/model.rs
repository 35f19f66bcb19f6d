use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;

use crate::activation::Activation;
use crate::autoencoder::DenoisingAutoencoder;
use crate::error::{Result, SurvNetError};
use crate::layer::{apply_dropout_mask, cox_cost_gradient, HiddenLayer, RiskLayer};

/// hyperparameters for assembling a model
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub n_ins: usize,
    pub hidden_layers_sizes: Vec<usize>,
    pub corruption_levels: Vec<f64>,
    pub dropout_rate: f64,
    pub lambda1: f64,
    pub lambda2: f64,
    pub activation: Activation,
}

impl ModelConfig {
    pub fn new(n_ins: usize) -> Self {
        Self {
            n_ins,
            hidden_layers_sizes: Vec::new(),
            corruption_levels: Vec::new(),
            dropout_rate: 0.0,
            lambda1: 0.0,
            lambda2: 0.0,
            activation: Activation::Sigmoid,
        }
    }

    pub fn with_hidden_layers(mut self, sizes: Vec<usize>) -> Self {
        self.hidden_layers_sizes = sizes;
        self
    }

    pub fn with_corruption_levels(mut self, levels: Vec<f64>) -> Self {
        self.corruption_levels = levels;
        self
    }

    pub fn with_dropout_rate(mut self, rate: f64) -> Self {
        self.dropout_rate = rate;
        self
    }

    /// lasso penalty coefficient over all layer weights
    pub fn with_l1_penalty(mut self, penalty: f64) -> Self {
        self.lambda1 = penalty.max(0.0);
        self
    }

    /// ridge penalty coefficient over all layer weights
    pub fn with_l2_penalty(mut self, penalty: f64) -> Self {
        self.lambda2 = penalty.max(0.0);
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }
}

/// what a forward pass hands back to the caller
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Cox partial-likelihood cost (penalties excluded)
    pub cost: f64,
    /// per-sample risk scores
    pub risk: Array1<f64>,
    /// input to the risk layer (last hidden activation, or raw features)
    pub features: Array2<f64>,
}

/// gradients for every trainable parameter, in stack order
struct Gradients {
    hidden: Vec<(Array2<f64>, Array1<f64>)>,
    risk_weights: Array1<f64>,
    risk_bias: f64,
}

/// cached intermediates of one forward pass
struct ForwardPass {
    pre: Vec<Array2<f64>>,  // pre-activations per hidden layer
    acts: Vec<Array2<f64>>, // post-dropout activations per hidden layer
    scores: Array1<f64>,
}

/// a stack of hidden layers with tied denoising autoencoders and a terminal
/// risk layer; owns every trainable parameter
///
/// depth 0 degenerates to plain cox regression on the raw features - no
/// hidden stack, no autoencoders, no dropout masks
pub struct Model {
    config: ModelConfig,
    hidden_layers: Vec<HiddenLayer>,
    autoencoders: Vec<DenoisingAutoencoder>,
    risk_layer: RiskLayer,
}

impl Model {
    pub fn new(config: ModelConfig, rng: &mut impl Rng) -> Result<Self> {
        let depth = config.hidden_layers_sizes.len();

        if config.corruption_levels.len() < depth {
            return Err(SurvNetError::config(format!(
                "{} corruption levels for {} hidden layers",
                config.corruption_levels.len(),
                depth
            )));
        }
        if !(0.0..1.0).contains(&config.dropout_rate) {
            return Err(SurvNetError::config(format!(
                "dropout rate must be in [0, 1), got {}",
                config.dropout_rate
            )));
        }
        if config.n_ins == 0 {
            return Err(SurvNetError::config("input dimension must be positive"));
        }
        if config.hidden_layers_sizes.iter().any(|&s| s == 0) {
            return Err(SurvNetError::config("hidden layer width must be positive"));
        }

        // chain the hidden layers; layer i reads layer i-1's output
        let mut hidden_layers = Vec::with_capacity(depth);
        let mut autoencoders = Vec::with_capacity(depth);
        for i in 0..depth {
            let n_in = if i == 0 {
                config.n_ins
            } else {
                config.hidden_layers_sizes[i - 1]
            };
            let n_out = config.hidden_layers_sizes[i];
            hidden_layers.push(HiddenLayer::new(n_in, n_out, config.activation, rng));
            autoencoders.push(DenoisingAutoencoder::new(i, n_in));
        }

        let risk_in = config.hidden_layers_sizes.last().copied().unwrap_or(config.n_ins);
        let risk_layer = RiskLayer::new(risk_in, rng);

        Ok(Self {
            config,
            hidden_layers,
            autoencoders,
            risk_layer,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn depth(&self) -> usize {
        self.hidden_layers.len()
    }

    pub fn hidden_layer_sizes(&self) -> &[usize] {
        &self.config.hidden_layers_sizes
    }

    fn keep_prob(&self) -> f64 {
        1.0 - self.config.dropout_rate
    }

    fn dropout_active(&self, train_mode: bool) -> bool {
        train_mode && self.config.dropout_rate > 0.0 && self.depth() > 0
    }

    fn check_masks(&self, features: ArrayView2<f64>, masks: &[Array2<f64>]) -> Result<()> {
        if masks.len() != self.depth() {
            return Err(SurvNetError::config(format!(
                "{} dropout masks for {} hidden layers",
                masks.len(),
                self.depth()
            )));
        }
        for (i, mask) in masks.iter().enumerate() {
            let want = (features.nrows(), self.config.hidden_layers_sizes[i]);
            if mask.dim() != want {
                return Err(SurvNetError::invalid_dimensions(format!(
                    "mask {} has shape {:?}, expected {:?}",
                    i,
                    mask.dim(),
                    want
                )));
            }
        }
        Ok(())
    }

    fn forward(
        &self,
        features: ArrayView2<f64>,
        train_mode: bool,
        masks: &[Array2<f64>],
    ) -> Result<ForwardPass> {
        if features.ncols() != self.config.n_ins {
            return Err(SurvNetError::invalid_dimensions(format!(
                "features have {} columns, model expects {}",
                features.ncols(),
                self.config.n_ins
            )));
        }
        let dropout = self.dropout_active(train_mode);
        if dropout {
            self.check_masks(features, masks)?;
        }

        let mut pre = Vec::with_capacity(self.depth());
        let mut acts: Vec<Array2<f64>> = Vec::with_capacity(self.depth());
        for (i, layer) in self.hidden_layers.iter().enumerate() {
            let input = if i == 0 {
                features.view()
            } else {
                acts[i - 1].view()
            };
            let (z, mut a) = layer.forward(input);
            if dropout {
                apply_dropout_mask(&mut a, &masks[i], self.keep_prob());
            }
            pre.push(z);
            acts.push(a);
        }

        let risk_input = acts.last().map(|a| a.view()).unwrap_or(features.view());
        let scores = self.risk_layer.scores(risk_input);

        Ok(ForwardPass { pre, acts, scores })
    }

    /// forward pass producing the Cox cost and per-sample risk scores;
    /// `masks` is ignored unless the train-mode dropout path is active
    pub fn evaluate(
        &self,
        features: ArrayView2<f64>,
        events: &[bool],
        at_risk: &[usize],
        train_mode: bool,
        masks: &[Array2<f64>],
    ) -> Result<Evaluation> {
        let fwd = self.forward(features, train_mode, masks)?;
        let cost = self.risk_layer.cost(fwd.scores.view(), events, at_risk)?;
        let features_out = fwd
            .acts
            .last()
            .cloned()
            .unwrap_or_else(|| features.to_owned());

        Ok(Evaluation {
            cost,
            risk: fwd.scores,
            features: features_out,
        })
    }

    /// gradients of (Cox cost + L1 + L2) at the current parameters
    fn backward(
        &self,
        features: ArrayView2<f64>,
        fwd: &ForwardPass,
        events: &[bool],
        at_risk: &[usize],
        train_mode: bool,
        masks: &[Array2<f64>],
    ) -> Result<(f64, Gradients)> {
        let (cost, d_scores) = cox_cost_gradient(fwd.scores.view(), events, at_risk)?;
        let dropout = self.dropout_active(train_mode);
        let (l1, l2) = (self.config.lambda1, self.config.lambda2);
        // subgradient of the penalty; L1 contributes nothing at exactly zero
        let penalty_grad = move |w: f64| {
            let sign = if w.abs() > 1e-12 { w.signum() } else { 0.0 };
            l1 * sign + 2.0 * l2 * w
        };

        let risk_input = fwd.acts.last().map(|a| a.view()).unwrap_or(features.view());
        let mut risk_weights = risk_input.t().dot(&d_scores);
        risk_weights += &self.risk_layer.weights.mapv(penalty_grad);
        let risk_bias = d_scores.sum();

        // d(cost)/d(activation) flowing down the stack
        let mut d_act = d_scores
            .view()
            .insert_axis(Axis(1))
            .dot(&self.risk_layer.weights.view().insert_axis(Axis(0)));

        let mut hidden = Vec::with_capacity(self.depth());
        for i in (0..self.depth()).rev() {
            if dropout {
                apply_dropout_mask(&mut d_act, &masks[i], self.keep_prob());
            }
            let layer = &self.hidden_layers[i];
            let d_pre = d_act * fwd.pre[i].mapv(|z| layer.activation().grad(z));

            let input = if i == 0 {
                features.view()
            } else {
                fwd.acts[i - 1].view()
            };
            let mut grad_w = input.t().dot(&d_pre);
            grad_w += &layer.weights.mapv(penalty_grad);
            let grad_b = d_pre.sum_axis(Axis(0));

            d_act = d_pre.dot(&layer.weights.t());
            hidden.push((grad_w, grad_b));
        }
        hidden.reverse();

        Ok((
            cost,
            Gradients {
                hidden,
                risk_weights,
                risk_bias,
            },
        ))
    }

    /// evaluate in train mode and take one gradient step on all parameters
    pub fn update(
        &mut self,
        features: ArrayView2<f64>,
        events: &[bool],
        at_risk: &[usize],
        masks: &[Array2<f64>],
        learning_rate: f64,
    ) -> Result<Evaluation> {
        let fwd = self.forward(features, true, masks)?;
        let (cost, grads) = self.backward(features, &fwd, events, at_risk, true, masks)?;

        for (layer, (gw, gb)) in self.hidden_layers.iter_mut().zip(grads.hidden) {
            layer.weights -= &(gw * learning_rate);
            layer.bias -= &(gb * learning_rate);
        }
        self.risk_layer.weights -= &(grads.risk_weights * learning_rate);
        self.risk_layer.bias -= grads.risk_bias * learning_rate;

        let features_out = fwd
            .acts
            .last()
            .cloned()
            .unwrap_or_else(|| features.to_owned());

        Ok(Evaluation {
            cost,
            risk: fwd.scores,
            features: features_out,
        })
    }

    /// one optimizer step against a single layer's autoencoder objective;
    /// every other parameter in the stack stays put
    pub fn pretraining_step(
        &mut self,
        layer_index: usize,
        batch: ArrayView2<f64>,
        corruption_level: f64,
        learning_rate: f64,
        rng: &mut impl Rng,
    ) -> Result<f64> {
        if layer_index >= self.depth() {
            return Err(SurvNetError::config(format!(
                "pretraining layer {} of a depth-{} stack",
                layer_index,
                self.depth()
            )));
        }
        if !(0.0..=1.0).contains(&corruption_level) {
            return Err(SurvNetError::config(format!(
                "corruption level must be in [0, 1], got {}",
                corruption_level
            )));
        }

        if batch.ncols() != self.config.n_ins {
            return Err(SurvNetError::invalid_dimensions(format!(
                "batch has {} columns, model expects {}",
                batch.ncols(),
                self.config.n_ins
            )));
        }

        // feed the batch through the layers below, eval path (no dropout)
        let mut input = batch.to_owned();
        for layer in &self.hidden_layers[..layer_index] {
            let (_, a) = layer.forward(input.view());
            input = a;
        }

        let dae = &mut self.autoencoders[layer_index];
        let layer = &mut self.hidden_layers[layer_index];
        Ok(dae.pretraining_step(layer, input.view(), corruption_level, learning_rate, rng))
    }

    /// penalty value at the current weights: lambda1 * sum|W| + lambda2 * sum W^2
    /// over every layer's weights (biases excluded); the structure is fixed at
    /// construction, the value tracks the weights
    pub fn penalty(&self) -> f64 {
        let mut l1 = 0.0;
        let mut l2 = 0.0;
        for layer in &self.hidden_layers {
            l1 += layer.weights.mapv(f64::abs).sum();
            l2 += layer.weights.mapv(|w| w * w).sum();
        }
        l1 += self.risk_layer.weights.mapv(f64::abs).sum();
        l2 += self.risk_layer.weights.mapv(|w| w * w).sum();

        self.config.lambda1 * l1 + self.config.lambda2 * l2
    }

    /// total trainable parameter count
    pub fn n_params(&self) -> usize {
        let hidden: usize = self
            .hidden_layers
            .iter()
            .map(|l| l.n_in() * l.n_out() + l.n_out())
            .sum();
        hidden + self.risk_layer.n_in() + 1
    }

    /// flatten all parameters into one vector (layer weights row-major, then
    /// bias, stack order, risk layer last)
    pub fn params_to_vec(&self) -> Array1<f64> {
        let mut out = Vec::with_capacity(self.n_params());
        for layer in &self.hidden_layers {
            out.extend(layer.weights.iter());
            out.extend(layer.bias.iter());
        }
        out.extend(self.risk_layer.weights.iter());
        out.push(self.risk_layer.bias);
        Array1::from(out)
    }

    /// overwrite all parameters from a flat vector in `params_to_vec` order
    pub fn set_params_from_vec(&mut self, params: ArrayView1<f64>) -> Result<()> {
        if params.len() != self.n_params() {
            return Err(SurvNetError::invalid_dimensions(format!(
                "parameter vector has {} entries, model has {}",
                params.len(),
                self.n_params()
            )));
        }

        let mut offset = 0;
        for layer in &mut self.hidden_layers {
            for w in layer.weights.iter_mut() {
                *w = params[offset];
                offset += 1;
            }
            for b in layer.bias.iter_mut() {
                *b = params[offset];
                offset += 1;
            }
        }
        for w in self.risk_layer.weights.iter_mut() {
            *w = params[offset];
            offset += 1;
        }
        self.risk_layer.bias = params[offset];
        Ok(())
    }

    /// penalized objective (Cox cost + L1 + L2) and its flat gradient,
    /// in `params_to_vec` order; this is what the quasi-Newton and
    /// line-search strategies minimize
    pub fn cost_and_gradient(
        &self,
        features: ArrayView2<f64>,
        events: &[bool],
        at_risk: &[usize],
        masks: &[Array2<f64>],
    ) -> Result<(f64, Array1<f64>)> {
        let fwd = self.forward(features, true, masks)?;
        let (cost, grads) = self.backward(features, &fwd, events, at_risk, true, masks)?;

        let mut flat = Vec::with_capacity(self.n_params());
        for (gw, gb) in &grads.hidden {
            flat.extend(gw.iter());
            flat.extend(gb.iter());
        }
        flat.extend(grads.risk_weights.iter());
        flat.push(grads.risk_bias);

        Ok((cost + self.penalty(), Array1::from(flat)))
    }

    /// re-randomize every layer in place, e.g. between cross-validation folds
    pub fn reset_parameters(&mut self, rng: &mut impl Rng) {
        for layer in &mut self.hidden_layers {
            layer.reset(rng);
        }
        self.risk_layer.reset(rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_batch() -> (Array2<f64>, Vec<bool>, Vec<usize>) {
        let features = Array2::from_shape_vec((4, 3), vec![
            0.5, -0.2, 0.1,
            -0.4, 0.9, 0.3,
            0.8, 0.1, -0.6,
            -0.1, -0.5, 0.7,
        ]).unwrap();
        let events = vec![true, false, true, true];
        let at_risk = vec![0, 1, 2, 3];
        (features, events, at_risk)
    }

    fn stacked_config() -> ModelConfig {
        ModelConfig::new(3)
            .with_hidden_layers(vec![5, 4])
            .with_corruption_levels(vec![0.1, 0.1])
            .with_activation(Activation::Tanh)
    }

    #[test]
    fn test_construction_rejects_short_corruption_list() {
        let config = ModelConfig::new(3)
            .with_hidden_layers(vec![5, 4])
            .with_corruption_levels(vec![0.1]);
        let mut rng = StdRng::seed_from_u64(1);

        assert!(Model::new(config, &mut rng).is_err());
    }

    #[test]
    fn test_construction_rejects_full_dropout() {
        let config = stacked_config().with_dropout_rate(1.0);
        let mut rng = StdRng::seed_from_u64(1);

        assert!(Model::new(config, &mut rng).is_err());
    }

    #[test]
    fn test_evaluate_rejects_wrong_mask_count() {
        let config = stacked_config().with_dropout_rate(0.5);
        let mut rng = StdRng::seed_from_u64(1);
        let model = Model::new(config, &mut rng).unwrap();
        let (features, events, at_risk) = small_batch();

        let one_mask = vec![Array2::ones((4, 5))];
        let result = model.evaluate(features.view(), &events, &at_risk, true, &one_mask);
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_depth_is_first_class() {
        let config = ModelConfig::new(3);
        let mut rng = StdRng::seed_from_u64(1);
        let mut model = Model::new(config, &mut rng).unwrap();
        let (features, events, at_risk) = small_batch();

        // no masks needed in either mode
        let eval = model.evaluate(features.view(), &events, &at_risk, true, &[]).unwrap();
        assert!(eval.cost.is_finite());
        assert_eq!(eval.risk.len(), 4);

        let updated = model.update(features.view(), &events, &at_risk, &[], 0.05).unwrap();
        assert!(updated.cost.is_finite());
    }

    #[test]
    fn test_flat_params_round_trip() {
        let config = stacked_config();
        let mut rng = StdRng::seed_from_u64(3);
        let mut model = Model::new(config, &mut rng).unwrap();

        let params = model.params_to_vec();
        assert_eq!(params.len(), model.n_params());

        let doubled = params.mapv(|p| p * 2.0);
        model.set_params_from_vec(doubled.view()).unwrap();
        let read_back = model.params_to_vec();

        for (a, b) in read_back.iter().zip(doubled.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_flat_gradient_matches_finite_difference() {
        let config = ModelConfig::new(3)
            .with_hidden_layers(vec![4])
            .with_corruption_levels(vec![0.0])
            .with_l1_penalty(0.0)
            .with_l2_penalty(0.01)
            .with_activation(Activation::Tanh);
        let mut rng = StdRng::seed_from_u64(11);
        let mut model = Model::new(config, &mut rng).unwrap();
        let (features, events, at_risk) = small_batch();

        let (_, grad) = model
            .cost_and_gradient(features.view(), &events, &at_risk, &[])
            .unwrap();

        let base = model.params_to_vec();
        let h = 1e-6;
        // spot check a handful of coordinates
        for &k in &[0usize, 3, 7, base.len() - 2, base.len() - 1] {
            let mut plus = base.clone();
            plus[k] += h;
            model.set_params_from_vec(plus.view()).unwrap();
            let (f_plus, _) = model
                .cost_and_gradient(features.view(), &events, &at_risk, &[])
                .unwrap();

            let mut minus = base.clone();
            minus[k] -= h;
            model.set_params_from_vec(minus.view()).unwrap();
            let (f_minus, _) = model
                .cost_and_gradient(features.view(), &events, &at_risk, &[])
                .unwrap();

            let fd = (f_plus - f_minus) / (2.0 * h);
            assert_relative_eq!(grad[k], fd, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_update_moves_all_parameters() {
        let config = stacked_config();
        let mut rng = StdRng::seed_from_u64(5);
        let mut model = Model::new(config, &mut rng).unwrap();
        let (features, events, at_risk) = small_batch();

        let before = model.params_to_vec();
        model.update(features.view(), &events, &at_risk, &[], 0.1).unwrap();
        let after = model.params_to_vec();

        let moved = before
            .iter()
            .zip(after.iter())
            .filter(|(a, b)| (*a - *b).abs() > 1e-12)
            .count();
        assert!(moved > before.len() / 2, "only {} of {} parameters moved", moved, before.len());
    }

    #[test]
    fn test_pretraining_step_leaves_other_layers_alone() {
        let config = stacked_config();
        let mut rng = StdRng::seed_from_u64(8);
        let mut model = Model::new(config, &mut rng).unwrap();
        let (features, _, _) = small_batch();

        let before = model.params_to_vec();
        model
            .pretraining_step(1, features.view(), 0.1, 0.05, &mut rng)
            .unwrap();
        let after = model.params_to_vec();

        // layer 0 occupies the first 3*5 + 5 slots; none of them may move
        let layer0 = 3 * 5 + 5;
        for k in 0..layer0 {
            assert_relative_eq!(before[k], after[k], epsilon = 1e-15);
        }
        // the risk layer (last 4 + 1 slots) must not move either
        for k in (after.len() - 5)..after.len() {
            assert_relative_eq!(before[k], after[k], epsilon = 1e-15);
        }
    }

    #[test]
    fn test_pretraining_step_rejects_bad_layer() {
        let config = stacked_config();
        let mut rng = StdRng::seed_from_u64(8);
        let mut model = Model::new(config, &mut rng).unwrap();
        let (features, _, _) = small_batch();

        assert!(model.pretraining_step(2, features.view(), 0.1, 0.05, &mut rng).is_err());
    }

    #[test]
    fn test_penalty_tracks_weights() {
        let config = stacked_config().with_l2_penalty(1.0);
        let mut rng = StdRng::seed_from_u64(13);
        let mut model = Model::new(config, &mut rng).unwrap();

        let before = model.penalty();
        let scaled = model.params_to_vec().mapv(|p| p * 2.0);
        model.set_params_from_vec(scaled.view()).unwrap();

        // pure L2 scales with the square of the weights
        assert_relative_eq!(model.penalty(), before * 4.0, epsilon = 1e-9);
    }
}
