use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::Rng;

use crate::layer::HiddenLayer;

/// denoising autoencoder tied to one hidden layer of the stack
///
/// the encoder IS the hidden layer: its weight matrix and hidden bias are the
/// layer's own parameters, addressed through the model's layer list by index
/// rather than copied. the decoder reuses the transposed weights, so the only
/// parameter the autoencoder owns outright is the visible bias.
#[derive(Debug, Clone)]
pub struct DenoisingAutoencoder {
    layer_index: usize,
    visible_bias: Array1<f64>, // n_visible
}

impl DenoisingAutoencoder {
    pub fn new(layer_index: usize, n_visible: usize) -> Self {
        Self {
            layer_index,
            visible_bias: Array1::zeros(n_visible),
        }
    }

    pub fn layer_index(&self) -> usize {
        self.layer_index
    }

    /// reconstruction cost of a (possibly corrupted) batch against its
    /// uncorrupted target, mean squared error per sample
    fn reconstruct(
        &self,
        layer: &HiddenLayer,
        corrupted: ArrayView2<f64>,
    ) -> (Array2<f64>, Array2<f64>, Array2<f64>, Array2<f64>) {
        let (hidden_pre, hidden) = layer.forward(corrupted);

        let mut visible_pre = hidden.dot(&layer.weights.t());
        for mut row in visible_pre.rows_mut() {
            row += &self.visible_bias;
        }
        let reconstruction = visible_pre.mapv(|z| layer.activation().apply(z));

        (hidden_pre, hidden, visible_pre, reconstruction)
    }

    /// one SGD step on this layer's reconstruction objective; nothing outside
    /// the tied layer parameters and the visible bias moves
    pub fn pretraining_step(
        &mut self,
        layer: &mut HiddenLayer,
        input: ArrayView2<f64>,
        corruption_level: f64,
        learning_rate: f64,
        rng: &mut impl Rng,
    ) -> f64 {
        let n = input.nrows() as f64;
        let act = layer.activation();

        // zero out entries with probability corruption_level
        let corrupted = if corruption_level > 0.0 {
            input.mapv(|v| if rng.gen::<f64>() < corruption_level { 0.0 } else { v })
        } else {
            input.to_owned()
        };

        let (hidden_pre, hidden, visible_pre, reconstruction) =
            self.reconstruct(layer, corrupted.view());

        let error = &reconstruction - &input;
        let cost = error.mapv(|e| e * e).sum() / n;

        // backprop through the decoder
        let d_visible =
            (2.0 / n) * &error * &visible_pre.mapv(|z| act.grad(z));
        let grad_visible_bias = d_visible.sum_axis(Axis(0));
        let grad_weights_decode = d_visible.t().dot(&hidden);

        // and through the encoder
        let d_hidden = d_visible.dot(&layer.weights) * &hidden_pre.mapv(|z| act.grad(z));
        let grad_hidden_bias = d_hidden.sum_axis(Axis(0));
        let grad_weights_encode = corrupted.t().dot(&d_hidden);

        layer.weights -= &((grad_weights_encode + grad_weights_decode) * learning_rate);
        layer.bias -= &(grad_hidden_bias * learning_rate);
        self.visible_bias -= &(grad_visible_bias * learning_rate);

        cost
    }
}
