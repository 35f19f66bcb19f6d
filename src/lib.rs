//! # deep survival analysis
//!
//! stacked denoising autoencoders fine-tuned against a Cox partial-likelihood
//! objective - risk ranking for censored data, end to end
//!
//! ## what you get
//!
//! - a variable-depth stack of hidden layers with tied autoencoders for
//!   layer-wise pretraining (depth 0 degenerates to plain cox regression)
//! - the Cox partial-likelihood cost with log-sum-exp stability
//! - per-epoch dropout masks shared between the optimizer and the train pass
//! - three interchangeable fine-tuning strategies: SGD, BFGS, and gradient
//!   descent with line search
//! - concordance-index tracking and an overfitting monitor for early stopping
//!
//! ## quick start
//!
//! ```rust
//! use survival_net::{FinetuneConfig, Model, ModelConfig, SurvivalData, train};
//! use ndarray::Array2;
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // survival times, censoring flags, and patient features
//! let times = vec![2.0, 1.0, 4.0, 3.0, 5.0, 6.0, 7.0, 8.0];
//! let events = vec![true, true, false, true, true, false, true, true];
//! let covariates = Array2::from_shape_vec((8, 2), vec![
//!     1.0, 0.5,
//!     2.0, 1.0,
//!     1.5, 0.0,
//!     3.0, 1.5,
//!     0.5, 2.0,
//!     1.0, 1.0,
//!     2.5, 0.5,
//!     0.0, 1.5,
//! ])?;
//! let data = SurvivalData::new(times, events, covariates)?;
//! let train_set = data.subset(&[0, 1, 2, 3, 4, 5])?;
//! let test_set = data.subset(&[6, 7])?;
//!
//! // one hidden layer of 4 units over 2 input features
//! let config = ModelConfig::new(2)
//!     .with_hidden_layers(vec![4])
//!     .with_corruption_levels(vec![0.1]);
//! let mut rng = StdRng::seed_from_u64(1111);
//! let model = Model::new(config, &mut rng)?;
//!
//! let finetune = FinetuneConfig { epochs: 3, ..Default::default() };
//! let result = train(model, &train_set, &test_set, None, &finetune, &mut rng)?;
//! assert_eq!(result.history.epochs(), 3);
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod autoencoder;
pub mod data;
pub mod error;
pub mod layer;
pub mod metrics;
pub mod model;
pub mod optimization;
pub mod stopping;
pub mod train;

pub use activation::Activation;
pub use data::SurvivalData;
pub use error::{Result, SurvNetError};
pub use metrics::concordance_index;
pub use model::{Evaluation, Model, ModelConfig};
pub use optimization::{Optimizer, OptimizerKind};
pub use stopping::OverfitMonitor;
pub use train::{
    train, FinetuneConfig, PretrainConfig, TrainingHistory, TrainingOutcome, TrainingResult,
};
