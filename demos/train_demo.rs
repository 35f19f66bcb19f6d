use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use survival_net::{
    train, Activation, FinetuneConfig, Model, ModelConfig, OptimizerKind, PretrainConfig,
    SurvivalData, TrainingOutcome,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Deep Survival Analysis - Training Demo");
    println!("======================================\n");

    // synthetic cohort: 200 patients, 10 features, the first three drive
    // the hazard
    let n_samples = 200;
    let n_features = 10;
    let mut rng = StdRng::seed_from_u64(1111);

    let mut covariates_vec: Vec<f64> = Vec::with_capacity(n_samples * n_features);
    for _ in 0..(n_samples * n_features) {
        covariates_vec.push(rng.gen_range(-2.0..2.0));
    }
    let covariates = Array2::from_shape_vec((n_samples, n_features), covariates_vec)?;

    let true_coefficients = Array1::from(vec![0.8, -0.5, 0.3]);
    let mut times = Vec::with_capacity(n_samples);
    let mut events = Vec::with_capacity(n_samples);
    for i in 0..n_samples {
        let linear_pred = covariates
            .row(i)
            .slice(ndarray::s![0..3])
            .dot(&true_coefficients);
        let hazard = linear_pred.exp();
        let time = (-rng.gen::<f64>().ln() / (0.1 * hazard)).max(0.1);
        let censoring_time = rng.gen_range(1.0..12.0);

        if time < censoring_time {
            times.push(time);
            events.push(true);
        } else {
            times.push(censoring_time);
            events.push(false);
        }
    }

    let mut data = SurvivalData::new(times, events, covariates)?;
    data.standardize_covariates()?;

    println!("Cohort:");
    println!("  - samples:  {}", data.n_samples());
    println!("  - features: {}", data.n_features());
    println!("  - events:   {}", data.n_events());
    println!();

    let split = 160;
    let train_set = data.subset(&(0..split).collect::<Vec<_>>())?;
    let test_set = data.subset(&(split..n_samples).collect::<Vec<_>>())?;

    // two hidden layers with tied autoencoders and dropout
    let config = ModelConfig::new(n_features)
        .with_hidden_layers(vec![32, 16])
        .with_corruption_levels(vec![0.2, 0.2])
        .with_dropout_rate(0.1)
        .with_l2_penalty(1e-4)
        .with_activation(Activation::Tanh);
    let model = Model::new(config, &mut rng)?;

    let pretrain = PretrainConfig {
        epochs: 10,
        batch_size: Some(32),
        learning_rate: 0.05,
        corruption_level: 0.2,
    };
    let finetune = FinetuneConfig {
        epochs: 60,
        learning_rate: 0.01,
        learning_rate_decay: 0.995,
        optimizer: OptimizerKind::Sgd,
    };

    let result = train(
        model,
        &train_set,
        &test_set,
        Some(&pretrain),
        &finetune,
        &mut rng,
    )?;

    let outcome = match result.outcome {
        TrainingOutcome::Completed => "ran the full epoch budget",
        TrainingOutcome::StoppedEarly => "stopped early (overfitting)",
        TrainingOutcome::StoppedNan => "halted on numerical divergence",
    };

    println!("Training finished: {}", outcome);
    println!("  - epochs run:   {}", result.history.epochs());
    println!("  - best epoch:   {}", result.best_epoch);
    println!(
        "  - best test ci: {:.4}",
        result.history.test_c_index[result.best_epoch]
    );
    println!(
        "  - final costs:  train {:.4}, test {:.4}",
        result.history.train_cost.last().unwrap(),
        result.history.test_cost.last().unwrap()
    );

    Ok(())
}
