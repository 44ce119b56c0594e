//! Example of logging a training run with explog-core.

use explog_core::{
    ArrayArchive, Checkpoint, MetricValue, Metrics, ModelWeights, RunConfig, RunLogger,
};
use serde::Serialize;

#[derive(Serialize)]
struct OptimizerState {
    step: u64,
    lr: f64,
}

fn main() -> anyhow::Result<()> {
    // 1. Configuration: either from YAML or built in code
    let config = match std::env::args().nth(1) {
        Some(path) => RunConfig::from_yaml_file(path.as_ref())?,
        None => RunConfig::new("./logs", "sine_fit")
            .with_log_to_file(true)
            .with_param("lr", 0.05),
    };

    // 2. Claim a run directory and write metadata.yaml
    let logger = RunLogger::new(config)?;

    // Keep the guard alive for the whole run so buffered lines get flushed.
    let _guard = match logger.output_sink() {
        Some(sink) => {
            let (writer, guard) = sink.non_blocking();
            tracing_subscriber::fmt()
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().init();
            None
        }
    };
    tracing::info!(run_id = logger.run_id(), dir = %logger.dir().display(), "Started run");

    // 3. Fit y = sin(x) with a single weight, logging as we go
    let xs: Vec<f64> = (0..32).map(|i| i as f64 / 8.0).collect();
    let ys: Vec<f64> = xs.iter().map(|x| x.sin()).collect();
    let mut w = 0.0_f64;
    for step in 0..50u64 {
        let grad: f64 = xs.iter().zip(&ys).map(|(x, y)| 2.0 * (w * x - y) * x).sum::<f64>()
            / xs.len() as f64;
        w -= 0.05 * grad;
        let loss: f64 = xs.iter().zip(&ys).map(|(x, y)| (w * x - y).powi(2)).sum::<f64>()
            / xs.len() as f64;

        let mut m = Metrics::new();
        m.insert("loss".to_string(), MetricValue::Float(loss));
        m.insert("step".to_string(), MetricValue::from(step as i64));
        logger.log_scalars(&m, "train", Some(step))?;

        if step % 10 == 9 {
            let state = OptimizerState { step, lr: 0.05 };
            logger.log_artifact(&Checkpoint(&state), step, "optim", Some("latest"))?;
        }
    }

    // 4. Final artifacts
    let mut preds = ArrayArchive::new();
    preds.insert("x", xs.clone());
    preds.insert("y_hat", xs.iter().map(|x| w * x).collect::<Vec<f64>>());
    logger.log_artifact(&preds, 50, "preds", None)?;

    let mut weights = ModelWeights::new();
    weights.insert("w", vec![1], vec![w as f32])?;
    logger.log_artifact(&weights, 50, "linear", None)?;

    println!("Run {} written to {}", logger.run_id(), logger.dir().display());
    Ok(())
}
