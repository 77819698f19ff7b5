//! Mindscan CLI
//!
//! Loads the hybrid model once and classifies text given on the command line
//! or on stdin, printing one JSON object per input.

use anyhow::Result;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusHandle;
use mindscan_classifiers::{DeviceSpec, ModelState};
use std::sync::Arc;
use tracing::info;

mod config;
mod runner;

#[derive(Parser, Debug)]
#[command(name = "mindscan")]
#[command(about = "Mental-health pattern classification with a hybrid transformer model", long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MINDSCAN_CONFIG", default_value = "mindscan.yaml")]
    config: String,

    /// Inference device (auto, cpu, cuda[:N], metal[:N])
    #[arg(short, long)]
    device: Option<DeviceSpec>,

    /// Token sequence length
    #[arg(long)]
    max_length: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print Prometheus metrics to stderr before exiting
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify texts; reads one text per line from stdin when none are given
    Predict {
        texts: Vec<String>,

        /// Predictions run in parallel
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
    },
    /// Print which model artifacts are loaded
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let metrics_handle = if cli.metrics {
        Some(init_metrics()?)
    } else {
        None
    };

    let model_config = config::load(&cli.config, &cli)?;
    info!("Configuration loaded from {}", cli.config);

    // artifact loading is blocking file and tensor work
    let state = tokio::task::spawn_blocking(move || ModelState::load(&model_config))
        .await?
        .map_err(|e| anyhow::anyhow!("Failed to load model: {}", e))?;
    let state = Arc::new(state);

    match cli.command {
        Command::Predict { texts, concurrency } => {
            let inputs = if texts.is_empty() {
                runner::read_stdin_lines().await?
            } else {
                texts
            };

            let rejected = runner::run(state, inputs, concurrency).await?;
            if rejected > 0 {
                tracing::warn!("{} empty input(s) rejected", rejected);
            }
        }
        Command::Info => {
            println!("{}", serde_json::to_string_pretty(&state.model_info())?);
        }
    }

    if let Some(handle) = metrics_handle {
        eprintln!("{}", handle.render());
    }

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("mindscan=debug,mindscan_classifiers=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("mindscan=info,mindscan_classifiers=info"))
    };

    // stdout carries the JSON results
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Install the Prometheus recorder and return a handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!(
        "mindscan_predictions_total",
        "Predictions served, by score source (tree_ensemble, logits, fallback)"
    );
    metrics::describe_histogram!(
        "mindscan_prediction_latency_us",
        metrics::Unit::Microseconds,
        "End-to-end prediction latency in microseconds"
    );
    metrics::describe_counter!(
        "mindscan_model_load_total",
        "Model artifact load attempts by artifact and status"
    );

    info!("Metrics recorder initialized");
    Ok(handle)
}
