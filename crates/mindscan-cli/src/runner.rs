//! Batch prediction over a shared model state

use futures::stream::{self, StreamExt};
use mindscan_classifiers::{predict_outcome, ModelState, Prediction};
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// One line of output
#[derive(Debug)]
pub enum Outcome {
    Predicted(Prediction),
    /// Empty or whitespace-only input, never sent to the model
    Rejected,
}

impl Outcome {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Outcome::Predicted(prediction) => {
                serde_json::to_value(prediction.result()).unwrap_or_else(|e| {
                    json!({ "error": format!("failed to serialize prediction: {}", e) })
                })
            }
            Outcome::Rejected => json!({ "error": "text must not be empty" }),
        }
    }
}

/// Read every line of stdin
pub async fn read_stdin_lines() -> anyhow::Result<Vec<String>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut texts = Vec::new();
    while let Some(line) = lines.next_line().await? {
        texts.push(line);
    }
    Ok(texts)
}

/// Predict every input with up to `concurrency` blocking workers; results
/// keep input order
pub async fn predict_all(
    state: Arc<ModelState>,
    inputs: Vec<String>,
    concurrency: usize,
) -> anyhow::Result<Vec<Outcome>> {
    let concurrency = concurrency.max(1);
    debug!(
        "Predicting {} inputs with concurrency {}",
        inputs.len(),
        concurrency
    );

    let tasks = inputs.into_iter().map(|text| {
        let state = Arc::clone(&state);
        async move {
            if text.trim().is_empty() {
                return Ok(Outcome::Rejected);
            }
            let prediction =
                tokio::task::spawn_blocking(move || predict_outcome(&state, &text)).await?;
            Ok::<_, tokio::task::JoinError>(Outcome::Predicted(prediction))
        }
    });

    let outcomes = stream::iter(tasks)
        .buffered(concurrency)
        .collect::<Vec<_>>()
        .await;

    outcomes
        .into_iter()
        .map(|o| o.map_err(anyhow::Error::from))
        .collect()
}

/// Print one JSON line per input; returns how many inputs were rejected
pub async fn run(
    state: Arc<ModelState>,
    inputs: Vec<String>,
    concurrency: usize,
) -> anyhow::Result<usize> {
    let outcomes = predict_all(state, inputs, concurrency).await?;

    let mut rejected = 0;
    for outcome in &outcomes {
        if matches!(outcome, Outcome::Rejected) {
            rejected += 1;
        }
        println!("{}", outcome.to_json());
    }

    Ok(rejected)
}
