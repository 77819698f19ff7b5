//! Text in, ranked prediction out
//!
//! [`predict_outcome`] runs preprocessing, feature extraction, optional tree
//! classification and assembly. Any error or panic in those stages turns
//! into the state's static fallback distribution, so a caller always gets a
//! well-formed [`PredictionResult`].

use crate::assembler::{assemble, ScoreSource};
use crate::state::ModelState;
use metrics::{counter, histogram};
use mindscan_core::{PredictionResult, Result};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, error, warn};

/// Characters of input text included in log lines
const PREVIEW_CHARS: usize = 50;

/// Outcome of one prediction
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// Every stage succeeded
    Inferred {
        result: PredictionResult,
        source: ScoreSource,
    },
    /// A stage failed and the static distribution was returned
    Fallback {
        result: PredictionResult,
        reason: String,
    },
}

impl Prediction {
    pub fn result(&self) -> &PredictionResult {
        match self {
            Prediction::Inferred { result, .. } | Prediction::Fallback { result, .. } => result,
        }
    }

    pub fn into_result(self) -> PredictionResult {
        match self {
            Prediction::Inferred { result, .. } | Prediction::Fallback { result, .. } => result,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Prediction::Fallback { .. })
    }

    /// Where the scores came from; `None` for the fallback
    pub fn source(&self) -> Option<ScoreSource> {
        match self {
            Prediction::Inferred { source, .. } => Some(*source),
            Prediction::Fallback { .. } => None,
        }
    }

    fn metric_label(&self) -> &'static str {
        match self {
            Prediction::Inferred { source, .. } => source.as_str(),
            Prediction::Fallback { .. } => "fallback",
        }
    }
}

/// Classify `text`, reporting whether inference or the fallback produced it
pub fn predict_outcome(state: &ModelState, text: &str) -> Prediction {
    let start = Instant::now();
    let preview = text_preview(text);
    debug!("Predicting for: {}", preview);

    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| run_stages(state, text))) {
        Ok(Ok((result, source))) => {
            debug!("Predicted {} via {}", result.top_label, source);
            Prediction::Inferred { result, source }
        }
        Ok(Err(e)) => {
            warn!("Prediction failed for '{}', returning fallback: {}", preview, e);
            Prediction::Fallback {
                result: state.fallback().result(),
                reason: e.to_string(),
            }
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(
                "Prediction panicked for '{}', returning fallback: {}",
                preview, message
            );
            Prediction::Fallback {
                result: state.fallback().result(),
                reason: format!("panic: {}", message),
            }
        }
    };

    counter!("mindscan_predictions_total", "source" => outcome.metric_label()).increment(1);
    histogram!("mindscan_prediction_latency_us").record(start.elapsed().as_micros() as f64);

    outcome
}

/// Classify `text`; never fails
pub fn predict(state: &ModelState, text: &str) -> PredictionResult {
    predict_outcome(state, text).into_result()
}

fn run_stages(state: &ModelState, text: &str) -> Result<(PredictionResult, ScoreSource)> {
    let tokenized = state.preprocessor().tokenize(text)?;
    debug!("Tokenized input: {} real tokens", tokenized.real_token_count());

    let (features, logits) = state.extractor().extract(&tokenized)?;

    let tree_probs = state
        .tree_classifier()
        .map(|tree| tree.classify(&features))
        .transpose()?;

    assemble(state.labels(), logits, tree_probs)
}

/// First characters of `text`, marked when cut short
pub fn text_preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
