//! Turning model outputs into a ranked prediction

use mindscan_core::{
    ClassProbabilities, ConfidenceScore, Error, LabelSet, Logits, PredictionResult, Result,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Which model output the final distribution came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    /// Probabilities of the boosted tree ensemble
    TreeEnsemble,
    /// Softmax over the recurrent head's logits
    Logits,
}

impl ScoreSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreSource::TreeEnsemble => "tree_ensemble",
            ScoreSource::Logits => "logits",
        }
    }
}

impl fmt::Display for ScoreSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A distribution together with where it came from
#[derive(Debug, Clone, PartialEq)]
pub enum ProbabilitySource {
    TreeEnsemble(ClassProbabilities),
    Logits(Logits),
}

impl ProbabilitySource {
    /// Tree probabilities when available, logits otherwise
    pub fn select(logits: Logits, tree_probs: Option<ClassProbabilities>) -> Self {
        match tree_probs {
            Some(probs) => Self::TreeEnsemble(probs),
            None => Self::Logits(logits),
        }
    }

    pub fn kind(&self) -> ScoreSource {
        match self {
            Self::TreeEnsemble(_) => ScoreSource::TreeEnsemble,
            Self::Logits(_) => ScoreSource::Logits,
        }
    }

    /// Normalized distribution over `num_labels` categories
    pub fn probabilities(&self, num_labels: usize) -> Result<ClassProbabilities> {
        let probs = match self {
            Self::TreeEnsemble(probs) => probs.clone(),
            Self::Logits(logits) => {
                if logits.as_slice().iter().any(|v| !v.is_finite()) {
                    return Err(Error::internal("logits contain non-finite values"));
                }
                ClassProbabilities::new(softmax(logits.as_slice()))
            }
        };

        probs.validate(num_labels)?;
        Ok(probs)
    }
}

/// Combine logits and optional tree probabilities into a ranked result
pub fn assemble(
    labels: &LabelSet,
    logits: Logits,
    tree_probs: Option<ClassProbabilities>,
) -> Result<(PredictionResult, ScoreSource)> {
    let source = ProbabilitySource::select(logits, tree_probs);
    let probs = source.probabilities(labels.len())?;
    Ok((rank(labels, &probs)?, source.kind()))
}

/// Sort categories by descending score, ties broken by canonical label order
pub fn rank(labels: &LabelSet, probs: &ClassProbabilities) -> Result<PredictionResult> {
    let scores = probs.as_slice();
    if scores.len() != labels.len() {
        return Err(Error::internal(format!(
            "{} scores for {} labels",
            scores.len(),
            labels.len()
        )));
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    // stable sort keeps canonical order among equal scores
    order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));

    let confidence_scores: Vec<ConfidenceScore> = order
        .into_iter()
        .filter_map(|idx| labels.get(idx).map(|l| ConfidenceScore::new(l, scores[idx])))
        .collect();

    let top_label = confidence_scores
        .first()
        .map(|s| s.label.clone())
        .ok_or_else(|| Error::internal("no categories to rank"))?;

    Ok(PredictionResult {
        top_label,
        confidence_scores,
    })
}

/// Numerically stable normalized exponential
pub fn softmax(values: &[f32]) -> Vec<f32> {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Static distribution served when inference fails
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackDistribution {
    result: PredictionResult,
}

impl FallbackDistribution {
    /// `scores` are aligned with `labels`
    pub fn new(labels: &LabelSet, scores: &[f32]) -> Result<Self> {
        if scores.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(Error::config("fallback scores must be non-negative"));
        }
        let result = rank(labels, &ClassProbabilities::new(scores.to_vec()))
            .map_err(|e| Error::config(format!("invalid fallback distribution: {}", e)))?;
        Ok(Self { result })
    }

    /// Anxiety 0.4, Bipolar 0.3, Depression 0.3
    pub fn reference() -> Self {
        let labels = LabelSet::reference();
        let result = PredictionResult {
            top_label: labels.get(0).unwrap_or_default().to_string(),
            confidence_scores: labels
                .iter()
                .zip([0.4f32, 0.3, 0.3])
                .map(|(l, s)| ConfidenceScore::new(l, s))
                .collect(),
        };
        Self { result }
    }

    pub fn result(&self) -> PredictionResult {
        self.result.clone()
    }
}

impl Default for FallbackDistribution {
    fn default() -> Self {
        Self::reference()
    }
}
