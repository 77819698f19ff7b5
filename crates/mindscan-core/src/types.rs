//! Core data model shared by the inference pipeline and its hosts

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Labels of the reference deployment, in canonical order
pub const REFERENCE_LABELS: [&str; 3] = ["Anxiety", "Bipolar", "Depression"];

/// Closed, ordered set of category labels.
///
/// The order is canonical: model outputs are indexed by it and it breaks ties
/// when two categories receive exactly the same score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    /// Create a label set, rejecting empty or duplicated labels
    pub fn new<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();

        if labels.is_empty() {
            return Err(Error::config("label set must not be empty"));
        }

        for (idx, label) in labels.iter().enumerate() {
            if label.trim().is_empty() {
                return Err(Error::config(format!("label {} is blank", idx)));
            }
            if labels[..idx].contains(label) {
                return Err(Error::config(format!("duplicate label '{}'", label)));
            }
        }

        Ok(Self { labels })
    }

    /// The Anxiety / Bipolar / Depression set
    pub fn reference() -> Self {
        Self {
            labels: REFERENCE_LABELS.iter().map(|l| l.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&str> {
        self.labels.get(idx).map(String::as_str)
    }

    /// Canonical position of a label
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }
}

impl Default for LabelSet {
    fn default() -> Self {
        Self::reference()
    }
}

impl TryFrom<Vec<String>> for LabelSet {
    type Error = Error;

    fn try_from(labels: Vec<String>) -> Result<Self> {
        Self::new(labels)
    }
}

impl From<LabelSet> for Vec<String> {
    fn from(set: LabelSet) -> Self {
        set.labels
    }
}

/// Fixed-length token encoding of one text input.
///
/// `input_ids` and `attention_mask` always have the same length; a mask value
/// of 1 marks a real token and 0 marks right-aligned padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedInput {
    input_ids: Vec<u32>,
    attention_mask: Vec<u32>,
}

impl TokenizedInput {
    /// Build an encoding, checking it has exactly `max_length` positions
    pub fn new(input_ids: Vec<u32>, attention_mask: Vec<u32>, max_length: usize) -> Result<Self> {
        if input_ids.len() != max_length || attention_mask.len() != max_length {
            return Err(Error::tokenizer(format!(
                "encoding has {} ids and {} mask entries, expected {}",
                input_ids.len(),
                attention_mask.len(),
                max_length
            )));
        }

        if attention_mask.iter().any(|&m| m > 1) {
            return Err(Error::tokenizer("attention mask must be binary"));
        }

        Ok(Self {
            input_ids,
            attention_mask,
        })
    }

    pub fn input_ids(&self) -> &[u32] {
        &self.input_ids
    }

    pub fn attention_mask(&self) -> &[u32] {
        &self.attention_mask
    }

    /// Sequence length, padding included
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Number of non-padding positions
    pub fn real_token_count(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m == 1).count()
    }
}

/// Dense summary vector produced by the recurrent feature layer
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Raw, unnormalized per-category scores, in canonical label order
#[derive(Debug, Clone, PartialEq)]
pub struct Logits(Vec<f32>);

impl Logits {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-category probabilities, in canonical label order
#[derive(Debug, Clone, PartialEq)]
pub struct ClassProbabilities(Vec<f32>);

impl ClassProbabilities {
    /// Tolerance used when checking that probabilities sum to one
    pub const SUM_TOLERANCE: f32 = 1e-4;

    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sum(&self) -> f32 {
        self.0.iter().sum()
    }

    /// Check the distribution covers `num_labels` categories and is normalized
    pub fn validate(&self, num_labels: usize) -> Result<()> {
        if self.0.len() != num_labels {
            return Err(Error::internal(format!(
                "distribution has {} entries for {} labels",
                self.0.len(),
                num_labels
            )));
        }

        if self.0.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(Error::internal("distribution contains invalid probabilities"));
        }

        let sum = self.sum();
        if (sum - 1.0).abs() > Self::SUM_TOLERANCE {
            return Err(Error::internal(format!(
                "distribution sums to {} instead of 1",
                sum
            )));
        }

        Ok(())
    }
}

/// One entry of a ranked distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub label: String,
    pub score: f32,
}

impl ConfidenceScore {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// Ranked prediction returned to the caller.
///
/// `confidence_scores` is sorted by descending score and contains every label
/// exactly once; `top_label` is the label of its first entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    #[serde(rename = "topPattern")]
    pub top_label: String,

    #[serde(rename = "confidenceScores")]
    pub confidence_scores: Vec<ConfidenceScore>,
}

impl PredictionResult {
    /// Score assigned to a label, if present
    pub fn score_of(&self, label: &str) -> Option<f32> {
        self.confidence_scores
            .iter()
            .find(|s| s.label == label)
            .map(|s| s.score)
    }
}

/// Read-only status report for health checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub model_type: String,
    pub encoder_loaded: bool,
    pub tree_classifier_loaded: bool,
    pub labels: Vec<String>,
    pub device: String,

    /// Why the tree classifier is unavailable, when it is
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tree_classifier_error: Option<String>,
}
