//! Mindscan Core
//!
//! Core types and error handling shared across Mindscan components.
//!
//! This crate provides:
//! - The data model flowing through the inference pipeline (token encodings,
//!   feature vectors, logits, probability distributions, ranked predictions)
//! - The closed label set and its canonical ordering
//! - Error types and result handling

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    ClassProbabilities, ConfidenceScore, FeatureVector, LabelSet, Logits, ModelInfo,
    PredictionResult, TokenizedInput, REFERENCE_LABELS,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{
        ClassProbabilities, ConfidenceScore, FeatureVector, LabelSet, Logits, PredictionResult,
        TokenizedInput,
    };
}
