//! Mindscan Classifiers
//!
//! Hybrid inference core for classifying free text into mental-health
//! patterns (Anxiety, Bipolar, Depression in the reference deployment).
//!
//! A prediction runs through four stages:
//! - Preprocessing: subword tokenization to a fixed length with an attention mask
//! - Feature extraction: DistilBERT encoder, then a bidirectional LSTM whose
//!   final forward and backward states form the feature vector and feed a
//!   linear head producing logits
//! - Tree classification: an optional XGBoost ensemble over the feature vector
//! - Assembly: tree probabilities when available, softmax of logits otherwise,
//!   ranked with a canonical tie-break
//!
//! Internal failures never reach the caller: [`predict`] returns a static
//! fallback distribution instead, and [`predict_outcome`] says which one it was.

pub mod assembler;
pub mod bilstm;
pub mod config;
pub mod encoder;
pub mod model_loader;
pub mod pipeline;
pub mod state;
pub mod tokenizer;
pub mod tree;

pub use assembler::{assemble, FallbackDistribution, ProbabilitySource, ScoreSource};
pub use config::{
    DeviceSpec, EncoderConfig, EncoderSourceSpec, HybridModelConfig, InferenceConfig,
    TreeClassifierConfig,
};
pub use encoder::{EncoderSpec, FeatureExtractor, HeadShape, HybridEncoder};
pub use model_loader::{DeviceType, ModelFormat};
pub use pipeline::{predict, predict_outcome, Prediction};
pub use state::{ModelState, MODEL_TYPE};
pub use tokenizer::Preprocessor;
pub use tree::{GradientBoostedTrees, TreeClassifier};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::HybridModelConfig;
    pub use crate::encoder::FeatureExtractor;
    pub use crate::pipeline::{predict, predict_outcome, Prediction};
    pub use crate::state::ModelState;
    pub use crate::tree::TreeClassifier;
    pub use mindscan_core::prelude::*;
}
