//! Sequence feature extraction: DistilBERT encoder feeding a BiLSTM head

use crate::bilstm::BiLstm;
use crate::model_loader::device_label;
use candle_core::{Device, Tensor};
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::distilbert::{Config as DistilBertConfig, DistilBertModel};
use mindscan_core::{Error, FeatureVector, Logits, Result, TokenizedInput};
use std::path::Path;
use tracing::info;

/// `config.json` of `distilbert-base-uncased`
const DISTILBERT_BASE_UNCASED: &str = r#"{
  "activation": "gelu",
  "attention_dropout": 0.1,
  "dim": 768,
  "dropout": 0.1,
  "hidden_dim": 3072,
  "initializer_range": 0.02,
  "max_position_embeddings": 512,
  "model_type": "distilbert",
  "n_heads": 12,
  "n_layers": 6,
  "pad_token_id": 0,
  "qa_dropout": 0.1,
  "seq_classif_dropout": 0.2,
  "sinusoidal_pos_embds": false,
  "tie_weights_": true,
  "vocab_size": 30522
}"#;

/// Turns a token encoding into a dense feature vector and raw logits
pub trait FeatureExtractor: Send + Sync {
    /// Run the encoder and recurrent head over one encoding
    fn extract(&self, input: &TokenizedInput) -> Result<(FeatureVector, Logits)>;

    /// Size of the produced feature vector
    fn feature_dim(&self) -> usize;

    /// Number of logits, one per category
    fn num_labels(&self) -> usize;

    /// Sequence length the extractor expects
    fn max_length(&self) -> usize;

    /// Device the computation runs on
    fn device_label(&self) -> String;
}

/// Parsed transformer configuration
#[derive(Debug, Clone)]
pub struct EncoderSpec {
    config: DistilBertConfig,
    dim: usize,
    max_position_embeddings: usize,
}

impl EncoderSpec {
    /// Parse a DistilBERT `config.json`
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| Error::encoder(format!("Failed to parse encoder config JSON: {}", e)))?;

        let dim = value
            .get("dim")
            .or_else(|| value.get("hidden_size"))
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::encoder("Encoder config has no 'dim'"))? as usize;

        let max_position_embeddings = value
            .get("max_position_embeddings")
            .and_then(|v| v.as_u64())
            .unwrap_or(512) as usize;

        let config: DistilBertConfig = serde_json::from_value(value)
            .map_err(|e| Error::encoder(format!("Failed to parse encoder config: {}", e)))?;

        Ok(Self {
            config,
            dim,
            max_position_embeddings,
        })
    }

    /// Read `config.json` from disk
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::encoder(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// `distilbert-base-uncased`
    pub fn builtin() -> Result<Self> {
        Self::from_json(DISTILBERT_BASE_UNCASED)
    }

    /// Width of the encoder's per-token representation
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn max_position_embeddings(&self) -> usize {
        self.max_position_embeddings
    }
}

/// Shape parameters of the recurrent head
#[derive(Debug, Clone, Copy)]
pub struct HeadShape {
    pub hidden_dim: usize,
    pub num_labels: usize,
    pub max_length: usize,
}

/// DistilBERT → BiLSTM → linear head, matching the layout of the trained
/// PyTorch module (`distilbert.*`, `lstm.*`, `classifier.1.*`).
pub struct HybridEncoder {
    distilbert: DistilBertModel,
    bilstm: BiLstm,
    classifier: Linear,
    device: Device,
    shape: HeadShape,
}

impl HybridEncoder {
    /// Build the network from a weight source
    pub fn load(vb: VarBuilder, spec: &EncoderSpec, shape: HeadShape) -> Result<Self> {
        if shape.max_length > spec.max_position_embeddings {
            return Err(Error::encoder(format!(
                "max_length {} exceeds the encoder's {} positions",
                shape.max_length, spec.max_position_embeddings
            )));
        }

        let device = vb.device().clone();

        let distilbert = DistilBertModel::load(vb.pp("distilbert"), &spec.config)
            .map_err(|e| Error::encoder(format!("Failed to load DistilBERT model: {}", e)))?;

        let bilstm = BiLstm::load(vb.pp("lstm"), spec.dim, shape.hidden_dim)
            .map_err(|e| Error::encoder(format!("Failed to load BiLSTM layer: {}", e)))?;

        // index 0 of the trained `nn.Sequential` head is the dropout
        let classifier = candle_nn::linear(
            shape.hidden_dim * 2,
            shape.num_labels,
            vb.pp("classifier").pp("1"),
        )
        .map_err(|e| Error::encoder(format!("Failed to load classification head: {}", e)))?;

        info!(
            "Loaded hybrid encoder (dim={}, lstm_hidden={}, labels={}) on {}",
            spec.dim,
            shape.hidden_dim,
            shape.num_labels,
            device_label(&device)
        );

        Ok(Self {
            distilbert,
            bilstm,
            classifier,
            device,
            shape,
        })
    }

    fn forward(&self, input: &TokenizedInput) -> candle_core::Result<(Tensor, Tensor)> {
        let ids: Vec<i64> = input.input_ids().iter().map(|&id| id as i64).collect();
        let input_ids = Tensor::new(ids.as_slice(), &self.device)?.unsqueeze(0)?;

        // Candle's DistilBERT masks positions where the mask is 1
        let padding: Vec<u8> = input
            .attention_mask()
            .iter()
            .map(|&m| if m == 0 { 1u8 } else { 0u8 })
            .collect();
        let padding_mask = Tensor::new(padding.as_slice(), &self.device)?.unsqueeze(0)?;

        let sequence_output = self.distilbert.forward(&input_ids, &padding_mask)?;
        let final_state = self.bilstm.final_states(&sequence_output)?;
        let logits = self.classifier.forward(&final_state)?;

        Ok((final_state, logits))
    }
}

impl FeatureExtractor for HybridEncoder {
    fn extract(&self, input: &TokenizedInput) -> Result<(FeatureVector, Logits)> {
        if input.len() != self.shape.max_length {
            return Err(Error::internal(format!(
                "encoding has {} positions, extractor expects {}",
                input.len(),
                self.shape.max_length
            )));
        }

        let (final_state, logits) = self
            .forward(input)
            .map_err(|e| Error::encoder(format!("Model forward pass failed: {}", e)))?;

        let features: Vec<f32> = final_state
            .squeeze(0)
            .and_then(|t| t.to_vec1())
            .map_err(|e| Error::encoder(format!("Failed to read features: {}", e)))?;
        let logits: Vec<f32> = logits
            .squeeze(0)
            .and_then(|t| t.to_vec1())
            .map_err(|e| Error::encoder(format!("Failed to read logits: {}", e)))?;

        Ok((FeatureVector::new(features), Logits::new(logits)))
    }

    fn feature_dim(&self) -> usize {
        self.shape.hidden_dim * 2
    }

    fn num_labels(&self) -> usize {
        self.shape.num_labels
    }

    fn max_length(&self) -> usize {
        self.shape.max_length
    }

    fn device_label(&self) -> String {
        device_label(&self.device)
    }
}
