//! Configuration for the hybrid model and its artifacts

use crate::model_loader::DeviceType;
use mindscan_core::{Error, LabelSet, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Top-level configuration for loading and running the hybrid model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridModelConfig {
    /// Directory that relative artifact paths resolve against
    #[serde(default)]
    pub base_dir: Option<PathBuf>,

    /// Transformer encoder and recurrent layer artifacts
    #[serde(default)]
    pub encoder: EncoderConfig,

    /// Gradient-boosted tree artifact
    #[serde(default)]
    pub tree_classifier: TreeClassifierConfig,

    /// Inference settings
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Category labels in canonical order
    #[serde(default)]
    pub labels: LabelSet,

    /// Static distribution returned when inference fails, aligned with `labels`
    #[serde(default = "default_fallback_scores")]
    pub fallback_scores: Vec<f32>,
}

/// Encoder artifact configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Weights of the encoder, recurrent layer and classifier head
    #[serde(default = "default_encoder_weights")]
    pub weights: PathBuf,

    /// Where the encoder's `config.json` and tokenizer come from
    #[serde(default)]
    pub source: EncoderSourceSpec,

    /// Explicit tokenizer file or directory, overriding the source's tokenizer
    #[serde(default)]
    pub tokenizer: Option<PathBuf>,

    /// Explicit DistilBERT `config.json`, overriding the source's config
    #[serde(default)]
    pub config: Option<PathBuf>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            weights: default_encoder_weights(),
            source: EncoderSourceSpec::default(),
            tokenizer: None,
            config: None,
        }
    }
}

/// Encoder source specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EncoderSourceSpec {
    /// Directory on the local filesystem
    Local { path: PathBuf },

    /// Hugging Face Hub repository
    HuggingFace {
        #[serde(default = "default_encoder_repo")]
        repo: String,
        #[serde(default = "default_revision")]
        revision: String,
    },
}

impl Default for EncoderSourceSpec {
    fn default() -> Self {
        Self::HuggingFace {
            repo: default_encoder_repo(),
            revision: default_revision(),
        }
    }
}

/// Tree classifier artifact configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeClassifierConfig {
    /// XGBoost JSON model file
    #[serde(default = "default_tree_path")]
    pub path: PathBuf,

    /// Skip loading entirely and always use the logits path
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for TreeClassifierConfig {
    fn default() -> Self {
        Self {
            path: default_tree_path(),
            enabled: true,
        }
    }
}

/// Inference configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Device to run the encoder on
    #[serde(default)]
    pub device: DeviceSpec,

    /// Fixed token sequence length
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Hidden width of each LSTM direction
    #[serde(default = "default_hidden_dim")]
    pub hidden_dim: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            device: DeviceSpec::default(),
            max_length: default_max_length(),
            hidden_dim: default_hidden_dim(),
        }
    }
}

/// Device specification, written as `auto`, `cpu`, `cuda[:N]` or `metal[:N]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceSpec {
    /// Best available accelerator, falling back to CPU
    #[default]
    Auto,
    Cpu,
    Cuda { index: usize },
    Metal { index: usize },
}

impl DeviceSpec {
    /// Convert to DeviceType
    pub fn to_device_type(&self) -> DeviceType {
        match self {
            DeviceSpec::Auto => DeviceType::Auto,
            DeviceSpec::Cpu => DeviceType::Cpu,
            DeviceSpec::Cuda { index } => DeviceType::Cuda(*index),
            DeviceSpec::Metal { index } => DeviceType::Metal(*index),
        }
    }
}

impl FromStr for DeviceSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_lowercase();
        let (kind, index) = match lowered.split_once(':') {
            Some((kind, idx)) => {
                let idx = idx.parse::<usize>().map_err(|_| {
                    Error::config(format!("invalid device index in '{}'", s))
                })?;
                (kind.to_string(), Some(idx))
            }
            None => (lowered, None),
        };

        match (kind.as_str(), index) {
            ("auto", None) => Ok(Self::Auto),
            ("cpu", None) => Ok(Self::Cpu),
            ("cuda", idx) | ("gpu", idx) => Ok(Self::Cuda {
                index: idx.unwrap_or(0),
            }),
            ("metal", idx) | ("mps", idx) => Ok(Self::Metal {
                index: idx.unwrap_or(0),
            }),
            _ => Err(Error::config(format!("unknown device '{}'", s))),
        }
    }
}

impl TryFrom<String> for DeviceSpec {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DeviceSpec> for String {
    fn from(spec: DeviceSpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Auto => write!(f, "auto"),
            DeviceSpec::Cpu => write!(f, "cpu"),
            DeviceSpec::Cuda { index } => write!(f, "cuda:{}", index),
            DeviceSpec::Metal { index } => write!(f, "metal:{}", index),
        }
    }
}

fn default_encoder_weights() -> PathBuf {
    PathBuf::from("models/hybrid_model.pth")
}

fn default_tree_path() -> PathBuf {
    PathBuf::from("models/xgboost_classifier.json")
}

fn default_encoder_repo() -> String {
    "distilbert-base-uncased".to_string()
}

fn default_revision() -> String {
    "main".to_string()
}

fn default_max_length() -> usize {
    256
}

fn default_hidden_dim() -> usize {
    256
}

fn default_true() -> bool {
    true
}

fn default_fallback_scores() -> Vec<f32> {
    vec![0.4, 0.3, 0.3]
}

impl Default for HybridModelConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            encoder: EncoderConfig::default(),
            tree_classifier: TreeClassifierConfig::default(),
            inference: InferenceConfig::default(),
            labels: LabelSet::default(),
            fallback_scores: default_fallback_scores(),
        }
    }
}

impl HybridModelConfig {
    /// Load from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("Failed to parse model config: {}", e)))
    }

    /// Load from file; relative paths then resolve against the file's directory
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let mut config = Self::from_yaml(&content)?;

        let config_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        config.base_dir = Some(match config.base_dir.take() {
            Some(dir) if dir.is_relative() => config_dir.join(dir),
            Some(dir) => dir,
            None => config_dir,
        });

        Ok(config)
    }

    /// Check invariants the pipeline relies on
    pub fn validate(&self) -> Result<()> {
        if self.inference.max_length < 2 {
            return Err(Error::config(format!(
                "max_length must leave room for boundary markers, got {}",
                self.inference.max_length
            )));
        }

        if self.inference.hidden_dim == 0 {
            return Err(Error::config("hidden_dim must be positive"));
        }

        if self.fallback_scores.len() != self.labels.len() {
            return Err(Error::config(format!(
                "fallback_scores has {} entries for {} labels",
                self.fallback_scores.len(),
                self.labels.len()
            )));
        }

        if self
            .fallback_scores
            .iter()
            .any(|s| !s.is_finite() || *s < 0.0)
        {
            return Err(Error::config("fallback_scores must be non-negative"));
        }

        let sum: f32 = self.fallback_scores.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(Error::config(format!(
                "fallback_scores must sum to 1, got {}",
                sum
            )));
        }

        Ok(())
    }

    /// Directory relative paths resolve against
    pub fn base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Resolve an artifact path: `~/` expands to the home directory, absolute
    /// paths are kept, anything else is joined onto the base directory
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if let Ok(rest) = path.strip_prefix("~") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir().join(path)
        }
    }

    pub fn encoder_weights_path(&self) -> PathBuf {
        self.resolve_path(&self.encoder.weights)
    }

    pub fn tree_classifier_path(&self) -> PathBuf {
        self.resolve_path(&self.tree_classifier.path)
    }

    pub fn tokenizer_path(&self) -> Option<PathBuf> {
        self.encoder
            .tokenizer
            .as_deref()
            .map(|p| self.resolve_path(p))
    }

    pub fn encoder_config_path(&self) -> Option<PathBuf> {
        self.encoder.config.as_deref().map(|p| self.resolve_path(p))
    }

    /// Encoder source with local paths resolved
    pub fn encoder_source(&self) -> EncoderSourceSpec {
        match &self.encoder.source {
            EncoderSourceSpec::Local { path } => EncoderSourceSpec::Local {
                path: self.resolve_path(path),
            },
            other => other.clone(),
        }
    }
}
