//! Loaded model artifacts shared by every request

use crate::assembler::FallbackDistribution;
use crate::config::HybridModelConfig;
use crate::encoder::{EncoderSpec, FeatureExtractor, HeadShape, HybridEncoder};
use crate::model_loader::{
    create_device, device_label, load_var_builder, resolve_encoder_files, EncoderFiles,
};
use crate::tokenizer::Preprocessor;
use crate::tree::{GradientBoostedTrees, TreeClassifier};
use candle_core::Device;
use metrics::counter;
use mindscan_core::{Error, LabelSet, ModelInfo, Result};
use tracing::{debug, info, warn};

/// Reported in [`ModelInfo::model_type`]
pub const MODEL_TYPE: &str = "DistilBERT-BiLSTM-XGBoost Hybrid";

/// Everything a prediction needs, loaded once and read-only afterwards.
///
/// A state always has a working preprocessor and feature extractor; the tree
/// classifier is optional and its absence is the degraded operating mode.
pub struct ModelState {
    preprocessor: Preprocessor,
    extractor: Box<dyn FeatureExtractor>,
    tree: Option<Box<dyn TreeClassifier>>,
    tree_error: Option<String>,
    labels: LabelSet,
    fallback: FallbackDistribution,
}

impl ModelState {
    /// Load all artifacts named by `config`.
    ///
    /// Fails if the tokenizer or encoder cannot be loaded. A missing or
    /// unusable tree model only puts the state into degraded mode.
    pub fn load(config: &HybridModelConfig) -> Result<Self> {
        config.validate()?;

        let fallback = FallbackDistribution::new(&config.labels, &config.fallback_scores)?;

        let device = create_device(config.inference.device.to_device_type())?;
        info!("Using device: {}", device_label(&device));

        let (preprocessor, extractor) = match load_encoder(config, &device) {
            Ok(loaded) => {
                record_load("encoder", "loaded");
                loaded
            }
            Err(e) => {
                record_load("encoder", "failed");
                return Err(e);
            }
        };

        let (tree, tree_error) = if !config.tree_classifier.enabled {
            info!("Tree classifier disabled by configuration; using logits");
            record_load("tree_classifier", "disabled");
            (None, Some("disabled by configuration".to_string()))
        } else {
            match load_tree(config, extractor.feature_dim()) {
                Ok(tree) => {
                    record_load("tree_classifier", "loaded");
                    (Some(Box::new(tree) as Box<dyn TreeClassifier>), None)
                }
                Err(e) => {
                    warn!("Tree classifier unavailable, running in degraded mode: {}", e);
                    record_load("tree_classifier", "failed");
                    (None, Some(e.to_string()))
                }
            }
        };

        let mut state = Self::from_parts(
            preprocessor,
            Box::new(extractor),
            tree,
            config.labels.clone(),
            fallback,
        )?;
        state.tree_error = tree_error;

        info!(
            "Model state ready (labels={:?}, tree_classifier={})",
            state.labels.as_slice(),
            if state.is_degraded() { "absent" } else { "loaded" }
        );

        Ok(state)
    }

    /// Assemble a state from already-built components
    pub fn from_parts(
        preprocessor: Preprocessor,
        extractor: Box<dyn FeatureExtractor>,
        tree: Option<Box<dyn TreeClassifier>>,
        labels: LabelSet,
        fallback: FallbackDistribution,
    ) -> Result<Self> {
        if preprocessor.max_length() != extractor.max_length() {
            return Err(Error::config(format!(
                "preprocessor produces {} positions but extractor expects {}",
                preprocessor.max_length(),
                extractor.max_length()
            )));
        }

        if extractor.num_labels() != labels.len() {
            return Err(Error::config(format!(
                "extractor produces {} logits for {} labels",
                extractor.num_labels(),
                labels.len()
            )));
        }

        if let Some(tree) = &tree {
            if tree.num_classes() != labels.len() {
                return Err(Error::config(format!(
                    "tree classifier produces {} classes for {} labels",
                    tree.num_classes(),
                    labels.len()
                )));
            }
        }

        let fallback_result = fallback.result();
        if fallback_result.confidence_scores.len() != labels.len()
            || labels.iter().any(|l| fallback_result.score_of(l).is_none())
        {
            return Err(Error::config(
                "fallback distribution does not cover the label set",
            ));
        }

        Ok(Self {
            preprocessor,
            extractor,
            tree,
            tree_error: None,
            labels,
            fallback,
        })
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub fn extractor(&self) -> &dyn FeatureExtractor {
        self.extractor.as_ref()
    }

    /// `None` in degraded mode
    pub fn tree_classifier(&self) -> Option<&dyn TreeClassifier> {
        self.tree.as_deref()
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn fallback(&self) -> &FallbackDistribution {
        &self.fallback
    }

    /// True when predictions come from logits because no tree model is loaded
    pub fn is_degraded(&self) -> bool {
        self.tree.is_none()
    }

    /// Status report for health checks
    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            model_type: MODEL_TYPE.to_string(),
            encoder_loaded: true,
            tree_classifier_loaded: self.tree.is_some(),
            labels: self.labels.as_slice().to_vec(),
            device: self.extractor.device_label(),
            tree_classifier_error: if self.tree.is_some() {
                None
            } else {
                Some(
                    self.tree_error
                        .clone()
                        .unwrap_or_else(|| "not loaded".to_string()),
                )
            },
        }
    }
}

fn record_load(artifact: &'static str, status: &'static str) {
    counter!("mindscan_model_load_total", "artifact" => artifact, "status" => status).increment(1);
}

fn load_encoder(
    config: &HybridModelConfig,
    device: &Device,
) -> Result<(Preprocessor, HybridEncoder)> {
    let weights_path = config.encoder_weights_path();
    if !weights_path.exists() {
        return Err(Error::encoder(format!(
            "Encoder weights not found at {}",
            weights_path.display()
        )));
    }

    let explicit_tokenizer = config.tokenizer_path().filter(|p| p.exists());
    let explicit_config = config.encoder_config_path().filter(|p| p.exists());

    let files = if explicit_tokenizer.is_some() && explicit_config.is_some() {
        debug!("Tokenizer and encoder config given explicitly, skipping encoder source");
        EncoderFiles::default()
    } else {
        match resolve_encoder_files(&config.encoder_source()) {
            Ok(files) => files,
            Err(e) if explicit_tokenizer.is_some() => {
                warn!("Encoder source unavailable, using configured tokenizer: {}", e);
                EncoderFiles::default()
            }
            Err(e) => return Err(e),
        }
    };

    let tokenizer_path = explicit_tokenizer
        .or(files.tokenizer)
        .ok_or_else(|| Error::tokenizer("No tokenizer available for the encoder"))?;
    let preprocessor = Preprocessor::from_path(&tokenizer_path, config.inference.max_length)?;
    info!(
        "Loaded tokenizer from {} (vocab size {})",
        tokenizer_path.display(),
        preprocessor.vocab_size()
    );

    let spec = match explicit_config.or(files.config) {
        Some(path) => EncoderSpec::from_file(&path)?,
        None => {
            info!("No encoder config.json found, using distilbert-base-uncased defaults");
            EncoderSpec::builtin()?
        }
    };

    info!("Loading encoder weights from {}", weights_path.display());
    let vb = load_var_builder(&weights_path, device)?;

    let encoder = HybridEncoder::load(
        vb,
        &spec,
        HeadShape {
            hidden_dim: config.inference.hidden_dim,
            num_labels: config.labels.len(),
            max_length: config.inference.max_length,
        },
    )?;

    Ok((preprocessor, encoder))
}

fn load_tree(config: &HybridModelConfig, feature_dim: usize) -> Result<GradientBoostedTrees> {
    let path = config.tree_classifier_path();
    let tree = GradientBoostedTrees::from_file(&path)?;

    if tree.num_classes() != config.labels.len() {
        return Err(Error::tree_model(format!(
            "model has {} classes but {} labels are configured",
            tree.num_classes(),
            config.labels.len()
        )));
    }

    if tree.num_features() > 0 && tree.num_features() != feature_dim {
        return Err(Error::tree_model(format!(
            "model expects {} features but the encoder produces {}",
            tree.num_features(),
            feature_dim
        )));
    }

    info!(
        "Loaded tree classifier from {} ({} trees)",
        path.display(),
        tree.num_trees()
    );

    Ok(tree)
}
