//! End-to-end pipeline tests
//!
//! Builds a tiny randomly initialized encoder, saves it as SafeTensors next
//! to a WordPiece vocabulary and an XGBoost JSON ensemble, and loads the lot
//! through `ModelState::load` exactly as a deployment would.

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use mindscan_classifiers::prelude::*;
use mindscan_classifiers::{
    EncoderSourceSpec, EncoderSpec, FallbackDistribution, HeadShape, HybridEncoder, Preprocessor,
    ScoreSource,
};
use mindscan_core::{Error, ModelInfo, REFERENCE_LABELS};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

const TEXT: &str = "I feel very anxious and worried about everything.";

const VOCAB: &str = "[PAD]\n[UNK]\n[CLS]\n[SEP]\n[MASK]\ni\nfeel\nvery\nanxious\nand\nworried\nabout\neverything\nsad\nhappy\n.\n";

const ENCODER_CONFIG: &str = r#"{
    "activation": "gelu",
    "dim": 8,
    "hidden_dim": 16,
    "initializer_range": 0.02,
    "max_position_embeddings": 32,
    "model_type": "distilbert",
    "n_heads": 2,
    "n_layers": 1,
    "pad_token_id": 0,
    "vocab_size": 16
}"#;

const MAX_LENGTH: usize = 16;
const LSTM_HIDDEN: usize = 4;

const CONFIG_YAML: &str = r#"
encoder:
  weights: hybrid_model.safetensors
  source:
    type: local
    path: encoder
tree_classifier:
  path: xgboost_classifier.json
inference:
  device: cpu
  max_length: 16
  hidden_dim: 4
"#;

/// One stump per class, each splitting on a different feature
fn tree_model_json(num_class: usize, num_feature: usize) -> String {
    let trees: Vec<_> = (0..num_class)
        .map(|class| {
            json!({
                "id": class,
                "left_children": [1, -1, -1],
                "right_children": [2, -1, -1],
                "split_indices": [class % num_feature, 0, 0],
                "split_conditions": [0.0, 0.2 * class as f64, -0.1 * class as f64],
                "default_left": [1, 0, 0]
            })
        })
        .collect();

    json!({
        "learner": {
            "gradient_booster": {
                "name": "gbtree",
                "model": {
                    "tree_info": (0..num_class).collect::<Vec<_>>(),
                    "trees": trees
                }
            },
            "learner_model_param": {
                "base_score": "5E-1",
                "num_class": num_class.to_string(),
                "num_feature": num_feature.to_string()
            },
            "objective": {"name": "multi:softprob"}
        },
        "version": [2, 0, 3]
    })
    .to_string()
}

/// Write encoder weights, tokenizer and config into `dir`; returns the config path
fn write_artifacts(dir: &Path, with_tree: bool) -> std::path::PathBuf {
    let encoder_dir = dir.join("encoder");
    std::fs::create_dir_all(&encoder_dir).unwrap();
    std::fs::write(encoder_dir.join("vocab.txt"), VOCAB).unwrap();
    std::fs::write(encoder_dir.join("config.json"), ENCODER_CONFIG).unwrap();

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let spec = EncoderSpec::from_json(ENCODER_CONFIG).unwrap();
    HybridEncoder::load(
        vb,
        &spec,
        HeadShape {
            hidden_dim: LSTM_HIDDEN,
            num_labels: 3,
            max_length: MAX_LENGTH,
        },
    )
    .unwrap();
    varmap.save(dir.join("hybrid_model.safetensors")).unwrap();

    if with_tree {
        std::fs::write(
            dir.join("xgboost_classifier.json"),
            tree_model_json(3, LSTM_HIDDEN * 2),
        )
        .unwrap();
    }

    let config_path = dir.join("mindscan.yaml");
    std::fs::write(&config_path, CONFIG_YAML).unwrap();
    config_path
}

/// Route library logs through the test harness; `RUST_LOG` overrides the filter
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mindscan_classifiers=debug")),
        )
        .with_test_writer()
        .try_init();
}

fn load_state(dir: &Path, with_tree: bool) -> ModelState {
    init_tracing();
    let config_path = write_artifacts(dir, with_tree);
    let config = HybridModelConfig::from_file(&config_path).unwrap();
    ModelState::load(&config).unwrap()
}

fn assert_well_formed(result: &PredictionResult) {
    assert_eq!(result.confidence_scores.len(), REFERENCE_LABELS.len());
    for label in REFERENCE_LABELS {
        assert_eq!(
            result
                .confidence_scores
                .iter()
                .filter(|s| s.label == label)
                .count(),
            1,
            "label {} must appear exactly once",
            label
        );
    }
    for pair in result.confidence_scores.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert_eq!(result.top_label, result.confidence_scores[0].label);

    let sum: f32 = result.confidence_scores.iter().map(|s| s.score).sum();
    assert!((sum - 1.0).abs() < 1e-4, "scores sum to {}", sum);
}

#[test]
fn test_classifier_loaded_prediction() {
    let dir = tempfile::tempdir().unwrap();
    let state = load_state(dir.path(), true);

    let info = state.model_info();
    assert!(info.encoder_loaded);
    assert!(info.tree_classifier_loaded);
    assert_eq!(info.device, "cpu");
    assert_eq!(info.labels, REFERENCE_LABELS.to_vec());

    let outcome = predict_outcome(&state, TEXT);
    assert_eq!(outcome.source(), Some(ScoreSource::TreeEnsemble));

    let result = outcome.into_result();
    assert!(REFERENCE_LABELS.contains(&result.top_label.as_str()));
    assert_well_formed(&result);

    let json = serde_json::to_value(&result).unwrap();
    assert!(json["topPattern"].is_string());
    assert_eq!(json["confidenceScores"].as_array().unwrap().len(), 3);
}

#[test]
fn test_absent_classifier_uses_logits() {
    let dir = tempfile::tempdir().unwrap();
    let state = load_state(dir.path(), false);

    let info = state.model_info();
    assert!(!info.tree_classifier_loaded);
    assert!(info.tree_classifier_error.is_some());
    assert!(state.is_degraded());

    let first = predict_outcome(&state, TEXT);
    assert_eq!(first.source(), Some(ScoreSource::Logits));
    assert_well_formed(first.result());

    // logits path is deterministic
    for _ in 0..3 {
        assert_eq!(predict_outcome(&state, TEXT), first);
    }
}

#[test]
fn test_corrupt_classifier_is_degraded_not_fatal() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_artifacts(dir.path(), false);
    std::fs::write(dir.path().join("xgboost_classifier.json"), "{not json").unwrap();

    let config = HybridModelConfig::from_file(&config_path).unwrap();
    let state = ModelState::load(&config).unwrap();
    assert!(!state.model_info().tree_classifier_loaded);
    assert!(!predict_outcome(&state, TEXT).is_fallback());
}

#[test]
fn test_classifier_with_wrong_class_count_is_degraded() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_artifacts(dir.path(), false);
    std::fs::write(
        dir.path().join("xgboost_classifier.json"),
        tree_model_json(4, LSTM_HIDDEN * 2),
    )
    .unwrap();

    let config = HybridModelConfig::from_file(&config_path).unwrap();
    let state = ModelState::load(&config).unwrap();
    let info = state.model_info();
    assert!(!info.tree_classifier_loaded);
    assert!(info.tree_classifier_error.unwrap().contains("classes"));
}

#[test]
fn test_disabled_classifier_is_not_loaded() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_artifacts(dir.path(), true);

    let mut config = HybridModelConfig::from_file(&config_path).unwrap();
    config.tree_classifier.enabled = false;

    let state = ModelState::load(&config).unwrap();
    let info: ModelInfo = state.model_info();
    assert!(!info.tree_classifier_loaded);
    assert_eq!(
        info.tree_classifier_error.as_deref(),
        Some("disabled by configuration")
    );
}

struct BrokenExtractor;

impl FeatureExtractor for BrokenExtractor {
    fn extract(&self, _input: &TokenizedInput) -> Result<(FeatureVector, Logits)> {
        Err(Error::encoder("tensor shape mismatch"))
    }

    fn feature_dim(&self) -> usize {
        LSTM_HIDDEN * 2
    }

    fn num_labels(&self) -> usize {
        3
    }

    fn max_length(&self) -> usize {
        MAX_LENGTH
    }

    fn device_label(&self) -> String {
        "cpu".to_string()
    }
}

#[test]
fn test_extraction_failure_returns_static_fallback() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("vocab.txt"), VOCAB).unwrap();
    let preprocessor = Preprocessor::from_path(dir.path(), MAX_LENGTH).unwrap();

    let state = ModelState::from_parts(
        preprocessor,
        Box::new(BrokenExtractor),
        None,
        LabelSet::reference(),
        FallbackDistribution::reference(),
    )
    .unwrap();

    let outcome = predict_outcome(&state, TEXT);
    assert!(outcome.is_fallback());

    let result = predict(&state, TEXT);
    assert_eq!(result.top_label, "Anxiety");
    let scores: Vec<(&str, f32)> = result
        .confidence_scores
        .iter()
        .map(|s| (s.label.as_str(), s.score))
        .collect();
    assert_eq!(
        scores,
        vec![("Anxiety", 0.4), ("Bipolar", 0.3), ("Depression", 0.3)]
    );
}

#[test]
fn test_missing_encoder_is_fatal() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_artifacts(dir.path(), true);
    std::fs::remove_file(dir.path().join("hybrid_model.safetensors")).unwrap();

    let config = HybridModelConfig::from_file(&config_path).unwrap();
    let err = ModelState::load(&config).err().expect("load must fail");
    assert!(matches!(err, Error::Encoder(_)));
}

#[test]
fn test_missing_tokenizer_is_fatal() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_artifacts(dir.path(), true);
    std::fs::remove_file(dir.path().join("encoder/vocab.txt")).unwrap();

    let config = HybridModelConfig::from_file(&config_path).unwrap();
    assert!(matches!(
        ModelState::load(&config),
        Err(Error::Tokenizer(_))
    ));
}

const OFFLINE_CONFIG_YAML: &str = r#"
encoder:
  weights: hybrid_model.safetensors
  source:
    type: huggingface
    repo: mindscan-tests/unpublished-encoder
  tokenizer: encoder/vocab.txt
  config: encoder/config.json
tree_classifier:
  path: xgboost_classifier.json
inference:
  device: cpu
  max_length: 16
  hidden_dim: 4
"#;

#[test]
fn test_explicit_files_load_without_reaching_source() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    write_artifacts(dir.path(), true);
    let config_path = dir.path().join("offline.yaml");
    std::fs::write(&config_path, OFFLINE_CONFIG_YAML).unwrap();

    let config = HybridModelConfig::from_file(&config_path).unwrap();
    let state = ModelState::load(&config).unwrap();
    assert!(state.model_info().tree_classifier_loaded);
    assert_eq!(state.preprocessor().vocab_size(), 16);

    let outcome = predict_outcome(&state, TEXT);
    assert_eq!(outcome.source(), Some(ScoreSource::TreeEnsemble));
    assert_well_formed(outcome.result());
}

#[test]
fn test_unavailable_source_falls_back_to_explicit_tokenizer() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_artifacts(dir.path(), true);

    let mut config = HybridModelConfig::from_file(&config_path).unwrap();
    config.encoder.source = EncoderSourceSpec::Local {
        path: "no-such-encoder-dir".into(),
    };

    let err = ModelState::load(&config).err().expect("load must fail");
    assert!(err.to_string().contains("does not exist"), "{}", err);

    // With a tokenizer at hand the missing source only costs the encoder
    // config; the built-in distilbert-base shapes then reject the tiny weights.
    config.encoder.tokenizer = Some("encoder/vocab.txt".into());
    let err = ModelState::load(&config).err().expect("load must fail");
    assert!(matches!(err, Error::Encoder(_)), "{}", err);
    assert!(!err.to_string().contains("does not exist"), "{}", err);
}

#[test]
fn test_max_length_must_fit_encoder() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_artifacts(dir.path(), true);

    let mut config = HybridModelConfig::from_file(&config_path).unwrap();
    config.inference.max_length = 64;
    assert!(ModelState::load(&config).is_err());
}

#[test]
fn test_shared_state_gives_identical_results_across_threads() {
    let dir = tempfile::tempdir().unwrap();
    let state = Arc::new(load_state(dir.path(), true));
    let expected = predict(&state, TEXT);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let state = Arc::clone(&state);
            std::thread::spawn(move || predict(&state, TEXT))
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

#[test]
fn test_boundary_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let state = load_state(dir.path(), true);

    let long = "i feel very sad and worried about everything. ".repeat(200);
    for text in ["i", "?", long.as_str()] {
        let outcome = predict_outcome(&state, text);
        assert!(!outcome.is_fallback(), "fallback for input {:?}", text);
        assert_well_formed(outcome.result());
    }
}
