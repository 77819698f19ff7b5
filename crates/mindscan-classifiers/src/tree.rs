//! Gradient-boosted tree classifier over encoder features
//!
//! Reads the JSON model format written by XGBoost's `save_model("*.json")`
//! and scores it natively. Only numerical splits of a `gbtree` booster are
//! supported, which is what `XGBClassifier` produces for dense features.
//!
//! Scoring rules:
//! - a node goes left when `feature < split_condition`, or when the feature
//!   is missing (NaN) and `default_left` is set
//! - a leaf's value is stored in `split_conditions`
//! - tree `i` contributes to the margin of class `tree_info[i]`

use crate::assembler::softmax;
use mindscan_core::{ClassProbabilities, Error, FeatureVector, Result};
use serde::Deserialize;
use std::path::Path;

/// Maps a feature vector to per-category probabilities
pub trait TreeClassifier: Send + Sync {
    fn classify(&self, features: &FeatureVector) -> Result<ClassProbabilities>;

    /// Number of categories produced
    fn num_classes(&self) -> usize;
}

/// How per-class margins become probabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    /// `multi:softprob` / `multi:softmax`
    Softmax,
    /// `binary:logistic`, reported as `[1 - p, p]`
    Logistic,
}

impl Objective {
    fn from_name(name: &str) -> Result<Self> {
        match name {
            "multi:softprob" | "multi:softmax" => Ok(Self::Softmax),
            "binary:logistic" => Ok(Self::Logistic),
            other => Err(Error::tree_model(format!(
                "Unsupported objective '{}'",
                other
            ))),
        }
    }
}

/// One regression tree in flattened array form
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionTree {
    left: Vec<i32>,
    right: Vec<i32>,
    feature: Vec<u32>,
    threshold: Vec<f32>,
    default_left: Vec<bool>,
}

impl RegressionTree {
    /// Build a tree from parallel node arrays; a left child of -1 marks a leaf
    pub fn new(
        left: Vec<i32>,
        right: Vec<i32>,
        feature: Vec<u32>,
        threshold: Vec<f32>,
        default_left: Vec<bool>,
    ) -> Result<Self> {
        let n = left.len();
        if n == 0 {
            return Err(Error::tree_model("tree has no nodes"));
        }
        if [right.len(), feature.len(), threshold.len(), default_left.len()]
            .iter()
            .any(|&len| len != n)
        {
            return Err(Error::tree_model("tree node arrays differ in length"));
        }

        for idx in 0..n {
            if left[idx] == -1 {
                continue;
            }
            for child in [left[idx], right[idx]] {
                // children always follow their parent, which rules out cycles
                if child <= idx as i32 || child as usize >= n {
                    return Err(Error::tree_model(format!(
                        "node {} has invalid child {}",
                        idx, child
                    )));
                }
            }
        }

        Ok(Self {
            left,
            right,
            feature,
            threshold,
            default_left,
        })
    }

    /// Leaf value reached by `features`
    pub fn predict(&self, features: &[f32]) -> Result<f32> {
        let mut node = 0usize;
        loop {
            if self.left[node] == -1 {
                return Ok(self.threshold[node]);
            }

            let split = self.feature[node] as usize;
            let value = *features.get(split).ok_or_else(|| {
                Error::tree_model(format!(
                    "split on feature {} but only {} features given",
                    split,
                    features.len()
                ))
            })?;

            let go_left = if value.is_nan() {
                self.default_left[node]
            } else {
                value < self.threshold[node]
            };

            node = if go_left {
                self.left[node]
            } else {
                self.right[node]
            } as usize;
        }
    }

    /// Largest feature index used by a split
    fn max_feature(&self) -> Option<u32> {
        self.left
            .iter()
            .zip(self.feature.iter())
            .filter(|(&l, _)| l != -1)
            .map(|(_, &f)| f)
            .max()
    }
}

/// Boosted ensemble of regression trees
#[derive(Debug, Clone)]
pub struct GradientBoostedTrees {
    trees: Vec<RegressionTree>,
    tree_class: Vec<usize>,
    num_groups: usize,
    base_margin: Vec<f32>,
    num_features: usize,
    objective: Objective,
}

impl GradientBoostedTrees {
    /// Assemble an ensemble; `tree_class[i]` is the output group of tree `i`
    pub fn new(
        trees: Vec<RegressionTree>,
        tree_class: Vec<usize>,
        base_margin: Vec<f32>,
        num_features: usize,
        objective: Objective,
    ) -> Result<Self> {
        let num_groups = match objective {
            Objective::Logistic => 1,
            Objective::Softmax => base_margin.len(),
        };

        if base_margin.len() != num_groups || num_groups == 0 {
            return Err(Error::tree_model(format!(
                "expected {} base margins, got {}",
                num_groups,
                base_margin.len()
            )));
        }
        if trees.len() != tree_class.len() {
            return Err(Error::tree_model(format!(
                "{} trees but {} tree_info entries",
                trees.len(),
                tree_class.len()
            )));
        }
        if let Some(bad) = tree_class.iter().find(|&&c| c >= num_groups) {
            return Err(Error::tree_model(format!(
                "tree assigned to class {} of {}",
                bad, num_groups
            )));
        }
        if let Some(max) = trees.iter().filter_map(RegressionTree::max_feature).max() {
            if num_features > 0 && max as usize >= num_features {
                return Err(Error::tree_model(format!(
                    "split on feature {} exceeds num_feature {}",
                    max, num_features
                )));
            }
        }

        Ok(Self {
            trees,
            tree_class,
            num_groups,
            base_margin,
            num_features,
            objective,
        })
    }

    /// Parse an XGBoost JSON model document
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: XgbDocument = serde_json::from_str(json)
            .map_err(|e| Error::tree_model(format!("Failed to parse XGBoost model: {}", e)))?;
        doc.into_ensemble()
    }

    /// Load an XGBoost JSON model file
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::tree_model(format!(
                "Tree model not found at {}",
                path.display()
            )));
        }
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Raw per-group margins
    pub fn margins(&self, features: &[f32]) -> Result<Vec<f32>> {
        if self.num_features > 0 && features.len() != self.num_features {
            return Err(Error::tree_model(format!(
                "model expects {} features, got {}",
                self.num_features,
                features.len()
            )));
        }

        let mut margins = self.base_margin.clone();
        for (tree, &class) in self.trees.iter().zip(self.tree_class.iter()) {
            margins[class] += tree.predict(features)?;
        }
        Ok(margins)
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }
}

impl TreeClassifier for GradientBoostedTrees {
    fn classify(&self, features: &FeatureVector) -> Result<ClassProbabilities> {
        let margins = self.margins(features.as_slice())?;

        let probs = match self.objective {
            Objective::Softmax => softmax(&margins),
            Objective::Logistic => {
                let p = sigmoid(margins[0]);
                vec![1.0 - p, p]
            }
        };

        Ok(ClassProbabilities::new(probs))
    }

    fn num_classes(&self) -> usize {
        match self.objective {
            Objective::Softmax => self.num_groups,
            Objective::Logistic => 2,
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn logit(p: f32) -> f32 {
    (p / (1.0 - p)).ln()
}

// --- XGBoost JSON document -------------------------------------------------

#[derive(Deserialize)]
struct XgbDocument {
    learner: XgbLearner,
}

#[derive(Deserialize)]
struct XgbLearner {
    gradient_booster: XgbBooster,
    learner_model_param: XgbModelParam,
    objective: XgbObjective,
}

#[derive(Deserialize)]
struct XgbBooster {
    name: String,
    #[serde(default)]
    model: Option<XgbTreeModel>,
}

#[derive(Deserialize)]
struct XgbTreeModel {
    trees: Vec<XgbTree>,
    tree_info: Vec<i64>,
}

#[derive(Deserialize)]
struct XgbTree {
    left_children: Vec<i32>,
    right_children: Vec<i32>,
    split_indices: Vec<u32>,
    split_conditions: Vec<f32>,
    default_left: Vec<XgbFlag>,
    /// 0 numerical, 1 categorical; absent before XGBoost 1.6
    #[serde(default)]
    split_type: Vec<u8>,
}

/// `default_left` is written as 0/1 by some versions and as booleans by others
#[derive(Deserialize)]
#[serde(untagged)]
enum XgbFlag {
    Bool(bool),
    Int(i64),
}

impl XgbFlag {
    fn as_bool(&self) -> bool {
        match self {
            XgbFlag::Bool(b) => *b,
            XgbFlag::Int(i) => *i != 0,
        }
    }
}

#[derive(Deserialize)]
struct XgbModelParam {
    #[serde(default)]
    base_score: Option<String>,
    #[serde(default)]
    num_class: Option<String>,
    #[serde(default)]
    num_feature: Option<String>,
}

#[derive(Deserialize)]
struct XgbObjective {
    name: String,
}

impl XgbDocument {
    fn into_ensemble(self) -> Result<GradientBoostedTrees> {
        let learner = self.learner;

        if learner.gradient_booster.name != "gbtree" {
            return Err(Error::tree_model(format!(
                "Unsupported booster '{}', expected gbtree",
                learner.gradient_booster.name
            )));
        }
        let model = learner
            .gradient_booster
            .model
            .ok_or_else(|| Error::tree_model("gbtree booster has no model"))?;

        let objective = Objective::from_name(&learner.objective.name)?;
        let params = learner.learner_model_param;

        let num_class = parse_count(params.num_class.as_deref(), "num_class")?;
        let num_features = parse_count(params.num_feature.as_deref(), "num_feature")?;
        let base_scores = parse_base_score(params.base_score.as_deref())?;

        let base_margin = match objective {
            Objective::Softmax => {
                if num_class < 2 {
                    return Err(Error::tree_model(format!(
                        "softmax objective with num_class {}",
                        num_class
                    )));
                }
                match base_scores.len() {
                    1 => vec![base_scores[0]; num_class],
                    n if n == num_class => base_scores,
                    n => {
                        return Err(Error::tree_model(format!(
                            "{} base scores for {} classes",
                            n, num_class
                        )))
                    }
                }
            }
            Objective::Logistic => {
                let p = base_scores[0];
                if !(p > 0.0 && p < 1.0) {
                    return Err(Error::tree_model(format!(
                        "logistic base_score {} outside (0, 1)",
                        p
                    )));
                }
                vec![logit(p)]
            }
        };

        let tree_class = model
            .tree_info
            .iter()
            .map(|&c| {
                usize::try_from(c)
                    .map_err(|_| Error::tree_model(format!("negative tree_info entry {}", c)))
            })
            .collect::<Result<Vec<_>>>()?;

        let trees = model
            .trees
            .into_iter()
            .enumerate()
            .map(|(i, t)| {
                if t.split_type.iter().any(|&kind| kind != 0) {
                    return Err(Error::tree_model(format!(
                        "tree {} uses categorical splits, which are not supported",
                        i
                    )));
                }
                RegressionTree::new(
                    t.left_children,
                    t.right_children,
                    t.split_indices,
                    t.split_conditions,
                    t.default_left.iter().map(XgbFlag::as_bool).collect(),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        GradientBoostedTrees::new(trees, tree_class, base_margin, num_features, objective)
    }
}

fn parse_count(value: Option<&str>, field: &str) -> Result<usize> {
    match value {
        None => Ok(0),
        Some(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| *v >= 0.0 && v.fract() == 0.0)
            .map(|v| v as usize)
            .ok_or_else(|| Error::tree_model(format!("invalid {} '{}'", field, s))),
    }
}

/// `"5E-1"` or, for vector-leaf models, `"[5E-1,5E-1,5E-1]"`
fn parse_base_score(value: Option<&str>) -> Result<Vec<f32>> {
    let raw = match value {
        None => return Ok(vec![0.5]),
        Some(s) => s.trim(),
    };

    let inner = raw
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(raw);

    let scores = inner
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|_| Error::tree_model(format!("invalid base_score '{}'", raw)))
        })
        .collect::<Result<Vec<_>>>()?;

    if scores.is_empty() {
        return Err(Error::tree_model("empty base_score"));
    }
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Three classes over two features, one stump per class
    const THREE_CLASS_MODEL: &str = r#"{
      "learner": {
        "attributes": {},
        "feature_names": [],
        "feature_types": [],
        "gradient_booster": {
          "model": {
            "gbtree_model_param": {"num_parallel_tree": "1", "num_trees": "3"},
            "iteration_indptr": [0, 3],
            "tree_info": [0, 1, 2],
            "trees": [
              {"id": 0, "left_children": [1, -1, -1], "right_children": [2, -1, -1],
               "split_indices": [0, 0, 0], "split_conditions": [0.5, 2.0, -1.0],
               "default_left": [1, 0, 0], "base_weights": [0.0, 2.0, -1.0]},
              {"id": 1, "left_children": [1, -1, -1], "right_children": [2, -1, -1],
               "split_indices": [1, 0, 0], "split_conditions": [0.0, -1.0, 1.0],
               "default_left": [0, 0, 0], "base_weights": [0.0, -1.0, 1.0]},
              {"id": 2, "left_children": [-1], "right_children": [-1],
               "split_indices": [0], "split_conditions": [0.25],
               "default_left": [false], "base_weights": [0.25]}
            ]
          },
          "name": "gbtree"
        },
        "learner_model_param": {"base_score": "5E-1", "num_class": "3", "num_feature": "2", "num_target": "1"},
        "objective": {"name": "multi:softprob", "softmax_multiclass_param": {"num_class": "3"}}
      },
      "version": [2, 0, 3]
    }"#;

    #[test]
    fn test_three_class_scoring() {
        let model = GradientBoostedTrees::from_json(THREE_CLASS_MODEL).unwrap();
        assert_eq!(model.num_trees(), 3);
        assert_eq!(model.num_classes(), 3);
        assert_eq!(model.num_features(), 2);

        // f0 = 0.1 < 0.5 -> 2.0; f1 = 1.0 >= 0.0 -> 1.0; constant 0.25
        let margins = model.margins(&[0.1, 1.0]).unwrap();
        assert_eq!(margins, vec![2.5, 1.5, 0.75]);

        let probs = model
            .classify(&FeatureVector::new(vec![0.1, 1.0]))
            .unwrap();
        probs.validate(3).unwrap();
        let expected = softmax(&[2.5, 1.5, 0.75]);
        for (p, e) in probs.as_slice().iter().zip(expected.iter()) {
            assert!((p - e).abs() < 1e-6);
        }
    }

    #[test]
    fn test_missing_value_follows_default_direction() {
        let model = GradientBoostedTrees::from_json(THREE_CLASS_MODEL).unwrap();

        // f0 NaN -> default left (2.0); f1 NaN -> default right (1.0)
        let margins = model.margins(&[f32::NAN, f32::NAN]).unwrap();
        assert_eq!(margins, vec![2.5, 1.5, 0.75]);
    }

    #[test]
    fn test_feature_count_mismatch_is_error() {
        let model = GradientBoostedTrees::from_json(THREE_CLASS_MODEL).unwrap();
        assert!(model.classify(&FeatureVector::new(vec![0.1])).is_err());
        assert!(model
            .classify(&FeatureVector::new(vec![0.1, 0.2, 0.3]))
            .is_err());
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let model = GradientBoostedTrees::from_json(THREE_CLASS_MODEL).unwrap();
        let features = FeatureVector::new(vec![0.7, -0.2]);
        let first = model.classify(&features).unwrap();
        for _ in 0..50 {
            assert_eq!(model.classify(&features).unwrap(), first);
        }
    }

    #[test]
    fn test_binary_logistic() {
        let json = r#"{"learner": {
            "gradient_booster": {"name": "gbtree", "model": {
                "tree_info": [0],
                "trees": [{"left_children": [-1], "right_children": [-1],
                           "split_indices": [0], "split_conditions": [0.0],
                           "default_left": [0]}]}},
            "learner_model_param": {"base_score": "5E-1", "num_class": "0", "num_feature": "1"},
            "objective": {"name": "binary:logistic"}}}"#;

        let model = GradientBoostedTrees::from_json(json).unwrap();
        assert_eq!(model.num_classes(), 2);
        let probs = model.classify(&FeatureVector::new(vec![3.0])).unwrap();
        assert!((probs.as_slice()[0] - 0.5).abs() < 1e-6);
        assert!((probs.as_slice()[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_vector_base_score() {
        assert_eq!(
            parse_base_score(Some("[5E-1,2.5E-1,0]")).unwrap(),
            vec![0.5, 0.25, 0.0]
        );
        assert_eq!(parse_base_score(Some("5E-1")).unwrap(), vec![0.5]);
        assert!(parse_base_score(Some("abc")).is_err());
    }

    #[test]
    fn test_rejects_unsupported_models() {
        let dart = THREE_CLASS_MODEL.replace(r#""name": "gbtree""#, r#""name": "dart""#);
        assert!(GradientBoostedTrees::from_json(&dart).is_err());

        let ranking = THREE_CLASS_MODEL.replace("multi:softprob", "rank:pairwise");
        assert!(GradientBoostedTrees::from_json(&ranking).is_err());

        assert!(GradientBoostedTrees::from_json("{}").is_err());
    }

    #[test]
    fn test_rejects_categorical_splits() {
        let numerical = THREE_CLASS_MODEL.replace(
            r#""default_left": [1, 0, 0],"#,
            r#""default_left": [1, 0, 0], "split_type": [0, 0, 0],"#,
        );
        assert!(GradientBoostedTrees::from_json(&numerical).is_ok());

        let categorical = THREE_CLASS_MODEL.replace(
            r#""default_left": [1, 0, 0],"#,
            r#""default_left": [1, 0, 0], "split_type": [1, 0, 0],"#,
        );
        let err = GradientBoostedTrees::from_json(&categorical)
            .err()
            .expect("categorical split must be rejected");
        assert!(err.to_string().contains("categorical"));
    }

    #[test]
    fn test_rejects_malformed_trees() {
        // child pointing back at its parent
        assert!(RegressionTree::new(
            vec![0, -1],
            vec![1, -1],
            vec![0, 0],
            vec![0.5, 1.0],
            vec![false, false],
        )
        .is_err());

        // mismatched array lengths
        assert!(RegressionTree::new(vec![-1], vec![-1, -1], vec![0], vec![0.0], vec![false]).is_err());
    }

    #[test]
    fn test_split_beyond_num_feature_is_rejected() {
        let json = THREE_CLASS_MODEL.replace(r#""num_feature": "2""#, r#""num_feature": "1""#);
        assert!(GradientBoostedTrees::from_json(&json).is_err());
    }
}
