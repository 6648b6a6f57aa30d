//! Classifier capabilities and the exported model kinds that provide them.
//!
//! A classifier either reports a full probability row ([`ProbabilisticClassifier`])
//! or only a label ([`Classifier`]). The loader records which of the two it
//! produced in [`LoadedClassifier`] so callers dispatch with a `match` rather
//! than probing for methods at runtime.
//!
//! Tree models follow sklearn's flattened node layout:
//!
//! ```json
//! { "feature": 4, "threshold": 6.25, "left": 1, "right": 2, "value": null }
//! { "feature": -1, "threshold": 0.0, "left": -1, "right": -1, "value": [3.0, 1.0] }
//! ```
//!
//! Internal nodes send `x[feature] <= threshold` (and NaN) left. Leaf `value`
//! holds per-class weights or counts and is normalized on load.

use serde::Deserialize;
use std::fmt;

/// Errors raised while running a classifier
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferenceError {
    #[error("Feature count mismatch: model expects {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Probability row has {actual} entries for {expected} classes")]
    ProbabilityWidth { expected: usize, actual: usize },

    #[error("Model produced a non-finite probability")]
    NonFinite,

    #[error("Model has no classes")]
    NoClasses,

    #[error("Inference backend error: {0}")]
    Backend(String),
}

/// Errors raised while building a classifier from its exported form
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpecError {
    #[error("tree {tree}: node {node} points at missing child {child}")]
    DanglingChild { tree: usize, node: usize, child: i32 },

    #[error("tree {tree}: node {node} splits on feature {feature} but the model has {n_features}")]
    FeatureOutOfRange {
        tree: usize,
        node: usize,
        feature: i32,
        n_features: usize,
    },

    #[error("tree {tree}: leaf {node} has {actual} class weights, expected {expected}")]
    LeafWidth {
        tree: usize,
        node: usize,
        expected: usize,
        actual: usize,
    },

    #[error("tree {tree} has no nodes")]
    EmptyTree { tree: usize },

    #[error("{0}")]
    Invalid(String),
}

/// Class identifier as exported by the training pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum ClassLabel {
    /// Integer code, usually decoded through the target encoder
    Code(i64),
    /// Label already in human-readable form
    Name(String),
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassLabel::Code(code) => write!(f, "{}", code),
            ClassLabel::Name(name) => f.write_str(name),
        }
    }
}

/// Predict-only capability
pub trait Classifier: Send + Sync {
    /// Human-readable model type, e.g. `RandomForestClassifier`
    fn model_type(&self) -> &str;

    /// Classes in the order of the probability row
    fn classes(&self) -> &[ClassLabel];

    /// Input width declared by the model, if known
    fn n_features(&self) -> Option<usize>;

    /// Column names the model was fitted on, if exported
    fn feature_names(&self) -> Option<&[String]>;

    fn predict(&self, features: &[f64]) -> Result<ClassLabel, InferenceError>;
}

/// Predict plus per-class probabilities
pub trait ProbabilisticClassifier: Classifier {
    /// Probabilities aligned with [`Classifier::classes`]
    fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>, InferenceError>;
}

/// A loaded classifier tagged with the capability it offers
pub enum LoadedClassifier {
    Probabilistic(Box<dyn ProbabilisticClassifier>),
    Deterministic(Box<dyn Classifier>),
}

impl LoadedClassifier {
    pub fn model_type(&self) -> &str {
        match self {
            LoadedClassifier::Probabilistic(model) => model.model_type(),
            LoadedClassifier::Deterministic(model) => model.model_type(),
        }
    }

    pub fn classes(&self) -> &[ClassLabel] {
        match self {
            LoadedClassifier::Probabilistic(model) => model.classes(),
            LoadedClassifier::Deterministic(model) => model.classes(),
        }
    }

    pub fn n_features(&self) -> Option<usize> {
        match self {
            LoadedClassifier::Probabilistic(model) => model.n_features(),
            LoadedClassifier::Deterministic(model) => model.n_features(),
        }
    }

    pub fn feature_names(&self) -> Option<&[String]> {
        match self {
            LoadedClassifier::Probabilistic(model) => model.feature_names(),
            LoadedClassifier::Deterministic(model) => model.feature_names(),
        }
    }

    pub fn is_probabilistic(&self) -> bool {
        matches!(self, LoadedClassifier::Probabilistic(_))
    }
}

impl fmt::Debug for LoadedClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedClassifier")
            .field("model_type", &self.model_type())
            .field("probabilistic", &self.is_probabilistic())
            .field("classes", &self.classes().len())
            .finish()
    }
}

/// Reject inputs that do not match the declared width
pub fn check_width(expected: Option<usize>, features: &[f64]) -> Result<(), InferenceError> {
    match expected {
        Some(expected) if expected != features.len() => Err(InferenceError::ShapeMismatch {
            expected,
            actual: features.len(),
        }),
        _ => Ok(()),
    }
}

/// Class with the highest probability; ties go to the earlier class
pub fn argmax_class(classes: &[ClassLabel], probabilities: &[f64]) -> Result<ClassLabel, InferenceError> {
    if classes.len() != probabilities.len() {
        return Err(InferenceError::ProbabilityWidth {
            expected: classes.len(),
            actual: probabilities.len(),
        });
    }
    let mut best: Option<(usize, f64)> = None;
    for (i, &p) in probabilities.iter().enumerate() {
        if !p.is_finite() {
            return Err(InferenceError::NonFinite);
        }
        if best.map_or(true, |(_, top)| p > top) {
            best = Some((i, p));
        }
    }
    best.map(|(i, _)| classes[i].clone())
        .ok_or(InferenceError::NoClasses)
}

// ============================================================================
// Exported model specifications
// ============================================================================

/// The `model` section of an artifact, tagged by `kind`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSpec {
    DecisionTree(DecisionTreeSpec),
    RandomForest(RandomForestSpec),
    NearestCentroid(NearestCentroidSpec),
    Onnx(OnnxSpec),
}

impl ModelSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            ModelSpec::DecisionTree(_) => "decision_tree",
            ModelSpec::RandomForest(_) => "random_forest",
            ModelSpec::NearestCentroid(_) => "nearest_centroid",
            ModelSpec::Onnx(_) => "onnx",
        }
    }
}

/// A single flattened tree node
#[derive(Debug, Clone, Deserialize)]
pub struct TreeNode {
    /// Feature index to split on (-1 for leaves)
    pub feature: i32,
    pub threshold: f64,
    /// Left child index (-1 for leaves)
    pub left: i32,
    /// Right child index (-1 for leaves)
    pub right: i32,
    /// Per-class weights on leaves
    #[serde(default)]
    pub value: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TreeSpec {
    pub nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecisionTreeSpec {
    pub n_features: usize,
    pub classes: Vec<ClassLabel>,
    #[serde(default)]
    pub feature_names: Option<Vec<String>>,
    pub tree: TreeSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RandomForestSpec {
    pub n_features: usize,
    pub classes: Vec<ClassLabel>,
    #[serde(default)]
    pub feature_names: Option<Vec<String>>,
    pub trees: Vec<TreeSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NearestCentroidSpec {
    pub classes: Vec<ClassLabel>,
    #[serde(default)]
    pub feature_names: Option<Vec<String>>,
    /// One centroid per class
    pub centroids: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OnnxSpec {
    /// Path to the `.onnx` file, relative to the artifact
    pub file: String,
    pub n_features: usize,
    pub classes: Vec<ClassLabel>,
    #[serde(default)]
    pub feature_names: Option<Vec<String>>,
}

// ============================================================================
// Tree ensembles
// ============================================================================

/// Validated tree with normalized leaf distributions
#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<TreeNode>,
}

impl Tree {
    fn build(index: usize, spec: TreeSpec, n_features: usize, n_classes: usize) -> Result<Self, SpecError> {
        if spec.nodes.is_empty() {
            return Err(SpecError::EmptyTree { tree: index });
        }
        let n_nodes = spec.nodes.len() as i32;
        let mut nodes = spec.nodes;

        for (i, node) in nodes.iter_mut().enumerate() {
            if node.feature < 0 {
                let weights = node.value.as_mut().ok_or(SpecError::LeafWidth {
                    tree: index,
                    node: i,
                    expected: n_classes,
                    actual: 0,
                })?;
                if weights.len() != n_classes {
                    return Err(SpecError::LeafWidth {
                        tree: index,
                        node: i,
                        expected: n_classes,
                        actual: weights.len(),
                    });
                }
                let total: f64 = weights.iter().sum();
                if total > 0.0 {
                    weights.iter_mut().for_each(|w| *w /= total);
                }
                continue;
            }

            if node.feature as usize >= n_features {
                return Err(SpecError::FeatureOutOfRange {
                    tree: index,
                    node: i,
                    feature: node.feature,
                    n_features,
                });
            }
            for child in [node.left, node.right] {
                // Children must point forward to rule out cycles
                if child <= i as i32 || child >= n_nodes {
                    return Err(SpecError::DanglingChild {
                        tree: index,
                        node: i,
                        child,
                    });
                }
            }
        }

        Ok(Self { nodes })
    }

    fn leaf_distribution(&self, features: &[f64]) -> &[f64] {
        let mut idx = 0usize;
        loop {
            let node = &self.nodes[idx];
            if node.feature < 0 {
                return node.value.as_deref().unwrap_or(&[]);
            }
            let x = features[node.feature as usize];
            idx = if x.is_nan() || x <= node.threshold {
                node.left as usize
            } else {
                node.right as usize
            };
        }
    }
}

/// Tree ensemble averaging leaf distributions; a single tree is a forest of one
pub struct TreeEnsemble {
    model_type: &'static str,
    n_features: usize,
    classes: Vec<ClassLabel>,
    feature_names: Option<Vec<String>>,
    trees: Vec<Tree>,
}

impl TreeEnsemble {
    pub fn decision_tree(spec: DecisionTreeSpec) -> Result<Self, SpecError> {
        Self::build(
            "DecisionTreeClassifier",
            spec.n_features,
            spec.classes,
            spec.feature_names,
            vec![spec.tree],
        )
    }

    pub fn random_forest(spec: RandomForestSpec) -> Result<Self, SpecError> {
        if spec.trees.is_empty() {
            return Err(SpecError::Invalid("random forest has no trees".into()));
        }
        Self::build(
            "RandomForestClassifier",
            spec.n_features,
            spec.classes,
            spec.feature_names,
            spec.trees,
        )
    }

    fn build(
        model_type: &'static str,
        n_features: usize,
        classes: Vec<ClassLabel>,
        feature_names: Option<Vec<String>>,
        trees: Vec<TreeSpec>,
    ) -> Result<Self, SpecError> {
        if classes.is_empty() {
            return Err(SpecError::Invalid("model declares no classes".into()));
        }
        check_feature_names(&feature_names, n_features)?;
        let n_classes = classes.len();
        let trees = trees
            .into_iter()
            .enumerate()
            .map(|(i, t)| Tree::build(i, t, n_features, n_classes))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            model_type,
            n_features,
            classes,
            feature_names,
            trees,
        })
    }
}

impl Classifier for TreeEnsemble {
    fn model_type(&self) -> &str {
        self.model_type
    }

    fn classes(&self) -> &[ClassLabel] {
        &self.classes
    }

    fn n_features(&self) -> Option<usize> {
        Some(self.n_features)
    }

    fn feature_names(&self) -> Option<&[String]> {
        self.feature_names.as_deref()
    }

    fn predict(&self, features: &[f64]) -> Result<ClassLabel, InferenceError> {
        let probabilities = self.predict_proba(features)?;
        argmax_class(&self.classes, &probabilities)
    }
}

impl ProbabilisticClassifier for TreeEnsemble {
    fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>, InferenceError> {
        check_width(Some(self.n_features), features)?;

        let mut totals = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            for (total, p) in totals.iter_mut().zip(tree.leaf_distribution(features)) {
                *total += p;
            }
        }
        let n_trees = self.trees.len() as f64;
        totals.iter_mut().for_each(|p| *p /= n_trees);
        Ok(totals)
    }
}

// ============================================================================
// Nearest centroid
// ============================================================================

/// Assigns the class whose centroid is closest in Euclidean distance.
/// Reports no probabilities.
pub struct NearestCentroid {
    classes: Vec<ClassLabel>,
    feature_names: Option<Vec<String>>,
    centroids: Vec<Vec<f64>>,
    n_features: usize,
}

impl NearestCentroid {
    pub fn new(spec: NearestCentroidSpec) -> Result<Self, SpecError> {
        if spec.classes.is_empty() || spec.classes.len() != spec.centroids.len() {
            return Err(SpecError::Invalid(format!(
                "{} classes but {} centroids",
                spec.classes.len(),
                spec.centroids.len()
            )));
        }
        let n_features = spec.centroids[0].len();
        if spec.centroids.iter().any(|c| c.len() != n_features) {
            return Err(SpecError::Invalid("centroids differ in width".into()));
        }
        check_feature_names(&spec.feature_names, n_features)?;

        Ok(Self {
            classes: spec.classes,
            feature_names: spec.feature_names,
            centroids: spec.centroids,
            n_features,
        })
    }
}

impl Classifier for NearestCentroid {
    fn model_type(&self) -> &str {
        "NearestCentroid"
    }

    fn classes(&self) -> &[ClassLabel] {
        &self.classes
    }

    fn n_features(&self) -> Option<usize> {
        Some(self.n_features)
    }

    fn feature_names(&self) -> Option<&[String]> {
        self.feature_names.as_deref()
    }

    fn predict(&self, features: &[f64]) -> Result<ClassLabel, InferenceError> {
        check_width(Some(self.n_features), features)?;

        let distance = |centroid: &[f64]| -> f64 {
            centroid
                .iter()
                .zip(features)
                .map(|(c, x)| (c - x).powi(2))
                .sum()
        };
        let (best, _) = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, distance(c)))
            .fold((0, f64::INFINITY), |acc, (i, d)| if d < acc.1 { (i, d) } else { acc });

        Ok(self.classes[best].clone())
    }
}

fn check_feature_names(names: &Option<Vec<String>>, n_features: usize) -> Result<(), SpecError> {
    match names {
        Some(names) if names.len() != n_features => Err(SpecError::Invalid(format!(
            "{} feature names for {} features",
            names.len(),
            n_features
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(value: Vec<f64>) -> TreeNode {
        TreeNode {
            feature: -1,
            threshold: 0.0,
            left: -1,
            right: -1,
            value: Some(value),
        }
    }

    fn split(feature: i32, threshold: f64, left: i32, right: i32) -> TreeNode {
        TreeNode {
            feature,
            threshold,
            left,
            right,
            value: None,
        }
    }

    fn stump(threshold: f64, low: Vec<f64>, high: Vec<f64>) -> TreeSpec {
        TreeSpec {
            nodes: vec![split(0, threshold, 1, 2), leaf(low), leaf(high)],
        }
    }

    fn classes() -> Vec<ClassLabel> {
        vec![ClassLabel::Code(0), ClassLabel::Code(1), ClassLabel::Code(2)]
    }

    #[test]
    fn test_decision_tree_traversal() {
        let tree = TreeEnsemble::decision_tree(DecisionTreeSpec {
            n_features: 2,
            classes: classes(),
            feature_names: None,
            tree: stump(6.0, vec![8.0, 2.0, 0.0], vec![0.0, 1.0, 3.0]),
        })
        .unwrap();

        assert_eq!(tree.predict_proba(&[5.5, 0.0]).unwrap(), vec![0.8, 0.2, 0.0]);
        assert_eq!(tree.predict(&[7.0, 0.0]).unwrap(), ClassLabel::Code(2));
        // NaN goes left
        assert_eq!(tree.predict(&[f64::NAN, 0.0]).unwrap(), ClassLabel::Code(0));
    }

    #[test]
    fn test_forest_averages_trees() {
        let forest = TreeEnsemble::random_forest(RandomForestSpec {
            n_features: 1,
            classes: classes(),
            feature_names: Some(vec!["Soil pH".into()]),
            trees: vec![
                stump(6.0, vec![1.0, 0.0, 0.0], vec![0.0, 0.0, 1.0]),
                stump(7.0, vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]),
            ],
        })
        .unwrap();

        assert_eq!(forest.predict_proba(&[5.0]).unwrap(), vec![0.5, 0.5, 0.0]);
        assert_eq!(forest.predict_proba(&[6.5]).unwrap(), vec![0.0, 0.5, 0.5]);
        // Tie resolves to the earlier class
        assert_eq!(forest.predict(&[5.0]).unwrap(), ClassLabel::Code(0));
    }

    #[test]
    fn test_width_mismatch_is_an_inference_error() {
        let tree = TreeEnsemble::decision_tree(DecisionTreeSpec {
            n_features: 2,
            classes: classes(),
            feature_names: None,
            tree: stump(6.0, vec![1.0, 0.0, 0.0], vec![0.0, 0.0, 1.0]),
        })
        .unwrap();

        assert_eq!(
            tree.predict_proba(&[1.0, 2.0, 3.0]),
            Err(InferenceError::ShapeMismatch {
                expected: 2,
                actual: 3
            })
        );
    }

    #[test]
    fn test_invalid_trees_are_rejected() {
        let dangling = TreeSpec {
            nodes: vec![split(0, 1.0, 1, 5), leaf(vec![1.0, 0.0, 0.0])],
        };
        assert!(matches!(
            TreeEnsemble::decision_tree(DecisionTreeSpec {
                n_features: 1,
                classes: classes(),
                feature_names: None,
                tree: dangling,
            }),
            Err(SpecError::DanglingChild { child: 5, .. })
        ));

        let narrow_leaf = stump(1.0, vec![1.0, 0.0], vec![0.0, 0.0, 1.0]);
        assert!(matches!(
            TreeEnsemble::decision_tree(DecisionTreeSpec {
                n_features: 1,
                classes: classes(),
                feature_names: None,
                tree: narrow_leaf,
            }),
            Err(SpecError::LeafWidth { actual: 2, .. })
        ));

        let wide_feature = TreeSpec {
            nodes: vec![split(3, 1.0, 1, 2), leaf(vec![1.0, 0.0, 0.0]), leaf(vec![0.0, 1.0, 0.0])],
        };
        assert!(matches!(
            TreeEnsemble::decision_tree(DecisionTreeSpec {
                n_features: 2,
                classes: classes(),
                feature_names: None,
                tree: wide_feature,
            }),
            Err(SpecError::FeatureOutOfRange { feature: 3, .. })
        ));
    }

    #[test]
    fn test_nearest_centroid() {
        let model = NearestCentroid::new(NearestCentroidSpec {
            classes: vec![ClassLabel::Name("Rice".into()), ClassLabel::Name("Potato".into())],
            feature_names: None,
            centroids: vec![vec![6.5, 28.0], vec![5.5, 18.0]],
        })
        .unwrap();

        assert_eq!(model.predict(&[6.3, 27.0]).unwrap().to_string(), "Rice");
        assert_eq!(model.predict(&[5.0, 17.0]).unwrap().to_string(), "Potato");
        assert!(model.predict(&[1.0]).is_err());
    }

    #[test]
    fn test_model_spec_is_tagged_by_kind() {
        let json = r#"{
            "kind": "decision_tree",
            "n_features": 1,
            "classes": [0, 1],
            "tree": { "nodes": [
                { "feature": -1, "threshold": 0.0, "left": -1, "right": -1, "value": [1, 3] }
            ] }
        }"#;
        let spec: ModelSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.kind(), "decision_tree");

        let ModelSpec::DecisionTree(spec) = spec else {
            panic!("expected a decision tree");
        };
        let tree = TreeEnsemble::decision_tree(spec).unwrap();
        assert_eq!(tree.predict_proba(&[0.0]).unwrap(), vec![0.25, 0.75]);
    }

    #[test]
    fn test_argmax_rejects_width_mismatch() {
        assert!(matches!(
            argmax_class(&classes(), &[0.5, 0.5]),
            Err(InferenceError::ProbabilityWidth { .. })
        ));
        assert_eq!(argmax_class(&[], &[]), Err(InferenceError::NoClasses));
    }
}
