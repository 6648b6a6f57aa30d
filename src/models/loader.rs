//! Model bundle loader
//!
//! A bundle is a JSON document tagged with `format_version`. Each supported
//! version has a [`BundleFormat`] decoder registered with the [`ModelLoader`]:
//!
//! - v1: a bare exported classifier (`{"format_version": 1, "kind": ...}`)
//! - v2: classifier plus encoders, feature columns and metadata
//!
//! When loading fails for any reason the service keeps running on
//! [`ModelBundle::standin`].

use crate::config::ModelConfig;
use crate::feature_extractor::NutrientUnit;
use crate::models::classifier::{
    ClassLabel, LoadedClassifier, ModelSpec, NearestCentroid, SpecError, TreeEnsemble,
};
use crate::models::encoder::LabelEncoder;
use crate::types::prediction::round2;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Crops the stand-in scorer and metadata fall back to
pub const FALLBACK_CROPS: [&str; 12] = [
    "Potato",
    "Maize",
    "Tomato",
    "Red Onion",
    "Big Onion",
    "Carrot",
    "Rice",
    "Cabbage",
    "Chili",
    "Cucumber",
    "Eggplant",
    "Bean",
];

/// Accuracy assumed for a bundle that ships without metadata
const DEFAULT_MODEL_ACCURACY: f64 = 0.88;

/// Accuracy advertised while running on the stand-in bundle
const STANDIN_ACCURACY: f64 = 0.65;

/// Reasons a bundle could not be loaded
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Model file not found: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("Failed to read model file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed model bundle: {0}")]
    Malformed(String),

    #[error("Unsupported bundle format version {0}")]
    UnsupportedFormat(u64),

    #[error("Unsupported model kind: {0}")]
    UnsupportedModelKind(String),

    #[error("Incompatible model: {0}")]
    IncompatibleModel(String),
}

impl From<serde_json::Error> for LoadError {
    fn from(e: serde_json::Error) -> Self {
        LoadError::Malformed(e.to_string())
    }
}

impl From<SpecError> for LoadError {
    fn from(e: SpecError) -> Self {
        LoadError::Malformed(e.to_string())
    }
}

/// Descriptive metadata shipped with a bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleMetadata {
    /// Held-out accuracy, either a fraction (0-1) or a percentage
    pub accuracy: f64,
    #[serde(default = "unknown_date")]
    pub training_date: String,
    #[serde(default)]
    pub crops_supported: Vec<String>,
}

fn unknown_date() -> String {
    "Unknown".to_string()
}

impl BundleMetadata {
    /// Accuracy as a percentage rounded to two decimals
    pub fn accuracy_percent(&self) -> f64 {
        if self.accuracy <= 1.0 {
            round2(self.accuracy * 100.0)
        } else {
            round2(self.accuracy)
        }
    }
}

/// Decoded bundle contents before the classifier is built
pub struct BundleParts {
    pub model: ModelSpec,
    pub target_encoder: Option<LabelEncoder>,
    pub label_encoders: HashMap<String, LabelEncoder>,
    pub feature_columns: Vec<String>,
    pub nutrient_unit: Option<NutrientUnit>,
    pub metadata: Option<BundleMetadata>,
}

/// Decoder for one artifact format version
pub trait BundleFormat: Send + Sync {
    fn version(&self) -> u64;
    fn decode(&self, document: Value) -> Result<BundleParts, LoadError>;
}

/// Version 1: the document is the classifier itself
pub struct BareClassifierFormat;

impl BundleFormat for BareClassifierFormat {
    fn version(&self) -> u64 {
        1
    }

    fn decode(&self, document: Value) -> Result<BundleParts, LoadError> {
        let model: ModelSpec = serde_json::from_value(document)?;
        Ok(BundleParts {
            model,
            target_encoder: None,
            label_encoders: HashMap::new(),
            feature_columns: Vec::new(),
            nutrient_unit: None,
            metadata: None,
        })
    }
}

/// Version 2: full bundle
pub struct FullBundleFormat;

#[derive(Deserialize)]
struct FullBundleDocument {
    model: ModelSpec,
    #[serde(default)]
    target_encoder: Option<LabelEncoder>,
    #[serde(default)]
    label_encoders: HashMap<String, LabelEncoder>,
    #[serde(default)]
    feature_columns: Vec<String>,
    #[serde(default)]
    nutrient_unit: Option<NutrientUnit>,
    #[serde(default)]
    model_metadata: Option<BundleMetadata>,
}

impl BundleFormat for FullBundleFormat {
    fn version(&self) -> u64 {
        2
    }

    fn decode(&self, document: Value) -> Result<BundleParts, LoadError> {
        let doc: FullBundleDocument = serde_json::from_value(document)?;
        Ok(BundleParts {
            model: doc.model,
            target_encoder: doc.target_encoder,
            label_encoders: doc.label_encoders,
            feature_columns: doc.feature_columns,
            nutrient_unit: doc.nutrient_unit,
            metadata: doc.model_metadata,
        })
    }
}

/// Classifier, encoders and metadata treated as one unit.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Debug)]
pub struct ModelBundle {
    /// `None` when running on the stand-in scorer
    pub classifier: Option<LoadedClassifier>,
    /// Decodes class codes to crop names
    pub target_encoder: Option<LabelEncoder>,
    /// Per-feature encoders keyed by training column name
    pub label_encoders: HashMap<String, LabelEncoder>,
    /// Explicit column order the classifier was fitted on
    pub feature_columns: Vec<String>,
    /// Explicit nutrient unit, overriding detection from column names
    pub nutrient_unit: Option<NutrientUnit>,
    pub metadata: BundleMetadata,
    /// Format version of the artifact, `None` for the stand-in
    pub format_version: Option<u64>,
}

impl ModelBundle {
    /// Bundle used when no classifier could be loaded
    pub fn standin() -> Self {
        Self {
            classifier: None,
            target_encoder: None,
            label_encoders: HashMap::new(),
            feature_columns: Vec::new(),
            nutrient_unit: None,
            metadata: BundleMetadata {
                accuracy: STANDIN_ACCURACY,
                training_date: "N/A".to_string(),
                crops_supported: FALLBACK_CROPS.iter().map(|c| c.to_string()).collect(),
            },
            format_version: None,
        }
    }

    pub fn is_standin(&self) -> bool {
        self.classifier.is_none()
    }

    pub fn model_type(&self) -> &str {
        self.classifier
            .as_ref()
            .map(|c| c.model_type())
            .unwrap_or("N/A")
    }

    /// Column order from the bundle, else from the classifier itself
    pub fn expected_columns(&self) -> Option<&[String]> {
        if !self.feature_columns.is_empty() {
            return Some(&self.feature_columns);
        }
        self.classifier.as_ref().and_then(|c| c.feature_names())
    }

    /// Crop name for a class, via the target encoder when one applies
    pub fn decode_class(&self, class: &ClassLabel) -> String {
        match (class, &self.target_encoder) {
            (ClassLabel::Code(code), Some(encoder)) => usize::try_from(*code)
                .ok()
                .and_then(|i| encoder.inverse_transform(i))
                .map(str::to_string)
                .unwrap_or_else(|| class.to_string()),
            _ => class.to_string(),
        }
    }
}

/// Loads bundles through a registry of format decoders
pub struct ModelLoader {
    formats: Vec<Box<dyn BundleFormat>>,
    allow_deterministic: bool,
    #[cfg_attr(not(feature = "onnx"), allow(dead_code))]
    onnx_threads: usize,
}

impl ModelLoader {
    /// Loader with every built-in format registered
    pub fn new() -> Self {
        Self {
            formats: vec![Box::new(BareClassifierFormat), Box::new(FullBundleFormat)],
            allow_deterministic: false,
            onnx_threads: 1,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new()
            .allow_deterministic(config.allow_deterministic)
            .with_onnx_threads(config.onnx_threads)
    }

    pub fn allow_deterministic(mut self, allow: bool) -> Self {
        self.allow_deterministic = allow;
        self
    }

    pub fn with_onnx_threads(mut self, threads: usize) -> Self {
        self.onnx_threads = threads.max(1);
        self
    }

    /// Add or replace the decoder for a format version
    pub fn register(&mut self, format: Box<dyn BundleFormat>) {
        self.formats.retain(|f| f.version() != format.version());
        self.formats.push(format);
    }

    pub fn supported_versions(&self) -> Vec<u64> {
        let mut versions: Vec<u64> = self.formats.iter().map(|f| f.version()).collect();
        versions.sort_unstable();
        versions
    }

    /// Load a bundle from disk
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<ModelBundle, LoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LoadError::ModelNotFound(path.to_path_buf()));
        }

        info!(path = %path.display(), "Loading model bundle");
        let content = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

        self.load_str(&content, base_dir)
    }

    /// Load a bundle from its JSON text; relative model files resolve
    /// against `base_dir`
    pub fn load_str(&self, content: &str, base_dir: &Path) -> Result<ModelBundle, LoadError> {
        let document: Value = serde_json::from_str(content)?;
        let version = document
            .get("format_version")
            .and_then(Value::as_u64)
            .ok_or_else(|| LoadError::Malformed("missing or invalid format_version".into()))?;

        let format = self
            .formats
            .iter()
            .find(|f| f.version() == version)
            .ok_or(LoadError::UnsupportedFormat(version))?;

        let parts = format.decode(document)?;
        let kind = parts.model.kind();
        let classifier = self.build_classifier(parts.model, base_dir)?;

        if let (Some(encoder), classes) = (&parts.target_encoder, classifier.classes()) {
            for class in classes {
                if let ClassLabel::Code(code) = class {
                    let known = usize::try_from(*code)
                        .ok()
                        .and_then(|i| encoder.inverse_transform(i))
                        .is_some();
                    if !known {
                        return Err(LoadError::Malformed(format!(
                            "class {} has no entry in the target encoder",
                            code
                        )));
                    }
                }
            }
        }

        let metadata = match parts.metadata {
            Some(metadata) => metadata,
            None => BundleMetadata {
                accuracy: DEFAULT_MODEL_ACCURACY,
                training_date: unknown_date(),
                crops_supported: default_crops(parts.target_encoder.as_ref(), &classifier),
            },
        };

        let bundle = ModelBundle {
            classifier: Some(classifier),
            target_encoder: parts.target_encoder,
            label_encoders: parts.label_encoders,
            feature_columns: parts.feature_columns,
            nutrient_unit: parts.nutrient_unit,
            metadata,
            format_version: Some(version),
        };

        info!(
            format_version = version,
            kind = kind,
            model_type = %bundle.model_type(),
            classes = bundle.classifier.as_ref().map_or(0, |c| c.classes().len()),
            label_encoders = bundle.label_encoders.len(),
            feature_columns = bundle.feature_columns.len(),
            "Model bundle loaded successfully"
        );

        Ok(bundle)
    }

    /// Load a bundle, downgrading to the stand-in on any failure
    pub fn load_or_standin<P: AsRef<Path>>(&self, path: P) -> ModelBundle {
        let path = path.as_ref();
        match self.load(path) {
            Ok(bundle) => bundle,
            Err(e @ LoadError::ModelNotFound(_)) => {
                warn!(error = %e, "Running in test mode with the stand-in scorer");
                ModelBundle::standin()
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to load model, running in test mode");
                ModelBundle::standin()
            }
        }
    }

    fn build_classifier(&self, spec: ModelSpec, base_dir: &Path) -> Result<LoadedClassifier, LoadError> {
        let classifier = match spec {
            ModelSpec::DecisionTree(spec) => {
                LoadedClassifier::Probabilistic(Box::new(TreeEnsemble::decision_tree(spec)?))
            }
            ModelSpec::RandomForest(spec) => {
                LoadedClassifier::Probabilistic(Box::new(TreeEnsemble::random_forest(spec)?))
            }
            ModelSpec::NearestCentroid(spec) => {
                LoadedClassifier::Deterministic(Box::new(NearestCentroid::new(spec)?))
            }
            #[cfg(feature = "onnx")]
            ModelSpec::Onnx(spec) => {
                let file = base_dir.join(&spec.file);
                let model = crate::models::onnx::OnnxClassifier::load(&file, spec, self.onnx_threads)
                    .map_err(|e| LoadError::Malformed(format!("{:#}", e)))?;
                LoadedClassifier::Probabilistic(Box::new(model))
            }
            #[cfg(not(feature = "onnx"))]
            ModelSpec::Onnx(spec) => {
                let _ = base_dir;
                return Err(LoadError::UnsupportedModelKind(format!(
                    "onnx model '{}' requires the `onnx` feature",
                    spec.file
                )));
            }
        };

        if !classifier.is_probabilistic() && !self.allow_deterministic {
            return Err(LoadError::IncompatibleModel(format!(
                "{} has no predict_proba",
                classifier.model_type()
            )));
        }
        Ok(classifier)
    }
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn default_crops(target_encoder: Option<&LabelEncoder>, classifier: &LoadedClassifier) -> Vec<String> {
    let classes = classifier.classes();
    match target_encoder {
        Some(encoder) => encoder.classes().to_vec(),
        None if classes.iter().all(|c| matches!(c, ClassLabel::Name(_))) => {
            classes.iter().map(|c| c.to_string()).collect()
        }
        None => FALLBACK_CROPS.iter().map(|c| c.to_string()).collect(),
    }
}
