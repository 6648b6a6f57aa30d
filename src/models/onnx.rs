//! ONNX Runtime backed classifier for models exported with skl2onnx

use crate::models::classifier::{
    argmax_class, check_width, ClassLabel, Classifier, InferenceError, OnnxSpec,
    ProbabilisticClassifier,
};
use anyhow::{Context, Result};
use ort::memory::Allocator;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, Tensor};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Classifier running an ONNX session
pub struct OnnxClassifier {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    n_features: usize,
    classes: Vec<ClassLabel>,
    feature_names: Option<Vec<String>>,
}

impl OnnxClassifier {
    /// Open the model file and resolve its input and probability output names
    pub fn load<P: AsRef<Path>>(path: P, spec: OnnxSpec, threads: usize) -> Result<Self> {
        let path = path.as_ref();
        ort::init().commit()?;

        info!(path = %path.display(), threads = threads, "Loading ONNX model");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(threads)?
            .commit_from_file(path)
            .context(format!("Failed to load model from {:?}", path))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob"))
            .or_else(|| session.outputs.last())
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "output_probability".to_string());

        info!(input = %input_name, output = %output_name, "ONNX model loaded");

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            n_features: spec.n_features,
            classes: spec.classes,
            feature_names: spec.feature_names,
        })
    }

    fn run(&self, features: &[f64]) -> Result<Vec<f64>> {
        let input: Vec<f32> = features.iter().map(|&x| x as f32).collect();
        let shape = vec![1_i64, input.len() as i64];
        let input_tensor =
            Tensor::from_array((shape, input)).context("Failed to create input tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let outputs = session.run(ort::inputs![self.input_name.as_str() => input_tensor])?;

        let output = outputs
            .get(self.output_name.as_str())
            .context("Probability output missing")?;

        // Tensor output: [1, n_classes]
        if let Ok((_, data)) = output.try_extract_tensor::<f32>() {
            return Ok(data.iter().map(|&p| p as f64).collect());
        }

        // seq(map(int64, float)) output produced by the sklearn converters
        if DynSequenceValueType::can_downcast(&output.dtype()) {
            let allocator = Allocator::default();
            let sequence = output
                .downcast_ref::<DynSequenceValueType>()
                .map_err(|e| anyhow::anyhow!("Failed to downcast to sequence: {}", e))?;
            let maps = sequence.try_extract_sequence::<DynMapValueType>(&allocator)?;
            let first = maps.first().context("Empty probability sequence")?;
            let mut pairs = first.try_extract_key_values::<i64, f32>()?;
            pairs.sort_by_key(|(class_id, _)| *class_id);
            debug!(classes = pairs.len(), "Extracted probabilities from seq(map)");
            return Ok(pairs.into_iter().map(|(_, p)| p as f64).collect());
        }

        anyhow::bail!("Unsupported probability output format")
    }
}

impl Classifier for OnnxClassifier {
    fn model_type(&self) -> &str {
        "OnnxClassifier"
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

impl ProbabilisticClassifier for OnnxClassifier {
    fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>, InferenceError> {
        check_width(Some(self.n_features), features)?;
        self.run(features)
            .map_err(|e| InferenceError::Backend(e.to_string()))
    }
}
