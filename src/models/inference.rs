//! Crop prediction: classifier dispatch, ranking and fallback

use crate::feature_extractor::{FeaturePipeline, FeatureVector};
use crate::models::classifier::{ClassLabel, InferenceError, LoadedClassifier};
use crate::models::loader::ModelBundle;
use crate::models::standin::StandInScorer;
use crate::types::prediction::{round2, CropPrediction, PredictionResult};
use crate::types::request::PredictionRequest;
use tracing::{debug, error, info_span, warn};
use uuid::Uuid;

/// How many ranked candidates a result carries at most
const TOP_K: usize = 3;

/// Which path produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionSource {
    /// The loaded classifier
    Classifier,
    /// No classifier is loaded
    StandIn,
    /// The classifier failed and the stand-in answered instead
    Fallback,
}

/// Result plus how it was obtained
#[derive(Debug, Clone)]
pub struct Prediction {
    pub result: PredictionResult,
    pub source: PredictionSource,
    /// Recovered feature problems for this request
    pub feature_warnings: usize,
}

/// Turns requests into ranked crop recommendations
pub struct Predictor {
    pipeline: FeaturePipeline,
    standin: StandInScorer,
}

impl Predictor {
    pub fn new() -> Self {
        Self {
            pipeline: FeaturePipeline::new(),
            standin: StandInScorer::new(),
        }
    }

    pub fn pipeline(&self) -> &FeaturePipeline {
        &self.pipeline
    }

    /// Predict the best crops for a request. Never fails: a missing or
    /// failing classifier is answered by the stand-in scorer.
    pub fn predict(&self, request: &PredictionRequest, bundle: &ModelBundle) -> PredictionResult {
        self.run(request, bundle).result
    }

    /// Like [`Predictor::predict`], also reporting which path answered
    pub fn run(&self, request: &PredictionRequest, bundle: &ModelBundle) -> Prediction {
        let request_id = Uuid::new_v4();
        let span = info_span!("predict", request_id = %request_id);
        let _guard = span.enter();

        let Some(classifier) = bundle.classifier.as_ref() else {
            return Prediction {
                result: self.standin.score(request),
                source: PredictionSource::StandIn,
                feature_warnings: 0,
            };
        };

        let features = self.pipeline.prepare(request, bundle);
        let feature_warnings = features.warnings.len();

        match self.classify(classifier, &features, bundle) {
            Ok(result) => {
                debug!(
                    crop = %result.predicted_crop,
                    confidence = result.confidence,
                    "Prediction complete"
                );
                Prediction {
                    result,
                    source: PredictionSource::Classifier,
                    feature_warnings,
                }
            }
            Err(e) => {
                error!(
                    error = %e,
                    model_type = %classifier.model_type(),
                    "Inference failed, falling back to stand-in scorer"
                );
                Prediction {
                    result: self.standin.score(request),
                    source: PredictionSource::Fallback,
                    feature_warnings,
                }
            }
        }
    }

    /// Classifier result for a request, without any fallback
    pub fn probe(&self, request: &PredictionRequest, bundle: &ModelBundle) -> Result<PredictionResult, InferenceError> {
        let classifier = bundle
            .classifier
            .as_ref()
            .ok_or_else(|| InferenceError::Backend("no classifier loaded".into()))?;
        let features = self.pipeline.prepare(request, bundle);
        self.classify(classifier, &features, bundle)
    }

    fn classify(
        &self,
        classifier: &LoadedClassifier,
        features: &FeatureVector,
        bundle: &ModelBundle,
    ) -> Result<PredictionResult, InferenceError> {
        if let Some(expected) = classifier.n_features() {
            if expected != features.len() {
                warn!(
                    expected = expected,
                    actual = features.len(),
                    "Feature vector does not match model input width"
                );
                return Err(InferenceError::ShapeMismatch {
                    expected,
                    actual: features.len(),
                });
            }
        }

        let accuracy = bundle.metadata.accuracy_percent();
        let top_3 = match classifier {
            LoadedClassifier::Probabilistic(model) => {
                let probabilities = model.predict_proba(&features.values)?;
                rank(model.classes(), &probabilities, bundle)?
            }
            LoadedClassifier::Deterministic(model) => {
                let label = model.predict(&features.values)?;
                vec![CropPrediction::new(bundle.decode_class(&label), 100.0)]
            }
        };

        PredictionResult::from_ranking(top_3, accuracy, false).ok_or(InferenceError::NoClasses)
    }
}

impl Default for Predictor {
    fn default() -> Self {
        Self::new()
    }
}

/// Best classes by probability, decoded and expressed in percent. Equal
/// probabilities keep class order.
fn rank(
    classes: &[ClassLabel],
    probabilities: &[f64],
    bundle: &ModelBundle,
) -> Result<Vec<CropPrediction>, InferenceError> {
    if classes.is_empty() {
        return Err(InferenceError::NoClasses);
    }
    if classes.len() != probabilities.len() {
        return Err(InferenceError::ProbabilityWidth {
            expected: classes.len(),
            actual: probabilities.len(),
        });
    }
    if probabilities.iter().any(|p| !p.is_finite()) {
        return Err(InferenceError::NonFinite);
    }

    let mut order: Vec<usize> = (0..classes.len()).collect();
    order.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]));

    Ok(order
        .into_iter()
        .take(TOP_K)
        .map(|i| {
            let percent = round2(probabilities[i] * 100.0).clamp(0.0, 100.0);
            CropPrediction::new(bundle.decode_class(&classes[i]), percent)
        })
        .collect())
}
