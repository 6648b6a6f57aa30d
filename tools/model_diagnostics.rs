//! Model Bundle Diagnostics
//!
//! Loads a model bundle the way the service does, reports what it contains
//! and probes the classifier with a random feature vector.
//!
//! Usage: model_diagnostics [BUNDLE_PATH] [--allow-deterministic]

use anyhow::{bail, Context, Result};
use crop_recommendation_service::config::AppConfig;
use crop_recommendation_service::models::classifier::{ClassLabel, LoadedClassifier};
use crop_recommendation_service::models::loader::{ModelBundle, ModelLoader};
use crop_recommendation_service::models::inference::Predictor;
use crop_recommendation_service::types::PredictionRequest;
use rand::Rng;
use std::path::PathBuf;
use tracing::{error, info, warn};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("model_diagnostics=info".parse()?)
                .add_directive("crop_recommendation_service=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let allow_deterministic = args.iter().any(|a| a == "--allow-deterministic");
    let path = match args.iter().find(|a| !a.starts_with("--")) {
        Some(path) => PathBuf::from(path),
        None => PathBuf::from(AppConfig::load()?.model.path),
    };

    info!(path = %path.display(), "Inspecting model bundle");
    let size = std::fs::metadata(&path)
        .with_context(|| format!("Cannot stat {}", path.display()))?
        .len();
    info!(bytes = size, "Bundle file found");

    let loader = ModelLoader::new().allow_deterministic(allow_deterministic);
    info!(versions = ?loader.supported_versions(), "Supported format versions");
    let bundle = loader
        .load(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    report(&bundle);
    probe(&bundle)?;

    let result = Predictor::new().predict(&PredictionRequest::sample(), &bundle);
    info!(
        crop = %result.predicted_crop,
        confidence = result.confidence,
        top_3 = ?result.top_3_predictions,
        test_mode = result.test_mode,
        "Canned request prediction"
    );

    Ok(())
}

fn report(bundle: &ModelBundle) {
    let Some(classifier) = bundle.classifier.as_ref() else {
        warn!("Bundle has no classifier");
        return;
    };

    info!(
        format_version = ?bundle.format_version,
        model_type = %classifier.model_type(),
        predict_proba = classifier.is_probabilistic(),
        n_features = ?classifier.n_features(),
        "Classifier"
    );
    let classes: Vec<String> = classifier.classes().iter().map(ClassLabel::to_string).collect();
    info!(count = classes.len(), classes = ?classes, "Classes");

    match &bundle.target_encoder {
        Some(encoder) => info!(classes = ?encoder.classes(), "Target encoder"),
        None => warn!("No target encoder, classes are reported as-is"),
    }
    for (feature, encoder) in &bundle.label_encoders {
        info!(feature = %feature, classes = encoder.len(), "Label encoder");
    }

    match bundle.expected_columns() {
        Some(columns) => info!(count = columns.len(), columns = ?columns, "Feature columns"),
        None => warn!("No feature columns, the default order will be used"),
    }
    info!(
        unit = ?bundle.nutrient_unit,
        accuracy = bundle.metadata.accuracy_percent(),
        training_date = %bundle.metadata.training_date,
        crops = bundle.metadata.crops_supported.len(),
        "Metadata"
    );
}

fn probe(bundle: &ModelBundle) -> Result<()> {
    let Some(classifier) = bundle.classifier.as_ref() else {
        return Ok(());
    };
    let width = classifier
        .n_features()
        .or_else(|| bundle.expected_columns().map(<[String]>::len))
        .unwrap_or(10);

    let mut rng = rand::thread_rng();
    let features: Vec<f64> = (0..width).map(|_| rng.gen_range(0.0..10.0)).collect();

    let label = match classifier {
        LoadedClassifier::Probabilistic(model) => {
            let probabilities = model.predict_proba(&features)?;
            let total: f64 = probabilities.iter().sum();
            info!(probabilities = ?probabilities, total = total, "Probe probabilities");
            if (total - 1.0).abs() > 1e-3 {
                warn!(total = total, "Probabilities do not sum to 1");
            }
            model.predict(&features)?
        }
        LoadedClassifier::Deterministic(model) => model.predict(&features)?,
    };

    let decoded = bundle.decode_class(&label);
    if let (ClassLabel::Code(code), Some(encoder)) = (&label, &bundle.target_encoder) {
        let decodable = usize::try_from(*code)
            .ok()
            .and_then(|i| encoder.inverse_transform(i))
            .is_some();
        if !decodable {
            error!(class = code, "Target encoder cannot decode probe result");
            bail!("class {} is not covered by the target encoder", code);
        }
    }
    info!(raw = %label, crop = %decoded, "Probe prediction");
    Ok(())
}
