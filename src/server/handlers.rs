//! HTTP request handlers

use crate::metrics::MetricsSnapshot;
use crate::models::loader::ModelBundle;
use crate::server::error::ServiceError;
use crate::server::page;
use crate::server::state::AppState;
use crate::types::prediction::{round2, PredictionResponse};
use crate::types::request::{PredictionRequest, ValidationError};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::Html;
use axum::Json;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// pH values probed by `/debug-model`
const PROBE_PH: [f64; 5] = [5.0, 6.0, 6.8, 7.5, 8.5];

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub test_mode: bool,
    pub model_path: String,
    pub model_exists: bool,
    pub timestamp: DateTime<Local>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelInfoResponse {
    pub model_type: String,
    /// Percent
    pub model_accuracy: f64,
    pub crops_supported: Vec<String>,
    pub training_date: String,
    pub model_path: String,
    pub test_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_version: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TestPredictionResponse {
    pub message: String,
    pub prediction_result: PredictionResponse,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DebugSample {
    pub i: usize,
    pub soil_ph: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DebugModelResponse {
    /// `error`, `warning` (every probe agreed) or `success`
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub all_predictions_same: bool,
    pub unique_predictions: Vec<String>,
    pub samples: Vec<DebugSample>,
    pub model_loaded: bool,
    pub target_encoder_loaded: bool,
    pub label_encoders_count: usize,
    pub feature_columns_count: usize,
    pub model_file: String,
    pub model_file_exists: bool,
}

/// GET / - HTML status page
pub async fn root(State(state): State<Arc<AppState>>) -> Html<String> {
    let model_loaded = state
        .loaded_bundle()
        .is_some_and(|bundle| !bundle.is_standin());
    Html(page::render(model_loaded))
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let model_loaded = state
        .loaded_bundle()
        .is_some_and(|bundle| !bundle.is_standin());

    Json(HealthResponse {
        status: "healthy".to_string(),
        model_loaded,
        test_mode: !model_loaded,
        model_path: state.model_path().display().to_string(),
        model_exists: state.model_exists(),
        timestamp: Local::now(),
        message: "Crop Recommendation API is running".to_string(),
    })
}

/// GET /model-info
pub async fn model_info(State(state): State<Arc<AppState>>) -> Result<Json<ModelInfoResponse>, ServiceError> {
    let bundle = state
        .bundle()
        .await
        .ok_or(ServiceError::NotReady("Model not loaded"))?;

    Ok(Json(ModelInfoResponse {
        model_type: bundle.model_type().to_string(),
        model_accuracy: bundle.metadata.accuracy_percent(),
        crops_supported: bundle.metadata.crops_supported.clone(),
        training_date: bundle.metadata.training_date.clone(),
        model_path: state.model_path().display().to_string(),
        test_mode: bundle.is_standin(),
        format_version: bundle.format_version,
    }))
}

/// POST /predict-crop
pub async fn predict_crop(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PredictionRequest>, JsonRejection>,
) -> Result<Json<PredictionResponse>, ServiceError> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            state.metrics.record_rejection();
            warn!(error = %rejection.body_text(), "Rejected malformed request");
            return Err(ValidationError::Malformed(rejection.body_text()).into());
        }
    };

    if let Err(e) = request.validate(state.config.validation.ph_policy) {
        state.metrics.record_rejection();
        warn!(error = %e, "Rejected invalid request");
        return Err(e.into());
    }

    let bundle = state
        .bundle()
        .await
        .ok_or(ServiceError::NotReady("Model not initialized"))?;

    let response = run_prediction(&state, request, bundle).await?;
    Ok(Json(response))
}

/// GET /test - canned request through the full pipeline
pub async fn test_prediction(State(state): State<Arc<AppState>>) -> Result<Json<TestPredictionResponse>, ServiceError> {
    let bundle = state
        .bundle()
        .await
        .ok_or(ServiceError::NotReady("Model not initialized"))?;

    let prediction_result = run_prediction(&state, PredictionRequest::sample(), bundle).await?;
    Ok(Json(TestPredictionResponse {
        message: "Test prediction successful".to_string(),
        prediction_result,
    }))
}

/// GET /debug-model - checks whether varied inputs produce varied crops
pub async fn debug_model(State(state): State<Arc<AppState>>) -> Json<DebugModelResponse> {
    let model_file = state.model_path().display().to_string();
    let model_file_exists = state.model_exists();

    let Some(bundle) = state.bundle().await else {
        return Json(DebugModelResponse {
            status: "error".to_string(),
            message: Some("Model not initialized".to_string()),
            all_predictions_same: false,
            unique_predictions: Vec::new(),
            samples: Vec::new(),
            model_loaded: false,
            target_encoder_loaded: false,
            label_encoders_count: 0,
            feature_columns_count: 0,
            model_file,
            model_file_exists,
        });
    };

    let mut response = DebugModelResponse {
        status: "error".to_string(),
        message: None,
        all_predictions_same: false,
        unique_predictions: Vec::new(),
        samples: Vec::new(),
        model_loaded: !bundle.is_standin(),
        target_encoder_loaded: bundle.target_encoder.is_some(),
        label_encoders_count: bundle.label_encoders.len(),
        feature_columns_count: bundle.feature_columns.len(),
        model_file,
        model_file_exists,
    };

    if bundle.is_standin() {
        response.message = Some("Model not loaded".to_string());
        return Json(response);
    }

    let worker = Arc::clone(&state);
    let probed = Arc::clone(&bundle);
    match tokio::task::spawn_blocking(move || probe_samples(&worker, &probed)).await {
        Ok(samples) => response.samples = samples,
        Err(e) => {
            warn!(error = %e, "Model probe task failed");
            response.message = Some(format!("Model probe failed: {}", e));
            return Json(response);
        }
    }
    let unique: BTreeSet<&str> = response
        .samples
        .iter()
        .filter_map(|s| s.crop.as_deref())
        .collect();
    response.all_predictions_same = unique.len() == 1 && response.samples.len() > 1;
    response.unique_predictions = unique.into_iter().map(str::to_string).collect();
    response.status = if response.all_predictions_same {
        "warning".to_string()
    } else {
        "success".to_string()
    };

    info!(
        unique = response.unique_predictions.len(),
        all_same = response.all_predictions_same,
        "Model probe complete"
    );
    Json(response)
}

/// GET /metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn run_prediction(
    state: &Arc<AppState>,
    request: PredictionRequest,
    bundle: Arc<ModelBundle>,
) -> Result<PredictionResponse, ServiceError> {
    let start = Instant::now();

    let worker = Arc::clone(state);
    let prediction = tokio::task::spawn_blocking(move || worker.predictor.run(&request, &bundle))
        .await
        .map_err(|e| ServiceError::Prediction(e.to_string()))?;

    let elapsed = start.elapsed();
    state.metrics.record_prediction(
        elapsed,
        &prediction.result.predicted_crop,
        prediction.source,
        prediction.feature_warnings,
    );

    info!(
        crop = %prediction.result.predicted_crop,
        confidence = prediction.result.confidence,
        test_mode = prediction.result.test_mode,
        processing_time_us = elapsed.as_micros() as u64,
        "Prediction served"
    );

    Ok(PredictionResponse::new(
        prediction.result,
        elapsed.as_secs_f64() * 1000.0,
    ))
}

fn probe_request(ph: f64) -> PredictionRequest {
    PredictionRequest::new(
        "Red Yellow Podzolic (RYP)",
        ph,
        10.0 + ph * 2.0,
        8.0 + ph,
        120.0 + ph * 5.0,
        "WM1a",
        "Maha",
    )
    .with_climate(22.0 + (ph - 6.5) * 1.5, 1000.0 + (ph - 6.5) * 30.0, 70.0)
}

fn probe_samples(state: &AppState, bundle: &ModelBundle) -> Vec<DebugSample> {
    PROBE_PH
        .iter()
        .enumerate()
        .map(|(i, &ph)| match state.predictor.probe(&probe_request(ph), bundle) {
            Ok(result) => DebugSample {
                i,
                soil_ph: ph,
                crop: Some(result.predicted_crop),
                confidence: Some(round2(result.confidence)),
                error: None,
            },
            Err(e) => DebugSample {
                i,
                soil_ph: ph,
                crop: None,
                confidence: None,
                error: Some(e.to_string()),
            },
        })
        .collect()
}
