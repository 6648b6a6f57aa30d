use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use crop_recommendation_service::config::{AppConfig, PhPolicy};
use crop_recommendation_service::metrics::ServiceMetrics;
use crop_recommendation_service::models::loader::{ModelBundle, ModelLoader};
use crop_recommendation_service::server::{create_router, AppState};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt;

fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/crop_model.json")
}

fn fixture_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.model.path = fixture_path().display().to_string();
    config
}

fn app_with_bundle(config: AppConfig, bundle: ModelBundle) -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState::with_bundle(
        config,
        Arc::new(ServiceMetrics::new()),
        bundle,
    ));
    (create_router(state.clone()), state)
}

fn fixture_app() -> (Router, Arc<AppState>) {
    let bundle = ModelLoader::new().load(fixture_path()).unwrap();
    app_with_bundle(fixture_config(), bundle)
}

fn standin_app() -> (Router, Arc<AppState>) {
    let mut config = AppConfig::default();
    config.model.path = "does/not/exist.json".to_string();
    app_with_bundle(config, ModelBundle::standin())
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn post_json(app: Router, uri: &str, body: String) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn sample_request() -> Value {
    json!({
        "soil_type": "Red Yellow Podzolic (RYP)",
        "soil_ph": 6.5,
        "nitrogen_ppm": 25,
        "phosphorus_ppm": 18,
        "potassium_ppm": 200,
        "agro_ecological_zone": "DL1a",
        "cultivation_season": "Maha"
    })
}

fn ranked(body: &Value) -> Vec<(String, f64)> {
    body["top_3_predictions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| {
            (
                p["crop"].as_str().unwrap().to_string(),
                p["probability"].as_f64().unwrap(),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_health_in_test_mode() {
    let (app, _) = standin_app();
    let (status, body) = get(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["model_loaded"], false);
    assert_eq!(body["test_mode"], true);
    assert_eq!(body["model_exists"], false);
    assert_eq!(body["message"], "Crop Recommendation API is running");
}

#[tokio::test]
async fn test_health_with_model() {
    let (app, _) = fixture_app();
    let (_, body) = get(app, "/health").await;

    assert_eq!(body["model_loaded"], true);
    assert_eq!(body["test_mode"], false);
    assert_eq!(body["model_exists"], true);
}

#[tokio::test]
async fn test_model_info() {
    let (app, _) = fixture_app();
    let (status, body) = get(app, "/model-info").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model_type"], "RandomForestClassifier");
    assert_eq!(body["model_accuracy"], 88.28);
    assert_eq!(body["training_date"], "2025-08-20");
    assert_eq!(body["crops_supported"].as_array().unwrap().len(), 4);
    assert_eq!(body["test_mode"], false);
    assert_eq!(body["format_version"], 2);

    let (app, _) = standin_app();
    let (_, body) = get(app, "/model-info").await;
    assert_eq!(body["model_type"], "N/A");
    assert_eq!(body["model_accuracy"], 65.0);
    assert_eq!(body["training_date"], "N/A");
    assert_eq!(body["test_mode"], true);
}

#[tokio::test]
async fn test_predict_with_model() {
    let (app, _) = fixture_app();
    let (status, body) = post_json(app, "/predict-crop", sample_request().to_string()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["test_mode"], false);
    assert_eq!(body["predicted_crop"], "Maize");
    assert_eq!(body["confidence"], 45.0);
    assert_eq!(body["ml_model_accuracy"], 88.28);
    assert_eq!(
        ranked(&body),
        vec![
            ("Maize".to_string(), 45.0),
            ("Tomato".to_string(), 30.0),
            ("Rice".to_string(), 17.5),
        ]
    );
    assert!(body["processing_time_ms"].as_f64().unwrap() >= 0.0);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_predict_is_repeatable() {
    let (app, _) = fixture_app();
    let mut request = sample_request();
    request["soil_ph"] = json!(5.5);
    request["temperature"] = json!(20.0);

    let (_, first) = post_json(app.clone(), "/predict-crop", request.to_string()).await;
    let (_, second) = post_json(app, "/predict-crop", request.to_string()).await;

    assert_eq!(first["predicted_crop"], "Potato");
    assert_eq!(ranked(&first), ranked(&second));
    assert_eq!(first["confidence"], second["confidence"]);
}

#[tokio::test]
async fn test_predict_unseen_categories_still_succeeds() {
    let (app, _) = fixture_app();
    let mut request = sample_request();
    request["soil_type"] = json!("Peat");
    request["agro_ecological_zone"] = json!("IU3");
    request["cultivation_season"] = json!("Monsoon");

    let (status, body) = post_json(app, "/predict-crop", request.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["test_mode"], false);
    assert_eq!(body["predicted_crop"], body["top_3_predictions"][0]["crop"]);
}

#[tokio::test]
async fn test_predict_without_model_uses_standin() {
    let (app, state) = standin_app();
    let (status, body) = post_json(app, "/predict-crop", sample_request().to_string()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["test_mode"], true);
    assert_eq!(body["ml_model_accuracy"], 65.0);
    assert_eq!(body["predicted_crop"], body["top_3_predictions"][0]["crop"]);
    assert_eq!(body["top_3_predictions"].as_array().unwrap().len(), 3);

    let snapshot = state.metrics.snapshot();
    assert_eq!(snapshot.predictions, 1);
    assert_eq!(snapshot.standin_predictions, 1);
}

#[tokio::test]
async fn test_implausible_ph_is_rejected() {
    let (app, state) = fixture_app();
    let mut request = sample_request();
    request["soil_ph"] = json!(12.0);

    let (status, body) = post_json(app, "/predict-crop", request.to_string()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().contains("Soil pH"));
    assert_eq!(state.metrics.snapshot().validation_rejections, 1);
}

#[tokio::test]
async fn test_lenient_policy_clamps_ph() {
    let mut config = fixture_config();
    config.validation.ph_policy = PhPolicy::Lenient;
    let bundle = ModelLoader::new().load(fixture_path()).unwrap();
    let (app, _) = app_with_bundle(config, bundle);

    let mut request = sample_request();
    request["soil_ph"] = json!(12.0);
    let (status, body) = post_json(app.clone(), "/predict-crop", request.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["test_mode"], false);

    // Beyond the pH scale is rejected under either policy
    request["soil_ph"] = json!(15.0);
    let (status, _) = post_json(app, "/predict-crop", request.to_string()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_out_of_range_fields_are_rejected() {
    let (app, _) = fixture_app();

    let mut request = sample_request();
    request["nitrogen_ppm"] = json!(-1.0);
    let (status, _) = post_json(app.clone(), "/predict-crop", request.to_string()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let mut request = sample_request();
    request["humidity"] = json!(140.0);
    let (status, body) = post_json(app, "/predict-crop", request.to_string()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().contains("humidity"));
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let (app, _) = fixture_app();

    let (status, body) = post_json(app.clone(), "/predict-crop", r#"{"soil_ph": 6.5}"#.to_string()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].is_string());

    let (status, _) = post_json(app, "/predict-crop", "not json".to_string()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_unloaded_bundle_is_unavailable() {
    let state = Arc::new(AppState::new(fixture_config(), Arc::new(ServiceMetrics::new())));
    let app = create_router(state);

    let (status, body) = get(app.clone(), "/model-info").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["detail"], "Model not loaded");

    let (status, _) = post_json(app.clone(), "/predict-crop", sample_request().to_string()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    // Health stays up
    let (status, body) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model_loaded"], false);
}

#[tokio::test]
async fn test_lazy_load_on_first_request() {
    let mut config = fixture_config();
    config.model.lazy_load = true;
    let state = Arc::new(AppState::new(config, Arc::new(ServiceMetrics::new())));
    let app = create_router(state.clone());
    assert!(state.loaded_bundle().is_none());

    let (status, body) = post_json(app, "/predict-crop", sample_request().to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["test_mode"], false);
    assert!(state.loaded_bundle().is_some());
}

#[tokio::test]
async fn test_eager_load_of_missing_model_falls_back() {
    let mut config = AppConfig::default();
    config.model.path = "does/not/exist.json".to_string();
    let state = Arc::new(AppState::new(config, Arc::new(ServiceMetrics::new())));

    let bundle = state.load_bundle().await;
    assert!(bundle.is_standin());

    let (_, body) = post_json(create_router(state), "/predict-crop", sample_request().to_string()).await;
    assert_eq!(body["test_mode"], true);
}

#[tokio::test]
async fn test_canned_prediction() {
    let (app, _) = standin_app();
    let (status, body) = get(app, "/test").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Test prediction successful");
    let result = &body["prediction_result"];
    assert_eq!(result["success"], true);
    assert_eq!(result["test_mode"], true);
    // Rice, Maize and Tomato all tolerate pH 6.5 and 25 °C
    assert_eq!(result["predicted_crop"], "Rice");
}

#[tokio::test]
async fn test_debug_model_reports_varied_predictions() {
    let (app, _) = fixture_app();
    let (status, body) = get(app, "/debug-model").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["all_predictions_same"], false);
    assert_eq!(body["unique_predictions"], json!(["Maize", "Potato"]));
    assert_eq!(body["samples"].as_array().unwrap().len(), 5);
    assert_eq!(body["model_loaded"], true);
    assert_eq!(body["target_encoder_loaded"], true);
    assert_eq!(body["label_encoders_count"], 3);
    assert_eq!(body["feature_columns_count"], 10);
}

#[tokio::test]
async fn test_debug_model_without_classifier() {
    let (app, _) = standin_app();
    let (_, body) = get(app, "/debug-model").await;

    assert_eq!(body["status"], "error");
    assert_eq!(body["model_loaded"], false);
    assert!(body["samples"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = fixture_app();
    post_json(app.clone(), "/predict-crop", sample_request().to_string()).await;
    post_json(app.clone(), "/predict-crop", sample_request().to_string()).await;

    let (status, body) = get(app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["predictions"], 2);
    assert_eq!(body["standin_predictions"], 0);
    assert_eq!(body["crops"]["Maize"], 2);
    assert_eq!(body["processing"]["count"], 2);
}

#[tokio::test]
async fn test_status_page() {
    let (app, _) = fixture_app();
    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let page = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(page.contains("Model Loaded"));
}
