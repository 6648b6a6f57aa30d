//! Crop Recommendation Service - Main Entry Point
//!
//! Loads the model bundle, then serves recommendations over HTTP until
//! Ctrl-C.

use anyhow::Result;
use crop_recommendation_service::{
    config::{AppConfig, LoggingConfig},
    metrics::{MetricsReporter, ServiceMetrics},
    server::{self, AppState},
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` takes precedence; the configured level applies only without it
fn log_filter(rust_log: Option<&str>, level: &str) -> Result<EnvFilter> {
    match rust_log {
        Some(directives) if !directives.trim().is_empty() => Ok(EnvFilter::try_new(directives)?),
        _ => Ok(EnvFilter::try_new(level)?
            .add_directive(format!("crop_recommendation_service={}", level).parse()?)),
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = log_filter(rust_log.as_deref(), &logging.level)?;

    if logging.format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging)?;

    info!("Starting Crop Recommendation Service");
    info!(
        model_path = %config.model.path,
        lazy_load = config.model.lazy_load,
        ph_policy = ?config.validation.ph_policy,
        "Configuration loaded"
    );

    let metrics = Arc::new(ServiceMetrics::new());
    let report_interval = config.metrics.report_interval_secs;
    let state = Arc::new(AppState::new(config, metrics.clone()));

    if !state.config.model.lazy_load {
        let bundle = state.load_bundle().await;
        let layout = state.predictor.pipeline().layout(&bundle);
        info!(
            model_type = %bundle.model_type(),
            test_mode = bundle.is_standin(),
            features = layout.columns.len(),
            column_source = ?layout.column_source,
            nutrient_unit = %layout.unit,
            unit_source = ?layout.unit_source,
            "Feature layout resolved"
        );
    } else {
        info!("Model bundle will load on first request");
    }

    let reporter = MetricsReporter::new(metrics.clone(), report_interval);
    tokio::spawn(reporter.start());

    server::run(state).await?;

    info!("Service shutting down...");
    metrics.print_summary();

    Ok(())
}
