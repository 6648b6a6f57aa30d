//! Request metrics and periodic summaries for the recommendation service.

use crate::models::inference::PredictionSource;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Processing times kept for percentile estimates
const TIMING_WINDOW: usize = 10_000;

/// Metrics collector for the HTTP service
pub struct ServiceMetrics {
    /// Predictions served, whatever produced them
    pub predictions: AtomicU64,
    /// Predictions answered by the stand-in because no classifier is loaded
    pub standin_predictions: AtomicU64,
    /// Predictions where the classifier failed and the stand-in answered
    pub inference_fallbacks: AtomicU64,
    /// Requests rejected before reaching the pipeline
    pub validation_rejections: AtomicU64,
    /// Recovered feature warnings (unseen categories, missing columns)
    pub feature_warnings: AtomicU64,
    /// Processing times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Predicted crop counts
    crops: RwLock<BTreeMap<String, u64>>,
    start_time: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            predictions: AtomicU64::new(0),
            standin_predictions: AtomicU64::new(0),
            inference_fallbacks: AtomicU64::new(0),
            validation_rejections: AtomicU64::new(0),
            feature_warnings: AtomicU64::new(0),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            crops: RwLock::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record a served prediction
    pub fn record_prediction(
        &self,
        processing_time: Duration,
        crop: &str,
        source: PredictionSource,
        feature_warnings: usize,
    ) {
        self.predictions.fetch_add(1, Ordering::Relaxed);
        self.feature_warnings
            .fetch_add(feature_warnings as u64, Ordering::Relaxed);
        match source {
            PredictionSource::Classifier => {}
            PredictionSource::StandIn => {
                self.standin_predictions.fetch_add(1, Ordering::Relaxed);
            }
            PredictionSource::Fallback => {
                self.inference_fallbacks.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            if times.len() > TIMING_WINDOW {
                times.drain(0..TIMING_WINDOW / 2);
            }
        }

        if let Ok(mut crops) = self.crops.write() {
            *crops.entry(crop.to_string()).or_insert(0) += 1;
        }
    }

    pub fn record_rejection(&self) {
        self.validation_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_processing_stats(&self) -> ProcessingStats {
        let Ok(times) = self.processing_times.read() else {
            return ProcessingStats::default();
        };
        if times.is_empty() {
            return ProcessingStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();
        let percentile = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: percentile(0.50),
            p95_us: percentile(0.95),
            p99_us: percentile(0.99),
            max_us: sorted[count - 1],
        }
    }

    pub fn get_crop_counts(&self) -> BTreeMap<String, u64> {
        self.crops.read().map(|c| c.clone()).unwrap_or_default()
    }

    /// Predictions per second since startup
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.predictions.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            predictions: self.predictions.load(Ordering::Relaxed),
            standin_predictions: self.standin_predictions.load(Ordering::Relaxed),
            inference_fallbacks: self.inference_fallbacks.load(Ordering::Relaxed),
            validation_rejections: self.validation_rejections.load(Ordering::Relaxed),
            feature_warnings: self.feature_warnings.load(Ordering::Relaxed),
            throughput_per_sec: self.get_throughput(),
            processing: self.get_processing_stats(),
            crops: self.get_crop_counts(),
        }
    }

    /// Log summary statistics
    pub fn print_summary(&self) {
        let snapshot = self.snapshot();
        let processing = &snapshot.processing;

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║        CROP RECOMMENDATION SERVICE - METRICS SUMMARY         ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Predictions Served:     {:>8}  │  Throughput: {:>6.2} req/s ║",
            snapshot.predictions, snapshot.throughput_per_sec
        );
        info!(
            "║ Stand-in: {:>8}  │  Fallbacks: {:>8}  │  Rejected: {:>6} ║",
            snapshot.standin_predictions, snapshot.inference_fallbacks, snapshot.validation_rejections
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Processing Time (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5} ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Predicted Crops:                                             ║");
        for (crop, count) in &snapshot.crops {
            let pct = if snapshot.predictions > 0 {
                (*count as f64 / snapshot.predictions as f64) * 100.0
            } else {
                0.0
            };
            let bar: String = "█".repeat(((pct / 5.0) as usize).min(20));
            info!("║   {:12}: {:>6} ({:>5.1}%) {}", crop, count, pct, bar);
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Point-in-time copy of the counters, served at `GET /metrics`
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub predictions: u64,
    pub standin_predictions: u64,
    pub inference_fallbacks: u64,
    pub validation_rejections: u64,
    pub feature_warnings: u64,
    pub throughput_per_sec: f64,
    pub processing: ProcessingStats,
    pub crops: BTreeMap<String, u64>,
}

/// Logs a metrics summary at a fixed interval
pub struct MetricsReporter {
    metrics: Arc<ServiceMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<ServiceMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Run the periodic reporting loop. Returns at once when the interval is 0.
    pub async fn start(self) {
        if self.interval_secs == 0 {
            return;
        }
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // First tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
