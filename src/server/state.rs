//! Shared application state injected into every handler

use crate::config::AppConfig;
use crate::metrics::ServiceMetrics;
use crate::models::inference::Predictor;
use crate::models::loader::{ModelBundle, ModelLoader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info};

/// Process-wide state. The model bundle is set at most once and is
/// read-only afterwards.
pub struct AppState {
    pub config: AppConfig,
    pub predictor: Predictor,
    pub metrics: Arc<ServiceMetrics>,
    model_path: PathBuf,
    loader: Arc<ModelLoader>,
    bundle: OnceCell<Arc<ModelBundle>>,
}

impl AppState {
    /// State with no bundle yet; call [`AppState::load_bundle`] or enable
    /// `model.lazy_load`
    pub fn new(config: AppConfig, metrics: Arc<ServiceMetrics>) -> Self {
        Self {
            model_path: PathBuf::from(&config.model.path),
            loader: Arc::new(ModelLoader::from_config(&config.model)),
            predictor: Predictor::new(),
            metrics,
            bundle: OnceCell::new(),
            config,
        }
    }

    /// State around an already loaded bundle
    pub fn with_bundle(config: AppConfig, metrics: Arc<ServiceMetrics>, bundle: ModelBundle) -> Self {
        let state = Self::new(config, metrics);
        // A fresh cell cannot already be set
        let _ = state.bundle.set(Arc::new(bundle));
        state
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn model_exists(&self) -> bool {
        self.model_path.exists()
    }

    /// Load the bundle unless already loaded. Concurrent callers share a
    /// single load, which runs on the blocking pool.
    pub async fn load_bundle(&self) -> Arc<ModelBundle> {
        self.bundle
            .get_or_init(|| async {
                let loader = self.loader.clone();
                let path = self.model_path.clone();
                let bundle = tokio::task::spawn_blocking(move || loader.load_or_standin(&path))
                    .await
                    .unwrap_or_else(|e| {
                        error!(error = %e, "Model load task failed, running in test mode");
                        ModelBundle::standin()
                    });
                info!(
                    model_type = %bundle.model_type(),
                    test_mode = bundle.is_standin(),
                    "Model bundle ready"
                );
                Arc::new(bundle)
            })
            .await
            .clone()
    }

    /// The bundle if it is loaded
    pub fn loaded_bundle(&self) -> Option<Arc<ModelBundle>> {
        self.bundle.get().cloned()
    }

    /// The bundle for a request: loaded on first use in lazy mode, `None`
    /// while an eagerly loaded bundle is not set yet
    pub async fn bundle(&self) -> Option<Arc<ModelBundle>> {
        if let Some(bundle) = self.loaded_bundle() {
            return Some(bundle);
        }
        if self.config.model.lazy_load {
            return Some(self.load_bundle().await);
        }
        None
    }
}
