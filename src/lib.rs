//! Crop Recommendation Service Library
//!
//! Serves a pre-trained crop classifier over HTTP: requests are validated,
//! turned into the model's feature layout, classified and shaped into a
//! ranked top-3 recommendation. Without a usable model the service keeps
//! answering from a rule-based stand-in scorer.

pub mod config;
pub mod feature_extractor;
pub mod metrics;
pub mod models;
pub mod server;
pub mod types;

pub use config::AppConfig;
pub use feature_extractor::FeaturePipeline;
pub use models::inference::Predictor;
pub use models::loader::{ModelBundle, ModelLoader};
pub use server::{create_router, AppState};
pub use types::{PredictionRequest, PredictionResponse, PredictionResult};
