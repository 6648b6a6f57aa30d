//! Type definitions for the crop recommendation service

pub mod prediction;
pub mod request;

pub use prediction::{CropPrediction, PredictionResponse, PredictionResult};
pub use request::{PredictionRequest, ValidationError};
