//! Prediction result structures

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// One ranked crop candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropPrediction {
    pub crop: String,
    /// Probability in percent (0 - 100)
    pub probability: f64,
}

impl CropPrediction {
    pub fn new(crop: impl Into<String>, probability: f64) -> Self {
        Self {
            crop: crop.into(),
            probability,
        }
    }
}

/// Outcome of a single recommendation, before HTTP shaping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predicted_crop: String,
    /// Confidence of the top-ranked crop in percent
    pub confidence: f64,
    /// Up to three candidates, best first
    pub top_3_predictions: Vec<CropPrediction>,
    /// Accuracy reported for the model that produced this result, in percent
    pub ml_model_accuracy: f64,
    /// Set when the stand-in scorer produced the result
    pub test_mode: bool,
}

impl PredictionResult {
    /// Build a result whose headline crop and confidence come from the
    /// first ranked candidate. Returns `None` when there are no candidates.
    pub fn from_ranking(
        top_3_predictions: Vec<CropPrediction>,
        ml_model_accuracy: f64,
        test_mode: bool,
    ) -> Option<Self> {
        let first = top_3_predictions.first()?;
        Some(Self {
            predicted_crop: first.crop.clone(),
            confidence: first.probability,
            top_3_predictions,
            ml_model_accuracy,
            test_mode,
        })
    }
}

/// JSON body returned by `POST /predict-crop`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub success: bool,
    pub predicted_crop: String,
    pub confidence: f64,
    pub top_3_predictions: Vec<CropPrediction>,
    pub ml_model_accuracy: f64,
    pub processing_time_ms: f64,
    pub timestamp: DateTime<Local>,
    pub test_mode: bool,
}

impl PredictionResponse {
    pub fn new(result: PredictionResult, processing_time_ms: f64) -> Self {
        Self {
            success: true,
            predicted_crop: result.predicted_crop,
            confidence: result.confidence,
            top_3_predictions: result.top_3_predictions,
            ml_model_accuracy: result.ml_model_accuracy,
            processing_time_ms: round2(processing_time_ms),
            timestamp: Local::now(),
            test_mode: result.test_mode,
        }
    }
}

/// Round to two decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(33.333333), 33.33);
        assert_eq!(round2(66.666666), 66.67);
        assert_eq!(round2(0.0), 0.0);
    }

    #[test]
    fn test_from_ranking_uses_first_candidate() {
        let result = PredictionResult::from_ranking(
            vec![
                CropPrediction::new("Rice", 61.5),
                CropPrediction::new("Maize", 20.0),
            ],
            88.0,
            false,
        )
        .unwrap();

        assert_eq!(result.predicted_crop, "Rice");
        assert_eq!(result.confidence, 61.5);
        assert!(PredictionResult::from_ranking(Vec::new(), 88.0, false).is_none());
    }

    #[test]
    fn test_response_serialization() {
        let result = PredictionResult::from_ranking(
            vec![CropPrediction::new("Chili", 100.0)],
            65.0,
            true,
        )
        .unwrap();
        let response = PredictionResponse::new(result, 1.23456);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["predicted_crop"], "Chili");
        assert_eq!(json["processing_time_ms"], 1.23);
        assert_eq!(json["top_3_predictions"][0]["crop"], "Chili");
        assert!(json["timestamp"].is_string());
    }
}
