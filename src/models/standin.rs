//! Rule-based scorer used while no classifier is available.
//!
//! Each crop has an optimal pH and temperature range. A crop scores
//! `0.6 * fit(pH) + 0.4 * fit(temperature)` plus small nutrient bonuses, where
//! `fit` is 1 inside the range and decays linearly to 0 over
//! [`TOLERANCE`] units outside it. The best three scores are normalized to
//! percentages.

use crate::feature_extractor::AgronomicInputs;
use crate::types::prediction::{round2, CropPrediction, PredictionResult};
use crate::types::request::PredictionRequest;
use tracing::warn;

/// Accuracy reported for stand-in results, in percent
pub const STANDIN_ACCURACY_PERCENT: f64 = 65.0;

/// Distance outside the optimal range at which the fit reaches zero
const TOLERANCE: f64 = 3.0;

/// Agronomic profile of one crop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropProfile {
    pub crop: &'static str,
    pub ph: (f64, f64),
    pub temperature: (f64, f64),
}

const fn profile(crop: &'static str, ph: (f64, f64), temperature: (f64, f64)) -> CropProfile {
    CropProfile { crop, ph, temperature }
}

/// Profiles in ranking order; equal scores keep this order
pub const CROP_PROFILES: [CropProfile; 12] = [
    profile("Rice", (5.5, 7.0), (20.0, 34.0)),
    profile("Maize", (5.8, 7.5), (18.0, 32.0)),
    profile("Tomato", (6.0, 7.0), (20.0, 30.0)),
    profile("Potato", (5.0, 6.5), (15.0, 22.0)),
    profile("Red Onion", (6.0, 7.5), (20.0, 30.0)),
    profile("Big Onion", (6.0, 7.5), (20.0, 30.0)),
    profile("Carrot", (5.8, 6.8), (16.0, 24.0)),
    profile("Cabbage", (6.0, 7.5), (15.0, 20.0)),
    profile("Chili", (6.0, 7.5), (20.0, 30.0)),
    profile("Cucumber", (5.5, 7.0), (18.0, 30.0)),
    profile("Eggplant", (5.5, 6.6), (22.0, 30.0)),
    profile("Bean", (6.0, 7.5), (18.0, 28.0)),
];

fn range_fit(x: f64, (lo, hi): (f64, f64)) -> f64 {
    if (lo..=hi).contains(&x) {
        return 1.0;
    }
    let distance = (x - lo).abs().min((x - hi).abs());
    (1.0 - distance / TOLERANCE).max(0.0)
}

/// Scores requests against [`CROP_PROFILES`]
#[derive(Debug, Clone)]
pub struct StandInScorer {
    profiles: Vec<CropProfile>,
}

impl StandInScorer {
    pub fn new() -> Self {
        Self {
            profiles: CROP_PROFILES.to_vec(),
        }
    }

    /// Raw score of one profile
    pub fn profile_score(profile: &CropProfile, inputs: &AgronomicInputs) -> f64 {
        let fit = 0.6 * range_fit(inputs.soil_ph, profile.ph)
            + 0.4 * range_fit(inputs.temperature, profile.temperature);
        let bonus = 0.1 * (inputs.nitrogen_ppm / 30.0).min(1.0)
            + 0.05 * (inputs.phosphorus_ppm / 20.0).min(1.0)
            + 0.05 * (inputs.potassium_ppm / 200.0).min(1.0);
        fit + bonus
    }

    /// Rank crops for a request; always `test_mode`
    pub fn score(&self, request: &PredictionRequest) -> PredictionResult {
        warn!("Using stand-in scorer, no classifier available");
        let inputs = AgronomicInputs::from_request(request);

        let mut scored: Vec<(&'static str, f64)> = self
            .profiles
            .iter()
            .map(|p| (p.crop, Self::profile_score(p, &inputs)))
            .collect();
        // sort_by is stable, so ties keep profile order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(3);

        let total: f64 = scored.iter().map(|(_, s)| s).sum();
        let total = if total > 0.0 { total } else { 1.0 };
        let top_3: Vec<CropPrediction> = scored
            .into_iter()
            .map(|(crop, s)| CropPrediction::new(crop, round2(100.0 * s / total)))
            .collect();

        PredictionResult::from_ranking(top_3, STANDIN_ACCURACY_PERCENT, true).unwrap_or_else(|| {
            // Only reachable with an empty profile list
            PredictionResult {
                predicted_crop: "Unknown".to_string(),
                confidence: 0.0,
                top_3_predictions: Vec::new(),
                ml_model_accuracy: STANDIN_ACCURACY_PERCENT,
                test_mode: true,
            }
        })
    }
}

impl Default for StandInScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_fit() {
        assert_eq!(range_fit(6.0, (5.5, 7.0)), 1.0);
        assert!((range_fit(8.5, (5.5, 7.0)) - 0.5).abs() < 1e-12);
        assert_eq!(range_fit(11.0, (5.5, 7.0)), 0.0);
        assert!((range_fit(4.0, (5.5, 7.0)) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_canned_request_prefers_matching_ph() {
        let result = StandInScorer::new().score(&PredictionRequest::sample());

        assert!(result.test_mode);
        assert_eq!(result.ml_model_accuracy, 65.0);
        assert_eq!(result.top_3_predictions.len(), 3);
        assert_eq!(result.predicted_crop, result.top_3_predictions[0].crop);

        let top = CROP_PROFILES
            .iter()
            .find(|p| p.crop == result.predicted_crop)
            .unwrap();
        assert!((top.ph.0..=top.ph.1).contains(&6.5));

        // Rice, Maize and Tomato all fit perfectly; profile order breaks the tie
        let crops: Vec<&str> = result.top_3_predictions.iter().map(|p| p.crop.as_str()).collect();
        assert_eq!(crops, vec!["Rice", "Maize", "Tomato"]);
        assert_eq!(result.confidence, 33.33);
    }

    #[test]
    fn test_cool_acidic_conditions_favor_potato() {
        let mut request = PredictionRequest::sample().with_climate(16.0, 1500.0, 80.0);
        request.soil_ph = 5.2;

        let result = StandInScorer::new().score(&request);
        assert_eq!(result.predicted_crop, "Potato");
    }

    #[test]
    fn test_probabilities_are_bounded() {
        let mut request = PredictionRequest::sample().with_climate(-40.0, 0.0, 0.0);
        request.soil_ph = 3.0;
        request.nitrogen_ppm = 0.0;
        request.phosphorus_ppm = 0.0;
        request.potassium_ppm = 0.0;

        let result = StandInScorer::new().score(&request);
        let total: f64 = result.top_3_predictions.iter().map(|p| p.probability).sum();
        assert!(total <= 100.0 + 1e-9);
        assert!(result
            .top_3_predictions
            .iter()
            .all(|p| (0.0..=100.0).contains(&p.probability)));
    }
}
