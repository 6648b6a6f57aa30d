//! Crop prediction request and its schema-level validation

use crate::config::PhPolicy;
use serde::{Deserialize, Serialize};

/// Agronomically plausible soil pH range
pub const AGRONOMIC_PH_RANGE: (f64, f64) = (3.0, 10.0);

/// Full pH scale accepted by the schema
pub const SCHEMA_PH_RANGE: (f64, f64) = (0.0, 14.0);

/// Soil and climate observations submitted for a recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub soil_type: String,
    pub soil_ph: f64,
    pub nitrogen_ppm: f64,
    pub phosphorus_ppm: f64,
    pub potassium_ppm: f64,
    pub agro_ecological_zone: String,
    pub cultivation_season: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub land_area_hectares: Option<f64>,
    /// Air temperature in °C
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Rainfall in mm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rainfall: Option<f64>,
    /// Relative humidity in percent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
}

/// A request field outside its declared bounds
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field} must be >= 0, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("Soil pH should be between 3.0 and 10.0 for agricultural purposes, got {0}")]
    ImplausiblePh(f64),

    #[error("Malformed request body: {0}")]
    Malformed(String),
}

impl PredictionRequest {
    /// Create a request with the required fields only
    pub fn new(
        soil_type: impl Into<String>,
        soil_ph: f64,
        nitrogen_ppm: f64,
        phosphorus_ppm: f64,
        potassium_ppm: f64,
        agro_ecological_zone: impl Into<String>,
        cultivation_season: impl Into<String>,
    ) -> Self {
        Self {
            soil_type: soil_type.into(),
            soil_ph,
            nitrogen_ppm,
            phosphorus_ppm,
            potassium_ppm,
            agro_ecological_zone: agro_ecological_zone.into(),
            cultivation_season: cultivation_season.into(),
            district: None,
            land_area_hectares: None,
            temperature: None,
            rainfall: None,
            humidity: None,
        }
    }

    /// The canned request used by the smoke-test endpoint
    pub fn sample() -> Self {
        Self::new("Red Yellow Podzolic (RYP)", 6.5, 25.0, 18.0, 200.0, "DL1a", "Maha")
    }

    pub fn with_climate(mut self, temperature: f64, rainfall: f64, humidity: f64) -> Self {
        self.temperature = Some(temperature);
        self.rainfall = Some(rainfall);
        self.humidity = Some(humidity);
        self
    }

    /// Check every numeric field against its schema bounds.
    ///
    /// Under [`PhPolicy::Strict`] the soil pH must also fall inside the
    /// agronomic range; under [`PhPolicy::Lenient`] the feature pipeline
    /// clamps it instead.
    pub fn validate(&self, ph_policy: PhPolicy) -> Result<(), ValidationError> {
        within("soil_ph", self.soil_ph, SCHEMA_PH_RANGE.0, SCHEMA_PH_RANGE.1)?;
        if ph_policy == PhPolicy::Strict
            && !(AGRONOMIC_PH_RANGE.0..=AGRONOMIC_PH_RANGE.1).contains(&self.soil_ph)
        {
            return Err(ValidationError::ImplausiblePh(self.soil_ph));
        }

        non_negative("nitrogen_ppm", self.nitrogen_ppm)?;
        non_negative("phosphorus_ppm", self.phosphorus_ppm)?;
        non_negative("potassium_ppm", self.potassium_ppm)?;

        if let Some(area) = self.land_area_hectares {
            non_negative("land_area_hectares", area)?;
        }
        if let Some(temperature) = self.temperature {
            within("temperature", temperature, -50.0, 60.0)?;
        }
        if let Some(rainfall) = self.rainfall {
            non_negative("rainfall", rainfall)?;
        }
        if let Some(humidity) = self.humidity {
            within("humidity", humidity, 0.0, 100.0)?;
        }
        Ok(())
    }
}

fn within(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::Negative { field, value })
    }
}
