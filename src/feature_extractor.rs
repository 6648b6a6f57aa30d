//! Feature preparation for crop recommendation model inference.
//!
//! Turns a [`PredictionRequest`] into the numeric vector the loaded classifier
//! was trained on: inputs are clamped to agronomic bounds, nutrients are
//! expressed in the unit the model expects, categorical fields are label
//! encoded and everything is laid out in the model's column order.

use crate::models::encoder::Encoded;
use crate::models::loader::ModelBundle;
use crate::types::request::{PredictionRequest, AGRONOMIC_PH_RANGE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, error, warn};

pub const DEFAULT_TEMPERATURE: f64 = 25.0;
pub const DEFAULT_RAINFALL: f64 = 1200.0;
pub const DEFAULT_HUMIDITY: f64 = 75.0;

/// pH used by the safe default vector
const SAFE_DEFAULT_PH: f64 = 7.0;

/// Sampling depth assumed for ppm to kg/ha conversion
const SOIL_DEPTH_CM: f64 = 20.0;
/// Bulk density in g/cm³ assumed for ppm to kg/ha conversion
const BULK_DENSITY: f64 = 1.3;

/// Training column names of the categorical encoders
pub const SOIL_TYPE_FEATURE: &str = "Soil Types";
pub const AEZ_FEATURE: &str = "Agro-Ecological Zones (AEZs)";
pub const SEASON_FEATURE: &str = "Cultivation Season";

/// Column order used when neither the bundle nor the model names its columns
pub const DEFAULT_COLUMNS: [&str; 10] = [
    "Temperature (°C)",
    "N (ppm)",
    "P (ppm)",
    "K (ppm)",
    "Soil pH",
    "Rainfall (mm)_avg",
    "Humidity (%)_avg",
    "Agro-Ecological Zones (AEZs)_encoded",
    "Cultivation Season_encoded",
    "Soil Types_encoded",
];

/// Convert a nutrient concentration in ppm to kg/ha of the topsoil layer
pub fn ppm_to_kg_per_ha(ppm: f64) -> f64 {
    ppm * SOIL_DEPTH_CM * BULK_DENSITY * 10.0
}

/// Unit the classifier expects nutrient columns in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NutrientUnit {
    #[serde(rename = "ppm")]
    Ppm,
    #[serde(rename = "kg/ha")]
    KgPerHa,
}

impl fmt::Display for NutrientUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NutrientUnit::Ppm => f.write_str("ppm"),
            NutrientUnit::KgPerHa => f.write_str("kg/ha"),
        }
    }
}

/// Where the column order came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSource {
    Bundle,
    Model,
    Default,
}

/// How the nutrient unit was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitSource {
    /// Declared by the bundle
    Explicit,
    /// A column name mentions kg/ha
    ColumnNames,
    /// Nothing indicated kg/ha
    Default,
}

/// Recovered problems reported alongside a feature vector
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeatureError {
    #[error("Unseen value '{value}' for '{feature}', encoded as {fallback}")]
    UnseenCategory {
        feature: String,
        value: String,
        fallback: usize,
    },

    #[error("Encoder not found for '{feature}', encoded as 0")]
    MissingEncoder { feature: String },

    #[error("Missing expected features (zero-filled): {0:?}")]
    MissingColumns(Vec<String>),

    #[error("Feature '{column}' is not a finite number")]
    NonFinite { column: String },
}

/// Column layout the pipeline will produce for a bundle
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureLayout {
    pub columns: Vec<String>,
    pub column_source: ColumnSource,
    pub unit: NutrientUnit,
    pub unit_source: UnitSource,
}

/// Model-ready feature vector
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    /// Values in model column order
    pub values: Vec<f64>,
    pub columns: Vec<String>,
    pub unit: NutrientUnit,
    /// Problems recovered while building the vector
    pub warnings: Vec<FeatureError>,
    /// Set when assembly failed and the safe default vector was substituted
    pub defaulted: bool,
}

impl FeatureVector {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of a named column
    pub fn get(&self, column: &str) -> Option<f64> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| self.values[i])
    }
}

/// Request values after clamping and defaulting
#[derive(Debug, Clone, PartialEq)]
pub struct AgronomicInputs {
    pub soil_ph: f64,
    pub nitrogen_ppm: f64,
    pub phosphorus_ppm: f64,
    pub potassium_ppm: f64,
    pub temperature: f64,
    pub rainfall: f64,
    pub humidity: f64,
    pub soil_type: String,
    pub agro_ecological_zone: String,
    pub cultivation_season: String,
}

impl AgronomicInputs {
    /// Clamp numeric fields to agronomic bounds. Absent optional fields take
    /// their defaults; present ones are clamped, never replaced.
    pub fn from_request(request: &PredictionRequest) -> Self {
        let (ph_min, ph_max) = AGRONOMIC_PH_RANGE;
        Self {
            soil_ph: request.soil_ph.clamp(ph_min, ph_max),
            nitrogen_ppm: request.nitrogen_ppm.max(0.0),
            phosphorus_ppm: request.phosphorus_ppm.max(0.0),
            potassium_ppm: request.potassium_ppm.max(0.0),
            temperature: request
                .temperature
                .map_or(DEFAULT_TEMPERATURE, |t| t.clamp(-50.0, 60.0)),
            rainfall: request.rainfall.map_or(DEFAULT_RAINFALL, |r| r.max(0.0)),
            humidity: request
                .humidity
                .map_or(DEFAULT_HUMIDITY, |h| h.clamp(0.0, 100.0)),
            soil_type: request.soil_type.trim().to_string(),
            agro_ecological_zone: request.agro_ecological_zone.trim().to_string(),
            cultivation_season: request.cultivation_season.trim().to_string(),
        }
    }

    fn safe_default() -> Self {
        Self {
            soil_ph: SAFE_DEFAULT_PH,
            nitrogen_ppm: 0.0,
            phosphorus_ppm: 0.0,
            potassium_ppm: 0.0,
            temperature: DEFAULT_TEMPERATURE,
            rainfall: DEFAULT_RAINFALL,
            humidity: DEFAULT_HUMIDITY,
            soil_type: String::new(),
            agro_ecological_zone: String::new(),
            cultivation_season: String::new(),
        }
    }
}

/// Label codes of the three categorical fields
#[derive(Debug, Clone, Copy, Default)]
struct EncodedCategories {
    soil_type: usize,
    agro_zone: usize,
    season: usize,
}

/// Transforms requests into model input features.
///
/// Stateless; everything model-specific comes from the [`ModelBundle`].
pub struct FeaturePipeline;

impl FeaturePipeline {
    pub fn new() -> Self {
        Self
    }

    /// Decide column order and nutrient unit for a bundle
    pub fn layout(&self, bundle: &ModelBundle) -> FeatureLayout {
        let (columns, column_source) = match bundle.expected_columns() {
            Some(columns) if !bundle.feature_columns.is_empty() => (columns.to_vec(), ColumnSource::Bundle),
            Some(columns) => (columns.to_vec(), ColumnSource::Model),
            None => (
                DEFAULT_COLUMNS.iter().map(|c| c.to_string()).collect(),
                ColumnSource::Default,
            ),
        };

        let (unit, unit_source) = match bundle.nutrient_unit {
            Some(unit) => (unit, UnitSource::Explicit),
            None if columns.iter().any(|c| c.to_lowercase().contains("kg/ha")) => {
                (NutrientUnit::KgPerHa, UnitSource::ColumnNames)
            }
            None => (NutrientUnit::Ppm, UnitSource::Default),
        };

        FeatureLayout {
            columns,
            column_source,
            unit,
            unit_source,
        }
    }

    /// Build the feature vector for a request. Never fails: unknown
    /// categories and unresolvable columns are recovered and reported in
    /// [`FeatureVector::warnings`], and a vector that cannot be assembled is
    /// replaced by the safe default.
    pub fn prepare(&self, request: &PredictionRequest, bundle: &ModelBundle) -> FeatureVector {
        let layout = self.layout(bundle);
        let inputs = AgronomicInputs::from_request(request);

        let mut warnings = Vec::new();
        let encoded = EncodedCategories {
            soil_type: encode(bundle, SOIL_TYPE_FEATURE, &inputs.soil_type, &mut warnings),
            agro_zone: encode(bundle, AEZ_FEATURE, &inputs.agro_ecological_zone, &mut warnings),
            season: encode(bundle, SEASON_FEATURE, &inputs.cultivation_season, &mut warnings),
        };

        match assemble(&layout, &inputs, encoded, &mut warnings) {
            Ok(values) => {
                debug!(
                    features = values.len(),
                    unit = %layout.unit,
                    unit_source = ?layout.unit_source,
                    column_source = ?layout.column_source,
                    "Prepared features"
                );
                FeatureVector {
                    values,
                    columns: layout.columns,
                    unit: layout.unit,
                    warnings,
                    defaulted: false,
                }
            }
            Err(e) => {
                error!(error = %e, "Feature assembly failed, using safe default vector");
                let mut vector = self.default_vector(&layout);
                vector.warnings.push(e);
                vector
            }
        }
    }

    /// Vector of defaults (pH 7.0, no nutrients, encoded index 0) in the
    /// layout's column order
    pub fn default_vector(&self, layout: &FeatureLayout) -> FeatureVector {
        let mut warnings = Vec::new();
        let values = assemble(
            layout,
            &AgronomicInputs::safe_default(),
            EncodedCategories::default(),
            &mut warnings,
        )
        .unwrap_or_else(|_| vec![0.0; layout.columns.len()]);

        FeatureVector {
            values,
            columns: layout.columns.clone(),
            unit: layout.unit,
            warnings,
            defaulted: true,
        }
    }
}

impl Default for FeaturePipeline {
    fn default() -> Self {
        Self::new()
    }
}

fn encode(bundle: &ModelBundle, feature: &str, value: &str, warnings: &mut Vec<FeatureError>) -> usize {
    let Some(encoder) = bundle.label_encoders.get(feature) else {
        if !bundle.is_standin() {
            warn!(feature = %feature, "Encoder not found, using 0");
        }
        warnings.push(FeatureError::MissingEncoder {
            feature: feature.to_string(),
        });
        return 0;
    };

    match encoder.encode_or_fallback(value) {
        Encoded::Exact(code) => code,
        Encoded::Fallback(code) => {
            warn!(
                feature = %feature,
                value = %value,
                fallback = code,
                "Unseen categorical value, using fallback class"
            );
            warnings.push(FeatureError::UnseenCategory {
                feature: feature.to_string(),
                value: value.to_string(),
                fallback: code,
            });
            code
        }
    }
}

/// Named feature values, including the aliases common training exports use
fn feature_map(inputs: &AgronomicInputs, unit: NutrientUnit, encoded: EncodedCategories) -> HashMap<String, f64> {
    let (n, p, k) = match unit {
        NutrientUnit::KgPerHa => (
            ppm_to_kg_per_ha(inputs.nitrogen_ppm),
            ppm_to_kg_per_ha(inputs.phosphorus_ppm),
            ppm_to_kg_per_ha(inputs.potassium_ppm),
        ),
        NutrientUnit::Ppm => (inputs.nitrogen_ppm, inputs.phosphorus_ppm, inputs.potassium_ppm),
    };

    let entries: [(&[&str], f64); 10] = [
        (&["Temperature (°C)", "temperature"], inputs.temperature),
        (&["N", "Nitrogen"], n),
        (&["P", "Phosphorus"], p),
        (&["K", "Potassium"], k),
        (&["Soil pH", "pH"], inputs.soil_ph),
        (&["Rainfall (mm)_avg", "rainfall"], inputs.rainfall),
        (&["Humidity (%)_avg", "humidity"], inputs.humidity),
        (&["Agro-Ecological Zones (AEZs)_encoded"], encoded.agro_zone as f64),
        (&["Cultivation Season_encoded"], encoded.season as f64),
        (&["Soil Types_encoded"], encoded.soil_type as f64),
    ];

    let mut map = HashMap::with_capacity(24);
    for (names, value) in entries {
        for name in names {
            map.insert(name.to_string(), value);
        }
    }
    // Nutrient columns resolve by element whatever their label says; the
    // value is always in the layout's unit
    for suffix in [NutrientUnit::Ppm, NutrientUnit::KgPerHa] {
        map.insert(format!("N ({})", suffix), n);
        map.insert(format!("P ({})", suffix), p);
        map.insert(format!("K ({})", suffix), k);
    }
    map
}

fn assemble(
    layout: &FeatureLayout,
    inputs: &AgronomicInputs,
    encoded: EncodedCategories,
    warnings: &mut Vec<FeatureError>,
) -> Result<Vec<f64>, FeatureError> {
    let map = feature_map(inputs, layout.unit, encoded);
    let by_lowercase: HashMap<String, f64> = map.iter().map(|(k, v)| (k.to_lowercase(), *v)).collect();

    let mut values = Vec::with_capacity(layout.columns.len());
    let mut missing = Vec::new();
    for column in &layout.columns {
        let value = map
            .get(column)
            .or_else(|| by_lowercase.get(&column.to_lowercase()))
            .copied();
        match value {
            Some(v) if !v.is_finite() => {
                return Err(FeatureError::NonFinite {
                    column: column.clone(),
                })
            }
            Some(v) => values.push(v),
            None => {
                missing.push(column.clone());
                values.push(0.0);
            }
        }
    }

    if !missing.is_empty() {
        let e = FeatureError::MissingColumns(missing);
        warn!(error = %e, "Feature columns could not be resolved");
        warnings.push(e);
    }
    Ok(values)
}
