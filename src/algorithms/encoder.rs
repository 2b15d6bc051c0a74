//! Feature encoding against the column schema captured at training time.
//!
//! Encoded vectors are positional: column `i` of every vector is
//! `schema.all_dense[i]`. Encoding is lenient. A column the encoder cannot
//! produce is zero-filled and a category outside the training vocabulary
//! encodes as all zeros; neither raises. Unresolvable columns are reported
//! once, when the encoder is built.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::scaler::Scaler;
use crate::models::{AccommodationRecord, RawProfile};

pub const LOCATION_PREFIX: &str = "loc_";
pub const TYPE_PREFIX: &str = "type_";
pub const AMENITY_PREFIX: &str = "amenity_";

pub const DEFAULT_CITY: &str = "Hà Nội";
pub const DEFAULT_PROPERTY_TYPE: &str = "HOTEL";
pub const DEFAULT_RATING: f64 = 3.5;
pub const DEFAULT_DISTANCE_KM: f64 = 10.0;

const ITEM_NUMERIC_SOURCES: &[&str] = &[
    "log_price",
    "rating_cleaned",
    "log_distance",
    "price_per_night",
    "average_rating",
    "distance_to_center",
];

/// Column lists exported with the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    #[serde(default)]
    pub numerical: Vec<String>,
    #[serde(default)]
    pub categorical_onehot: Vec<String>,
    #[serde(default)]
    pub sparse: Vec<String>,
    pub all_dense: Vec<String>,
}

impl FeatureSchema {
    pub fn dense_width(&self) -> usize {
        self.all_dense.len()
    }
}

/// Multi-label binarizer classes plus the top-K amenity filter.
#[derive(Debug, Clone)]
pub struct AmenityVocabulary {
    classes: Vec<String>,
    index: HashMap<String, usize>,
    top: HashSet<String>,
}

impl AmenityVocabulary {
    pub fn new(classes: Vec<String>, top: impl IntoIterator<Item = String>) -> Self {
        let index = classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();
        Self {
            classes,
            index,
            top: top.into_iter().collect(),
        }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn class_index(&self, class: &str) -> Option<usize> {
        self.index.get(class).copied()
    }

    /// One flag per class; amenities outside the top-K set or the class list
    /// are ignored.
    pub fn binarize<S: AsRef<str>>(&self, amenities: &[S]) -> Vec<bool> {
        let mut hits = vec![false; self.classes.len()];
        for amenity in amenities {
            let amenity = amenity.as_ref().trim();
            if !self.top.contains(amenity) {
                continue;
            }
            if let Some(i) = self.class_index(amenity) {
                hits[i] = true;
            }
        }
        hits
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ColumnSource {
    Numerical(usize),
    Location(String),
    PropertyType(String),
    Amenity(usize),
    Unresolved,
}

/// `all_dense` compiled into a per-column lookup.
#[derive(Debug, Clone)]
struct ColumnPlan {
    sources: Vec<ColumnSource>,
    locations: HashSet<String>,
    property_types: HashSet<String>,
    unresolved: Vec<String>,
}

impl ColumnPlan {
    fn compile(schema: &FeatureSchema, vocab: &AmenityVocabulary) -> Self {
        let numerical: HashMap<&str, usize> = schema
            .numerical
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();
        let categorical: HashSet<&str> = schema.categorical_onehot.iter().map(String::as_str).collect();
        let sparse: HashSet<&str> = schema.sparse.iter().map(String::as_str).collect();

        let mut plan = Self {
            sources: Vec::with_capacity(schema.all_dense.len()),
            locations: HashSet::new(),
            property_types: HashSet::new(),
            unresolved: Vec::new(),
        };

        for column in &schema.all_dense {
            let source = if let Some(&i) = numerical.get(column.as_str()) {
                ColumnSource::Numerical(i)
            } else if categorical.contains(column.as_str()) {
                if let Some(city) = column.strip_prefix(LOCATION_PREFIX) {
                    plan.locations.insert(city.to_string());
                    ColumnSource::Location(city.to_string())
                } else if let Some(kind) = column.strip_prefix(TYPE_PREFIX) {
                    plan.property_types.insert(kind.to_string());
                    ColumnSource::PropertyType(kind.to_string())
                } else {
                    ColumnSource::Unresolved
                }
            } else if sparse.contains(column.as_str()) {
                column
                    .strip_prefix(AMENITY_PREFIX)
                    .and_then(|class| vocab.class_index(class))
                    .map(ColumnSource::Amenity)
                    .unwrap_or(ColumnSource::Unresolved)
            } else {
                ColumnSource::Unresolved
            };

            if source == ColumnSource::Unresolved {
                plan.unresolved.push(column.clone());
            }
            plan.sources.push(source);
        }

        plan
    }

    fn width(&self) -> usize {
        self.sources.len()
    }

    fn fill(
        &self,
        row: &mut [f32],
        numeric: &[f64],
        city: Option<&str>,
        property_type: Option<&str>,
        amenities: &[bool],
    ) {
        for (slot, source) in row.iter_mut().zip(&self.sources) {
            *slot = match source {
                ColumnSource::Numerical(i) => numeric.get(*i).copied().unwrap_or(0.0) as f32,
                ColumnSource::Location(c) => one_hot(city == Some(c.as_str())),
                ColumnSource::PropertyType(t) => one_hot(property_type == Some(t.as_str())),
                ColumnSource::Amenity(i) => one_hot(amenities.get(*i).copied().unwrap_or(false)),
                ColumnSource::Unresolved => 0.0,
            };
        }

        if let Some(city) = city {
            if !self.locations.contains(city) {
                debug!("Unknown location category {:?} encoded as zeros", city);
            }
        }
        if let Some(kind) = property_type {
            if !self.property_types.contains(kind) {
                debug!("Unknown property type category {:?} encoded as zeros", kind);
            }
        }
    }
}

fn one_hot(hit: bool) -> f32 {
    if hit {
        1.0
    } else {
        0.0
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn check_scaler(schema: &FeatureSchema, scaler: &Scaler) -> Result<()> {
    scaler.validate()?;
    if scaler.width() != schema.numerical.len() {
        return Err(anyhow!(
            "Scaler expects {} numerical columns but schema declares {}",
            scaler.width(),
            schema.numerical.len()
        ));
    }
    Ok(())
}

/// Encodes accommodation attributes into the item tower's input layout.
#[derive(Debug, Clone)]
pub struct ItemEncoder {
    schema: FeatureSchema,
    plan: ColumnPlan,
    scaler: Scaler,
    vocab: Arc<AmenityVocabulary>,
}

impl ItemEncoder {
    pub fn new(schema: FeatureSchema, scaler: Scaler, vocab: Arc<AmenityVocabulary>) -> Result<Self> {
        check_scaler(&schema, &scaler)?;
        let mut plan = ColumnPlan::compile(&schema, &vocab);
        for column in &schema.numerical {
            if !ITEM_NUMERIC_SOURCES.contains(&column.as_str()) {
                plan.unresolved.push(column.clone());
            }
        }

        Ok(Self {
            schema,
            plan,
            scaler,
            vocab,
        })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn width(&self) -> usize {
        self.plan.width()
    }

    /// Columns that always encode as zero.
    pub fn unresolved_columns(&self) -> &[String] {
        &self.plan.unresolved
    }

    fn numeric_value(record: &AccommodationRecord, column: &str) -> f64 {
        let raw = match column {
            "log_price" => record.price_per_night.unwrap_or(f64::NAN).ln_1p(),
            "rating_cleaned" => record.average_rating.unwrap_or(DEFAULT_RATING).clamp(1.0, 5.0),
            "log_distance" => record.distance_to_center.unwrap_or(DEFAULT_DISTANCE_KM).ln_1p(),
            "price_per_night" => record.price_per_night.unwrap_or(0.0),
            "average_rating" => record.average_rating.unwrap_or(0.0),
            "distance_to_center" => record.distance_to_center.unwrap_or(DEFAULT_DISTANCE_KM),
            _ => 0.0,
        };
        finite_or_zero(raw)
    }

    pub fn encode(&self, record: &AccommodationRecord) -> Vec<f32> {
        let mut numeric: Vec<f64> = self
            .schema
            .numerical
            .iter()
            .map(|column| Self::numeric_value(record, column))
            .collect();
        self.scaler.transform(&mut numeric);

        let city = record.location_city.as_deref().unwrap_or(DEFAULT_CITY);
        let property_type = record.property_type.as_deref().unwrap_or(DEFAULT_PROPERTY_TYPE);
        let amenities = self.vocab.binarize(&record.amenities);

        let mut row = vec![0.0; self.width()];
        self.plan
            .fill(&mut row, &numeric, Some(city), Some(property_type), &amenities);
        row
    }

    /// Encodes `records` into a `(records.len(), width)` matrix, row order preserved.
    pub fn encode_batch(&self, records: &[AccommodationRecord]) -> Result<Array2<f32>> {
        let width = self.width();
        let mut data = Vec::with_capacity(records.len() * width);
        for record in records {
            data.extend(self.encode(record));
        }
        Ok(Array2::from_shape_vec((records.len(), width), data)?)
    }
}

/// Fallbacks for user attributes absent from a profile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserDefaults {
    pub numeric: HashMap<String, f64>,
    pub location: Option<String>,
    pub property_type: Option<String>,
}

impl UserDefaults {
    /// Used when scoring a known user with `/recommend` and `/predict`.
    pub fn scoring() -> Self {
        Self {
            numeric: HashMap::from([
                ("budget_pref".to_string(), 100_000.0),
                ("travel_frequency_score".to_string(), 1.0),
            ]),
            location: Some(DEFAULT_CITY.to_string()),
            property_type: Some(DEFAULT_PROPERTY_TYPE.to_string()),
        }
    }

    /// Cold-start profiles get no invented preferences: missing numbers are 0
    /// and missing categories stay empty.
    pub fn cold_start() -> Self {
        Self::default()
    }
}

/// Encodes raw user profiles into the user tower's input layout.
#[derive(Debug, Clone)]
pub struct UserEncoder {
    schema: FeatureSchema,
    plan: ColumnPlan,
    scaler: Scaler,
    vocab: Arc<AmenityVocabulary>,
}

impl UserEncoder {
    pub fn new(schema: FeatureSchema, scaler: Scaler, vocab: Arc<AmenityVocabulary>) -> Result<Self> {
        check_scaler(&schema, &scaler)?;
        let plan = ColumnPlan::compile(&schema, &vocab);
        Ok(Self {
            schema,
            plan,
            scaler,
            vocab,
        })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn width(&self) -> usize {
        self.plan.width()
    }

    pub fn unresolved_columns(&self) -> &[String] {
        &self.plan.unresolved
    }

    pub fn encode(&self, profile: &RawProfile, defaults: &UserDefaults) -> Vec<f32> {
        let mut numeric: Vec<f64> = self
            .schema
            .numerical
            .iter()
            .map(|column| match profile.get(column) {
                Some(value) => coerce_number(value).map(finite_or_zero).unwrap_or(0.0),
                None => defaults.numeric.get(column).copied().unwrap_or(0.0),
            })
            .collect();
        self.scaler.transform(&mut numeric);

        let city = profile
            .get("location_pref_str")
            .and_then(category_value)
            .or_else(|| defaults.location.clone());
        let property_type = profile
            .get("property_type_pref_str")
            .and_then(category_value)
            .or_else(|| defaults.property_type.clone());

        let amenities: Vec<&str> = match profile.get("amenities_pref") {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        let amenities = self.vocab.binarize(&amenities);

        let mut row = vec![0.0; self.width()];
        self.plan.fill(
            &mut row,
            &numeric,
            city.as_deref(),
            property_type.as_deref(),
            &amenities,
        );
        row
    }
}

/// Numeric coercion for loosely typed JSON: numbers, numeric strings and booleans.
fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn category_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vocab() -> Arc<AmenityVocabulary> {
        Arc::new(AmenityVocabulary::new(
            vec!["Pool".to_string(), "Spa".to_string(), "Wifi".to_string()],
            ["Pool", "Wifi", "Spa"].iter().map(|s| s.to_string()),
        ))
    }

    fn item_schema() -> FeatureSchema {
        FeatureSchema {
            numerical: vec!["log_price".into(), "rating_cleaned".into(), "log_distance".into()],
            categorical_onehot: vec!["loc_Hà Nội".into(), "loc_Đà Nẵng".into(), "type_HOTEL".into(), "type_VILLA".into()],
            sparse: vec!["amenity_Pool".into(), "amenity_Spa".into(), "amenity_Wifi".into()],
            all_dense: vec![
                "log_price".into(),
                "rating_cleaned".into(),
                "log_distance".into(),
                "loc_Hà Nội".into(),
                "loc_Đà Nẵng".into(),
                "type_HOTEL".into(),
                "type_VILLA".into(),
                "amenity_Pool".into(),
                "amenity_Spa".into(),
                "amenity_Wifi".into(),
            ],
        }
    }

    fn user_schema() -> FeatureSchema {
        FeatureSchema {
            numerical: vec!["budget_pref".into(), "travel_frequency_score".into()],
            categorical_onehot: vec!["loc_Hà Nội".into(), "loc_Đà Nẵng".into(), "type_HOTEL".into()],
            sparse: vec!["amenity_Pool".into(), "amenity_Wifi".into()],
            all_dense: vec![
                "budget_pref".into(),
                "travel_frequency_score".into(),
                "loc_Hà Nội".into(),
                "loc_Đà Nẵng".into(),
                "type_HOTEL".into(),
                "amenity_Pool".into(),
                "amenity_Wifi".into(),
            ],
        }
    }

    fn identity(width: usize) -> Scaler {
        Scaler::Standard {
            mean: vec![0.0; width],
            scale: vec![1.0; width],
        }
    }

    #[test]
    fn test_item_vector_matches_schema_width() {
        let encoder = ItemEncoder::new(item_schema(), identity(3), vocab()).unwrap();
        let record = AccommodationRecord::new(1)
            .with_price(999.0)
            .with_rating(4.2)
            .with_city("Đà Nẵng")
            .with_type("VILLA")
            .with_amenities(&["Wifi", "Pool"]);

        let row = encoder.encode(&record);
        assert_eq!(row.len(), encoder.schema().dense_width());
        assert!((row[0] - 1000f32.ln()).abs() < 1e-4);
        assert!((row[1] - 4.2).abs() < 1e-6);
        assert!((row[2] - 11f32.ln()).abs() < 1e-4);
        assert_eq!(&row[3..], &[0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0]);
        assert!(encoder.unresolved_columns().is_empty());
    }

    #[test]
    fn test_item_defaults_and_clipping() {
        let encoder = ItemEncoder::new(item_schema(), identity(3), vocab()).unwrap();
        let record = AccommodationRecord::new(2).with_rating(9.0);

        let row = encoder.encode(&record);
        // missing price -> NaN -> 0
        assert_eq!(row[0], 0.0);
        assert_eq!(row[1], 5.0);
        // default city and type
        assert_eq!(row[3], 1.0);
        assert_eq!(row[5], 1.0);

        let unrated = encoder.encode(&AccommodationRecord::new(3));
        assert_eq!(unrated[1], 3.5);
    }

    #[test]
    fn test_unknown_item_category_is_all_zero() {
        let encoder = ItemEncoder::new(item_schema(), identity(3), vocab()).unwrap();
        let record = AccommodationRecord::new(4)
            .with_city("Atlantis")
            .with_type("SUBMARINE")
            .with_amenities(&["Helipad"]);

        let row = encoder.encode(&record);
        assert!(row[3..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_amenities_outside_top_set_are_ignored() {
        let vocab = Arc::new(AmenityVocabulary::new(
            vec!["Pool".to_string(), "Wifi".to_string()],
            vec!["Wifi".to_string()],
        ));
        assert_eq!(vocab.binarize(&["Pool", "Wifi"]), vec![false, true]);
    }

    #[test]
    fn test_encode_batch_preserves_row_order() {
        let encoder = ItemEncoder::new(item_schema(), identity(3), vocab()).unwrap();
        let records = vec![
            AccommodationRecord::new(1).with_type("VILLA"),
            AccommodationRecord::new(2).with_type("HOTEL"),
        ];
        let matrix = encoder.encode_batch(&records).unwrap();
        assert_eq!(matrix.shape(), &[2, 10]);
        assert_eq!(matrix[[0, 6]], 1.0);
        assert_eq!(matrix[[1, 5]], 1.0);
    }

    #[test]
    fn test_unresolved_columns_zero_fill() {
        let mut schema = item_schema();
        schema.all_dense.push("loc_Huế".into());
        schema.all_dense.push("mystery".into());
        let encoder = ItemEncoder::new(schema, identity(3), vocab()).unwrap();

        assert_eq!(encoder.unresolved_columns(), &["loc_Huế".to_string(), "mystery".to_string()]);
        let row = encoder.encode(&AccommodationRecord::new(1).with_city("Huế"));
        assert_eq!(row.len(), 12);
        assert_eq!(&row[10..], &[0.0, 0.0]);
    }

    #[test]
    fn test_scaler_width_mismatch_rejected() {
        assert!(ItemEncoder::new(item_schema(), identity(2), vocab()).is_err());
    }

    #[test]
    fn test_user_scoring_defaults() {
        let encoder = UserEncoder::new(user_schema(), identity(2), vocab()).unwrap();
        let row = encoder.encode(&RawProfile::new(), &UserDefaults::scoring());

        assert_eq!(row.len(), 7);
        assert_eq!(row[0], 100_000.0);
        assert_eq!(row[1], 1.0);
        assert_eq!(row[2], 1.0);
        assert_eq!(row[4], 1.0);
    }

    #[test]
    fn test_user_cold_start_profile() {
        let encoder = UserEncoder::new(user_schema(), identity(2), vocab()).unwrap();
        let profile = json!({
            "budget_pref": "250000",
            "travel_frequency_score": "often",
            "location_pref_str": "Đà Nẵng",
            "amenities_pref": ["Wifi", "Spa", 42]
        });
        let row = encoder.encode(profile.as_object().unwrap(), &UserDefaults::cold_start());

        assert_eq!(row, vec![250_000.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_user_unknown_category_never_raises() {
        let encoder = UserEncoder::new(user_schema(), identity(2), vocab()).unwrap();
        let profile = json!({
            "location_pref_str": "Paris",
            "property_type_pref_str": "CASTLE",
            "amenities_pref": "not a list"
        });
        let row = encoder.encode(profile.as_object().unwrap(), &UserDefaults::cold_start());
        assert_eq!(row.len(), encoder.schema().dense_width());
        assert!(row[2..].iter().all(|v| *v == 0.0));
    }
}
