use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::utils::validation::{lenient_id, lenient_ids};

/// Raw, schema-free user attributes as posted by clients.
pub type RawProfile = Map<String, Value>;

/// An accommodation with the attributes the item encoder consumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccommodationRecord {
    pub accommodation_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price_per_night: Option<f64>,
    #[serde(default, rename = "type")]
    pub property_type: Option<String>,
    #[serde(default)]
    pub average_rating: Option<f64>,
    #[serde(default)]
    pub location_city: Option<String>,
    #[serde(default)]
    pub distance_to_center: Option<f64>,
    #[serde(default)]
    pub amenities: Vec<String>,
}

/// Display metadata joined from the accommodation and location tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccommodationDetail {
    pub accommodation_id: i64,
    pub owner_id: Option<i64>,
    pub title: Option<String>,
    pub location_parsed: Option<String>,
    pub price_per_night: Option<f64>,
    pub average_rating: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: i64,
    pub accommodation_id: i64,
    pub label: i64,
    pub interaction_weight: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl SentimentLabel {
    pub fn from_model_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "POSITIVE" | "POS" | "LABEL_1" => SentimentLabel::Positive,
            "NEGATIVE" | "NEG" | "LABEL_0" => SentimentLabel::Negative,
            _ => SentimentLabel::Neutral,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecommendRequest {
    #[serde(deserialize_with = "lenient_id")]
    pub user_id: i64,
    #[serde(default)]
    pub top_n: Option<usize>,
    #[serde(default)]
    pub user_features: RawProfile,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewUserRequest {
    #[serde(default)]
    pub user_features: Value,
    #[serde(default)]
    pub top_n: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUserQuery {
    #[serde(default)]
    pub limit: Option<String>,
}

impl NewUserQuery {
    /// `?limit=` as a count. Anything that is not a non-negative integer is ignored.
    pub fn parsed_limit(&self) -> Option<usize> {
        self.limit.as_deref().and_then(|raw| raw.trim().parse().ok())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictRequest {
    #[serde(deserialize_with = "lenient_id")]
    pub user_id: i64,
    #[serde(deserialize_with = "lenient_ids")]
    pub item_ids: Vec<i64>,
    #[serde(default)]
    pub user_features: RawProfile,
    #[serde(default)]
    pub item_features: Vec<AccommodationRecord>,
}

/// One row of `/recommend` output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredAccommodation {
    pub accommodation_id: i64,
    pub name: Option<String>,
    pub price_per_night: Option<f64>,
    #[serde(rename = "type")]
    pub property_type: Option<String>,
    pub average_rating: Option<f64>,
    pub predicted_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarAccommodation {
    pub accommodation_id: i64,
    pub owner_id: Option<i64>,
    pub title: Option<String>,
    pub location_parsed: Option<String>,
    pub price_per_night: Option<f64>,
    pub average_rating: Option<f64>,
    pub similarity_based_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopularAccommodation {
    pub accommodation_id: i64,
    pub owner_id: Option<i64>,
    pub title: Option<String>,
    pub location_parsed: Option<String>,
    pub price_display: String,
    pub average_rating: Option<f64>,
}

/// Cold-start output; serializes as a bare JSON array either way.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NewUserRecommendations {
    Similar(Vec<SimilarAccommodation>),
    Popular(Vec<PopularAccommodation>),
}

impl NewUserRecommendations {
    pub fn len(&self) -> usize {
        match self {
            NewUserRecommendations::Similar(items) => items.len(),
            NewUserRecommendations::Popular(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, NewUserRecommendations::Popular(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub predictions: Vec<f32>,
    pub valid_item_ids: Vec<i64>,
    pub missing_item_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSummary {
    pub accommodation_id: i64,
    pub total_reviews: usize,
    pub positive_percentage: f64,
    pub negative_percentage: f64,
    pub positive_summary: String,
    pub negative_summary: String,
}

impl AccommodationRecord {
    pub fn new(accommodation_id: i64) -> Self {
        Self {
            accommodation_id,
            ..Default::default()
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price_per_night = Some(price);
        self
    }

    pub fn with_rating(mut self, rating: f64) -> Self {
        self.average_rating = Some(rating);
        self
    }

    pub fn with_city(mut self, city: &str) -> Self {
        self.location_city = Some(city.to_string());
        self
    }

    pub fn with_type(mut self, property_type: &str) -> Self {
        self.property_type = Some(property_type.to_string());
        self
    }

    pub fn with_amenities(mut self, amenities: &[&str]) -> Self {
        self.amenities = amenities.iter().map(|a| a.to_string()).collect();
        self
    }
}
