use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::algorithms::{aggregate_interactions, UserDefaults, VectorRetriever};
use crate::config::RecommendationConfig;
use crate::error::ApiError;
use crate::models::*;
use crate::services::artifacts::Artifacts;
use crate::services::model::{predict_batched, NcfBatch, ScoringModel};
use crate::services::store::AccommodationStore;
use crate::utils::validation::{validate_embedding_dimension, validate_entity_id, validate_feature_vector};
use crate::utils::{cmp_score_desc, format_price_display, top_k_indices};

pub struct RecommendationService {
    artifacts: Arc<Artifacts>,
    model: Arc<dyn ScoringModel>,
    store: Arc<dyn AccommodationStore>,
    config: RecommendationConfig,
}

impl RecommendationService {
    pub fn new(
        artifacts: Arc<Artifacts>,
        model: Arc<dyn ScoringModel>,
        store: Arc<dyn AccommodationStore>,
        config: RecommendationConfig,
    ) -> Self {
        Self {
            artifacts,
            model,
            store,
            config,
        }
    }

    /// Scores every accommodation in the store for one existing user and
    /// returns the `top_n` best.
    pub async fn recommend(
        &self,
        user_id: i64,
        profile: &RawProfile,
        top_n: usize,
    ) -> Result<Vec<ScoredAccommodation>, ApiError> {
        validate_entity_id("User", user_id).map_err(|e| ApiError::bad_request(e.to_string()))?;
        info!("Processing recommendation request for user {}, top_n={}", user_id, top_n);

        let catalog = self.store.fetch_catalog().await?;
        if catalog.is_empty() {
            warn!("Accommodation catalog is empty");
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = catalog.iter().map(|r| r.accommodation_id).collect();
        let scores = self.score(user_id, profile, &ids, &catalog).await?;

        let results: Vec<ScoredAccommodation> = top_k_indices(&scores, top_n)
            .into_iter()
            .map(|i| {
                let record = &catalog[i];
                ScoredAccommodation {
                    accommodation_id: record.accommodation_id,
                    name: record.name.clone(),
                    price_per_night: record.price_per_night,
                    property_type: record.property_type.clone(),
                    average_rating: record.average_rating,
                    predicted_score: scores[i],
                }
            })
            .collect();

        info!("Returning {} recommendations for user {}", results.len(), user_id);
        Ok(results)
    }

    /// Scores an explicit list of accommodations for one user.
    pub async fn predict(&self, request: &PredictRequest) -> Result<PredictResponse, ApiError> {
        let user_id = request.user_id;
        validate_entity_id("User", user_id).map_err(|e| ApiError::bad_request(e.to_string()))?;
        info!(
            "Processing prediction request for user {}, {} item IDs",
            user_id,
            request.item_ids.len()
        );

        if !self.artifacts.known_users.contains(user_id) && request.user_features.is_empty() {
            warn!("User {} not found in user features and no user features provided", user_id);
            return Err(ApiError::not_found("User not found"));
        }

        let inline: HashMap<i64, &AccommodationRecord> = request
            .item_features
            .iter()
            .map(|r| (r.accommodation_id, r))
            .collect();

        let mut seen = HashSet::new();
        let (mut valid, mut missing): (Vec<i64>, Vec<i64>) = request
            .item_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .partition(|id| *id >= 1 && (self.artifacts.known_items.contains(id) || inline.contains_key(id)));

        if valid.is_empty() {
            warn!("No valid item IDs provided");
            return Err(ApiError::bad_request("No valid item IDs"));
        }

        let to_fetch: Vec<i64> = valid
            .iter()
            .copied()
            .filter(|id| !inline.contains_key(id))
            .collect();
        let fetched: HashMap<i64, AccommodationRecord> = self
            .store
            .fetch_features(&to_fetch)
            .await?
            .into_iter()
            .map(|r| (r.accommodation_id, r))
            .collect();

        let mut records = Vec::with_capacity(valid.len());
        valid.retain(|id| {
            let record = inline.get(id).map(|r| (*r).clone()).or_else(|| fetched.get(id).cloned());
            match record {
                Some(record) => {
                    records.push(record);
                    true
                }
                None => {
                    missing.push(*id);
                    false
                }
            }
        });

        if !missing.is_empty() {
            warn!("Some item IDs not found: {:?}", missing);
        }
        if valid.is_empty() {
            return Err(ApiError::bad_request("No valid item IDs"));
        }

        let predictions = self.score(user_id, &request.user_features, &valid, &records).await?;
        info!("Generated {} predictions", predictions.len());

        Ok(PredictResponse {
            predictions,
            valid_item_ids: valid,
            missing_item_ids: missing,
        })
    }

    /// Cold-start recommendations from the profile of a user the model has
    /// never seen. Never fails: any problem degrades to the popular list.
    pub async fn recommend_new(&self, profile: &RawProfile, top_n: usize) -> Result<NewUserRecommendations> {
        info!("New user raw profile: {:?}", profile);
        match self.similar_user_recommendations(profile, top_n).await {
            Ok(Some(items)) => {
                info!(
                    "Generated {} recommendations for new user based on feature similarity",
                    items.len()
                );
                Ok(NewUserRecommendations::Similar(items))
            }
            Ok(None) => self.popular(top_n).await.map(NewUserRecommendations::Popular),
            Err(e) => {
                error!("Error generating recommendations for new user: {}", e);
                self.popular(top_n).await.map(NewUserRecommendations::Popular)
            }
        }
    }

    /// `Ok(None)` means the chain ran but produced nothing usable.
    async fn similar_user_recommendations(
        &self,
        profile: &RawProfile,
        top_n: usize,
    ) -> Result<Option<Vec<SimilarAccommodation>>> {
        let encoded = self
            .artifacts
            .user_encoder
            .encode(profile, &UserDefaults::cold_start());
        if encoded.is_empty() {
            error!("New user encoded vector is empty");
            return Ok(None);
        }
        validate_feature_vector(&encoded)?;
        validate_embedding_dimension(&encoded, self.artifacts.known_users.dimension())?;
        debug!("New user encoded vector width {}", encoded.len());

        let neighbours = self
            .artifacts
            .known_users
            .search_similar(&encoded, self.config.k_similar_users)?;
        if neighbours.is_empty() {
            warn!("No similar users found. Falling back to popular items");
            return Ok(None);
        }
        let neighbour_ids: Vec<i64> = neighbours.iter().map(|(id, _)| *id).collect();
        info!(
            "Found {} similar users: {:?}",
            neighbour_ids.len(),
            &neighbour_ids[..neighbour_ids.len().min(5)]
        );

        let ranked = aggregate_interactions(
            self.artifacts.interactions.for_users(&neighbour_ids),
            self.config.positive_label,
            self.config.min_interaction_weight,
            top_n,
        );
        if ranked.is_empty() {
            warn!("No relevant interactions from similar users. Falling back to popular items");
            return Ok(None);
        }

        let item_ids: Vec<i64> = ranked.iter().map(|(id, _)| *id).collect();
        let scores: HashMap<i64, f32> = ranked.into_iter().collect();
        let details = self.store.fetch_details(&item_ids).await?;
        if details.is_empty() {
            warn!("No details found for recommended item IDs. Falling back to popular items");
            return Ok(None);
        }

        let mut items: Vec<SimilarAccommodation> = details
            .into_iter()
            .map(|d| SimilarAccommodation {
                similarity_based_score: scores.get(&d.accommodation_id).copied().unwrap_or(0.0),
                accommodation_id: d.accommodation_id,
                owner_id: d.owner_id,
                title: d.title,
                location_parsed: d.location_parsed,
                price_per_night: d.price_per_night,
                average_rating: d.average_rating,
            })
            .collect();
        items.sort_by(|a, b| {
            cmp_score_desc(a.similarity_based_score, b.similarity_based_score)
                .then(a.accommodation_id.cmp(&b.accommodation_id))
        });
        Ok(Some(items))
    }

    /// Best-rated accommodations with a display price.
    pub async fn popular(&self, top_n: usize) -> Result<Vec<PopularAccommodation>> {
        info!("Falling back to popular item recommendations");
        let popular = self.store.fetch_popular(top_n).await?;
        Ok(popular
            .into_iter()
            .map(|d| PopularAccommodation {
                price_display: format_price_display(d.price_per_night, &self.config.currency_suffix),
                accommodation_id: d.accommodation_id,
                owner_id: d.owner_id,
                title: d.title,
                location_parsed: d.location_parsed,
                average_rating: d.average_rating,
            })
            .collect())
    }

    async fn score(
        &self,
        user_id: i64,
        profile: &RawProfile,
        item_ids: &[i64],
        records: &[AccommodationRecord],
    ) -> Result<Vec<f32>> {
        let item_features = self.artifacts.item_encoder.encode_batch(records)?;
        let user_vector = self
            .artifacts
            .user_encoder
            .encode(profile, &UserDefaults::scoring());
        let batch = NcfBatch::for_user(user_id, item_ids, item_features, &user_vector)?;

        let model = self.model.clone();
        let batch_size = self.config.predict_batch_size;
        let scores = tokio::task::spawn_blocking(move || predict_batched(model.as_ref(), &batch, batch_size))
            .await
            .map_err(|e| anyhow!("Scoring task failed: {}", e))??;
        debug!("Scored {} items for user {}", scores.len(), user_id);
        Ok(scores)
    }
}

/// Pulls the profile object out of a cold-start body. Clients sometimes wrap
/// it twice as `{"user_features": {"user_features": {...}}}`.
pub fn unwrap_profile(value: &Value) -> Option<RawProfile> {
    let object = value.as_object()?;
    match object.get("user_features") {
        Some(Value::Object(inner)) => Some(inner.clone()),
        _ => Some(object.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::{AmenityVocabulary, FeatureSchema, Scaler};
    use crate::config::Config;
    use crate::services::artifacts::{ArtifactParts, FeatureTable, InteractionIndex};
    use crate::services::store::InMemoryStore;
    use ndarray::array;
    use serde_json::json;
    use std::path::Path;

    struct PriceModel;

    impl ScoringModel for PriceModel {
        fn name(&self) -> &str {
            "price"
        }

        // first item column is the scaled price
        fn predict(&self, batch: &NcfBatch) -> Result<Vec<f32>> {
            Ok(batch.item_features.column(0).to_vec())
        }
    }

    fn user_table() -> FeatureTable {
        FeatureTable::new(
            vec![1, 2],
            vec!["budget_pref".to_string(), "loc_Huế".to_string()],
            array![[0.0f32, 1.0], [1.0, 0.0]],
        )
    }

    fn artifacts(interactions: Vec<Interaction>) -> Arc<Artifacts> {
        artifacts_with_users(user_table(), interactions)
    }

    fn artifacts_with_users(user_table: FeatureTable, interactions: Vec<Interaction>) -> Arc<Artifacts> {
        let item_schema = FeatureSchema {
            numerical: vec!["price_per_night".to_string()],
            categorical_onehot: vec![],
            sparse: vec![],
            all_dense: vec!["price_per_night".to_string()],
        };
        let user_schema = FeatureSchema {
            numerical: vec!["budget_pref".to_string()],
            categorical_onehot: vec!["loc_Huế".to_string()],
            sparse: vec![],
            all_dense: vec!["budget_pref".to_string(), "loc_Huế".to_string()],
        };
        let parts = ArtifactParts {
            item_schema,
            user_schema,
            item_scaler: Scaler::Standard { mean: vec![0.0], scale: vec![1.0] },
            user_scaler: Scaler::Standard { mean: vec![0.0], scale: vec![1.0] },
            vocabulary: AmenityVocabulary::new(vec![], Vec::new()),
            item_table: FeatureTable::new(vec![1, 2, 3], vec![], ndarray::Array2::zeros((3, 0))),
            user_table,
            interactions: InteractionIndex::new(interactions),
        };
        Arc::new(Artifacts::from_parts(parts, Path::new("."), false).unwrap())
    }

    fn store() -> Arc<InMemoryStore> {
        Arc::new(
            InMemoryStore::new()
                .with_accommodation(AccommodationRecord::new(1).with_price(100.0).with_rating(4.0), 7)
                .with_accommodation(AccommodationRecord::new(2).with_price(300.0).with_rating(3.0), 7)
                .with_accommodation(AccommodationRecord::new(3).with_price(200.0).with_rating(5.0), 8),
        )
    }

    fn service(interactions: Vec<Interaction>) -> RecommendationService {
        RecommendationService::new(
            artifacts(interactions),
            Arc::new(PriceModel),
            store(),
            Config::default().recommendation,
        )
    }

    enum DetailsOutcome {
        Empty,
        Failure,
    }

    /// Delegates to an in-memory store but breaks the detail lookup.
    struct BrokenDetailsStore {
        inner: Arc<InMemoryStore>,
        outcome: DetailsOutcome,
    }

    #[async_trait::async_trait]
    impl AccommodationStore for BrokenDetailsStore {
        async fn fetch_catalog(&self) -> Result<Vec<AccommodationRecord>> {
            self.inner.fetch_catalog().await
        }

        async fn fetch_features(&self, ids: &[i64]) -> Result<Vec<AccommodationRecord>> {
            self.inner.fetch_features(ids).await
        }

        async fn fetch_details(&self, _ids: &[i64]) -> Result<Vec<AccommodationDetail>> {
            match self.outcome {
                DetailsOutcome::Empty => Ok(Vec::new()),
                DetailsOutcome::Failure => Err(anyhow!("connection reset")),
            }
        }

        async fn fetch_popular(&self, limit: usize) -> Result<Vec<AccommodationDetail>> {
            self.inner.fetch_popular(limit).await
        }
    }

    fn service_with_details(outcome: DetailsOutcome) -> RecommendationService {
        RecommendationService::new(
            artifacts(vec![liked(1, 3, 1.0), liked(2, 2, 2.0)]),
            Arc::new(PriceModel),
            Arc::new(BrokenDetailsStore { inner: store(), outcome }),
            Config::default().recommendation,
        )
    }

    fn assert_popular(recs: NewUserRecommendations, expected: &[i64]) {
        assert!(recs.is_fallback());
        match recs {
            NewUserRecommendations::Popular(items) => {
                let ids: Vec<i64> = items.iter().map(|i| i.accommodation_id).collect();
                assert_eq!(ids, expected);
            }
            other => panic!("expected popular fallback, got {:?}", other),
        }
    }

    fn liked(user_id: i64, accommodation_id: i64, weight: f32) -> Interaction {
        Interaction {
            user_id,
            accommodation_id,
            label: 1,
            interaction_weight: weight,
        }
    }

    #[tokio::test]
    async fn test_recommend_ranks_by_model_score() {
        let recs = service(vec![]).recommend(1, &RawProfile::new(), 2).await.unwrap();
        let ids: Vec<i64> = recs.iter().map(|r| r.accommodation_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(recs[0].predicted_score, 300.0);
    }

    #[tokio::test]
    async fn test_recommend_rejects_non_positive_user() {
        let err = service(vec![]).recommend(0, &RawProfile::new(), 2).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_predict_partitions_ids() {
        let request: PredictRequest = serde_json::from_value(json!({
            "user_id": 1,
            "item_ids": [3, 42, 1, 3, 77],
            "item_features": [{"accommodation_id": 42, "price_per_night": 50.0}]
        }))
        .unwrap();

        let response = service(vec![]).predict(&request).await.unwrap();
        assert_eq!(response.valid_item_ids, vec![3, 42, 1]);
        assert_eq!(response.missing_item_ids, vec![77]);
        assert_eq!(response.predictions, vec![200.0, 50.0, 100.0]);
    }

    #[tokio::test]
    async fn test_predict_treats_non_positive_inline_ids_as_missing() {
        let request: PredictRequest = serde_json::from_value(json!({
            "user_id": 1,
            "item_ids": [i64::MIN, 0, 2],
            "item_features": [
                {"accommodation_id": i64::MIN, "price_per_night": 10.0},
                {"accommodation_id": 0, "price_per_night": 20.0}
            ]
        }))
        .unwrap();

        let response = service(vec![]).predict(&request).await.unwrap();
        assert_eq!(response.valid_item_ids, vec![2]);
        assert_eq!(response.missing_item_ids, vec![i64::MIN, 0]);
        assert_eq!(response.predictions, vec![300.0]);
    }

    #[tokio::test]
    async fn test_predict_unknown_user_without_profile_is_not_found() {
        let request: PredictRequest =
            serde_json::from_value(json!({"user_id": 99, "item_ids": [1]})).unwrap();
        let err = service(vec![]).predict(&request).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_predict_without_valid_ids_is_bad_request() {
        let request: PredictRequest =
            serde_json::from_value(json!({"user_id": 1, "item_ids": [50, 51]})).unwrap();
        let err = service(vec![]).predict(&request).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_recommend_new_uses_similar_users() {
        let service = service(vec![liked(1, 3, 1.0), liked(1, 1, 0.6), liked(2, 2, 5.0)]);
        let profile = unwrap_profile(&json!({"location_pref_str": "Huế"})).unwrap();

        let recs = service.recommend_new(&profile, 2).await.unwrap();
        match recs {
            NewUserRecommendations::Similar(items) => {
                let ids: Vec<i64> = items.iter().map(|i| i.accommodation_id).collect();
                assert_eq!(ids, vec![2, 3]);
                assert_eq!(items[0].similarity_based_score, 5.0);
            }
            other => panic!("expected similar-user results, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_recommend_new_falls_back_without_interactions() {
        let profile = unwrap_profile(&json!({"location_pref_str": "Huế"})).unwrap();
        let recs = service(vec![]).recommend_new(&profile, 2).await.unwrap();

        assert!(recs.is_fallback());
        match recs {
            NewUserRecommendations::Popular(items) => {
                assert_eq!(items[0].accommodation_id, 3);
                assert_eq!(items[0].price_display, "200 VND");
                assert_eq!(items.len(), 2);
            }
            other => panic!("expected popular fallback, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_recommend_new_falls_back_without_known_users() {
        let empty = FeatureTable::new(
            vec![],
            vec!["budget_pref".to_string(), "loc_Huế".to_string()],
            ndarray::Array2::zeros((0, 2)),
        );
        let service = RecommendationService::new(
            artifacts_with_users(empty, vec![liked(1, 3, 1.0)]),
            Arc::new(PriceModel),
            store(),
            Config::default().recommendation,
        );
        let profile = unwrap_profile(&json!({"location_pref_str": "Huế"})).unwrap();

        assert_popular(service.recommend_new(&profile, 2).await.unwrap(), &[3, 1]);
    }

    #[tokio::test]
    async fn test_recommend_new_falls_back_when_details_are_missing() {
        let profile = unwrap_profile(&json!({"location_pref_str": "Huế"})).unwrap();
        let recs = service_with_details(DetailsOutcome::Empty)
            .recommend_new(&profile, 3)
            .await
            .unwrap();
        assert_popular(recs, &[3, 1, 2]);
    }

    #[tokio::test]
    async fn test_recommend_new_falls_back_when_detail_lookup_fails() {
        let profile = unwrap_profile(&json!({"location_pref_str": "Huế"})).unwrap();
        let recs = service_with_details(DetailsOutcome::Failure)
            .recommend_new(&profile, 3)
            .await
            .unwrap();
        assert_popular(recs, &[3, 1, 2]);
    }

    #[test]
    fn test_unwrap_profile_handles_nesting() {
        let nested = json!({"user_features": {"budget_pref": 2}});
        assert_eq!(unwrap_profile(&nested).unwrap()["budget_pref"], json!(2));

        let flat = json!({"budget_pref": 3});
        assert_eq!(unwrap_profile(&flat).unwrap()["budget_pref"], json!(3));

        assert!(unwrap_profile(&json!([1, 2])).is_none());
    }
}
