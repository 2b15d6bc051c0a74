pub mod algorithms;
pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::ApiError;
pub use models::*;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use services::artifacts::Artifacts;
use services::inference::InferenceClient;
use services::model::{OnnxNcfModel, ScoringModel};
use services::recommendation::RecommendationService;
use services::store::{AccommodationStore, MySqlReviewStore, MySqlStore, ReviewStore};
use services::summary::ReviewSummaryService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub recommendation: Arc<RecommendationService>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Loads every artifact and connects to the store. Fails if anything is
    /// missing or malformed.
    pub async fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);

        let artifacts = Arc::new(Artifacts::load(
            &config.artifacts,
            config.recommendation.strict_schema,
        )?);
        let model: Arc<dyn ScoringModel> = Arc::new(OnnxNcfModel::load(
            config.artifacts.path(&config.artifacts.model_file),
        )?);
        let store: Arc<dyn AccommodationStore> = Arc::new(MySqlStore::connect(&config.database).await?);

        Ok(Self::from_parts(config, artifacts, model, store))
    }

    pub fn from_parts(
        config: Arc<Config>,
        artifacts: Arc<Artifacts>,
        model: Arc<dyn ScoringModel>,
        store: Arc<dyn AccommodationStore>,
    ) -> Self {
        let recommendation = Arc::new(RecommendationService::new(
            artifacts,
            model,
            store,
            config.recommendation.clone(),
        ));

        info!("Recommendation service ready");
        Self {
            config,
            recommendation,
            started_at: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct SummaryState {
    pub summary: Arc<ReviewSummaryService>,
    pub started_at: DateTime<Utc>,
}

impl SummaryState {
    pub fn new(config: Config) -> Result<Self> {
        let client = Arc::new(InferenceClient::new(&config.summary)?);
        let reviews: Arc<dyn ReviewStore> = Arc::new(MySqlReviewStore::new(&config.database));
        let summary = Arc::new(ReviewSummaryService::new(
            reviews,
            client.clone(),
            client,
            config.summary.max_input_chars,
        ));

        info!(
            "Review summary service ready (sentiment: {}, summarization: {})",
            config.summary.sentiment_model, config.summary.summarization_model
        );
        Ok(Self::from_service(summary))
    }

    pub fn from_service(summary: Arc<ReviewSummaryService>) -> Self {
        Self {
            summary,
            started_at: Utc::now(),
        }
    }
}

/// Installs the global subscriber. `level` is used when `RUST_LOG` is unset.
pub fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
