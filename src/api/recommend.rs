use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::HealthResponse;
use crate::error::{ApiError, Result};
use crate::models::*;
use crate::services::recommendation::unwrap_profile;
use crate::utils::validation::validate_top_n;
use crate::AppState;

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::healthy("stayrec-recommendation", state.started_at))
}

fn resolve_top_n(state: &AppState, requested: Option<usize>) -> Result<usize> {
    let config = &state.config.recommendation;
    let top_n = requested.unwrap_or(config.default_top_n);
    validate_top_n(top_n, config.max_top_n).map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(top_n)
}

async fn recommend(
    State(state): State<AppState>,
    payload: std::result::Result<Json<RecommendRequest>, JsonRejection>,
) -> Result<Json<Vec<ScoredAccommodation>>> {
    let Json(request) = payload?;
    let top_n = resolve_top_n(&state, request.top_n)?;

    let recommendations = state
        .recommendation
        .recommend(request.user_id, &request.user_features, top_n)
        .await?;
    Ok(Json(recommendations))
}

async fn recommend_new(
    State(state): State<AppState>,
    query: std::result::Result<Query<NewUserQuery>, QueryRejection>,
    payload: std::result::Result<Json<NewUserRequest>, JsonRejection>,
) -> Result<Json<NewUserRecommendations>> {
    let Query(query) = query?;
    let Json(request) = payload?;
    let top_n = resolve_top_n(&state, request.top_n.or(query.parsed_limit()))?;

    let profile = unwrap_profile(&request.user_features)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::bad_request("user_features must be a non-empty JSON object"))?;

    let recommendations = state.recommendation.recommend_new(&profile, top_n).await?;
    if recommendations.is_fallback() {
        tracing::info!("Served {} popular items to new user", recommendations.len());
    }
    Ok(Json(recommendations))
}

async fn predict(
    State(state): State<AppState>,
    payload: std::result::Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictResponse>> {
    let Json(request) = payload?;
    let response = state.recommendation.predict(&request).await?;
    Ok(Json(response))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/recommend", post(recommend))
        .route("/recommend_new", post(recommend_new))
        .route("/predict", post(predict))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
