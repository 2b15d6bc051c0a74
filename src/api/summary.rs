use axum::{
    extract::{rejection::PathRejection, Path, State},
    response::Json,
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::HealthResponse;
use crate::error::Result;
use crate::models::ReviewSummary;
use crate::SummaryState;

async fn health_check(State(state): State<SummaryState>) -> Json<HealthResponse> {
    Json(HealthResponse::healthy("stayrec-summary", state.started_at))
}

async fn summarize(
    State(state): State<SummaryState>,
    accommodation_id: std::result::Result<Path<i64>, PathRejection>,
) -> Result<Json<ReviewSummary>> {
    let Path(accommodation_id) = accommodation_id?;
    let summary = state.summary.summarize(accommodation_id).await?;
    Ok(Json(summary))
}

pub fn create_router(state: SummaryState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/summarize/:accommodation_id", get(summarize))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
