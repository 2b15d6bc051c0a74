pub mod recommend;
pub mod summary;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use recommend::create_router as recommendation_router;
pub use summary::create_router as summary_router;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
}

impl HealthResponse {
    pub fn healthy(service: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            status: "healthy".to_string(),
            service: service.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at,
        }
    }
}
