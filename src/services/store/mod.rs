//! Relational lookups for accommodation metadata and review text.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnection, MySqlPool, MySqlPoolOptions};
use sqlx::{Connection, MySql, QueryBuilder};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::models::{AccommodationDetail, AccommodationRecord};

#[async_trait]
pub trait AccommodationStore: Send + Sync {
    /// Every accommodation with the attributes the item encoder needs.
    async fn fetch_catalog(&self) -> Result<Vec<AccommodationRecord>>;

    /// Encoder attributes for `ids`. Unknown ids are omitted.
    async fn fetch_features(&self, ids: &[i64]) -> Result<Vec<AccommodationRecord>>;

    /// Display metadata for `ids`. Unknown ids are omitted and the rating
    /// defaults to 0.0 when unset.
    async fn fetch_details(&self, ids: &[i64]) -> Result<Vec<AccommodationDetail>>;

    /// The `limit` best-rated accommodations.
    async fn fetch_popular(&self, limit: usize) -> Result<Vec<AccommodationDetail>>;
}

#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Non-empty review comments for one accommodation.
    async fn fetch_reviews(&self, accommodation_id: i64) -> Result<Vec<String>>;
}

#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    accommodation_id: i64,
    name: Option<String>,
    price_per_night: Option<f64>,
    property_type: Option<String>,
    average_rating: Option<f64>,
    location_city: Option<String>,
    amenities: Option<String>,
}

impl From<RecordRow> for AccommodationRecord {
    fn from(row: RecordRow) -> Self {
        let amenities = row
            .amenities
            .map(|joined| {
                joined
                    .split(',')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        AccommodationRecord {
            accommodation_id: row.accommodation_id,
            name: row.name,
            price_per_night: row.price_per_night,
            property_type: row.property_type,
            average_rating: row.average_rating,
            location_city: row.location_city,
            distance_to_center: None,
            amenities,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DetailRow {
    accommodation_id: i64,
    owner_id: Option<i64>,
    title: Option<String>,
    location_parsed: Option<String>,
    price_per_night: Option<f64>,
    average_rating: Option<f64>,
}

impl From<DetailRow> for AccommodationDetail {
    fn from(row: DetailRow) -> Self {
        AccommodationDetail {
            accommodation_id: row.accommodation_id,
            owner_id: row.owner_id,
            title: row.title,
            location_parsed: row.location_parsed,
            price_per_night: row.price_per_night,
            average_rating: row.average_rating,
        }
    }
}

const RECORD_SELECT: &str = "SELECT a.accommodation_id, a.name, \
     CAST(a.price_per_night AS DOUBLE) AS price_per_night, a.type AS property_type, \
     CAST(a.average_rating AS DOUBLE) AS average_rating, l.city AS location_city, \
     CAST(GROUP_CONCAT(am.name) AS CHAR) AS amenities \
     FROM Accommodation a \
     JOIN Location l ON a.location_id = l.location_id \
     LEFT JOIN Accommodation_Amenities aa ON a.accommodation_id = aa.accommodation_id \
     LEFT JOIN Amenities am ON aa.amenity_id = am.amenity_id ";

const DETAIL_SELECT: &str = "SELECT a.accommodation_id, a.owner_id, a.name AS title, \
     CAST(a.price_per_night AS DOUBLE) AS price_per_night, \
     CAST(COALESCE(a.average_rating, 0.0) AS DOUBLE) AS average_rating, \
     l.city AS location_parsed \
     FROM Accommodation a \
     JOIN Location l ON a.location_id = l.location_id ";

const POPULAR_SELECT: &str = "SELECT a.accommodation_id, a.owner_id, a.name AS title, \
     CAST(a.price_per_night AS DOUBLE) AS price_per_night, \
     CAST(a.average_rating AS DOUBLE) AS average_rating, \
     l.city AS location_parsed \
     FROM Accommodation a \
     JOIN Location l ON a.location_id = l.location_id \
     ORDER BY a.average_rating DESC LIMIT ?";

pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        info!("Connected to MySQL with a pool of {} connections", config.max_connections);
        Ok(Self { pool })
    }

    fn push_id_list(builder: &mut QueryBuilder<'_, MySql>, ids: &[i64]) {
        builder.push("(");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
    }
}

#[async_trait]
impl AccommodationStore for MySqlStore {
    async fn fetch_catalog(&self) -> Result<Vec<AccommodationRecord>> {
        let sql = format!("{}GROUP BY a.accommodation_id ORDER BY a.accommodation_id", RECORD_SELECT);
        let rows = sqlx::query_as::<_, RecordRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        debug!("Fetched {} catalog rows", rows.len());
        Ok(rows.into_iter().map(AccommodationRecord::from).collect())
    }

    async fn fetch_features(&self, ids: &[i64]) -> Result<Vec<AccommodationRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<MySql>::new(RECORD_SELECT);
        builder.push("WHERE a.accommodation_id IN ");
        Self::push_id_list(&mut builder, ids);
        builder.push(" GROUP BY a.accommodation_id");

        let rows = builder
            .build_query_as::<RecordRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(AccommodationRecord::from).collect())
    }

    async fn fetch_details(&self, ids: &[i64]) -> Result<Vec<AccommodationDetail>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<MySql>::new(DETAIL_SELECT);
        builder.push("WHERE a.accommodation_id IN ");
        Self::push_id_list(&mut builder, ids);

        let rows = builder
            .build_query_as::<DetailRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(AccommodationDetail::from).collect())
    }

    async fn fetch_popular(&self, limit: usize) -> Result<Vec<AccommodationDetail>> {
        let rows = sqlx::query_as::<_, DetailRow>(POPULAR_SELECT)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(AccommodationDetail::from).collect())
    }
}

/// Opens a fresh connection for every lookup and closes it afterwards.
pub struct MySqlReviewStore {
    url: String,
}

impl MySqlReviewStore {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            url: config.url.clone(),
        }
    }
}

#[async_trait]
impl ReviewStore for MySqlReviewStore {
    async fn fetch_reviews(&self, accommodation_id: i64) -> Result<Vec<String>> {
        let mut conn = MySqlConnection::connect(&self.url).await?;
        let rows: Vec<(Option<String>,)> = sqlx::query_as(
            "SELECT comment FROM Review WHERE accommodation_id = ? AND comment IS NOT NULL",
        )
        .bind(accommodation_id)
        .fetch_all(&mut conn)
        .await?;
        conn.close().await?;

        Ok(rows
            .into_iter()
            .filter_map(|(comment,)| comment)
            .filter(|c| !c.trim().is_empty())
            .collect())
    }
}

/// Fixed in-process data, for tests and local runs without a database.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    records: Vec<AccommodationRecord>,
    details: HashMap<i64, AccommodationDetail>,
    reviews: HashMap<i64, Vec<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an accommodation; its detail row is derived from the record.
    pub fn with_accommodation(mut self, record: AccommodationRecord, owner_id: i64) -> Self {
        self.details.insert(
            record.accommodation_id,
            AccommodationDetail {
                accommodation_id: record.accommodation_id,
                owner_id: Some(owner_id),
                title: record.name.clone(),
                location_parsed: record.location_city.clone(),
                price_per_night: record.price_per_night,
                average_rating: record.average_rating,
            },
        );
        self.records.push(record);
        self
    }

    pub fn with_reviews(mut self, accommodation_id: i64, reviews: &[&str]) -> Self {
        self.reviews
            .entry(accommodation_id)
            .or_default()
            .extend(reviews.iter().map(|r| r.to_string()));
        self
    }
}

#[async_trait]
impl AccommodationStore for InMemoryStore {
    async fn fetch_catalog(&self) -> Result<Vec<AccommodationRecord>> {
        Ok(self.records.clone())
    }

    async fn fetch_features(&self, ids: &[i64]) -> Result<Vec<AccommodationRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| ids.contains(&r.accommodation_id))
            .cloned()
            .collect())
    }

    async fn fetch_details(&self, ids: &[i64]) -> Result<Vec<AccommodationDetail>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.details.get(id))
            .map(|d| AccommodationDetail {
                average_rating: Some(d.average_rating.unwrap_or(0.0)),
                ..d.clone()
            })
            .collect())
    }

    async fn fetch_popular(&self, limit: usize) -> Result<Vec<AccommodationDetail>> {
        let mut popular: Vec<AccommodationDetail> = self.details.values().cloned().collect();
        // unrated rows sort last, as NULL does under DESC
        popular.sort_by(|a, b| {
            b.average_rating
                .unwrap_or(f64::NEG_INFINITY)
                .total_cmp(&a.average_rating.unwrap_or(f64::NEG_INFINITY))
                .then(a.accommodation_id.cmp(&b.accommodation_id))
        });
        popular.truncate(limit);
        Ok(popular)
    }
}

#[async_trait]
impl ReviewStore for InMemoryStore {
    async fn fetch_reviews(&self, accommodation_id: i64) -> Result<Vec<String>> {
        Ok(self
            .reviews
            .get(&accommodation_id)
            .map(|reviews| {
                reviews
                    .iter()
                    .filter(|r| !r.trim().is_empty())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
