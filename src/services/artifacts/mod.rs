//! Startup loading of the exported training artifacts.
//!
//! Everything here runs once before the server binds. Any failure is fatal to
//! the process.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::Array2;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::algorithms::{
    AmenityVocabulary, FeatureSchema, InMemoryRetriever, ItemEncoder, Scaler, UserEncoder,
};
use crate::config::ArtifactsConfig;
use crate::models::Interaction;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid CSV in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("invalid artifact {path}: {message}")]
    Invalid { path: PathBuf, message: String },
}

impl ArtifactError {
    fn invalid(path: &Path, message: impl Into<String>) -> Self {
        ArtifactError::Invalid {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ArtifactError>;

fn open(path: &Path) -> Result<File> {
    if !path.exists() {
        return Err(ArtifactError::NotFound(path.to_path_buf()));
    }
    File::open(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = open(path)?;
    serde_json::from_reader(std::io::BufReader::new(file)).map_err(|source| ArtifactError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// A dense, pre-encoded feature table keyed by an integer id column.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    ids: Vec<i64>,
    columns: Vec<String>,
    values: Array2<f32>,
}

impl FeatureTable {
    pub fn new(ids: Vec<i64>, columns: Vec<String>, values: Array2<f32>) -> Self {
        Self { ids, columns, values }
    }

    /// Reads a CSV with a header row. Empty or non-finite cells read as 0.
    pub fn from_csv(path: &Path, id_column: &str) -> Result<Self> {
        let file = open(path)?;
        let mut reader = csv::Reader::from_reader(file);
        let csv_err = |source: csv::Error| ArtifactError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let headers = reader.headers().map_err(csv_err)?.clone();
        let id_pos = headers
            .iter()
            .position(|h| h == id_column)
            .ok_or_else(|| ArtifactError::invalid(path, format!("missing id column {:?}", id_column)))?;
        let columns: Vec<String> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != id_pos)
            .map(|(_, h)| h.to_string())
            .collect();

        let mut ids = Vec::new();
        let mut data = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(csv_err)?;
            let id_field = record.get(id_pos).unwrap_or_default().trim();
            let id = id_field
                .parse::<i64>()
                .or_else(|_| id_field.parse::<f64>().map(|f| f as i64))
                .map_err(|_| {
                    ArtifactError::invalid(path, format!("row {}: bad id {:?}", line + 1, id_field))
                })?;
            ids.push(id);

            for (i, field) in record.iter().enumerate() {
                if i == id_pos {
                    continue;
                }
                let value = field
                    .trim()
                    .parse::<f32>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .unwrap_or(0.0);
                data.push(value);
            }
        }

        let values = Array2::from_shape_vec((ids.len(), columns.len()), data)
            .map_err(|e| ArtifactError::invalid(path, e.to_string()))?;
        Ok(Self { ids, columns, values })
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Reorders the table to `columns`. Every requested column must exist.
    pub fn project(&self, columns: &[String]) -> std::result::Result<Array2<f32>, String> {
        let positions: HashMap<&str, usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();

        let mut missing = Vec::new();
        let selected: Vec<usize> = columns
            .iter()
            .filter_map(|c| {
                let pos = positions.get(c.as_str()).copied();
                if pos.is_none() {
                    missing.push(c.clone());
                }
                pos
            })
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing columns: {}", missing.join(", ")));
        }

        Ok(self.values.select(ndarray::Axis(1), &selected))
    }
}

/// Historical interactions grouped by user.
#[derive(Debug, Clone, Default)]
pub struct InteractionIndex {
    by_user: HashMap<i64, Vec<Interaction>>,
    total: usize,
}

impl InteractionIndex {
    pub fn new(interactions: Vec<Interaction>) -> Self {
        let total = interactions.len();
        let mut by_user: HashMap<i64, Vec<Interaction>> = HashMap::new();
        for interaction in interactions {
            by_user.entry(interaction.user_id).or_default().push(interaction);
        }
        Self { by_user, total }
    }

    pub fn from_csv(path: &Path) -> Result<Self> {
        let file = open(path)?;
        let mut reader = csv::Reader::from_reader(file);
        let interactions = reader
            .deserialize::<Interaction>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|source| ArtifactError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::new(interactions))
    }

    pub fn for_users<'a>(&'a self, user_ids: &'a [i64]) -> impl Iterator<Item = &'a Interaction> + 'a {
        user_ids
            .iter()
            .filter_map(move |id| self.by_user.get(id))
            .flatten()
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// Everything the recommendation service needs besides the network itself.
pub struct Artifacts {
    pub item_encoder: ItemEncoder,
    pub user_encoder: UserEncoder,
    pub known_items: HashSet<i64>,
    pub known_users: InMemoryRetriever,
    pub interactions: InteractionIndex,
}

pub struct ArtifactParts {
    pub item_schema: FeatureSchema,
    pub user_schema: FeatureSchema,
    pub item_scaler: Scaler,
    pub user_scaler: Scaler,
    pub vocabulary: AmenityVocabulary,
    pub item_table: FeatureTable,
    pub user_table: FeatureTable,
    pub interactions: InteractionIndex,
}

impl Artifacts {
    pub fn load(config: &ArtifactsConfig, strict_schema: bool) -> Result<Self> {
        info!("Loading model artifacts from {}", config.dir.display());

        let classes: Vec<String> = read_json(&config.path(&config.amenity_classes_file))?;
        let top: Vec<String> = read_json(&config.path(&config.top_amenities_file))?;

        let parts = ArtifactParts {
            item_schema: read_json(&config.path(&config.item_columns_file))?,
            user_schema: read_json(&config.path(&config.user_columns_file))?,
            item_scaler: read_json(&config.path(&config.item_scaler_file))?,
            user_scaler: read_json(&config.path(&config.user_scaler_file))?,
            vocabulary: AmenityVocabulary::new(classes, top),
            item_table: FeatureTable::from_csv(
                &config.path(&config.item_features_file),
                "accommodation_id",
            )?,
            user_table: FeatureTable::from_csv(&config.path(&config.user_features_file), "user_id")?,
            interactions: InteractionIndex::from_csv(&config.path(&config.interactions_file))?,
        };
        info!(
            "Loaded {} item rows, {} user rows, {} interactions",
            parts.item_table.len(),
            parts.user_table.len(),
            parts.interactions.len()
        );

        Self::from_parts(parts, &config.dir, strict_schema)
    }

    pub fn from_parts(parts: ArtifactParts, origin: &Path, strict_schema: bool) -> Result<Self> {
        let vocabulary = Arc::new(parts.vocabulary);
        let item_encoder = ItemEncoder::new(parts.item_schema, parts.item_scaler, vocabulary.clone())
            .map_err(|e| ArtifactError::invalid(origin, format!("item encoder: {}", e)))?;
        let user_encoder = UserEncoder::new(parts.user_schema, parts.user_scaler, vocabulary)
            .map_err(|e| ArtifactError::invalid(origin, format!("user encoder: {}", e)))?;

        for (tower, unresolved) in [
            ("item", item_encoder.unresolved_columns()),
            ("user", user_encoder.unresolved_columns()),
        ] {
            if unresolved.is_empty() {
                continue;
            }
            if strict_schema {
                return Err(ArtifactError::invalid(
                    origin,
                    format!("{} columns cannot be encoded: {}", tower, unresolved.join(", ")),
                ));
            }
            warn!(
                "{} {} columns will always encode as zero: {:?}",
                unresolved.len(),
                tower,
                unresolved
            );
        }

        let user_matrix = parts
            .user_table
            .project(&user_encoder.schema().all_dense)
            .map_err(|e| ArtifactError::invalid(origin, format!("user feature table: {}", e)))?;
        let known_users = InMemoryRetriever::from_rows(parts.user_table.ids(), user_matrix.view())
            .map_err(|e| ArtifactError::invalid(origin, e.to_string()))?;

        Ok(Self {
            item_encoder,
            user_encoder,
            known_items: parts.item_table.ids().iter().copied().collect(),
            known_users,
            interactions: parts.interactions,
        })
    }
}
