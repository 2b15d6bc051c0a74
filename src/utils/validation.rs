use anyhow::{anyhow, Result};
use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Int(i64),
    Float(f64),
    Text(String),
}

impl IdRepr {
    fn into_id(self) -> std::result::Result<i64, String> {
        match self {
            IdRepr::Int(id) => Ok(id),
            IdRepr::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(f as i64),
            IdRepr::Float(f) => Err(format!("invalid id: {}", f)),
            IdRepr::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| format!("invalid id: {:?}", s)),
        }
    }
}

/// Accepts `12`, `12.0` and `"12"` for integer ids.
pub fn lenient_id<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    IdRepr::deserialize(deserializer)?
        .into_id()
        .map_err(serde::de::Error::custom)
}

pub fn lenient_ids<'de, D>(deserializer: D) -> std::result::Result<Vec<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<IdRepr>::deserialize(deserializer)?
        .into_iter()
        .map(|id| id.into_id().map_err(serde::de::Error::custom))
        .collect()
}

/// Ids are one-based in the store; the model's embedding tables are zero-based.
pub fn validate_entity_id(kind: &str, id: i64) -> Result<()> {
    if id < 1 {
        return Err(anyhow!("{} ID must be a positive integer, got {}", kind, id));
    }
    Ok(())
}

pub fn validate_top_n(top_n: usize, max_top_n: usize) -> Result<()> {
    if top_n == 0 {
        return Err(anyhow!("Number of recommendations must be greater than 0"));
    }

    if top_n > max_top_n {
        return Err(anyhow!(
            "Number of recommendations too large (max {})",
            max_top_n
        ));
    }

    Ok(())
}

pub fn validate_feature_vector(vector: &[f32]) -> Result<()> {
    if vector.is_empty() {
        return Err(anyhow!("Feature vector cannot be empty"));
    }

    if vector.iter().any(|v| !v.is_finite()) {
        return Err(anyhow!("Feature vector contains invalid values (NaN or Infinity)"));
    }

    Ok(())
}

pub fn validate_embedding_dimension(embedding: &[f32], expected_dim: usize) -> Result<()> {
    if embedding.len() != expected_dim {
        return Err(anyhow!(
            "Feature dimension mismatch: expected {}, got {}",
            expected_dim,
            embedding.len()
        ));
    }
    Ok(())
}
