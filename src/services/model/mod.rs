//! NCF model inference.
//!
//! The trained network is exported to ONNX and executed with tract. The
//! four model inputs are bound by name, so the graph's input order does not
//! matter, and cast to whatever element type the graph declares.

use std::path::Path;

use anyhow::{anyhow, Result};
use ndarray::{Array2, Axis};
use tract_onnx::prelude::*;
use tracing::{debug, info};

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

pub const USER_ID_INPUT: &str = "user_id_input";
pub const ITEM_ID_INPUT: &str = "item_id_input";
pub const ITEM_FEATURE_INPUT: &str = "item_feature_input";
pub const USER_FEATURE_INPUT: &str = "user_feature_input";

/// One batch of (user, item) pairs in the model's input layout. Ids are
/// already zero-based.
#[derive(Debug, Clone)]
pub struct NcfBatch {
    pub user_ids: Vec<i64>,
    pub item_ids: Vec<i64>,
    pub item_features: Array2<f32>,
    pub user_features: Array2<f32>,
}

impl NcfBatch {
    /// Pairs one user with every item: store ids are shifted to zero-based
    /// and the user vector is tiled once per item row.
    pub fn for_user(
        user_id: i64,
        item_ids: &[i64],
        item_features: Array2<f32>,
        user_vector: &[f32],
    ) -> Result<Self> {
        if item_ids.len() != item_features.nrows() {
            return Err(anyhow!(
                "{} item ids but {} item feature rows",
                item_ids.len(),
                item_features.nrows()
            ));
        }
        if let Some(id) = std::iter::once(&user_id).chain(item_ids).find(|id| **id < 1) {
            return Err(anyhow!("Ids must be positive, got {}", id));
        }

        let rows = item_ids.len();
        let user_features = Array2::from_shape_fn((rows, user_vector.len()), |(_, j)| user_vector[j]);

        Ok(Self {
            user_ids: vec![user_id - 1; rows],
            item_ids: item_ids.iter().map(|id| id - 1).collect(),
            item_features,
            user_features,
        })
    }

    pub fn len(&self) -> usize {
        self.item_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }

    /// Splits into consecutive batches of at most `size` rows.
    pub fn chunks(&self, size: usize) -> Vec<NcfBatch> {
        let size = size.max(1);
        (0..self.len())
            .step_by(size)
            .map(|start| {
                let end = (start + size).min(self.len());
                NcfBatch {
                    user_ids: self.user_ids[start..end].to_vec(),
                    item_ids: self.item_ids[start..end].to_vec(),
                    item_features: self
                        .item_features
                        .slice_axis(Axis(0), (start..end).into())
                        .to_owned(),
                    user_features: self
                        .user_features
                        .slice_axis(Axis(0), (start..end).into())
                        .to_owned(),
                }
            })
            .collect()
    }
}

pub trait ScoringModel: Send + Sync {
    fn name(&self) -> &str;

    /// One score per row of `batch`, in row order.
    fn predict(&self, batch: &NcfBatch) -> Result<Vec<f32>>;
}

/// Scores `batch` in slices of `batch_size` rows.
pub fn predict_batched(model: &dyn ScoringModel, batch: &NcfBatch, batch_size: usize) -> Result<Vec<f32>> {
    let mut scores = Vec::with_capacity(batch.len());
    for chunk in batch.chunks(batch_size) {
        let chunk_scores = model.predict(&chunk)?;
        if chunk_scores.len() != chunk.len() {
            return Err(anyhow!(
                "Model {} returned {} scores for {} rows",
                model.name(),
                chunk_scores.len(),
                chunk.len()
            ));
        }
        scores.extend(chunk_scores);
    }
    Ok(scores)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputRole {
    UserId,
    ItemId,
    ItemFeatures,
    UserFeatures,
}

impl InputRole {
    fn from_name(name: &str) -> Option<Self> {
        // exporters sometimes suffix input names, e.g. "user_id_input:0"
        let base = name.split(':').next().unwrap_or(name);
        match base {
            USER_ID_INPUT => Some(InputRole::UserId),
            ITEM_ID_INPUT => Some(InputRole::ItemId),
            ITEM_FEATURE_INPUT => Some(InputRole::ItemFeatures),
            USER_FEATURE_INPUT => Some(InputRole::UserFeatures),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct InputBinding {
    role: InputRole,
    datum_type: DatumType,
    rank: usize,
}

pub struct OnnxNcfModel {
    plan: TractModel,
    inputs: Vec<InputBinding>,
    name: String,
}

impl OnnxNcfModel {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(anyhow!("Model file not found: {}", path.display()));
        }

        let plan = tract_onnx::onnx()
            .model_for_path(path)?
            .into_optimized()?
            .into_runnable()?;

        let graph = plan.model();
        let mut inputs = Vec::new();
        for outlet in graph.input_outlets()? {
            let node_name = &graph.node(outlet.node).name;
            let role = InputRole::from_name(node_name)
                .ok_or_else(|| anyhow!("Unexpected model input {:?}", node_name))?;
            let fact = graph.outlet_fact(*outlet)?;
            inputs.push(InputBinding {
                role,
                datum_type: fact.datum_type,
                rank: fact.rank(),
            });
        }

        for role in [
            InputRole::UserId,
            InputRole::ItemId,
            InputRole::ItemFeatures,
            InputRole::UserFeatures,
        ] {
            if !inputs.iter().any(|b| b.role == role) {
                return Err(anyhow!("Model is missing the {:?} input", role));
            }
        }

        info!("Loaded NCF model from {} with inputs {:?}", path.display(), inputs);
        Ok(Self {
            plan,
            inputs,
            name: path.display().to_string(),
        })
    }

    fn id_tensor(ids: &[i64], binding: &InputBinding) -> Result<Tensor> {
        let tensor = if binding.rank >= 2 {
            Tensor::from(tract_ndarray::Array2::from_shape_vec((ids.len(), 1), ids.to_vec())?)
        } else {
            Tensor::from(tract_ndarray::Array1::from_vec(ids.to_vec()))
        };
        Ok(tensor.cast_to_dt(binding.datum_type)?.into_owned())
    }

    fn feature_tensor(features: &Array2<f32>, binding: &InputBinding) -> Result<Tensor> {
        let (rows, cols) = features.dim();
        let data: Vec<f32> = features.iter().copied().collect();
        let tensor = Tensor::from(tract_ndarray::Array2::from_shape_vec((rows, cols), data)?);
        Ok(tensor.cast_to_dt(binding.datum_type)?.into_owned())
    }
}

impl ScoringModel for OnnxNcfModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, batch: &NcfBatch) -> Result<Vec<f32>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut values: TVec<TValue> = tvec![];
        for binding in &self.inputs {
            let tensor = match binding.role {
                InputRole::UserId => Self::id_tensor(&batch.user_ids, binding)?,
                InputRole::ItemId => Self::id_tensor(&batch.item_ids, binding)?,
                InputRole::ItemFeatures => Self::feature_tensor(&batch.item_features, binding)?,
                InputRole::UserFeatures => Self::feature_tensor(&batch.user_features, binding)?,
            };
            values.push(tensor.into());
        }

        let outputs = self
            .plan
            .run(values)
            .map_err(|e| anyhow!("NCF inference failed: {}", e))?;
        let scores = outputs[0]
            .cast_to::<f32>()
            .map_err(|e| anyhow!("NCF output extraction failed: {}", e))?;
        let scores: Vec<f32> = scores.as_slice::<f32>()?.to_vec();

        debug!("Scored {} pairs", scores.len());
        Ok(scores)
    }
}
