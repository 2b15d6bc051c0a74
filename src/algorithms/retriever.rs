use anyhow::{anyhow, Result};
use nalgebra::DVector;
use ndarray::ArrayView2;
use std::collections::HashMap;

use crate::utils::cmp_score_desc;

pub trait VectorRetriever: Send + Sync {
    fn dimension(&self) -> usize;
    fn len(&self) -> usize;
    fn search_similar(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<(i64, f32)>>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exhaustive cosine-similarity search over a fixed set of user vectors.
/// Vectors keep their load order, which also breaks score ties.
#[derive(Debug, Clone)]
pub struct InMemoryRetriever {
    ids: Vec<i64>,
    vectors: Vec<DVector<f32>>,
    norms: Vec<f32>,
    positions: HashMap<i64, usize>,
    dimension: usize,
}

impl InMemoryRetriever {
    pub fn new(dimension: usize) -> Self {
        Self {
            ids: Vec::new(),
            vectors: Vec::new(),
            norms: Vec::new(),
            positions: HashMap::new(),
            dimension,
        }
    }

    /// Builds a retriever from a row-per-id matrix.
    pub fn from_rows(ids: &[i64], rows: ArrayView2<'_, f32>) -> Result<Self> {
        if ids.len() != rows.nrows() {
            return Err(anyhow!(
                "Row count mismatch: {} ids for {} vectors",
                ids.len(),
                rows.nrows()
            ));
        }

        let mut retriever = Self::new(rows.ncols());
        for (id, row) in ids.iter().zip(rows.outer_iter()) {
            retriever.add_vector(*id, row.to_vec())?;
        }
        Ok(retriever)
    }

    pub fn add_vector(&mut self, id: i64, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(anyhow!(
                "Vector dimension mismatch: expected {}, got {}",
                self.dimension,
                vector.len()
            ));
        }

        let vector = DVector::from_vec(vector);
        let norm = vector.norm();
        match self.positions.get(&id) {
            Some(&pos) => {
                self.vectors[pos] = vector;
                self.norms[pos] = norm;
            }
            None => {
                self.positions.insert(id, self.ids.len());
                self.ids.push(id);
                self.vectors.push(vector);
                self.norms.push(norm);
            }
        }
        Ok(())
    }

    pub fn contains(&self, id: i64) -> bool {
        self.positions.contains_key(&id)
    }

    fn cosine_similarity(&self, query: &DVector<f32>, query_norm: f32, pos: usize) -> f32 {
        let norm = self.norms[pos];
        if query_norm == 0.0 || norm == 0.0 {
            0.0
        } else {
            query.dot(&self.vectors[pos]) / (query_norm * norm)
        }
    }
}

impl VectorRetriever for InMemoryRetriever {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn search_similar(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<(i64, f32)>> {
        if query_vector.len() != self.dimension {
            return Err(anyhow!(
                "Query vector dimension mismatch: expected {}, got {}",
                self.dimension,
                query_vector.len()
            ));
        }

        let query = DVector::from_vec(query_vector.to_vec());
        let query_norm = query.norm();

        let mut similarities: Vec<(i64, f32)> = self
            .ids
            .iter()
            .enumerate()
            .map(|(pos, id)| (*id, self.cosine_similarity(&query, query_norm, pos)))
            .collect();

        // Stable sort, so equal scores keep load order
        similarities.sort_by(|a, b| cmp_score_desc(a.1, b.1));
        similarities.truncate(top_k);
        Ok(similarities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_search_orders_by_cosine() {
        let rows = array![[1.0f32, 0.0], [0.7, 0.7], [0.0, 1.0], [-1.0, 0.0]];
        let retriever = InMemoryRetriever::from_rows(&[10, 20, 30, 40], rows.view()).unwrap();

        let results = retriever.search_similar(&[1.0, 0.1], 3).unwrap();
        let ids: Vec<i64> = results.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
        assert!(results[0].1 > results[1].1);
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        let rows = array![[0.0f32, 0.0], [1.0, 1.0]];
        let retriever = InMemoryRetriever::from_rows(&[1, 2], rows.view()).unwrap();

        let results = retriever.search_similar(&[0.0, 0.0], 5).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, score)| *score == 0.0));
        // ties keep load order
        assert_eq!(results[0].0, 1);
    }

    #[test]
    fn test_dimension_mismatch_is_an_error() {
        let retriever = InMemoryRetriever::new(3);
        assert!(retriever.search_similar(&[1.0, 0.0], 1).is_err());

        let mut retriever = InMemoryRetriever::new(2);
        assert!(retriever.add_vector(1, vec![1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn test_add_vector_replaces_existing_id() {
        let mut retriever = InMemoryRetriever::new(2);
        retriever.add_vector(7, vec![1.0, 0.0]).unwrap();
        retriever.add_vector(7, vec![0.0, 1.0]).unwrap();

        assert_eq!(retriever.len(), 1);
        assert!(retriever.contains(7));
        let results = retriever.search_similar(&[0.0, 1.0], 1).unwrap();
        assert!((results[0].1 - 1.0).abs() < 1e-6);
    }
}
