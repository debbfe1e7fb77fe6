use crate::embeddings::EmbeddingModel;
use crate::error::{Result, VectorStoreError};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Brute-force cosine index keyed by document id.
///
/// The dimension is fixed by the first vector added.
#[derive(Debug, Default)]
pub struct VectorIndex {
    dimension: Option<usize>,
    vectors: HashMap<String, Vec<f32>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Add or replace the vector for `id`
    pub fn add(&mut self, id: &str, vector: &[f32]) -> Result<()> {
        self.check_dimension(vector)?;
        self.dimension.get_or_insert(vector.len());
        self.vectors.insert(id.to_string(), vector.to_vec());
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.vectors.remove(id).is_some()
    }

    /// Up to `k` ids with similarity ≥ `threshold`, best first; equal scores by id
    pub fn search(&self, query: &[f32], k: usize, threshold: f32) -> Result<Vec<(String, f32)>> {
        if self.vectors.is_empty() {
            return Ok(Vec::new());
        }
        self.check_dimension(query)?;

        let mut scores: Vec<(String, f32)> = self
            .vectors
            .iter()
            .map(|(id, vector)| (id.clone(), EmbeddingModel::cosine_similarity(query, vector)))
            .filter(|(_, score)| *score >= threshold)
            .collect();

        scores.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scores.truncate(k);

        Ok(scores)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn clear(&mut self) {
        self.vectors.clear();
        self.dimension = None;
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        match self.dimension {
            Some(expected) if expected != vector.len() => Err(VectorStoreError::InvalidDimension {
                expected,
                actual: vector.len(),
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_search() {
        let mut index = VectorIndex::new();

        index.add("a", &[1.0, 0.0, 0.0]).unwrap();
        index.add("b", &[0.9, 0.1, 0.0]).unwrap();
        index.add("c", &[0.0, 1.0, 0.0]).unwrap();

        assert_eq!(index.len(), 3);
        assert_eq!(index.dimension(), Some(3));

        let results = index.search(&[1.0, 0.0, 0.0], 2, 0.0).unwrap();
        assert_eq!(results.len(), 2);

        assert_eq!(results[0].0, "a");
        assert!((results[0].1 - 1.0).abs() < 1e-6);

        assert_eq!(results[1].0, "b");
        assert!(results[1].1 > 0.9);
    }

    #[test]
    fn threshold_filters_distant_vectors() {
        let mut index = VectorIndex::new();
        index.add("a", &[1.0, 0.0]).unwrap();
        index.add("b", &[0.0, 1.0]).unwrap();

        let results = index.search(&[1.0, 0.0], 10, 0.85).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn equal_scores_are_ordered_by_id() {
        let mut index = VectorIndex::new();
        index.add("z", &[1.0, 0.0]).unwrap();
        index.add("m", &[1.0, 0.0]).unwrap();
        index.add("a", &[1.0, 0.0]).unwrap();

        let ids: Vec<_> = index
            .search(&[1.0, 0.0], 3, 0.5)
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["a", "m", "z"]);
    }

    #[test]
    fn re_adding_replaces_the_vector() {
        let mut index = VectorIndex::new();
        index.add("a", &[1.0, 0.0]).unwrap();
        index.add("a", &[0.0, 1.0]).unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.search(&[1.0, 0.0], 1, 0.5).unwrap().is_empty());
        assert!(index.remove("a"));
        assert!(!index.remove("a"));
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = VectorIndex::new();
        index.add("a", &[1.0, 0.0, 0.0]).unwrap();

        assert!(index.add("b", &[1.0, 0.0]).is_err());
        assert!(index.search(&[1.0, 0.0], 1, 0.0).is_err());
    }
}
