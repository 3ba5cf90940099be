use super::{Neighbor, rank};

/// Exhaustive inner-product scan. Returns the true top-k.
#[derive(Debug, Clone)]
pub struct ExactIndex {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

impl ExactIndex {
    pub fn new(dimension: usize, vectors: Vec<Vec<f32>>) -> Self {
        Self { dimension, vectors }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    pub fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let scored = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, v)| Neighbor {
                position,
                score: v.iter().zip(query).map(|(a, b)| a * b).sum(),
            })
            .collect();
        rank(scored, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::index::tests::unit;

    #[test]
    fn test_exact_top_k() {
        let index = ExactIndex::new(
            3,
            vec![
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0],
                unit(3, 0, 0.5),
                vec![0.0, 0.0, 1.0],
            ],
        );

        let hits = index.search(&[1.0, 0.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].position, 0);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].position, 2);
    }

    #[test]
    fn test_k_larger_than_index() {
        let index = ExactIndex::new(2, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(index.search(&[0.6, 0.8], 10).len(), 2);
    }

    #[test]
    fn test_identical_vectors_rank_by_ordinal() {
        let index = ExactIndex::new(2, vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 0.0]]);
        let hits = index.search(&[1.0, 0.0], 3);
        assert_eq!(
            hits.iter().map(|n| n.position).collect::<Vec<_>>(),
            vec![1, 2, 0]
        );
    }
}
