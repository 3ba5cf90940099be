//! Nearest-neighbor indexes over chunk vectors.
//!
//! Row `i` of every index is the vector of the chunk with ordinal `i`. Both strategies
//! score by cosine similarity; vectors are unit-normalized by the embedder, so the exact
//! scan uses a plain dot product.

pub mod exact;
pub mod hnsw;

use crate::error::{Result, RetrieverError};
use crate::retrieval::strategy::{HnswParams, IndexStrategy};
use serde::{Deserialize, Serialize};

pub use exact::ExactIndex;
pub use hnsw::HnswIndex;

/// One candidate returned by an index search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Row of the matching vector, equal to the chunk ordinal
    pub position: usize,
    /// Cosine similarity to the query
    pub score: f32,
}

/// Sort by descending score, lower position first on ties, and keep `k`.
pub(crate) fn rank(mut neighbors: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    neighbors.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.position.cmp(&b.position))
    });
    neighbors.truncate(k);
    neighbors
}

fn check_vectors(dimension: usize, vectors: &[Vec<f32>]) -> Result<()> {
    if dimension == 0 && !vectors.is_empty() {
        return Err(RetrieverError::build("vector dimension must be positive"));
    }
    if let Some((row, v)) = vectors
        .iter()
        .enumerate()
        .find(|(_, v)| v.len() != dimension)
    {
        return Err(RetrieverError::build(format!(
            "vector {row} has dimension {}, expected {dimension}",
            v.len()
        )));
    }
    Ok(())
}

/// A built index of either strategy
#[derive(Debug)]
pub enum VectorIndex {
    Exact(ExactIndex),
    Approximate(HnswIndex),
}

/// Serialized form of an index. Graphs are not stored; they are rebuilt from the vectors.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct IndexBlob {
    pub strategy: IndexStrategy,
    pub params: HnswParams,
    pub dimension: usize,
    pub vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Build an index from vectors in ordinal order. CPU bound; call from a blocking thread.
    pub fn build(
        strategy: IndexStrategy,
        params: HnswParams,
        dimension: usize,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self> {
        check_vectors(dimension, &vectors)?;
        Ok(match strategy {
            IndexStrategy::Exact => VectorIndex::Exact(ExactIndex::new(dimension, vectors)),
            IndexStrategy::Approximate => {
                VectorIndex::Approximate(HnswIndex::build(dimension, params, vectors)?)
            }
        })
    }

    pub fn strategy(&self) -> IndexStrategy {
        match self {
            VectorIndex::Exact(_) => IndexStrategy::Exact,
            VectorIndex::Approximate(_) => IndexStrategy::Approximate,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            VectorIndex::Exact(index) => index.len(),
            VectorIndex::Approximate(index) => index.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        match self {
            VectorIndex::Exact(index) => index.dimension(),
            VectorIndex::Approximate(index) => index.dimension(),
        }
    }

    /// At most `k` neighbors, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension() {
            return Err(RetrieverError::build(format!(
                "query has dimension {}, index expects {}",
                query.len(),
                self.dimension()
            )));
        }
        Ok(match self {
            VectorIndex::Exact(index) => index.search(query, k),
            VectorIndex::Approximate(index) => index.search(query, k),
        })
    }

    pub(crate) fn to_blob(&self) -> IndexBlob {
        match self {
            VectorIndex::Exact(index) => IndexBlob {
                strategy: IndexStrategy::Exact,
                params: HnswParams::default(),
                dimension: index.dimension(),
                vectors: index.vectors().to_vec(),
            },
            VectorIndex::Approximate(index) => IndexBlob {
                strategy: IndexStrategy::Approximate,
                params: index.params(),
                dimension: index.dimension(),
                vectors: index.vectors().to_vec(),
            },
        }
    }

    pub(crate) fn from_blob(blob: IndexBlob) -> Result<Self> {
        Self::build(blob.strategy, blob.params, blob.dimension, blob.vectors)
    }
}
