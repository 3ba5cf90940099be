use super::{Neighbor, rank};
use crate::error::{Result, RetrieverError};
use crate::retrieval::strategy::HnswParams;
use hnsw_rs::hnsw::Hnsw;
use hnsw_rs::prelude::*;
use tracing::debug;

/// Upper bound on graph layers accepted by `hnsw_rs`
const MAX_LAYER: usize = 16;

/// Approximate index backed by an `hnsw_rs` graph with cosine distance.
///
/// The vectors are kept next to the graph so the index can be persisted without
/// serializing graph internals. Data ids inserted into the graph are chunk ordinals.
pub struct HnswIndex {
    dimension: usize,
    params: HnswParams,
    vectors: Vec<Vec<f32>>,
    /// `None` when there are no vectors
    graph: Option<Hnsw<'static, f32, DistCosine>>,
}

impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("dimension", &self.dimension)
            .field("params", &self.params)
            .field("points", &self.vectors.len())
            .finish()
    }
}

impl HnswIndex {
    /// Insert every vector serially in ordinal order.
    pub fn build(dimension: usize, params: HnswParams, vectors: Vec<Vec<f32>>) -> Result<Self> {
        // Parameters may come from a stored blob rather than a validated config
        params.validate().map_err(RetrieverError::build)?;
        let graph = if vectors.is_empty() {
            None
        } else {
            let graph = Hnsw::<f32, DistCosine>::new(
                params.max_connections,
                vectors.len(),
                MAX_LAYER,
                params.ef_construction,
                DistCosine {},
            );
            for (ordinal, vector) in vectors.iter().enumerate() {
                graph.insert_slice((vector.as_slice(), ordinal));
            }
            debug!(
                "Built HNSW graph: points={}, M={}, ef_construction={}",
                graph.get_nb_point(),
                params.max_connections,
                params.ef_construction
            );
            Some(graph)
        };

        Ok(Self {
            dimension,
            params,
            vectors,
            graph,
        })
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

    pub fn params(&self) -> HnswParams {
        self.params
    }

    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    pub fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let Some(graph) = &self.graph else {
            return Vec::new();
        };
        let ef_search = self.params.ef_search.max(k);
        let neighbours = graph.search(query, k, ef_search);

        let candidates = neighbours
            .into_iter()
            .filter(|n| n.d_id < self.vectors.len())
            .map(|n| Neighbor {
                position: n.d_id,
                score: 1.0 - n.distance,
            })
            .collect();
        rank(candidates, k)
    }
}
