//! An immutable (index, chunks, manifest) triple produced by one build.
//!
//! The engine publishes snapshots whole behind an `Arc`, so a reader holding one can
//! never see the index of one build paired with the chunks of another.

use crate::error::{Result, RetrieverError};
use crate::retrieval::document::SourceStamp;
use crate::retrieval::index::VectorIndex;
use crate::retrieval::strategy::{HnswParams, IndexStrategy};
use chrono::{DateTime, Utc};
use kbase_context::{ChunkingConfig, TextChunk};
use serde::{Deserialize, Serialize};

/// Record of how a snapshot was built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub strategy: IndexStrategy,
    pub hnsw: HnswParams,
    /// Document state the chunks were derived from
    pub source_stamp: SourceStamp,
    pub chunk_count: usize,
    /// Vector space of the stored embeddings
    pub model_id: String,
    pub dimension: usize,
    pub chunking: ChunkingConfig,
    pub built_at: DateTime<Utc>,
}

/// One retrieved chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub ordinal: usize,
    /// Cosine similarity to the query
    pub score: f32,
    pub text: String,
}

#[derive(Debug)]
pub struct Snapshot {
    index: VectorIndex,
    chunks: Vec<TextChunk>,
    manifest: IndexManifest,
}

impl Snapshot {
    /// Package a built index with its chunks. Row `i` of the index must embed chunk `i`.
    pub fn new(index: VectorIndex, chunks: Vec<TextChunk>, manifest: IndexManifest) -> Result<Self> {
        if index.len() != chunks.len() {
            return Err(RetrieverError::build(format!(
                "index holds {} vectors but there are {} chunks",
                index.len(),
                chunks.len()
            )));
        }
        if manifest.chunk_count != chunks.len() {
            return Err(RetrieverError::build(format!(
                "manifest records {} chunks but there are {}",
                manifest.chunk_count,
                chunks.len()
            )));
        }
        if let Some((position, chunk)) = chunks
            .iter()
            .enumerate()
            .find(|(position, chunk)| chunk.ordinal != *position)
        {
            return Err(RetrieverError::build(format!(
                "chunk at position {position} has ordinal {}",
                chunk.ordinal
            )));
        }
        Ok(Self {
            index,
            chunks,
            manifest,
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[TextChunk] {
        &self.chunks
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    /// Nearest chunks to an embedded query, best first.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        let neighbors = self.index.search(query, top_k)?;
        Ok(neighbors
            .into_iter()
            .filter_map(|n| {
                self.chunks.get(n.position).map(|chunk| SearchHit {
                    ordinal: chunk.ordinal,
                    score: n.score,
                    text: chunk.text.clone(),
                })
            })
            .collect())
    }
}
