//! Durable storage for snapshots.
//!
//! ## Key Components
//!
//! - **SnapshotStore**: save/load contract used by the engine
//! - **Compatibility**: what a persisted snapshot must match to be served again
//! - **FileSnapshotStore**: three files in one directory, replaced atomically
//!
//! A store never raises on load. Anything unusable is logged and reported as "no index
//! yet", which makes the engine rebuild from the document.

use crate::config::RetrieverConfig;
use crate::error::{Result, RetrieverError};
use crate::retrieval::snapshot::{IndexManifest, Snapshot};
use crate::retrieval::strategy::{HnswParams, IndexStrategy};
use async_trait::async_trait;
use kbase_context::ChunkingConfig;
use std::sync::Arc;

pub mod file_store;

pub use file_store::FileSnapshotStore;

/// Settings a persisted snapshot must have been built with to be reused
#[derive(Debug, Clone, PartialEq)]
pub struct Compatibility {
    pub model_id: String,
    pub dimension: usize,
    pub chunking: ChunkingConfig,
    pub strategy: IndexStrategy,
    pub hnsw: HnswParams,
}

impl Compatibility {
    pub fn new(config: &RetrieverConfig, model_id: &str, dimension: usize) -> Self {
        Self {
            model_id: model_id.to_string(),
            dimension,
            chunking: config.chunking,
            strategy: config.index.strategy,
            hnsw: config.index.hnsw,
        }
    }

    /// Explain the first setting that differs, as a [`RetrieverError::LoadCorrupt`].
    pub fn check(&self, manifest: &IndexManifest) -> Result<()> {
        if manifest.model_id != self.model_id {
            return Err(RetrieverError::corrupt(format!(
                "built with model '{}', configured model is '{}'",
                manifest.model_id, self.model_id
            )));
        }
        if manifest.dimension != self.dimension {
            return Err(RetrieverError::corrupt(format!(
                "stored dimension {} differs from embedder dimension {}",
                manifest.dimension, self.dimension
            )));
        }
        if manifest.chunking != self.chunking {
            return Err(RetrieverError::corrupt("chunking parameters changed"));
        }
        if manifest.strategy != self.strategy {
            return Err(RetrieverError::corrupt(format!(
                "stored strategy {} differs from configured {}",
                manifest.strategy, self.strategy
            )));
        }
        if self.strategy == IndexStrategy::Approximate && manifest.hnsw != self.hnsw {
            return Err(RetrieverError::corrupt("HNSW parameters changed"));
        }
        Ok(())
    }
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist a snapshot, replacing whatever was stored before.
    async fn save(&self, snapshot: Arc<Snapshot>) -> Result<()>;

    /// The stored snapshot if it is intact and compatible, otherwise `None`.
    async fn load(&self, expected: &Compatibility) -> Option<Snapshot>;

    /// Location for logs and status output
    fn describe(&self) -> String;
}
