//! Document → chunks → embeddings → index.
//!
//! A build always starts from the full document text and produces a brand new
//! [`Snapshot`]; existing snapshots are never modified.

use crate::config::RetrieverConfig;
use crate::error::{Result, RetrieverError};
use crate::retrieval::document::{Document, DocumentSource, SourceStamp};
use crate::retrieval::index::VectorIndex;
use crate::retrieval::snapshot::{IndexManifest, Snapshot};
use crate::retrieval::strategy::{HnswParams, IndexStrategy};
use chrono::Utc;
use kbase_context::{ChunkingConfig, TextChunk};
use kbase_embed::{EmbedError, EmbeddingProvider};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub struct IndexBuilder {
    chunking: ChunkingConfig,
    strategy: IndexStrategy,
    hnsw: HnswParams,
    provider: Arc<dyn EmbeddingProvider>,
}

impl std::fmt::Debug for IndexBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexBuilder")
            .field("chunking", &self.chunking)
            .field("strategy", &self.strategy)
            .field("hnsw", &self.hnsw)
            .field("model_id", &self.provider.model_id())
            .finish()
    }
}

impl IndexBuilder {
    pub fn new(config: &RetrieverConfig, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            chunking: config.chunking,
            strategy: config.index.strategy,
            hnsw: config.index.hnsw,
            provider,
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn strategy(&self) -> IndexStrategy {
        self.strategy
    }

    /// Build a snapshot of the document as it is now. A missing document yields an
    /// empty snapshot stamped [`SourceStamp::Missing`].
    pub async fn build(&self, source: &dyn DocumentSource) -> Result<Snapshot> {
        let document = source.read().await?;
        if document.is_none() {
            info!("Document {} is missing; building empty index", source.describe());
        }
        self.build_document(document).await
    }

    /// Build from a document that was already read; `None` means it does not exist.
    pub async fn build_document(&self, document: Option<Document>) -> Result<Snapshot> {
        match document {
            Some(document) => self.build_from_text(&document.text, document.stamp).await,
            None => self.build_from_text("", SourceStamp::Missing).await,
        }
    }

    pub async fn build_from_text(&self, text: &str, stamp: SourceStamp) -> Result<Snapshot> {
        let started = Instant::now();
        let chunks = kbase_context::chunk_text(text, &self.chunking)?;
        debug!(
            "Chunked {} characters into {} chunks",
            text.chars().count(),
            chunks.len()
        );

        let vectors = self.embed_chunks(&chunks).await?;
        let embedded = started.elapsed();

        let dimension = self.provider.embedding_dimension();
        let strategy = self.strategy;
        let hnsw = self.hnsw;
        let index = tokio::task::spawn_blocking(move || {
            VectorIndex::build(strategy, hnsw, dimension, vectors)
        })
        .await??;

        let manifest = IndexManifest {
            strategy,
            hnsw,
            source_stamp: stamp,
            chunk_count: chunks.len(),
            model_id: self.provider.model_id().to_string(),
            dimension,
            chunking: self.chunking,
            built_at: Utc::now(),
        };
        let snapshot = Snapshot::new(index, chunks, manifest)?;

        info!(
            "Built {} index with {} chunks in {:?} (embedding {:?})",
            strategy,
            snapshot.len(),
            started.elapsed(),
            embedded
        );
        Ok(snapshot)
    }

    /// Embed every chunk in one batched call, one f32 vector per chunk in ordinal order.
    async fn embed_chunks(&self, chunks: &[TextChunk]) -> Result<Vec<Vec<f32>>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let result = self.provider.embed_texts(&texts).await?;
        if result.len() != texts.len() {
            return Err(EmbedError::CardinalityMismatch {
                expected: texts.len(),
                actual: result.len(),
            }
            .into());
        }

        let dimension = self.provider.embedding_dimension();
        result
            .embeddings
            .into_iter()
            .map(|v| {
                if v.len() != dimension {
                    return Err(RetrieverError::build(format!(
                        "embedder returned a {}-dimensional vector, expected {dimension}",
                        v.len()
                    )));
                }
                Ok(v.into_iter().map(|x| x.to_f32()).collect())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::document::MemoryDocument;
    use crate::test_support::{FixedCountProvider, token_hash};

    fn config(strategy: IndexStrategy) -> RetrieverConfig {
        RetrieverConfig::default().with_strategy(strategy)
    }

    #[tokio::test]
    async fn test_sky_example_builds_one_chunk() {
        let builder = IndexBuilder::new(&config(IndexStrategy::Exact), token_hash());
        let source = MemoryDocument::with_text("The sky is blue. Grass is green.");

        let snapshot = builder.build(&source).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.index().len(), 1);
        assert_eq!(snapshot.chunks()[0].text, "The sky is blue. Grass is green.");
        assert_eq!(snapshot.manifest().chunk_count, 1);
        assert_eq!(snapshot.manifest().model_id, "token-hash-256");
        assert!(matches!(
            snapshot.manifest().source_stamp,
            SourceStamp::Modified(_)
        ));
    }

    #[tokio::test]
    async fn test_index_and_chunks_have_equal_length() {
        let text = "Paragraph about rivers and lakes. ".repeat(100);
        for strategy in [IndexStrategy::Exact, IndexStrategy::Approximate] {
            let builder = IndexBuilder::new(&config(strategy), token_hash());
            let snapshot = builder
                .build_from_text(&text, SourceStamp::Missing)
                .await
                .unwrap();
            assert!(snapshot.len() > 1);
            assert_eq!(snapshot.index().len(), snapshot.len());
            assert_eq!(snapshot.index().strategy(), strategy);
        }
    }

    #[tokio::test]
    async fn test_missing_document_builds_empty_snapshot() {
        let builder = IndexBuilder::new(&config(IndexStrategy::Approximate), token_hash());
        let snapshot = builder.build(&MemoryDocument::empty()).await.unwrap();

        assert!(snapshot.is_empty());
        assert_eq!(snapshot.manifest().source_stamp, SourceStamp::Missing);
    }

    #[tokio::test]
    async fn test_short_document_builds_empty_snapshot() {
        let builder = IndexBuilder::new(&config(IndexStrategy::Exact), token_hash());
        let snapshot = builder
            .build(&MemoryDocument::with_text("too short"))
            .await
            .unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_cardinality_mismatch_is_embedding_error() {
        let provider = Arc::new(FixedCountProvider { count: 1 });
        let builder = IndexBuilder::new(&config(IndexStrategy::Exact), provider);
        let text = "A sentence long enough to be kept as a chunk. ".repeat(30);

        let err = builder
            .build_from_text(&text, SourceStamp::Missing)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RetrieverError::Embedding {
                source: EmbedError::CardinalityMismatch { .. }
            }
        ));
    }
}
