//! kbase-retriever: semantic retrieval over one evolving knowledge document
//!
//! The document is split into overlapping windows, each window is embedded, and the
//! vectors go into an exact or HNSW index. Queries return the most similar windows.
//! The index is rebuilt whenever the document changes and persisted between runs.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: document sources, index building, staleness and the engine
//! - **[`storage`]**: persisted snapshots with atomic replacement
//! - **[`tool`]**: the `query_knowledge_base` / `trigger_update` tool surface
//! - **[`config`]**: TOML configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kbase_retriever::{RetrievalEngine, RetrieverConfig, SearchOutcome};
//!
//! # async fn example() -> kbase_retriever::Result<()> {
//! let config = RetrieverConfig::new("shared_knowledge.txt", ".kbase");
//! let engine = RetrievalEngine::from_config(config).await?;
//! if let SearchOutcome::Matches(hits) = engine.search("what color is the sky", None).await? {
//!     for hit in hits {
//!         println!("{:.3} {}", hit.score, hit.text);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Document → Chunker → Embedder → VectorIndex → Snapshot → FileSnapshotStore
//!    ↑                                             ↓
//! DocumentWatcher → RetrievalEngine ← KnowledgeBaseTools
//! ```

pub mod config;
pub mod error;
pub mod retrieval;
pub mod storage;
pub mod tool;

pub use config::{EMPTY_KNOWLEDGE_BASE_MESSAGE, RetrieverConfig};
pub use error::{Result, RetrieverError};
pub use retrieval::document::{DocumentSource, FileDocument, MemoryDocument, SourceStamp};
pub use retrieval::document_watcher::DocumentWatcher;
pub use retrieval::engine::{
    EngineState, EngineStatus, RefreshOutcome, RefreshReport, RetrievalEngine, SearchOutcome,
};
pub use retrieval::snapshot::{SearchHit, Snapshot};
pub use retrieval::strategy::{HnswParams, IndexStrategy};
pub use storage::{FileSnapshotStore, SnapshotStore};
pub use tool::{KnowledgeBaseTools, ToolError, ToolErrorCode, TriggerResponse};
