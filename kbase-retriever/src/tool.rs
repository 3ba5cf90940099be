//! Tool-call surface of the knowledge base.
//!
//! These are the two operations an agent invokes: ask a question, and tell the engine
//! the document changed. Both return plain `Result`s with a serializable [`ToolError`];
//! conversion to a particular transport's error type happens in the transport.

use crate::config::EMPTY_KNOWLEDGE_BASE_MESSAGE;
use crate::error::RetrieverError;
use crate::retrieval::engine::{EngineStatus, RetrievalEngine, SearchOutcome};
use crate::retrieval::snapshot::SearchHit;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Prefix of every successful query answer
pub const CONTEXT_HEADER: &str = "Relevant Context:\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorCode {
    InvalidArgument,
    Configuration,
    EmbeddingFailed,
    BuildFailed,
    Internal,
}

impl std::fmt::Display for ToolErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            ToolErrorCode::InvalidArgument => "invalid_argument",
            ToolErrorCode::Configuration => "configuration",
            ToolErrorCode::EmbeddingFailed => "embedding_failed",
            ToolErrorCode::BuildFailed => "build_failed",
            ToolErrorCode::Internal => "internal",
        };
        f.write_str(code)
    }
}

/// Structured error returned across the tool boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ToolError {
    pub code: ToolErrorCode,
    pub message: String,
}

impl ToolError {
    pub fn new(code: ToolErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<RetrieverError> for ToolError {
    fn from(err: RetrieverError) -> Self {
        let code = match &err {
            RetrieverError::Config { .. } => ToolErrorCode::Configuration,
            RetrieverError::Embedding { .. } => ToolErrorCode::EmbeddingFailed,
            RetrieverError::Build { .. } | RetrieverError::SourceMissing { .. } => {
                ToolErrorCode::BuildFailed
            }
            RetrieverError::LoadCorrupt { .. }
            | RetrieverError::Io { .. }
            | RetrieverError::Serialization { .. }
            | RetrieverError::Task { .. } => ToolErrorCode::Internal,
        };
        Self::new(code, err.to_string())
    }
}

/// Acknowledgement of a rebuild request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub status: String,
    pub chunk_count: usize,
}

/// Join chunk texts, best first, with the configured separator.
pub fn render_context(hits: &[SearchHit], separator: &str) -> String {
    hits.iter()
        .map(|hit| hit.text.as_str())
        .collect::<Vec<_>>()
        .join(separator)
}

/// Tool handlers over one shared engine
#[derive(Debug, Clone)]
pub struct KnowledgeBaseTools {
    engine: Arc<RetrievalEngine>,
}

impl KnowledgeBaseTools {
    pub fn new(engine: Arc<RetrievalEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<RetrievalEngine> {
        &self.engine
    }

    /// Retrieve the passages most relevant to `question`.
    pub async fn query_knowledge_base(&self, question: &str) -> Result<String, ToolError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ToolError::new(
                ToolErrorCode::InvalidArgument,
                "question must not be empty",
            ));
        }

        match self.engine.search(question, None).await {
            Ok(SearchOutcome::Matches(hits)) => Ok(format!(
                "{CONTEXT_HEADER}{}",
                render_context(&hits, &self.engine.config().search.separator)
            )),
            Ok(SearchOutcome::EmptyKnowledgeBase) => Ok(EMPTY_KNOWLEDGE_BASE_MESSAGE.to_string()),
            Err(e) => {
                warn!("query_knowledge_base failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Rebuild the index from the current document.
    pub async fn trigger_update(&self) -> Result<TriggerResponse, ToolError> {
        let report = self.engine.refresh().await.map_err(|e| {
            warn!("trigger_update failed: {}", e);
            ToolError::from(e)
        })?;
        info!(
            "trigger_update finished ({:?}) with {} chunks",
            report.outcome, report.chunk_count
        );
        Ok(TriggerResponse {
            status: "success".to_string(),
            chunk_count: report.chunk_count,
        })
    }

    pub fn status(&self) -> EngineStatus {
        self.engine.status()
    }
}
