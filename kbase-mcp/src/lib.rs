//! # kbase-mcp
//!
//! A Model Context Protocol (MCP) server that gives agents a shared knowledge base:
//! one document, chunked and embedded by kbase-retriever, searchable by meaning.
//!
//! ## MCP Tools
//!
//! - `query_knowledge_base`: the most relevant passages for a question, prefixed with
//!   `Relevant Context:` or a notice that the knowledge base is empty
//! - `trigger_update`: rebuild from the document now, answering
//!   `{"status": "success", "chunk_count": n}`
//! - `status`: engine state, chunk count, model and storage location
//!
//! Queries never see a stale index: each one checks the document first. With `--watch`
//! the rebuild also happens in the background as soon as the file changes.
//!
//! ## Integration with MCP clients
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "kbase": {
//!       "command": "kbase-mcp",
//!       "args": ["--document", "/path/to/shared_knowledge.txt"]
//!     }
//!   }
//! }
//! ```

mod server;
pub mod tools;

pub use server::KbaseMcpServer;

use anyhow::Result;
use kbase_retriever::{DocumentWatcher, RetrievalEngine, RetrieverConfig};
use std::sync::Arc;
use tracing::{info, warn};

/// Configuration for the kbase MCP server.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub retriever: RetrieverConfig,
    /// Rebuild in the background when the document changes
    pub watch: bool,
}

impl ServerConfig {
    pub fn new(retriever: RetrieverConfig) -> Self {
        let watch = retriever.watch.enabled;
        Self { retriever, watch }
    }
}

/// Run the MCP server over stdio until the client disconnects.
///
/// # Errors
/// - Invalid configuration
/// - The embedding model cannot be initialized
/// - MCP protocol communication errors
pub async fn run_server(config: ServerConfig) -> Result<()> {
    info!(
        "Starting kbase MCP server for {}",
        config.retriever.document.path.display()
    );
    let debounce = config.retriever.watch.debounce();
    let engine = Arc::new(RetrievalEngine::from_config(config.retriever).await?);

    // Warm up off the request path; a failure here is retried by the first query
    let warm = Arc::clone(&engine);
    tokio::spawn(async move {
        if let Err(e) = warm.ensure_ready().await {
            warn!("Initial index build failed: {}", e);
        }
    });

    let _watcher = if config.watch {
        Some(DocumentWatcher::spawn(Arc::clone(&engine), debounce)?)
    } else {
        None
    };

    let server = KbaseMcpServer::new(engine);
    info!("kbase MCP server initialized, starting stdio transport");
    server.serve_stdio().await
}
