//! Engine configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) describes the stock
//! deployment: `shared_knowledge.txt` indexed into `.kbase/` with all-MiniLM-L6-v2,
//! 500/50 character windows, the approximate strategy, and three results per query.

use crate::error::{Result, RetrieverError};
use crate::retrieval::strategy::{HnswParams, IndexStrategy};
use kbase_context::ChunkingConfig;
use kbase_embed::EmbedConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Text shown in place of results when the knowledge base holds no chunks
pub const EMPTY_KNOWLEDGE_BASE_MESSAGE: &str =
    "Knowledge base is empty. Please upload a document.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    /// The single text document the knowledge base is derived from
    pub path: PathBuf,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("shared_knowledge.txt"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `index.bin`, `chunks.bin` and `manifest.json`
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".kbase"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Results returned when the caller does not ask for a specific count
    pub top_k: usize,
    /// Placed between chunk texts in the rendered answer
    pub separator: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            separator: "\n---\n".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub strategy: IndexStrategy,
    #[serde(flatten)]
    pub hnsw: HnswParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Rebuild in the background when the document changes on disk
    pub enabled: bool,
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce_ms: 500,
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Complete configuration of one knowledge base
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    pub document: DocumentConfig,
    pub storage: StorageConfig,
    pub embedding: EmbedConfig,
    pub chunking: ChunkingConfig,
    pub search: SearchConfig,
    pub index: IndexConfig,
    pub watch: WatchConfig,
}

impl RetrieverConfig {
    /// Configuration for a document and storage directory with every other setting defaulted.
    pub fn new(document: impl Into<PathBuf>, storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            document: DocumentConfig {
                path: document.into(),
            },
            storage: StorageConfig {
                dir: storage_dir.into(),
            },
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| RetrieverError::config(format!("Failed to parse configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file. Relative paths inside it are resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RetrieverError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.document.path,
            &mut self.storage.dir,
            &mut self.embedding.model_base_path,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn with_strategy(mut self, strategy: IndexStrategy) -> Self {
        self.index.strategy = strategy;
        self
    }

    pub fn with_embedding(mut self, embedding: EmbedConfig) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    /// Reject settings that would fail later in a build or a search.
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.embedding
            .validate()
            .map_err(|e| RetrieverError::config(e.to_string()))?;
        self.index.hnsw.validate().map_err(RetrieverError::config)?;
        if self.search.top_k == 0 {
            return Err(RetrieverError::config("search.top_k must be positive"));
        }
        if self.document.path.as_os_str().is_empty() {
            return Err(RetrieverError::config("document.path must be set"));
        }
        if self.storage.dir.as_os_str().is_empty() {
            return Err(RetrieverError::config("storage.dir must be set"));
        }
        Ok(())
    }
}
