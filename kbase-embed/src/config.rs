//! Configuration for embedding models

use crate::error::{EmbedError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Identifier of the default sentence-embedding model (384 dimensions).
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Identifier prefix of the offline lexical embedder. `token-hash` uses
/// [`DEFAULT_TOKEN_HASH_DIMENSION`]; `token-hash-<n>` selects `n` dimensions.
pub const TOKEN_HASH_MODEL: &str = "token-hash";

/// Vector width of `token-hash` when no explicit width is given.
pub const DEFAULT_TOKEN_HASH_DIMENSION: usize = 256;

/// Which implementation serves a configured model identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelBackend {
    /// ONNX model run locally through fastembed
    FastEmbed,
    /// Deterministic feature-hashing embedder with the given width
    TokenHash { dimension: usize },
}

/// Configuration for embedding models
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    /// Name of the embedding model to use; selects the vector space and dimension
    pub model_name: String,
    /// Directory where downloaded model files are cached
    pub model_base_path: PathBuf,
    /// Maximum number of texts sent to the model in one call
    pub batch_size: usize,
    /// Whether to print download progress the first time a model is fetched
    pub show_download_progress: bool,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL.to_string(),
            model_base_path: PathBuf::from("models"),
            batch_size: 32,
            show_download_progress: false,
        }
    }
}

impl EmbedConfig {
    /// Create a configuration for the named model with default settings.
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    /// Create a default configuration caching models under the given path
    pub fn default_with_path<P: AsRef<Path>>(model_base_path: P) -> Self {
        Self::default().with_model_base_path(model_base_path)
    }

    /// Configuration for the offline `token-hash` embedder.
    pub fn token_hash() -> Self {
        Self::new(TOKEN_HASH_MODEL)
    }

    /// Set the batch size for embedding generation (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    /// Set the model cache directory (builder style)
    pub fn with_model_base_path<P: AsRef<Path>>(self, model_base_path: P) -> Self {
        Self {
            model_base_path: model_base_path.as_ref().to_path_buf(),
            ..self
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Resolve the model identifier to the backend that serves it.
    pub fn backend(&self) -> Result<ModelBackend> {
        let name = self.model_name.trim();
        if name == TOKEN_HASH_MODEL {
            return Ok(ModelBackend::TokenHash {
                dimension: DEFAULT_TOKEN_HASH_DIMENSION,
            });
        }
        if let Some(width) = name
            .strip_prefix(TOKEN_HASH_MODEL)
            .and_then(|rest| rest.strip_prefix('-'))
        {
            let dimension = width.parse::<usize>().map_err(|_| {
                EmbedError::invalid_config(format!("Invalid token-hash width in '{name}'"))
            })?;
            if dimension == 0 {
                return Err(EmbedError::invalid_config(
                    "token-hash width must be positive",
                ));
            }
            return Ok(ModelBackend::TokenHash { dimension });
        }
        Ok(ModelBackend::FastEmbed)
    }

    /// Validate settings that do not require loading the model.
    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(EmbedError::invalid_config("Model name must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config("Batch size must be positive"));
        }
        self.backend()?;
        Ok(())
    }
}
