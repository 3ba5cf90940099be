//! Error types for the retrieval engine

use std::path::PathBuf;

/// Result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrieverError>;

#[derive(Debug, thiserror::Error)]
pub enum RetrieverError {
    /// Invalid configuration, rejected before any work is done
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// The source document does not exist
    #[error("Source document not found: {}", path.display())]
    SourceMissing { path: PathBuf },

    /// A persisted index failed validation. Loading treats this as "no index yet".
    #[error("Persisted index is unusable: {reason}")]
    LoadCorrupt { reason: String },

    /// Embedding generation failed or broke the one-vector-per-text contract
    #[error("Embedding failed: {source}")]
    Embedding {
        #[from]
        source: kbase_embed::EmbedError,
    },

    /// Index construction failed
    #[error("Index build failed: {message}")]
    Build { message: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// A blocking build task panicked or was cancelled
    #[error("Background task failed: {source}")]
    Task {
        #[from]
        source: tokio::task::JoinError,
    },
}

impl RetrieverError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn corrupt<S: Into<String>>(reason: S) -> Self {
        Self::LoadCorrupt {
            reason: reason.into(),
        }
    }

    pub fn build<S: Into<String>>(message: S) -> Self {
        Self::Build {
            message: message.into(),
        }
    }

    pub fn serialization<E: std::fmt::Display>(err: E) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<kbase_context::ChunkError> for RetrieverError {
    fn from(err: kbase_context::ChunkError) -> Self {
        Self::config(err.to_string())
    }
}

impl From<bincode::Error> for RetrieverError {
    fn from(err: bincode::Error) -> Self {
        Self::serialization(err)
    }
}

impl From<serde_json::Error> for RetrieverError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_error_is_config_error() {
        let err: RetrieverError = kbase_context::ChunkError::OverlapTooLarge {
            chunk_size: 10,
            overlap: 10,
        }
        .into();
        assert!(matches!(err, RetrieverError::Config { .. }));
    }

    #[test]
    fn test_messages() {
        let err = RetrieverError::SourceMissing {
            path: PathBuf::from("notes.txt"),
        };
        assert_eq!(err.to_string(), "Source document not found: notes.txt");

        let err = RetrieverError::corrupt("digest mismatch for chunks.bin");
        assert_eq!(
            err.to_string(),
            "Persisted index is unusable: digest mismatch for chunks.bin"
        );
    }
}
