//! # kbase-embed
//!
//! Text embedding for the kbase retrieval engine. Providers turn passages and questions
//! into L2-normalized half-precision vectors so that a dot product is a cosine score.
//!
//! ## Providers
//!
//! - [`FastEmbedProvider`]: local ONNX sentence-embedding models (default
//!   `all-MiniLM-L6-v2`, 384 dimensions), cached process-wide after the first load.
//! - [`TokenHashProvider`]: a deterministic feature-hashing embedder that needs no
//!   model files.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kbase_embed::{EmbedConfig, create_provider};
//!
//! # async fn example() -> kbase_embed::Result<()> {
//! let provider = create_provider(&EmbedConfig::default_with_path("/tmp/models")).await?;
//!
//! let texts = vec!["Hello world".to_string(), "How are you?".to_string()];
//! let result = provider.embed_texts(&texts).await?;
//!
//! println!("Generated {} embeddings of dimension {}", result.len(), result.dimension);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod hashing;
pub mod provider;

use std::sync::Arc;

pub use config::{DEFAULT_MODEL, EmbedConfig, ModelBackend, TOKEN_HASH_MODEL};
pub use error::{EmbedError, Result};
pub use hashing::TokenHashProvider;
pub use provider::{EmbeddingProvider, EmbeddingResult, FastEmbedProvider};

/// Build and initialize the provider selected by `config.model_name`.
pub async fn create_provider(config: &EmbedConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    config.validate()?;
    match config.backend()? {
        ModelBackend::TokenHash { dimension } => {
            tracing::info!("Using token-hash embedder with {} dimensions", dimension);
            Ok(Arc::new(TokenHashProvider::new(dimension)?))
        }
        ModelBackend::FastEmbed => Ok(Arc::new(FastEmbedProvider::create(config.clone()).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tracing_test::traced_test;

    #[traced_test]
    #[tokio::test]
    async fn test_create_token_hash_provider() {
        let provider = create_provider(&EmbedConfig::new("token-hash-48"))
            .await
            .unwrap();

        assert_eq!(provider.provider_name(), "token-hash");
        assert_eq!(provider.embedding_dimension(), 48);
        assert_eq!(provider.model_id(), "token-hash-48");
        assert!(logs_contain("Using token-hash embedder with 48 dimensions"));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_config() {
        let err = create_provider(&EmbedConfig::token_hash().with_batch_size(0))
            .await
            .err().unwrap();
        assert!(matches!(err, EmbedError::InvalidConfig { .. }));
    }
}
