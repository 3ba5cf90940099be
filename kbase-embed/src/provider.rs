//! Embedding provider implementations
//!
//! [`FastEmbedProvider`] runs a sentence-embedding ONNX model locally. Loaded models are
//! kept in a process-wide cache keyed by the full configuration, so a rebuild that
//! recreates its provider does not pay the load cost twice.

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use fnv::FnvHasher;
use half::f16;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f16>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result from a vector of f16 embeddings.
    ///
    /// The dimension is inferred from the first embedding vector, or 0 when empty.
    pub fn new(embeddings: Vec<Vec<f16>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Returns the number of embedding vectors in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Type alias for cached model entries (model, dimension)
type ModelCacheEntry = (Arc<Mutex<TextEmbedding>>, usize);

/// Global cache for initialized embedding models to avoid reloading
static MODEL_CACHE: OnceLock<Mutex<HashMap<String, ModelCacheEntry>>> = OnceLock::new();

/// Lock the global model cache. A panic while holding the lock cannot leave the map
/// half-updated, so a poisoned lock is recovered rather than propagated.
fn lock_model_cache() -> MutexGuard<'static, HashMap<String, ModelCacheEntry>> {
    MODEL_CACHE
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Trait for embedding providers that can generate embeddings from text
///
/// Every vector a provider returns is L2-normalized, so the dot product of two vectors
/// from the same provider is their cosine similarity.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate the embedding for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>>;

    /// Generate embeddings for multiple texts, one vector per text in input order
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name of the backend serving this provider
    fn provider_name(&self) -> &str;

    /// Identifier of the vector space. Vectors with different ids are not comparable.
    fn model_id(&self) -> &str;
}

/// Map a configured model name onto a fastembed built-in model.
pub fn resolve_model(name: &str) -> Result<EmbeddingModel> {
    let model = match name.trim().to_ascii_lowercase().as_str() {
        "all-minilm-l6-v2" | "sentence-transformers/all-minilm-l6-v2" => {
            EmbeddingModel::AllMiniLML6V2
        }
        "all-minilm-l12-v2" | "sentence-transformers/all-minilm-l12-v2" => {
            EmbeddingModel::AllMiniLML12V2
        }
        "bge-small-en-v1.5" | "baai/bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
        "bge-base-en-v1.5" | "baai/bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
        "snowflake-arctic-embed-xs" => EmbeddingModel::SnowflakeArcticEmbedXS,
        _ => {
            return Err(EmbedError::invalid_config(format!(
                "Unsupported embedding model: {name}"
            )));
        }
    };
    Ok(model)
}

/// L2-normalize in f32, then narrow to f16.
pub fn to_normalized_f16(embedding: Vec<f32>) -> Vec<f16> {
    let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        embedding
            .into_iter()
            .map(|value| f16::from_f32(value / norm))
            .collect()
    } else {
        embedding.into_iter().map(f16::from_f32).collect()
    }
}

/// FastEmbed-based embedding provider using local ONNX models
#[derive(Clone)]
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: Option<Arc<Mutex<TextEmbedding>>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("model", &self.model.is_some())
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Creates a new uninitialized provider. Call [`initialize`](Self::initialize) before use.
    pub fn new(config: EmbedConfig) -> Self {
        Self {
            config,
            model: None,
            dimension: 0,
        }
    }

    /// Loads the embedding model, downloading it on first use, and validates it.
    pub async fn initialize(&mut self) -> Result<()> {
        self.config.validate()?;
        tracing::info!(
            "Initializing FastEmbed provider for model: {}",
            self.config.model_name()
        );

        let cache_key = self.create_cache_key()?;

        // Drop entries written under an older key scheme
        {
            let mut cache = lock_model_cache();
            let before = cache.len();
            cache.retain(|key, _| key.starts_with("v1:"));
            if cache.len() != before {
                tracing::info!("Cleared cache due to version upgrade");
            }
        }

        let cached_data = lock_model_cache()
            .get(&cache_key)
            .map(|(model, dim)| (Arc::clone(model), *dim));

        if let Some((cached_model, cached_dimension)) = cached_data {
            tracing::info!("Using cached model for: {}", self.config.model_name());
            self.model = Some(cached_model);
            self.dimension = cached_dimension;
            return self.validate_model().await;
        }

        let embedding_model = resolve_model(self.config.model_name())?;
        let config = self.config.clone();
        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                tracing::info!("Loading embedding model: {}", config.model_name());

                let init_options = InitOptions::new(embedding_model)
                    .with_cache_dir(config.model_base_path.clone())
                    .with_show_download_progress(config.show_download_progress);

                let mut model = TextEmbedding::try_new(init_options).map_err(EmbedError::model_init)?;

                // Probe the output width with a throwaway embedding
                let probe = model
                    .embed(vec!["dimension probe".to_string()], None)
                    .map_err(EmbedError::model_init)?;
                let dimension = probe.first().map(|emb| emb.len()).unwrap_or(0);
                if dimension == 0 {
                    return Err(EmbedError::model_init(
                        "model produced an empty probe embedding",
                    ));
                }

                tracing::info!("Model loaded successfully. Dimension: {}", dimension);
                Ok((model, dimension))
            })
            .await??;

        let model_arc = Arc::new(Mutex::new(model));
        lock_model_cache().insert(cache_key, (Arc::clone(&model_arc), dimension));

        self.model = Some(model_arc);
        self.dimension = dimension;

        self.validate_model().await
    }

    /// Creates and initializes a provider in one step.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let mut provider = Self::new(config);
        provider.initialize().await?;
        Ok(provider)
    }

    /// Create a cache key based on the model configuration
    fn create_cache_key(&self) -> Result<String> {
        let config_json = serde_json::to_string(&self.config)
            .map_err(|e| EmbedError::External { source: e.into() })?;

        let mut hasher = FnvHasher::default();
        hasher.write(b"v1:");
        hasher.write(config_json.as_bytes());

        Ok(format!("v1:{:x}", hasher.finish()))
    }

    /// Validate that the model is working correctly
    async fn validate_model(&self) -> Result<()> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| EmbedError::invalid_config("Model not initialized"))?;

        let model_clone = Arc::clone(model);
        let validation_result = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut model_guard = model_clone.lock().unwrap_or_else(PoisonError::into_inner);
            model_guard
                .embed(vec!["validation test".to_string()], None)
                .map_err(EmbedError::model_init)
        })
        .await??;

        let Some(embedding) = validation_result.first() else {
            return Err(EmbedError::model_init(
                "Model validation failed: no embeddings generated",
            ));
        };

        if embedding.len() != self.dimension {
            return Err(EmbedError::model_init(format!(
                "Model validation failed: expected dimension {}, got {}",
                self.dimension,
                embedding.len()
            )));
        }

        if embedding.iter().any(|value| !value.is_finite()) {
            return Err(EmbedError::model_init(
                "Model validation failed: non-finite values in embedding",
            ));
        }

        tracing::debug!("Model validation passed for: {}", self.config.model_name());
        Ok(())
    }

    /// Clears the global model cache.
    pub fn clear_cache() {
        lock_model_cache().clear();
        tracing::info!("Model cache cleared");
    }

    /// Returns the number of cached models.
    pub fn cache_size() -> usize {
        lock_model_cache().len()
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        let texts = vec![text.to_string()];
        let result = self.embed_texts(&texts).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or(EmbedError::CardinalityMismatch {
                expected: 1,
                actual: 0,
            })
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        let model = self.model.as_ref().ok_or_else(|| {
            EmbedError::invalid_config("Model not initialized. Call initialize() first.")
        })?;

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size) {
            let batch = batch.to_vec();
            let expected = batch.len();
            let model_clone = Arc::clone(model);

            let batch_embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                let mut model_guard = model_clone.lock().unwrap_or_else(PoisonError::into_inner);
                model_guard
                    .embed(batch, None)
                    .map_err(EmbedError::embedding_gen)
            })
            .await??;

            if batch_embeddings.len() != expected {
                return Err(EmbedError::CardinalityMismatch {
                    expected,
                    actual: batch_embeddings.len(),
                });
            }

            all_embeddings.extend(batch_embeddings.into_iter().map(to_normalized_f16));
        }

        tracing::debug!("Generated {} embeddings", all_embeddings.len());
        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }

    fn model_id(&self) -> &str {
        self.config.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_result() {
        let embeddings = vec![
            vec![f16::from_f32(0.1), f16::from_f32(0.2), f16::from_f32(0.3)],
            vec![f16::from_f32(0.4), f16::from_f32(0.5), f16::from_f32(0.6)],
        ];
        let result = EmbeddingResult::new(embeddings);

        assert_eq!(result.len(), 2);
        assert_eq!(result.dimension, 3);
        assert!(!result.is_empty());
        assert_eq!(EmbeddingResult::new(vec![]).dimension, 0);
    }

    #[test]
    fn test_fastembed_provider_creation() {
        let provider = FastEmbedProvider::new(EmbedConfig::default());

        assert_eq!(provider.provider_name(), "fastembed");
        assert_eq!(provider.model_id(), "all-MiniLM-L6-v2");
        assert_eq!(provider.embedding_dimension(), 0);
    }

    #[test]
    fn test_resolve_model() {
        assert!(matches!(
            resolve_model("all-MiniLM-L6-v2"),
            Ok(EmbeddingModel::AllMiniLML6V2)
        ));
        assert!(matches!(
            resolve_model("BAAI/bge-small-en-v1.5"),
            Ok(EmbeddingModel::BGESmallENV15)
        ));
        assert!(resolve_model("ModernBERT-large").is_err());
    }

    #[test]
    fn test_normalization() {
        let normalized = to_normalized_f16(vec![3.0, 4.0]);
        assert!((normalized[0].to_f32() - 0.6).abs() < 1e-3);
        assert!((normalized[1].to_f32() - 0.8).abs() < 1e-3);

        let zeros = to_normalized_f16(vec![0.0, 0.0]);
        assert!(zeros.iter().all(|v| v.to_f32() == 0.0));
    }

    #[tokio::test]
    async fn test_embed_without_initialize_fails() {
        let provider = FastEmbedProvider::new(EmbedConfig::default());
        let err = provider
            .embed_texts(&["hello".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, EmbedError::InvalidConfig { .. }));

        let empty = provider.embed_texts(&[]).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_model_fails_initialization() {
        let err = FastEmbedProvider::create(EmbedConfig::new("no-such-model"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported embedding model"));
    }

    #[test]
    fn test_cache_key_generation() {
        let key1 = FastEmbedProvider::new(EmbedConfig::default())
            .create_cache_key()
            .unwrap();
        let key2 = FastEmbedProvider::new(EmbedConfig::default())
            .create_cache_key()
            .unwrap();
        assert_eq!(key1, key2, "Same config should produce same cache key");
        assert!(key1.starts_with("v1:"));

        let key3 = FastEmbedProvider::new(EmbedConfig::new("bge-small-en-v1.5"))
            .create_cache_key()
            .unwrap();
        assert_ne!(key1, key3, "Different model should produce different key");

        let key4 = FastEmbedProvider::new(EmbedConfig::default().with_batch_size(8))
            .create_cache_key()
            .unwrap();
        assert_ne!(key1, key4, "Batch size is part of the key");
    }

    #[tokio::test]
    #[ignore] // Downloads all-MiniLM-L6-v2 - run with: cargo test test_minilm_embedding -- --ignored
    async fn test_minilm_embedding() -> Result<()> {
        let temp_dir = tempfile::tempdir().map_err(|e| EmbedError::External { source: e.into() })?;
        let provider =
            FastEmbedProvider::create(EmbedConfig::default_with_path(temp_dir.path())).await?;
        assert_eq!(provider.embedding_dimension(), 384);
        assert_eq!(FastEmbedProvider::cache_size(), 1);

        let texts = vec![
            "The sky is blue because of Rayleigh scattering.".to_string(),
            "Rayleigh scattering makes the sky look blue.".to_string(),
            "Sourdough bread needs a mature starter.".to_string(),
        ];
        let result = provider.embed_texts(&texts).await?;
        assert_eq!(result.len(), 3);

        let dot = |a: &[f16], b: &[f16]| -> f32 {
            a.iter().zip(b).map(|(x, y)| x.to_f32() * y.to_f32()).sum()
        };
        let related = dot(&result.embeddings[0], &result.embeddings[1]);
        let unrelated = dot(&result.embeddings[0], &result.embeddings[2]);
        assert!(related > unrelated, "{related} <= {unrelated}");

        FastEmbedProvider::clear_cache();
        assert_eq!(FastEmbedProvider::cache_size(), 0);
        Ok(())
    }
}
