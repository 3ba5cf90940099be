//! Offline lexical embedder.
//!
//! `TokenHashProvider` projects lowercase alphanumeric tokens into a fixed number of
//! signed buckets (feature hashing) and normalizes the counts. It needs no model files,
//! so it serves air-gapped deployments and deterministic tests. Texts that share words
//! score higher than texts that do not; there is no notion of synonyms.

use crate::error::{EmbedError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingResult, to_normalized_f16};
use async_trait::async_trait;
use fnv::FnvHasher;
use half::f16;
use std::hash::Hasher;

#[derive(Debug, Clone)]
pub struct TokenHashProvider {
    dimension: usize,
    model_id: String,
}

impl TokenHashProvider {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(EmbedError::invalid_config(
                "token-hash width must be positive",
            ));
        }
        Ok(Self {
            dimension,
            model_id: format!("token-hash-{dimension}"),
        })
    }

    fn embed_one(&self, text: &str) -> Vec<f16> {
        let mut buckets = vec![0.0f32; self.dimension];
        let mut seen_token = false;

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            seen_token = true;
            let mut hasher = FnvHasher::default();
            hasher.write(token.to_lowercase().as_bytes());
            let hash = hasher.finish();

            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            buckets[bucket] += sign;
        }

        // Keep the vector unit-length even when there is nothing to hash
        if !seen_token || buckets.iter().all(|v| *v == 0.0) {
            buckets[0] = 1.0;
        }

        to_normalized_f16(buckets)
    }
}

#[async_trait]
impl EmbeddingProvider for TokenHashProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        Ok(self.embed_one(text))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let embeddings = texts.iter().map(|text| self.embed_one(text)).collect();
        Ok(EmbeddingResult::new(embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "token-hash"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f16], b: &[f16]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x.to_f32() * y.to_f32()).sum()
    }

    #[tokio::test]
    async fn test_vectors_are_unit_length() {
        let provider = TokenHashProvider::new(64).unwrap();
        for text in ["The sky is blue.", "", "   ", "!!!"] {
            let v = provider.embed_text(text).await.unwrap();
            assert_eq!(v.len(), 64);
            assert!((dot(&v, &v) - 1.0).abs() < 1e-2, "text {text:?}");
        }
    }

    #[tokio::test]
    async fn test_shared_words_score_higher() {
        let provider = TokenHashProvider::new(256).unwrap();
        let query = provider.embed_text("Why is the sky blue?").await.unwrap();
        let result = provider
            .embed_texts(&[
                "The sky is blue due to scattering.".to_string(),
                "Bread rises because yeast ferments sugar.".to_string(),
            ])
            .await
            .unwrap();

        assert_eq!(result.len(), 2);
        assert!(dot(&query, &result.embeddings[0]) > dot(&query, &result.embeddings[1]));
    }

    #[tokio::test]
    async fn test_deterministic_and_case_insensitive() {
        let provider = TokenHashProvider::new(32).unwrap();
        let a = provider.embed_text("Hello World").await.unwrap();
        let b = provider.embed_text("hello world").await.unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_identity() {
        let provider = TokenHashProvider::new(128).unwrap();
        assert_eq!(provider.model_id(), "token-hash-128");
        assert_eq!(provider.embedding_dimension(), 128);
        assert!(TokenHashProvider::new(0).is_err());
    }
}
