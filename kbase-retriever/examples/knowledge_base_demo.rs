//! Walk through the life of a knowledge base: empty, filled, edited, reloaded.
//!
//! Runs offline with the token-hash embedder. Pass a model name as the first argument
//! (for example `all-MiniLM-L6-v2`) to use a real embedding model instead.

use anyhow::Result;
use kbase_embed::EmbedConfig;
use kbase_retriever::{KnowledgeBaseTools, RetrievalEngine, RetrieverConfig};
use std::sync::Arc;
use tempfile::tempdir;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let model = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "token-hash".to_string());
    let temp_dir = tempdir()?;
    let doc = temp_dir.path().join("shared_knowledge.txt");
    let config = RetrieverConfig::new(&doc, temp_dir.path().join(".kbase"))
        .with_embedding(EmbedConfig::new(model));

    let engine = Arc::new(RetrievalEngine::from_config(config.clone()).await?);
    let tools = KnowledgeBaseTools::new(Arc::clone(&engine));

    println!("Before any document:");
    println!("{}\n", tools.query_knowledge_base("What color is the sky?").await?);

    std::fs::write(
        &doc,
        "The sky is blue because air scatters short wavelengths of sunlight. \
         Grass is green because chlorophyll absorbs red and blue light. \
         Snow looks white since its crystals scatter every visible wavelength.",
    )?;
    let response = tools.trigger_update().await?;
    println!("trigger_update -> {}\n", serde_json::to_string(&response)?);

    for question in ["What color is the sky?", "Why is snow white?"] {
        println!("Q: {question}");
        println!("{}\n", tools.query_knowledge_base(question).await?);
    }

    // A fresh engine over the same storage adopts the persisted index
    let reopened = RetrievalEngine::from_config(config).await?;
    reopened.ensure_ready().await?;
    println!(
        "Reopened: {} chunks, {} rebuilds",
        reopened.status().chunk_count.unwrap_or(0),
        reopened.rebuild_count()
    );
    Ok(())
}
