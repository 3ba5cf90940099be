//! Embed a few passages and rank them against a question.
//!
//! Pass a model name as the first argument (`token-hash` runs without downloading).

use kbase_embed::{EmbedConfig, create_provider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let model_name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| kbase_embed::DEFAULT_MODEL.to_string());

    let temp_dir = tempfile::tempdir()?;
    let config = EmbedConfig::new(model_name).with_model_base_path(temp_dir.path());
    let provider = create_provider(&config).await?;

    println!(
        "Provider {} ({}), dimension {}",
        provider.provider_name(),
        provider.model_id(),
        provider.embedding_dimension()
    );

    let passages = vec![
        "The sky is blue because air scatters short wavelengths of sunlight.".to_string(),
        "Rust guarantees memory safety without a garbage collector.".to_string(),
        "Sourdough bread rises thanks to wild yeast in the starter.".to_string(),
    ];
    let question = "Why does the sky look blue?";

    let passage_vectors = provider.embed_texts(&passages).await?;
    let question_vector = provider.embed_text(question).await?;

    let mut scored: Vec<(f32, &String)> = passage_vectors
        .embeddings
        .iter()
        .zip(&passages)
        .map(|(vector, passage)| {
            let score = vector
                .iter()
                .zip(&question_vector)
                .map(|(a, b)| a.to_f32() * b.to_f32())
                .sum::<f32>();
            (score, passage)
        })
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    println!("Question: {question}");
    for (score, passage) in scored {
        println!("  {score:.3}  {passage}");
    }
    Ok(())
}
