use clap::{Parser, Subcommand};
use kbase_retriever::{
    DocumentWatcher, EMPTY_KNOWLEDGE_BASE_MESSAGE, IndexStrategy, KnowledgeBaseTools,
    RetrievalEngine, RetrieverConfig, SearchOutcome,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// A CLI tool to build and query a kbase knowledge base.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Knowledge document, overriding the configuration
    #[arg(short, long)]
    document: Option<PathBuf>,

    /// Directory holding the persisted index, overriding the configuration
    #[arg(short, long)]
    storage_dir: Option<PathBuf>,

    /// Embedding model name, or token-hash[-<dimension>] for the offline embedder
    #[arg(short, long)]
    model: Option<String>,

    /// Index strategy: exact or approximate
    #[arg(long)]
    strategy: Option<IndexStrategy>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Rebuild the index from the document now
    Build,
    /// Query the knowledge base
    Search {
        /// Question to answer
        query: String,
        /// Maximum number of chunks
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show engine and index status
    Status {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Keep the index up to date while the document changes
    Watch,
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Full,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "full" => Ok(OutputFormat::Full),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[derive(Serialize)]
struct SearchOutput {
    ordinal: usize,
    score: f32,
    text: String,
}

#[tokio::main]
async fn main() {
    // stdout carries results only
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_config(args: &Args) -> anyhow::Result<RetrieverConfig> {
    let mut config = match &args.config {
        Some(path) => RetrieverConfig::load(path)?,
        None => RetrieverConfig::default(),
    };
    if let Some(document) = &args.document {
        config.document.path = document.clone();
    }
    if let Some(dir) = &args.storage_dir {
        config.storage.dir = dir.clone();
    }
    if let Some(model) = &args.model {
        config.embedding.model_name = model.clone();
    }
    if let Some(strategy) = args.strategy {
        config.index.strategy = strategy;
    }
    config.validate()?;
    Ok(config)
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    let engine = Arc::new(RetrievalEngine::from_config(config).await?);

    match args.command {
        Commands::Build => {
            let tools = KnowledgeBaseTools::new(Arc::clone(&engine));
            let response = tools.trigger_update().await?;
            println!("{}", serde_json::to_string(&response)?);
            Ok(())
        }
        Commands::Search {
            query,
            top_k,
            format,
        } => {
            let hits = match engine.search(&query, top_k).await? {
                SearchOutcome::Matches(hits) => hits,
                SearchOutcome::EmptyKnowledgeBase => {
                    if format == OutputFormat::Json {
                        println!("[]");
                    } else {
                        println!("{EMPTY_KNOWLEDGE_BASE_MESSAGE}");
                    }
                    return Ok(());
                }
            };

            match format {
                OutputFormat::Json => {
                    let output: Vec<SearchOutput> = hits
                        .into_iter()
                        .map(|hit| SearchOutput {
                            ordinal: hit.ordinal,
                            score: hit.score,
                            text: hit.text,
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Summary => {
                    println!("Found {} chunks:", hits.len());
                    for hit in hits {
                        let preview: String = hit.text.chars().take(80).collect();
                        println!(
                            "  #{} | score {:.3} | {}",
                            hit.ordinal,
                            hit.score,
                            preview.replace('\n', " ")
                        );
                    }
                }
                OutputFormat::Full => {
                    for hit in hits {
                        println!("Chunk #{} (score {:.4})", hit.ordinal, hit.score);
                        println!("{}", hit.text);
                        println!("{}", "-".repeat(60));
                    }
                }
            }
            Ok(())
        }
        Commands::Status { format } => {
            // Status reflects what is on disk and the document, not just a cold engine
            if let Err(e) = engine.ensure_ready().await {
                tracing::warn!("Knowledge base is not ready: {}", e);
            }
            let status = engine.status();
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
                OutputFormat::Summary | OutputFormat::Full => {
                    println!("State:         {}", status.state);
                    println!("Document:      {}", status.document);
                    println!("Storage:       {}", status.storage);
                    println!("Model:         {}", status.model_id);
                    println!("Strategy:      {}", status.strategy);
                    match status.chunk_count {
                        Some(count) => println!("Chunks:        {count}"),
                        None => println!("Chunks:        (no index)"),
                    }
                    if let Some(stamp) = status.source_stamp {
                        println!("Source:        {stamp}");
                    }
                    if let Some(built_at) = status.built_at {
                        println!("Built at:      {}", built_at.to_rfc3339());
                    }
                    if let Some(error) = status.last_error {
                        println!("Last error:    {error}");
                    }
                }
            }
            Ok(())
        }
        Commands::Watch => {
            engine.ensure_ready().await?;
            let debounce = engine.config().watch.debounce();
            let watcher = DocumentWatcher::spawn(Arc::clone(&engine), debounce)?;
            eprintln!(
                "Watching {} (Ctrl-C to stop)",
                watcher.path().display()
            );
            tokio::signal::ctrl_c().await?;
            drop(watcher);
            Ok(())
        }
    }
}
