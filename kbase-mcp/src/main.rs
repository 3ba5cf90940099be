use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use kbase_mcp::{ServerConfig, run_server};
use kbase_retriever::{IndexStrategy, RetrieverConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout is the MCP channel, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let matches = Command::new("kbase-mcp")
        .version(env!("CARGO_PKG_VERSION"))
        .about("kbase Model Context Protocol server")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("document")
                .short('d')
                .long("document")
                .value_name("FILE")
                .help("Knowledge document to serve")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("storage-dir")
                .short('s')
                .long("storage-dir")
                .value_name("DIR")
                .help("Directory holding the persisted index")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("model")
                .short('m')
                .long("model")
                .value_name("NAME")
                .help("Embedding model name, or token-hash for the offline embedder"),
        )
        .arg(
            Arg::new("strategy")
                .long("strategy")
                .value_name("STRATEGY")
                .help("Index strategy: exact or approximate")
                .value_parser(clap::value_parser!(IndexStrategy)),
        )
        .arg(
            Arg::new("watch")
                .short('w')
                .long("watch")
                .help("Rebuild in the background when the document changes")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let mut retriever = match matches.get_one::<PathBuf>("config") {
        Some(path) => RetrieverConfig::load(path)?,
        None => RetrieverConfig::default(),
    };
    if let Some(document) = matches.get_one::<PathBuf>("document") {
        retriever.document.path = document.clone();
    }
    if let Some(dir) = matches.get_one::<PathBuf>("storage-dir") {
        retriever.storage.dir = dir.clone();
    }
    if let Some(model) = matches.get_one::<String>("model") {
        retriever.embedding.model_name = model.clone();
    }
    if let Some(strategy) = matches.get_one::<IndexStrategy>("strategy") {
        retriever.index.strategy = *strategy;
    }
    if matches.get_flag("watch") {
        retriever.watch.enabled = true;
    }

    run_server(ServerConfig::new(retriever)).await
}
