use clap::Parser;
use kbase_context::{ChunkingConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MIN_LENGTH, DEFAULT_OVERLAP};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::process;

/// A CLI tool to chunk a text file into JSON output using kbase-context.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input text file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Window length in characters.
    #[arg(short = 's', long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Characters shared by consecutive windows.
    #[arg(short, long, default_value_t = DEFAULT_OVERLAP)]
    overlap: usize,

    /// Drop windows whose trimmed text is shorter than this.
    #[arg(short, long, default_value_t = DEFAULT_MIN_LENGTH)]
    min_length: usize,
}

#[derive(Serialize)]
struct SerializableChunk<'a> {
    ordinal: usize,
    start: usize,
    chars: usize,
    text: &'a str,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let file_content = if let Some(input_path) = args.input {
        fs::read_to_string(input_path)?
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let config = ChunkingConfig::new(args.chunk_size, args.overlap, args.min_length);
    let chunks = kbase_context::chunk_text(&file_content, &config)?;

    let serializable_chunks: Vec<SerializableChunk> = chunks
        .iter()
        .map(|c| SerializableChunk {
            ordinal: c.ordinal,
            start: c.start,
            chars: c.char_len(),
            text: &c.text,
        })
        .collect();

    let json_output = serde_json::to_string_pretty(&serializable_chunks)?;
    println!("{json_output}");

    Ok(())
}
