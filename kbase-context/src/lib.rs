//! # kbase-context
//!
//! Text chunking for the kbase retrieval engine. A single evolving document is cut into
//! overlapping, bounded passages that are embedded and indexed one by one.
//!
//! See [`window`] for the windowing rules.

pub mod window;

pub use window::{
    ChunkError, ChunkingConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MIN_LENGTH, DEFAULT_OVERLAP,
    TextChunk, chunk, chunk_text,
};
