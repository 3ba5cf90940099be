//! Sliding-window chunking for retrieval passages.
//!
//! A document is cut into fixed-size windows of `chunk_size` characters. Consecutive
//! windows start `chunk_size - overlap` characters apart, so each passage repeats the
//! tail of the previous one and a sentence that straddles a boundary is still seen
//! whole by at least one passage.
//!
//! Windows are measured in `char`s, never bytes, so multi-byte text is never split
//! inside a code point. Each window is trimmed of surrounding whitespace and dropped
//! when what remains is shorter than `min_length`; this filters the near-empty
//! fragments the last few windows of a document tend to produce.
//!
//! ```
//! use kbase_context::{ChunkingConfig, chunk_text};
//!
//! let config = ChunkingConfig::new(500, 50, 20);
//! let chunks = chunk_text("The sky is blue. Grass is green.", &config).unwrap();
//!
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].ordinal, 0);
//! assert_eq!(chunks[0].text, "The sky is blue. Grass is green.");
//! ```

use serde::{Deserialize, Serialize};
use std::iter;

/// Default window length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 500;
/// Default number of characters shared by consecutive windows.
pub const DEFAULT_OVERLAP: usize = 50;
/// Default minimum trimmed length for a window to be kept.
pub const DEFAULT_MIN_LENGTH: usize = 20;

/// Errors raised for chunking parameters that cannot produce a terminating window walk.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    /// The stride `chunk_size - overlap` would be zero or negative
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({chunk_size})")]
    OverlapTooLarge { chunk_size: usize, overlap: usize },
}

/// Parameters of the sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Window length in characters
    pub chunk_size: usize,
    /// Characters shared between consecutive windows
    pub overlap: usize,
    /// Windows whose trimmed text is shorter than this are dropped
    pub min_length: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
            min_length: DEFAULT_MIN_LENGTH,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize, min_length: usize) -> Self {
        Self {
            chunk_size,
            overlap,
            min_length,
        }
    }

    /// Reject parameter sets whose stride is not positive.
    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.overlap >= self.chunk_size {
            return Err(ChunkError::OverlapTooLarge {
                chunk_size: self.chunk_size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }

    /// Distance in characters between the starts of consecutive windows.
    pub fn stride(&self) -> Result<usize, ChunkError> {
        self.validate()?;
        Ok(self.chunk_size - self.overlap)
    }
}

/// One kept window of the source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    /// Position among the kept chunks (0-indexed, source order)
    pub ordinal: usize,
    /// Character offset of the window start in the source text
    pub start: usize,
    /// Trimmed window text
    pub text: String,
}

impl TextChunk {
    /// Length of the chunk text in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Split `text` into overlapping windows described by `config`.
///
/// Windows start at character offsets `0, s, 2s, ...` for stride `s` while the offset
/// is inside the text. Empty input yields an empty vector.
///
/// # Errors
/// [`ChunkError::OverlapTooLarge`] when `overlap >= chunk_size`.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Result<Vec<TextChunk>, ChunkError> {
    let stride = config.stride()?;

    // Byte offset of every char boundary, plus the end of the string.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(iter::once(text.len()))
        .collect();
    let char_len = boundaries.len() - 1;

    let mut chunks = Vec::new();
    for start in (0..char_len).step_by(stride) {
        let end = (start + config.chunk_size).min(char_len);
        let window = text[boundaries[start]..boundaries[end]].trim();

        if window.chars().count() < config.min_length {
            continue;
        }

        chunks.push(TextChunk {
            ordinal: chunks.len(),
            start,
            text: window.to_string(),
        });
    }

    Ok(chunks)
}

/// Convenience form of [`chunk_text`] taking the window parameters directly.
pub fn chunk(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    min_length: usize,
) -> Result<Vec<TextChunk>, ChunkError> {
    chunk_text(text, &ChunkingConfig::new(chunk_size, overlap, min_length))
}
