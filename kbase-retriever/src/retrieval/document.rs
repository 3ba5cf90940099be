//! The single evolving document the knowledge base is derived from.
//!
//! The engine never writes the document. It reads a [`SourceStamp`] to decide whether the
//! current snapshot is stale, and the full text only when it rebuilds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::PoisonError;

/// Modification state of the source document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "modified", rename_all = "lowercase")]
pub enum SourceStamp {
    /// No document exists
    Missing,
    /// The document exists and was last modified at this instant
    Modified(DateTime<Utc>),
}

impl std::fmt::Display for SourceStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceStamp::Missing => write!(f, "missing"),
            SourceStamp::Modified(at) => write!(f, "{}", at.to_rfc3339()),
        }
    }
}

/// Document text together with the stamp it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub text: String,
    pub stamp: SourceStamp,
}

/// Read-only access to the document, owned and mutated by someone else
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Current modification state, cheap enough to call on every query
    async fn stamp(&self) -> std::io::Result<SourceStamp>;

    /// Full text and stamp, or `None` when the document does not exist
    async fn read(&self) -> std::io::Result<Option<Document>>;

    /// Human-readable location for logs and status output
    fn describe(&self) -> String;

    /// Filesystem path of the document, if it lives on disk
    fn path(&self) -> Option<&Path> {
        None
    }
}

/// A plain-text file on disk. Invalid UTF-8 is replaced rather than rejected.
#[derive(Debug, Clone)]
pub struct FileDocument {
    path: PathBuf,
}

impl FileDocument {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn stamp_from_metadata(metadata: &std::fs::Metadata) -> std::io::Result<SourceStamp> {
    let modified = metadata.modified()?;
    Ok(SourceStamp::Modified(DateTime::<Utc>::from(modified)))
}

#[async_trait]
impl DocumentSource for FileDocument {
    async fn stamp(&self) -> std::io::Result<SourceStamp> {
        match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => stamp_from_metadata(&metadata),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SourceStamp::Missing),
            Err(e) => Err(e),
        }
    }

    async fn read(&self) -> std::io::Result<Option<Document>> {
        // Stamp first: a write racing this read leaves the stamp older than the text,
        // which makes the next check see a change instead of missing one.
        let stamp = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => stamp_from_metadata(&metadata)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(Document {
            text: String::from_utf8_lossy(&bytes).into_owned(),
            stamp,
        }))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// An in-memory document, for hosts that receive uploads directly and for tests.
#[derive(Debug)]
pub struct MemoryDocument {
    current: Mutex<Option<Document>>,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::empty()
    }
}

impl MemoryDocument {
    /// A source with no document yet
    pub fn empty() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        let doc = Self::empty();
        doc.replace(text);
        doc
    }

    /// Replace the document text. The new stamp is always later than the previous one,
    /// even when two replacements land within the clock's resolution.
    pub fn replace(&self, text: impl Into<String>) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let mut modified = Utc::now();
        if let Some(Document {
            stamp: SourceStamp::Modified(previous),
            ..
        }) = current.as_ref()
        {
            if modified <= *previous {
                modified = *previous + chrono::Duration::microseconds(1);
            }
        }
        *current = Some(Document {
            text: text.into(),
            stamp: SourceStamp::Modified(modified),
        });
    }

    /// Delete the document
    pub fn clear(&self) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn snapshot(&self) -> Option<Document> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl DocumentSource for MemoryDocument {
    async fn stamp(&self) -> std::io::Result<SourceStamp> {
        Ok(self
            .snapshot()
            .map(|doc| doc.stamp)
            .unwrap_or(SourceStamp::Missing))
    }

    async fn read(&self) -> std::io::Result<Option<Document>> {
        Ok(self.snapshot())
    }

    fn describe(&self) -> String {
        "in-memory document".to_string()
    }
}
