//! Background refresh: rebuild shortly after the document changes on disk.
//!
//! Queries stay correct without the watcher, since every search checks staleness
//! itself. The watcher only moves the rebuild cost off the query path.

use crate::error::{Result, RetrieverError};
use crate::retrieval::engine::RetrievalEngine;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub struct DocumentWatcher {
    path: PathBuf,
    _event_watcher: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    listener: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for DocumentWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentWatcher")
            .field("path", &self.path)
            .finish()
    }
}

fn watch_error(err: notify::Error) -> RetrieverError {
    RetrieverError::Io {
        source: std::io::Error::other(err),
    }
}

impl DocumentWatcher {
    /// Watch the engine's document file. Must be called inside a tokio runtime.
    pub fn spawn(engine: Arc<RetrievalEngine>, debounce: Duration) -> Result<Self> {
        let path = engine
            .source()
            .path()
            .map(Path::to_path_buf)
            .ok_or_else(|| RetrieverError::config("document source is not a file"))?;
        // Watch the directory: editors often replace the file by rename, and the file
        // may not exist yet
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = path.file_name().map(|name| name.to_os_string());

        // Capacity 1: a pending signal already covers any further changes
        let (events_tx, events_rx) = mpsc::channel(1);
        let listener = tokio::task::spawn(Self::listen(events_rx, engine));

        let mut event_watcher = notify_debouncer_mini::new_debouncer(
            debounce,
            move |res: notify_debouncer_mini::DebounceEventResult| match res {
                Ok(events) => {
                    let touched = events
                        .iter()
                        .any(|ev| ev.path.file_name().map(|n| n.to_os_string()) == file_name);
                    if touched {
                        // Runs on the debouncer thread, not inside the runtime
                        let _ = events_tx.try_send(());
                    }
                }
                Err(e) => warn!("Document watch error: {}", e),
            },
        )
        .map_err(watch_error)?;

        event_watcher
            .watcher()
            .watch(&dir, notify::RecursiveMode::NonRecursive)
            .map_err(watch_error)?;

        info!("Watching {} for changes", path.display());
        Ok(Self {
            path,
            _event_watcher: event_watcher,
            listener,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn listen(mut events_rx: mpsc::Receiver<()>, engine: Arc<RetrievalEngine>) {
        while events_rx.recv().await.is_some() {
            match engine.refresh_if_stale().await {
                Ok(Some(report)) => info!(
                    "Background refresh ({:?}) indexed {} chunks",
                    report.outcome, report.chunk_count
                ),
                Ok(None) => debug!("Document event without content change"),
                Err(e) => error!("Background refresh failed: {}", e),
            }
        }
        debug!("Document watcher stopped");
    }
}

impl Drop for DocumentWatcher {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
