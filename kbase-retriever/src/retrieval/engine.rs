//! The retrieval engine: keeps a snapshot consistent with the document and answers queries.
//!
//! ## Consistency
//!
//! The current snapshot sits behind an `RwLock<Option<Arc<Snapshot>>>`. Readers clone the
//! `Arc` and search without holding any lock, so a rebuild never blocks or tears a query.
//!
//! ## Rebuilds
//!
//! Rebuilds are serialized by an async mutex. Every finished attempt, successful or not,
//! bumps a generation counter. A caller reads the generation before checking staleness;
//! if it changed by the time the caller holds the rebuild lock, someone else already
//! rebuilt and the caller re-checks staleness instead of rebuilding again. N searches
//! that observe the same change therefore cause one rebuild.
//!
//! ## Failures
//!
//! A failed rebuild leaves the previous snapshot in place and servable. With no previous
//! snapshot, searches report an empty knowledge base. Once a snapshot exists, searches do
//! not retry a document version whose build already failed; an explicit [`refresh`] or a
//! new version of the document does.
//!
//! [`refresh`]: RetrievalEngine::refresh

use crate::config::RetrieverConfig;
use crate::error::{Result, RetrieverError};
use crate::retrieval::builder::IndexBuilder;
use crate::retrieval::document::{DocumentSource, FileDocument, SourceStamp};
use crate::retrieval::snapshot::{SearchHit, Snapshot};
use crate::retrieval::staleness::StalenessDetector;
use crate::retrieval::strategy::IndexStrategy;
use crate::storage::{Compatibility, FileSnapshotStore, SnapshotStore};
use chrono::{DateTime, Utc};
use kbase_embed::EmbeddingProvider;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Lifecycle of the engine. There is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// No snapshot has been loaded or built yet
    Uninitialized,
    Ready,
    Rebuilding,
    /// The last rebuild failed; any previous snapshot is still served
    Error,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Uninitialized => write!(f, "uninitialized"),
            EngineState::Ready => write!(f, "ready"),
            EngineState::Rebuilding => write!(f, "rebuilding"),
            EngineState::Error => write!(f, "error"),
        }
    }
}

/// Result of a knowledge-base query
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// Best chunks first; never more than the requested count
    Matches(Vec<SearchHit>),
    /// The knowledge base has no chunks to search
    EmptyKnowledgeBase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshOutcome {
    /// This call rebuilt the index
    Rebuilt,
    /// A rebuild that finished while this call waited already covered the document
    Coalesced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub outcome: RefreshOutcome,
    pub chunk_count: usize,
}

/// Point-in-time description of the engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub document: String,
    pub storage: String,
    pub model_id: String,
    pub strategy: IndexStrategy,
    pub chunk_count: Option<usize>,
    pub source_stamp: Option<SourceStamp>,
    pub built_at: Option<DateTime<Utc>>,
    pub rebuild_count: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Query path: rebuild when stale, but never retry a version that already failed
    Search,
    /// Background path: rebuild when stale
    Background,
    /// Explicit trigger: always rebuild unless a concurrent rebuild already covered it
    Forced,
}

enum Freshness {
    AlreadyFresh,
    Rebuilt,
    Coalesced,
}

pub struct RetrievalEngine {
    config: RetrieverConfig,
    builder: IndexBuilder,
    source: Arc<dyn DocumentSource>,
    store: Arc<dyn SnapshotStore>,
    current: RwLock<Option<Arc<Snapshot>>>,
    detector: Mutex<StalenessDetector>,
    state: Mutex<EngineState>,
    last_error: Mutex<Option<String>>,
    rebuild_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    rebuild_count: AtomicU64,
    loaded: tokio::sync::OnceCell<()>,
}

impl std::fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("document", &self.source.describe())
            .field("storage", &self.store.describe())
            .field("builder", &self.builder)
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RetrievalEngine {
    /// Assemble an engine from its collaborators. Nothing is loaded or built until
    /// [`ensure_ready`](Self::ensure_ready) or the first search.
    pub fn open(
        config: RetrieverConfig,
        provider: Arc<dyn EmbeddingProvider>,
        source: Arc<dyn DocumentSource>,
        store: Arc<dyn SnapshotStore>,
    ) -> Result<Self> {
        config.validate()?;
        let builder = IndexBuilder::new(&config, provider);
        Ok(Self {
            config,
            builder,
            source,
            store,
            current: RwLock::new(None),
            detector: Mutex::new(StalenessDetector::new()),
            state: Mutex::new(EngineState::Uninitialized),
            last_error: Mutex::new(None),
            rebuild_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            rebuild_count: AtomicU64::new(0),
            loaded: tokio::sync::OnceCell::new(),
        })
    }

    /// Engine over the configured file and storage directory. Fails if the embedding
    /// model cannot be initialized.
    pub async fn from_config(config: RetrieverConfig) -> Result<Self> {
        config.validate()?;
        let provider = kbase_embed::create_provider(&config.embedding).await?;
        let source = Arc::new(FileDocument::new(&config.document.path));
        let store = Arc::new(FileSnapshotStore::new(&config.storage.dir));
        Self::open(config, provider, source, store)
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    pub fn source(&self) -> &Arc<dyn DocumentSource> {
        &self.source
    }

    /// The snapshot queries are currently served from
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn state(&self) -> EngineState {
        *lock(&self.state)
    }

    /// Load the persisted snapshot if usable, then build if it is missing or stale.
    pub async fn ensure_ready(&self) -> Result<()> {
        self.ensure_fresh(Mode::Search).await.map(|_| ())
    }

    /// Answer a question with the most similar chunks, rebuilding first if the document
    /// changed. `top_k` defaults to the configured count.
    ///
    /// When no snapshot could be loaded or built, this reports
    /// [`SearchOutcome::EmptyKnowledgeBase`] rather than an error.
    pub async fn search(&self, query: &str, top_k: Option<usize>) -> Result<SearchOutcome> {
        let started = Instant::now();
        let snapshot = match self.ensure_fresh(Mode::Search).await {
            Ok((snapshot, _)) => snapshot,
            Err(e) => {
                warn!("No index available, reporting empty knowledge base: {}", e);
                return Ok(SearchOutcome::EmptyKnowledgeBase);
            }
        };
        if snapshot.is_empty() {
            debug!("Search on empty knowledge base");
            return Ok(SearchOutcome::EmptyKnowledgeBase);
        }

        let top_k = top_k.unwrap_or(self.config.search.top_k);
        let query_vector: Vec<f32> = self
            .builder
            .provider()
            .embed_text(query)
            .await?
            .into_iter()
            .map(|x| x.to_f32())
            .collect();
        let hits = snapshot.search(&query_vector, top_k)?;

        debug!(
            "Search returned {} of {} chunks in {:?}",
            hits.len(),
            snapshot.len(),
            started.elapsed()
        );
        Ok(SearchOutcome::Matches(hits))
    }

    /// Rebuild from the document now. Concurrent calls coalesce into one rebuild.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let (snapshot, freshness) = self.ensure_fresh(Mode::Forced).await?;
        let outcome = match freshness {
            Freshness::Coalesced => RefreshOutcome::Coalesced,
            Freshness::Rebuilt | Freshness::AlreadyFresh => RefreshOutcome::Rebuilt,
        };
        Ok(RefreshReport {
            outcome,
            chunk_count: snapshot.len(),
        })
    }

    /// Rebuild only if the document changed since the last build. Used by the watcher.
    pub async fn refresh_if_stale(&self) -> Result<Option<RefreshReport>> {
        let (snapshot, freshness) = self.ensure_fresh(Mode::Background).await?;
        Ok(match freshness {
            Freshness::AlreadyFresh => None,
            Freshness::Rebuilt => Some(RefreshReport {
                outcome: RefreshOutcome::Rebuilt,
                chunk_count: snapshot.len(),
            }),
            Freshness::Coalesced => Some(RefreshReport {
                outcome: RefreshOutcome::Coalesced,
                chunk_count: snapshot.len(),
            }),
        })
    }

    pub fn status(&self) -> EngineStatus {
        let snapshot = self.snapshot();
        EngineStatus {
            state: self.state(),
            document: self.source.describe(),
            storage: self.store.describe(),
            model_id: self.builder.provider().model_id().to_string(),
            strategy: self.builder.strategy(),
            chunk_count: snapshot.as_ref().map(|s| s.len()),
            source_stamp: snapshot.as_ref().map(|s| s.manifest().source_stamp),
            built_at: snapshot.as_ref().map(|s| s.manifest().built_at),
            rebuild_count: self.rebuild_count.load(Ordering::Acquire),
            last_error: lock(&self.last_error).clone(),
        }
    }

    /// Number of rebuilds that produced a snapshot
    pub fn rebuild_count(&self) -> u64 {
        self.rebuild_count.load(Ordering::Acquire)
    }

    fn compatibility(&self) -> Compatibility {
        let provider = self.builder.provider();
        Compatibility::new(&self.config, provider.model_id(), provider.embedding_dimension())
    }

    fn publish(&self, snapshot: Arc<Snapshot>) {
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    fn set_state(&self, state: EngineState) {
        *lock(&self.state) = state;
    }

    /// First call only: adopt the persisted snapshot if it is intact and compatible.
    async fn ensure_loaded(&self) {
        self.loaded
            .get_or_init(|| async {
                let Some(snapshot) = self.store.load(&self.compatibility()).await else {
                    return;
                };
                let stamp = snapshot.manifest().source_stamp;
                self.publish(Arc::new(snapshot));
                *lock(&self.detector) = StalenessDetector::indexed_at(stamp);
                self.set_state(EngineState::Ready);
            })
            .await;
    }

    /// Serve the previous snapshot in place of a failed rebuild, if there is one.
    fn fallback(&self, err: RetrieverError) -> Result<(Arc<Snapshot>, Freshness)> {
        match self.snapshot() {
            Some(snapshot) => {
                warn!("Serving previous snapshot: {}", err);
                Ok((snapshot, Freshness::AlreadyFresh))
            }
            None => Err(err),
        }
    }

    fn previous_failure(&self) -> RetrieverError {
        let reason = lock(&self.last_error)
            .clone()
            .unwrap_or_else(|| "unknown error".to_string());
        RetrieverError::build(format!(
            "building the current document version failed: {reason}"
        ))
    }

    async fn current_stamp(&self) -> Result<SourceStamp> {
        Ok(self.source.stamp().await?)
    }

    async fn ensure_fresh(&self, mode: Mode) -> Result<(Arc<Snapshot>, Freshness)> {
        self.ensure_loaded().await;
        let observed = self.generation.load(Ordering::Acquire);

        if mode != Mode::Forced {
            let stamp = match self.current_stamp().await {
                Ok(stamp) => stamp,
                Err(e) => return self.fallback(e),
            };
            let (stale, failed) = {
                let detector = lock(&self.detector);
                (detector.check(stamp).needs_rebuild(), detector.failed_for(stamp))
            };
            if !stale {
                if let Some(snapshot) = self.snapshot() {
                    return Ok((snapshot, Freshness::AlreadyFresh));
                }
            }
            // Without any snapshot a search retries, so a transient failure heals
            if failed && mode == Mode::Search && self.snapshot().is_some() {
                let err = self.previous_failure();
                return self.fallback(err);
            }
        }

        let _guard = self.rebuild_lock.lock().await;

        if self.generation.load(Ordering::Acquire) != observed {
            let stamp = match self.current_stamp().await {
                Ok(stamp) => stamp,
                Err(e) => return self.fallback(e),
            };
            let (stale, failed) = {
                let detector = lock(&self.detector);
                (detector.check(stamp).needs_rebuild(), detector.failed_for(stamp))
            };
            if !stale {
                if let Some(snapshot) = self.snapshot() {
                    debug!("Coalesced with a rebuild that finished while waiting");
                    return Ok((snapshot, Freshness::Coalesced));
                }
            }
            if failed && mode != Mode::Forced {
                let err = self.previous_failure();
                return self.fallback(err);
            }
        }

        match self.rebuild_locked().await {
            Ok(snapshot) => Ok((snapshot, Freshness::Rebuilt)),
            Err(e) if mode == Mode::Forced => Err(e),
            Err(e) => self.fallback(e),
        }
    }

    /// Build, publish and persist a new snapshot. Caller holds `rebuild_lock`.
    async fn rebuild_locked(&self) -> Result<Arc<Snapshot>> {
        let started = Instant::now();
        self.set_state(EngineState::Rebuilding);
        info!("Rebuilding index from {}", self.source.describe());

        // The failure is recorded against the version that was actually read
        let (attempted, result) = match self.source.read().await {
            Ok(document) => {
                let attempted = document
                    .as_ref()
                    .map_or(SourceStamp::Missing, |document| document.stamp);
                if document.is_none() {
                    info!("Document {} is missing; building empty index", self.source.describe());
                }
                (attempted, self.builder.build_document(document).await)
            }
            Err(e) => (
                self.current_stamp().await.unwrap_or(SourceStamp::Missing),
                Err(e.into()),
            ),
        };
        let outcome = match result {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                let stamp = snapshot.manifest().source_stamp;
                self.publish(Arc::clone(&snapshot));
                lock(&self.detector).record_success(stamp);
                *lock(&self.last_error) = None;
                self.rebuild_count.fetch_add(1, Ordering::AcqRel);
                self.set_state(EngineState::Ready);
                info!(
                    "Published snapshot with {} chunks in {:?}",
                    snapshot.len(),
                    started.elapsed()
                );

                if let Err(e) = self.store.save(Arc::clone(&snapshot)).await {
                    error!(
                        "Failed to persist snapshot to {}: {}",
                        self.store.describe(),
                        e
                    );
                }
                Ok(snapshot)
            }
            Err(e) => {
                error!("Rebuild failed after {:?}: {}", started.elapsed(), e);
                lock(&self.detector).record_failure(attempted);
                *lock(&self.last_error) = Some(e.to_string());
                self.set_state(EngineState::Error);
                Err(e)
            }
        };

        self.generation.fetch_add(1, Ordering::AcqRel);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::document::MemoryDocument;
    use crate::test_support::{CountingProvider, FailingStore, token_hash};
    use tempfile::tempdir;
    use tracing_test::traced_test;

    const SKY: &str = "The sky is blue. Grass is green.";

    fn engine_with(
        source: Arc<MemoryDocument>,
        provider: Arc<dyn EmbeddingProvider>,
        dir: &std::path::Path,
    ) -> RetrievalEngine {
        let config = RetrieverConfig::new("unused.txt", dir).with_strategy(IndexStrategy::Exact);
        RetrievalEngine::open(
            config,
            provider,
            source,
            Arc::new(FileSnapshotStore::new(dir)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_sky_example_top_hit() {
        let dir = tempdir().unwrap();
        let engine = engine_with(
            Arc::new(MemoryDocument::with_text(SKY)),
            token_hash(),
            dir.path(),
        );

        let outcome = engine.search("what color is the sky", None).await.unwrap();
        let SearchOutcome::Matches(hits) = outcome else {
            panic!("expected matches, got {outcome:?}");
        };
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, SKY);
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[tokio::test]
    async fn test_missing_document_is_empty_knowledge_base() {
        let dir = tempdir().unwrap();
        let engine = engine_with(
            Arc::new(MemoryDocument::empty()),
            token_hash(),
            dir.path(),
        );

        assert_eq!(
            engine.search("anything", None).await.unwrap(),
            SearchOutcome::EmptyKnowledgeBase
        );
        assert_eq!(engine.status().chunk_count, Some(0));
    }

    #[tokio::test]
    async fn test_fresh_snapshot_is_not_rebuilt() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(CountingProvider::new());
        let engine = engine_with(
            Arc::new(MemoryDocument::with_text(SKY)),
            provider.clone(),
            dir.path(),
        );

        engine.search("sky", None).await.unwrap();
        engine.search("grass", None).await.unwrap();
        assert_eq!(engine.rebuild_count(), 1);
        assert_eq!(provider.batch_calls(), 1);
    }

    #[tokio::test]
    async fn test_document_change_triggers_rebuild() {
        let dir = tempdir().unwrap();
        let source = Arc::new(MemoryDocument::with_text(SKY));
        let engine = engine_with(source.clone(), token_hash(), dir.path());
        engine.ensure_ready().await.unwrap();

        source.replace("Volcanoes erupt molten rock called lava from deep underground.");
        let SearchOutcome::Matches(hits) = engine.search("lava", Some(1)).await.unwrap() else {
            panic!("expected matches");
        };
        assert!(hits[0].text.contains("Volcanoes"));
        assert_eq!(engine.rebuild_count(), 2);

        source.clear();
        assert_eq!(
            engine.search("lava", None).await.unwrap(),
            SearchOutcome::EmptyKnowledgeBase
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_stale_searches_rebuild_once() {
        let dir = tempdir().unwrap();
        let source = Arc::new(MemoryDocument::with_text(SKY));
        let provider = Arc::new(CountingProvider::with_delay(std::time::Duration::from_millis(100)));
        let engine = Arc::new(engine_with(source.clone(), provider.clone(), dir.path()));
        engine.ensure_ready().await.unwrap();
        assert_eq!(provider.batch_calls(), 1);

        source.replace("Penguins live in the southern hemisphere and cannot fly.");
        let searches = (0..16).map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.search("penguins", None).await })
        });
        for result in futures::future::join_all(searches).await {
            let outcome = result.unwrap().unwrap();
            assert!(matches!(outcome, SearchOutcome::Matches(ref hits) if hits[0].text.contains("Penguins")));
        }

        assert_eq!(engine.rebuild_count(), 2);
        assert_eq!(provider.batch_calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refreshes_coalesce() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(CountingProvider::with_delay(std::time::Duration::from_millis(100)));
        let engine = Arc::new(engine_with(
            Arc::new(MemoryDocument::with_text(SKY)),
            provider.clone(),
            dir.path(),
        ));

        let refreshes = (0..4).map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.refresh().await })
        });
        let reports: Vec<RefreshReport> = futures::future::join_all(refreshes)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        let rebuilt = reports
            .iter()
            .filter(|r| r.outcome == RefreshOutcome::Rebuilt)
            .count();
        assert_eq!(rebuilt, 1);
        assert!(reports.iter().all(|r| r.chunk_count == 1));
        assert_eq!(provider.batch_calls(), 1);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_failed_rebuild_serves_previous_snapshot() {
        let dir = tempdir().unwrap();
        let source = Arc::new(MemoryDocument::with_text(SKY));
        let provider = Arc::new(CountingProvider::new());
        let engine = engine_with(source.clone(), provider.clone(), dir.path());
        engine.ensure_ready().await.unwrap();

        provider.set_failing(true);
        source.replace("Owls hunt at night using silent flight feathers.");

        let SearchOutcome::Matches(hits) = engine.search("sky", None).await.unwrap() else {
            panic!("expected matches");
        };
        assert_eq!(hits[0].text, SKY);
        assert_eq!(engine.state(), EngineState::Error);
        assert!(engine.status().last_error.is_some());
        assert!(logs_contain("Rebuild failed"));

        // The failed version is not retried by searches
        engine.search("sky", None).await.unwrap();
        assert_eq!(provider.batch_calls(), 2);

        // An explicit refresh retries and reports the failure
        assert!(engine.refresh().await.is_err());
        assert_eq!(provider.batch_calls(), 3);

        provider.set_failing(false);
        let report = engine.refresh().await.unwrap();
        assert_eq!(report.outcome, RefreshOutcome::Rebuilt);
        assert_eq!(engine.state(), EngineState::Ready);
        assert!(engine.status().last_error.is_none());
    }

    #[traced_test]
    #[tokio::test]
    async fn test_failed_first_build_reports_empty_and_retries() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(CountingProvider::new());
        provider.set_failing(true);
        let engine = engine_with(
            Arc::new(MemoryDocument::with_text(SKY)),
            provider.clone(),
            dir.path(),
        );

        // A failed warm-up surfaces to whoever asked for it
        assert!(engine.ensure_ready().await.is_err());
        assert_eq!(provider.batch_calls(), 1);

        assert_eq!(
            engine.search("sky", None).await.unwrap(),
            SearchOutcome::EmptyKnowledgeBase
        );
        assert_eq!(engine.state(), EngineState::Error);
        assert!(engine.snapshot().is_none());
        assert!(logs_contain("reporting empty knowledge base"));

        // With nothing to serve, each search retries the build
        assert_eq!(provider.batch_calls(), 2);
        assert!(engine.refresh().await.is_err());
        assert_eq!(provider.batch_calls(), 3);

        provider.set_failing(false);
        let SearchOutcome::Matches(hits) = engine.search("sky", None).await.unwrap() else {
            panic!("expected matches after recovery");
        };
        assert_eq!(hits[0].text, SKY);
        assert_eq!(engine.state(), EngineState::Ready);
    }

    /// Reports one modification time from `stamp()` and a later one from `read()`, as if
    /// the file changed between the two calls.
    struct ShiftingDocument {
        checked: DateTime<Utc>,
        read: DateTime<Utc>,
    }

    #[async_trait::async_trait]
    impl DocumentSource for ShiftingDocument {
        async fn stamp(&self) -> std::io::Result<SourceStamp> {
            Ok(SourceStamp::Modified(self.checked))
        }

        async fn read(&self) -> std::io::Result<Option<crate::retrieval::document::Document>> {
            Ok(Some(crate::retrieval::document::Document {
                text: SKY.to_string(),
                stamp: SourceStamp::Modified(self.read),
            }))
        }

        fn describe(&self) -> String {
            "shifting document".to_string()
        }
    }

    #[tokio::test]
    async fn test_failure_recorded_against_version_read() {
        let dir = tempdir().unwrap();
        let checked = Utc::now();
        let read = checked + chrono::Duration::seconds(5);
        let provider = Arc::new(CountingProvider::new());
        provider.set_failing(true);
        let engine = RetrievalEngine::open(
            RetrieverConfig::new("unused.txt", dir.path()),
            provider,
            Arc::new(ShiftingDocument { checked, read }),
            Arc::new(FileSnapshotStore::new(dir.path())),
        )
        .unwrap();

        assert!(engine.refresh().await.is_err());
        assert_eq!(
            lock(&engine.detector).last_failed(),
            Some(SourceStamp::Modified(read))
        );
    }

    #[tokio::test]
    async fn test_persisted_snapshot_is_reused() {
        let dir = tempdir().unwrap();
        let source = Arc::new(MemoryDocument::with_text(SKY));

        let first = engine_with(source.clone(), token_hash(), dir.path());
        let before = first.search("sky", None).await.unwrap();

        let provider = Arc::new(CountingProvider::new());
        let second = engine_with(source, provider.clone(), dir.path());
        let after = second.search("sky", None).await.unwrap();

        // Only the query was embedded; the stored index was adopted as-is
        assert_eq!(provider.batch_calls(), 0);
        assert_eq!(second.rebuild_count(), 0);
        assert_eq!(before, after);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_save_failure_still_publishes() {
        let dir = tempdir().unwrap();
        let config = RetrieverConfig::new("unused.txt", dir.path());
        let engine = RetrievalEngine::open(
            config,
            token_hash(),
            Arc::new(MemoryDocument::with_text(SKY)),
            Arc::new(FailingStore),
        )
        .unwrap();

        assert!(matches!(
            engine.search("sky", None).await.unwrap(),
            SearchOutcome::Matches(_)
        ));
        assert_eq!(engine.state(), EngineState::Ready);
        assert!(logs_contain("Failed to persist snapshot"));
    }

    #[tokio::test]
    async fn test_top_k_bounds_results() {
        let dir = tempdir().unwrap();
        let text = (0..40)
            .map(|i| format!("Fact number {i} concerns topic {i} in detail."))
            .collect::<Vec<_>>()
            .join(" ");
        let mut config = RetrieverConfig::new("unused.txt", dir.path());
        config.chunking = kbase_context::ChunkingConfig::new(80, 10, 20);
        let engine = RetrievalEngine::open(
            config,
            token_hash(),
            Arc::new(MemoryDocument::with_text(text)),
            Arc::new(FileSnapshotStore::new(dir.path())),
        )
        .unwrap();

        for k in [1, 3, 5] {
            let SearchOutcome::Matches(hits) =
                engine.search("topic 7 detail", Some(k)).await.unwrap()
            else {
                panic!("expected matches");
            };
            assert!(hits.len() <= k);
            assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        }

        let status = engine.status();
        assert_eq!(status.strategy, IndexStrategy::Approximate);
        assert!(status.chunk_count.unwrap() > 5);
    }
}
