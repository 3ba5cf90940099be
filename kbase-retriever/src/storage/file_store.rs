//! Snapshot persistence as three files in one directory.
//!
//! ```text
//! <dir>/index.bin      bincode: strategy, HNSW params, dimension, vectors
//! <dir>/chunks.bin     "KBCH", version, count, then (ordinal, offset, utf-8 bytes) per chunk
//! <dir>/manifest.json  build record plus blake3 digests of both blobs
//! ```
//!
//! Each file is written to a temporary file in the same directory, synced, and renamed
//! over its target. The manifest goes last and names the digests of the blobs it belongs
//! to, so a crash between renames leaves a set that fails validation on the next load
//! instead of a silently mismatched pair.

use super::{Compatibility, SnapshotStore};
use crate::error::{Result, RetrieverError};
use crate::retrieval::index::{IndexBlob, VectorIndex};
use crate::retrieval::snapshot::{IndexManifest, Snapshot};
use async_trait::async_trait;
use bincode::Options;
use kbase_context::TextChunk;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const INDEX_FILE: &str = "index.bin";
pub const CHUNKS_FILE: &str = "chunks.bin";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Version of the manifest layout and of both blob encodings
pub const FORMAT_VERSION: u32 = 1;

const CHUNKS_MAGIC: [u8; 4] = *b"KBCH";

#[derive(Debug, Serialize, Deserialize)]
struct StoredManifest {
    format_version: u32,
    #[serde(flatten)]
    build: IndexManifest,
    index_blake3: String,
    chunks_blake3: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChunkBlobHeader {
    magic: [u8; 4],
    version: u32,
    count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredChunk {
    ordinal: u64,
    start: u64,
    text: Vec<u8>,
}

fn digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

fn encode_chunks(chunks: &[TextChunk]) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    bincode::DefaultOptions::new().serialize_into(
        &mut bytes,
        &ChunkBlobHeader {
            magic: CHUNKS_MAGIC,
            version: FORMAT_VERSION,
            count: chunks.len() as u64,
        },
    )?;
    for chunk in chunks {
        bincode::DefaultOptions::new().serialize_into(
            &mut bytes,
            &StoredChunk {
                ordinal: chunk.ordinal as u64,
                start: chunk.start as u64,
                text: chunk.text.as_bytes().to_vec(),
            },
        )?;
    }
    Ok(bytes)
}

fn decode_chunks(bytes: &[u8]) -> Result<Vec<TextChunk>> {
    // The limit keeps a corrupt length prefix from requesting a huge allocation
    let codec = || bincode::DefaultOptions::new().with_limit(bytes.len() as u64);
    let mut reader = bytes;

    let header: ChunkBlobHeader = codec()
        .deserialize_from(&mut reader)
        .map_err(|e| RetrieverError::corrupt(format!("unreadable chunk header: {e}")))?;
    if header.magic != CHUNKS_MAGIC {
        return Err(RetrieverError::corrupt("chunk blob has wrong magic"));
    }
    if header.version != FORMAT_VERSION {
        return Err(RetrieverError::corrupt(format!(
            "unsupported chunk blob version {}",
            header.version
        )));
    }

    let mut chunks = Vec::new();
    for expected in 0..header.count {
        let stored: StoredChunk = codec()
            .deserialize_from(&mut reader)
            .map_err(|e| RetrieverError::corrupt(format!("truncated chunk blob: {e}")))?;
        if stored.ordinal != expected {
            return Err(RetrieverError::corrupt(format!(
                "chunk ordinal {} found where {expected} was expected",
                stored.ordinal
            )));
        }
        let text = String::from_utf8(stored.text).map_err(|_| {
            RetrieverError::corrupt(format!("chunk {expected} is not valid UTF-8"))
        })?;
        chunks.push(TextChunk {
            ordinal: expected as usize,
            start: stored.start as usize,
            text,
        });
    }
    if !reader.is_empty() {
        return Err(RetrieverError::corrupt("trailing bytes after chunk blob"));
    }
    Ok(chunks)
}

/// Replace `target` with `bytes` via a synced temporary file in the same directory.
fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

/// Stores the snapshot files in one directory
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save_blocking(&self, snapshot: &Snapshot) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let index_bytes = bincode::DefaultOptions::new().serialize(&snapshot.index().to_blob())?;
        let chunk_bytes = encode_chunks(snapshot.chunks())?;
        let manifest = StoredManifest {
            format_version: FORMAT_VERSION,
            build: snapshot.manifest().clone(),
            index_blake3: digest(&index_bytes),
            chunks_blake3: digest(&chunk_bytes),
        };
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;

        write_atomic(&self.dir, &self.dir.join(INDEX_FILE), &index_bytes)?;
        write_atomic(&self.dir, &self.dir.join(CHUNKS_FILE), &chunk_bytes)?;
        write_atomic(&self.dir, &self.dir.join(MANIFEST_FILE), &manifest_bytes)?;

        // Directory fsync makes the renames durable; not every platform allows it
        if let Ok(dir) = std::fs::File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        info!(
            "Saved snapshot with {} chunks to {}",
            snapshot.len(),
            self.dir.display()
        );
        Ok(())
    }

    /// `Ok(None)` when nothing has been stored; `Err(LoadCorrupt)` for anything unusable.
    pub fn try_load_blocking(&self, expected: &Compatibility) -> Result<Option<Snapshot>> {
        let manifest_path = self.dir.join(MANIFEST_FILE);
        let manifest_bytes = match std::fs::read(&manifest_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No stored snapshot in {}", self.dir.display());
                return Ok(None);
            }
            Err(e) => return Err(RetrieverError::corrupt(format!("unreadable manifest: {e}"))),
        };

        let manifest: StoredManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| RetrieverError::corrupt(format!("invalid manifest: {e}")))?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(RetrieverError::corrupt(format!(
                "unsupported format version {}",
                manifest.format_version
            )));
        }
        expected.check(&manifest.build)?;

        let read_blob = |name: &str, want: &str| -> Result<Vec<u8>> {
            let bytes = std::fs::read(self.dir.join(name))
                .map_err(|e| RetrieverError::corrupt(format!("unreadable {name}: {e}")))?;
            if digest(&bytes) != want {
                return Err(RetrieverError::corrupt(format!("digest mismatch for {name}")));
            }
            Ok(bytes)
        };
        let index_bytes = read_blob(INDEX_FILE, &manifest.index_blake3)?;
        let chunk_bytes = read_blob(CHUNKS_FILE, &manifest.chunks_blake3)?;

        let chunks = decode_chunks(&chunk_bytes)?;
        if chunks.len() != manifest.build.chunk_count {
            return Err(RetrieverError::corrupt(format!(
                "manifest records {} chunks, blob holds {}",
                manifest.build.chunk_count,
                chunks.len()
            )));
        }

        let blob: IndexBlob = bincode::DefaultOptions::new()
            .with_limit(index_bytes.len() as u64)
            .deserialize(&index_bytes)
            .map_err(|e| RetrieverError::corrupt(format!("unreadable index blob: {e}")))?;
        if blob.strategy != manifest.build.strategy || blob.dimension != manifest.build.dimension {
            return Err(RetrieverError::corrupt("index blob disagrees with manifest"));
        }
        if blob.vectors.len() != chunks.len() {
            return Err(RetrieverError::corrupt(format!(
                "index holds {} vectors for {} chunks",
                blob.vectors.len(),
                chunks.len()
            )));
        }

        let index = VectorIndex::from_blob(blob)
            .map_err(|e| RetrieverError::corrupt(format!("index rebuild failed: {e}")))?;
        let snapshot = Snapshot::new(index, chunks, manifest.build)
            .map_err(|e| RetrieverError::corrupt(e.to_string()))?;
        Ok(Some(snapshot))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, snapshot: Arc<Snapshot>) -> Result<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.save_blocking(&snapshot)).await?
    }

    async fn load(&self, expected: &Compatibility) -> Option<Snapshot> {
        let store = self.clone();
        let expected = expected.clone();
        let loaded =
            match tokio::task::spawn_blocking(move || store.try_load_blocking(&expected)).await {
                Ok(result) => result,
                Err(e) => Err(RetrieverError::from(e)),
            };
        match loaded {
            Ok(Some(snapshot)) => {
                info!(
                    "Loaded snapshot with {} chunks from {}",
                    snapshot.len(),
                    self.dir.display()
                );
                Some(snapshot)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(
                    "Ignoring stored snapshot in {}: {}",
                    self.dir.display(),
                    e
                );
                None
            }
        }
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrieverConfig;
    use crate::retrieval::builder::IndexBuilder;
    use crate::retrieval::document::SourceStamp;
    use crate::retrieval::strategy::{HnswParams, IndexStrategy};
    use crate::test_support::token_hash;
    use tempfile::tempdir;
    use tracing_test::traced_test;

    const TEXT: &str = "Rivers carry water to the sea. Mountains rise above the clouds. \
        Deserts receive very little rain each year. Forests shelter many species of birds. \
        Glaciers carve valleys slowly over centuries. Coral reefs grow in warm shallow water.";

    async fn built(strategy: IndexStrategy) -> (RetrieverConfig, Snapshot) {
        let mut config = RetrieverConfig::default().with_strategy(strategy);
        config.chunking = kbase_context::ChunkingConfig::new(60, 10, 20);
        let builder = IndexBuilder::new(&config, token_hash());
        let snapshot = builder
            .build_from_text(TEXT, SourceStamp::Missing)
            .await
            .unwrap();
        (config, snapshot)
    }

    fn expected(config: &RetrieverConfig) -> Compatibility {
        Compatibility::new(config, "token-hash-256", 256)
    }

    #[tokio::test]
    async fn test_round_trip_gives_identical_results() {
        for strategy in [IndexStrategy::Exact, IndexStrategy::Approximate] {
            let dir = tempdir().unwrap();
            let store = FileSnapshotStore::new(dir.path().join("store"));
            let (config, snapshot) = built(strategy).await;
            let snapshot = Arc::new(snapshot);

            store.save(Arc::clone(&snapshot)).await.unwrap();
            let loaded = store.load(&expected(&config)).await.unwrap();

            assert_eq!(loaded.chunks(), snapshot.chunks());
            assert_eq!(loaded.manifest(), snapshot.manifest());

            let provider = token_hash();
            for question in ["where does water go", "which birds live in forests"] {
                let query: Vec<f32> = provider
                    .embed_text(question)
                    .await
                    .unwrap()
                    .iter()
                    .map(|x| x.to_f32())
                    .collect();
                assert_eq!(
                    loaded.search(&query, 3).unwrap(),
                    snapshot.search(&query, 3).unwrap(),
                    "strategy {strategy}"
                );
            }
        }
    }

    #[test]
    fn test_nothing_stored() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        let config = RetrieverConfig::default();
        assert!(store.try_load_blocking(&expected(&config)).unwrap().is_none());
    }

    #[traced_test]
    #[tokio::test]
    async fn test_torn_pair_is_rejected() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        let (config, snapshot) = built(IndexStrategy::Exact).await;
        store.save_blocking(&snapshot).unwrap();

        // A crash after the index rename but before the manifest rename
        let other = VectorIndex::build(
            IndexStrategy::Exact,
            HnswParams::default(),
            256,
            vec![vec![0.0; 256]],
        )
        .unwrap();
        let other_bytes = bincode::DefaultOptions::new()
            .serialize(&other.to_blob())
            .unwrap();
        std::fs::write(dir.path().join(INDEX_FILE), other_bytes).unwrap();

        let err = store.try_load_blocking(&expected(&config)).unwrap_err();
        assert!(err.to_string().contains("digest mismatch"));
        assert!(store.load(&expected(&config)).await.is_none());
        assert!(logs_contain("Ignoring stored snapshot"));
    }

    #[tokio::test]
    async fn test_incompatible_model_is_rejected() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        let (config, snapshot) = built(IndexStrategy::Exact).await;
        store.save_blocking(&snapshot).unwrap();

        let other = Compatibility::new(&config, "all-MiniLM-L6-v2", 384);
        assert!(matches!(
            store.try_load_blocking(&other),
            Err(RetrieverError::LoadCorrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_garbage_manifest_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), b"{not json").unwrap();
        let store = FileSnapshotStore::new(dir.path());
        assert!(
            store
                .load(&expected(&RetrieverConfig::default()))
                .await
                .is_none()
        );
    }

    #[test]
    fn test_chunk_blob_validation() {
        let chunks = vec![
            TextChunk {
                ordinal: 0,
                start: 0,
                text: "first chunk".to_string(),
            },
            TextChunk {
                ordinal: 1,
                start: 9,
                text: "second chunk ü".to_string(),
            },
        ];
        let bytes = encode_chunks(&chunks).unwrap();
        assert_eq!(decode_chunks(&bytes).unwrap(), chunks);

        let mut wrong_magic = bytes.clone();
        wrong_magic[0] = b'X';
        assert!(decode_chunks(&wrong_magic).is_err());

        let truncated = &bytes[..bytes.len() - 3];
        assert!(decode_chunks(truncated).is_err());

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(decode_chunks(&trailing).is_err());

        let bad_utf8 = encode_chunks(&chunks).unwrap();
        let mut bad_utf8 = bad_utf8;
        let last = bad_utf8.len() - 1;
        bad_utf8[last] = 0xff;
        assert!(decode_chunks(&bad_utf8).is_err());
    }
}
