//! Shared harness for service integration tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use stowage_core::config::ServiceConfig;
use stowage_core::{FileObject, ManualClock, OwnerId, SessionId};
use stowage_metadata::SqliteStore;
use stowage_service::{CompleteOptions, FileHost, Reclaimer};
use stowage_storage::{MemoryBackend, ObjectStore};
use time::macros::datetime;
use time::OffsetDateTime;

/// Fixed start instant for the manual clock.
pub const T0: OffsetDateTime = datetime!(2024-06-01 12:00 UTC);

/// Reclaimer that deletes inline and records every key it was handed, so
/// tests can assert on physical deletion without racing a spawned task.
pub struct InlineReclaimer {
    storage: Arc<dyn ObjectStore>,
    keys: Mutex<Vec<String>>,
}

impl InlineReclaimer {
    pub fn new(storage: Arc<dyn ObjectStore>) -> Self {
        Self {
            storage,
            keys: Mutex::new(Vec::new()),
        }
    }

    pub fn reclaimed(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reclaimer for InlineReclaimer {
    async fn reclaim(&self, keys: Vec<String>) {
        for key in keys {
            let _ = self.storage.delete(&key).await;
            self.keys.lock().unwrap().push(key);
        }
    }
}

pub struct TestHost {
    pub host: FileHost,
    pub storage: Arc<MemoryBackend>,
    pub clock: Arc<ManualClock>,
    pub reclaimer: Arc<InlineReclaimer>,
    _dir: tempfile::TempDir,
}

impl TestHost {
    /// Host with default limits and no extension restrictions.
    pub async fn new() -> Self {
        let mut config = ServiceConfig::default();
        config.upload.allowed_extensions = Vec::new();
        Self::with_config(config).await
    }

    pub async fn with_config(config: ServiceConfig) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let metadata = Arc::new(SqliteStore::new(dir.path().join("meta.db")).await.unwrap());
        let storage = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(T0));
        let reclaimer = Arc::new(InlineReclaimer::new(storage.clone()));

        let host = FileHost::with_parts(
            config,
            metadata,
            storage.clone(),
            clock.clone(),
            reclaimer.clone(),
        );

        Self {
            host,
            storage,
            clock,
            reclaimer,
            _dir: dir,
        }
    }

    /// Upload `data` as `filename` in fixed-size chunks and finalize.
    pub async fn upload(
        &self,
        owner: OwnerId,
        filename: &str,
        data: &[u8],
        chunk_size: usize,
        opts: CompleteOptions,
    ) -> FileObject {
        let session = self
            .start_chunked(owner, filename, data, chunk_size)
            .await;
        self.host.complete_upload_with(session, opts).await.unwrap()
    }

    /// Start a session and submit every chunk, leaving it un-finalized.
    pub async fn start_chunked(
        &self,
        owner: OwnerId,
        filename: &str,
        data: &[u8],
        chunk_size: usize,
    ) -> SessionId {
        let chunks: Vec<&[u8]> = data.chunks(chunk_size).collect();
        let session = self
            .host
            .start_upload(owner, filename, data.len() as u64, chunks.len() as u32)
            .await
            .unwrap();
        for (seq, chunk) in chunks.iter().enumerate() {
            self.host
                .submit_chunk(session, seq as u32, Bytes::copy_from_slice(chunk))
                .await
                .unwrap();
        }
        session
    }
}

/// Deterministic payload of the given length.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Drain an opened byte stream into one buffer.
pub async fn read_all(stream: stowage_storage::ByteStream) -> Vec<u8> {
    use futures::TryStreamExt;
    let chunks: Vec<Bytes> = stream.try_collect().await.expect("stream read failed");
    chunks.concat()
}

/// Install a test subscriber once; honors RUST_LOG.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
