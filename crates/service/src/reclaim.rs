//! Asynchronous physical byte reclamation.
//!
//! Soft-delete marks a file inactive and compensates quota; the bytes
//! themselves are reclaimed out of band by this collaborator. The engine's
//! obligation ends once keys are handed over.

use async_trait::async_trait;
use std::sync::Arc;
use stowage_storage::ObjectStore;
use tracing::{debug, warn};

/// Collaborator that physically deletes stored objects after soft-delete.
#[async_trait]
pub trait Reclaimer: Send + Sync + 'static {
    /// Schedule the given byte store keys for deletion. Must not block the
    /// caller on the deletions themselves.
    async fn reclaim(&self, keys: Vec<String>);
}

/// Reclaimer that deletes keys on a detached tokio task.
pub struct SpawnReclaimer {
    storage: Arc<dyn ObjectStore>,
}

impl SpawnReclaimer {
    /// Create a reclaimer deleting from the given byte store.
    pub fn new(storage: Arc<dyn ObjectStore>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Reclaimer for SpawnReclaimer {
    async fn reclaim(&self, keys: Vec<String>) {
        if keys.is_empty() {
            return;
        }
        let storage = self.storage.clone();
        tokio::spawn(async move {
            for key in keys {
                match storage.delete(&key).await {
                    Ok(()) => debug!(%key, "reclaimed object"),
                    // Missing objects are fine: a retried delete or a crash
                    // between soft-delete and reclaim leaves nothing to do.
                    Err(e) if e.is_not_found() => {}
                    Err(e) => warn!(%key, error = %e, "failed to reclaim object"),
                }
            }
        });
    }
}
