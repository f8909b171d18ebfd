//! Metadata store abstraction and implementations for stowage.
//!
//! This crate provides the control-plane data model:
//! - Upload sessions and received-fragment tracking
//! - Finalized file records, visibility, and soft-delete
//! - Per-owner quota accounts with atomic counter mutation

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use repos::{FileRepo, QuotaRepo, UploadRepo};
pub use store::{MetadataStore, SqliteStore};

use std::sync::Arc;
use stowage_core::config::MetadataConfig;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite { path } => {
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
