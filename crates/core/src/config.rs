//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Upload limits and filename policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Maximum declared file size in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Maximum size of a single chunk in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// Age after which incomplete sessions are swept, in seconds.
    #[serde(default = "default_session_max_age_secs")]
    pub session_max_age_secs: u64,
    /// Allowed filename extensions (lowercase, with leading dot). Empty
    /// means any extension is accepted.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl UploadConfig {
    /// Session sweep age as a duration.
    pub fn session_max_age(&self) -> Duration {
        Duration::seconds(self.session_max_age_secs as i64)
    }

    /// Validate a declared filename against the policy.
    ///
    /// Rejects empty names, path separators and parent references, and
    /// extensions outside the allow list.
    pub fn validate_filename(&self, name: &str) -> crate::Result<()> {
        if name.is_empty() {
            return Err(crate::Error::InvalidArgument(
                "filename must not be empty".to_string(),
            ));
        }
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(crate::Error::InvalidArgument(format!(
                "filename must not contain path components: {name}"
            )));
        }
        if self.allowed_extensions.is_empty() {
            return Ok(());
        }
        let lower = name.to_ascii_lowercase();
        if self.allowed_extensions.iter().any(|ext| lower.ends_with(ext.as_str())) {
            Ok(())
        } else {
            Err(crate::Error::InvalidArgument(format!(
                "file extension not allowed: {name}"
            )))
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_chunk_size: default_max_chunk_size(),
            session_max_age_secs: default_session_max_age_secs(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

/// Default per-owner quota limits and the download period length.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Storage ceiling for newly created accounts, in bytes.
    #[serde(default = "default_storage_limit")]
    pub default_storage_limit: u64,
    /// Download ceiling per period for newly created accounts, in bytes.
    #[serde(default = "default_download_limit")]
    pub default_download_limit: u64,
    /// Download period length in seconds.
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
}

impl QuotaConfig {
    /// Download period as a duration.
    pub fn period(&self) -> Duration {
        Duration::seconds(self.period_secs as i64)
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_storage_limit: default_storage_limit(),
            default_download_limit: default_download_limit(),
            period_secs: default_period_secs(),
        }
    }
}

/// Byte store backend selection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem rooted at `path`.
    Filesystem { path: PathBuf },
    /// In-process memory store, for tests and embedded use.
    Memory,
}

impl StorageConfig {
    /// Validate backend parameters.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Filesystem { path } => {
                if path.as_os_str().is_empty() {
                    return Err("filesystem storage requires a non-empty path".to_string());
                }
                Ok(())
            }
            Self::Memory => Ok(()),
        }
    }
}

/// Metadata store backend selection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database at `path`.
    Sqlite { path: PathBuf },
}

/// Top-level service configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
}

fn default_max_file_size() -> u64 {
    crate::MAX_FILE_SIZE
}

fn default_max_chunk_size() -> u64 {
    crate::MAX_CHUNK_SIZE
}

fn default_session_max_age_secs() -> u64 {
    86400 // 24 hours
}

fn default_allowed_extensions() -> Vec<String> {
    [
        ".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg", ".pdf", ".txt", ".doc", ".docx",
        ".xls", ".xlsx", ".ppt", ".pptx", ".csv", ".json", ".xml", ".html", ".md", ".zip",
        ".rar", ".7z", ".tar", ".gz", ".iso", ".mp3", ".wav", ".ogg", ".flac", ".mp4",
        ".avi", ".mov", ".mkv", ".webm", ".epub",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_storage_limit() -> u64 {
    5 * 1024 * 1024 * 1024 // 5 GiB
}

fn default_download_limit() -> u64 {
    1024 * 1024 * 1024 // 1 GiB per period
}

fn default_period_secs() -> u64 {
    86400 // daily
}
