//! Core domain types and shared logic for the stowage file hosting engine.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Owner, file, and session identifiers
//! - Content digests
//! - File objects, visibility, and time-derived lifecycle state
//! - Upload sessions, chunk fragments, and the received bitmap
//! - Quota accounts and period arithmetic
//! - Clock abstraction and configuration

pub mod clock;
pub mod config;
pub mod error;
pub mod file;
pub mod hash;
pub mod id;
pub mod quota;
pub mod upload;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use file::{FileObject, FileState, Visibility};
pub use hash::{ContentDigest, DigestHasher};
pub use id::{FileId, OwnerId, SessionId};
pub use quota::{QuotaAccount, QuotaUsage};
pub use upload::{ChunkBitmap, ChunkFragment, SessionState, UploadSession};

/// Maximum declared file size: 500 MiB
pub const MAX_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Default chunk size clients are advised to use: 2 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

/// Maximum accepted chunk size: 8 MiB
pub const MAX_CHUNK_SIZE: u64 = 8 * 1024 * 1024;
