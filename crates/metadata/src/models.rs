//! Database models mapping to the metadata schema.
//!
//! Rows use the widest signed integer SQLite stores natively; conversions
//! to domain types validate ranges and enum encodings.

use crate::error::{MetadataError, MetadataResult};
use sqlx::FromRow;
use stowage_core::{
    ChunkFragment, ContentDigest, FileId, FileObject, OwnerId, QuotaAccount, SessionId,
    SessionState, UploadSession, Visibility,
};
use time::OffsetDateTime;
use uuid::Uuid;

/// Finalized file record.
#[derive(Debug, Clone, FromRow)]
pub struct FileRow {
    pub file_id: Uuid,
    pub owner_id: Uuid,
    pub display_name: String,
    pub location: String,
    pub byte_size: i64,
    pub content_digest: String,
    pub mime_hint: Option<String>,
    pub created_at: OffsetDateTime,
    pub ttl_hours: i64,
    pub visibility: String,
    pub download_count: i64,
    pub active: bool,
}

impl FileRow {
    /// Build a row from a domain file object.
    pub fn from_domain(file: &FileObject) -> Self {
        Self {
            file_id: *file.file_id.as_uuid(),
            owner_id: *file.owner_id.as_uuid(),
            display_name: file.display_name.clone(),
            location: file.location.clone(),
            byte_size: file.byte_size as i64,
            content_digest: file.content_digest.to_hex(),
            mime_hint: file.mime_hint.clone(),
            created_at: file.created_at,
            ttl_hours: i64::from(file.ttl_hours),
            visibility: file.visibility.as_str().to_string(),
            download_count: file.download_count as i64,
            active: file.active,
        }
    }

    /// Convert to a domain file object.
    pub fn into_domain(self) -> MetadataResult<FileObject> {
        Ok(FileObject {
            file_id: FileId::from_uuid(self.file_id),
            owner_id: OwnerId::from_uuid(self.owner_id),
            display_name: self.display_name,
            location: self.location,
            byte_size: self.byte_size as u64,
            content_digest: ContentDigest::from_hex(&self.content_digest)
                .map_err(|e| MetadataError::Internal(format!("corrupt digest column: {e}")))?,
            mime_hint: self.mime_hint,
            created_at: self.created_at,
            ttl_hours: u32::try_from(self.ttl_hours)
                .map_err(|_| MetadataError::Internal("negative ttl_hours column".to_string()))?,
            visibility: Visibility::parse(&self.visibility)
                .map_err(|e| MetadataError::Internal(format!("corrupt visibility column: {e}")))?,
            download_count: self.download_count as u64,
            active: self.active,
        })
    }
}

/// Quota account record.
#[derive(Debug, Clone, FromRow)]
pub struct QuotaAccountRow {
    pub owner_id: Uuid,
    pub storage_limit: i64,
    pub storage_used: i64,
    pub download_limit: i64,
    pub download_used: i64,
    pub period_anchor: OffsetDateTime,
}

impl QuotaAccountRow {
    /// Build a row from a domain account.
    pub fn from_domain(account: &QuotaAccount) -> Self {
        Self {
            owner_id: *account.owner_id.as_uuid(),
            storage_limit: account.storage_limit as i64,
            storage_used: account.storage_used as i64,
            download_limit: account.download_limit as i64,
            download_used: account.download_used as i64,
            period_anchor: account.period_anchor,
        }
    }

    /// Convert to a domain account.
    pub fn into_domain(self) -> QuotaAccount {
        QuotaAccount {
            owner_id: OwnerId::from_uuid(self.owner_id),
            storage_limit: self.storage_limit.max(0) as u64,
            storage_used: self.storage_used.max(0) as u64,
            download_limit: self.download_limit.max(0) as u64,
            download_used: self.download_used.max(0) as u64,
            period_anchor: self.period_anchor,
        }
    }
}

/// Upload session record.
#[derive(Debug, Clone, FromRow)]
pub struct UploadSessionRow {
    pub session_id: Uuid,
    pub owner_id: Uuid,
    pub declared_filename: String,
    pub declared_total_size: i64,
    pub expected_chunk_count: i64,
    pub state: String,
    pub created_at: OffsetDateTime,
}

impl UploadSessionRow {
    /// Build a row from a domain session.
    pub fn from_domain(session: &UploadSession) -> Self {
        Self {
            session_id: *session.id.as_uuid(),
            owner_id: *session.owner_id.as_uuid(),
            declared_filename: session.declared_filename.clone(),
            declared_total_size: session.declared_total_size as i64,
            expected_chunk_count: i64::from(session.expected_chunk_count),
            state: session.state.as_str().to_string(),
            created_at: session.created_at,
        }
    }

    /// Convert to a domain session.
    pub fn into_domain(self) -> MetadataResult<UploadSession> {
        Ok(UploadSession {
            id: SessionId::from_uuid(self.session_id),
            owner_id: OwnerId::from_uuid(self.owner_id),
            declared_filename: self.declared_filename,
            declared_total_size: self.declared_total_size as u64,
            expected_chunk_count: u32::try_from(self.expected_chunk_count).map_err(|_| {
                MetadataError::Internal("invalid expected_chunk_count column".to_string())
            })?,
            state: SessionState::parse(&self.state)
                .map_err(|e| MetadataError::Internal(format!("corrupt state column: {e}")))?,
            created_at: self.created_at,
        })
    }
}

/// Received chunk fragment record.
#[derive(Debug, Clone, FromRow)]
pub struct ChunkFragmentRow {
    pub session_id: Uuid,
    pub sequence: i64,
    pub length: i64,
    pub location: String,
    pub received_at: OffsetDateTime,
}

impl ChunkFragmentRow {
    /// Build a row from a domain fragment.
    pub fn from_domain(fragment: &ChunkFragment) -> Self {
        Self {
            session_id: *fragment.session_id.as_uuid(),
            sequence: i64::from(fragment.sequence),
            length: fragment.length as i64,
            location: fragment.location.clone(),
            received_at: fragment.received_at,
        }
    }

    /// Convert to a domain fragment.
    pub fn into_domain(self) -> MetadataResult<ChunkFragment> {
        Ok(ChunkFragment {
            session_id: SessionId::from_uuid(self.session_id),
            sequence: u32::try_from(self.sequence)
                .map_err(|_| MetadataError::Internal("invalid sequence column".to_string()))?,
            length: self.length as u64,
            location: self.location,
            received_at: self.received_at,
        })
    }
}
