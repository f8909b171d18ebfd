//! Finalized file objects and lifecycle evaluation.

use crate::hash::ContentDigest;
use crate::id::{FileId, OwnerId};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// Visibility of a file object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Readable by any requester (subject to download quota).
    Public,
    /// Readable only by the owner.
    Private,
}

impl Visibility {
    /// Flip between public and private.
    pub fn toggled(self) -> Self {
        match self {
            Self::Public => Self::Private,
            Self::Private => Self::Public,
        }
    }

    /// Stable string form used in persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(crate::Error::InvalidArgument(format!(
                "invalid visibility: {other}"
            ))),
        }
    }
}

/// Effective lifecycle state of a file object, derived at read time.
///
/// `Expired` is never persisted as a flag; it is computed from
/// `created_at + ttl_hours` against an injected clock, so no background
/// expiry sweep is needed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    /// Live and readable.
    Active,
    /// TTL elapsed; treated like not-found for quota, signaled as `Gone`.
    Expired,
    /// Soft-deleted; bytes await asynchronous reclamation.
    Deleted,
}

/// A finalized file object.
///
/// Created atomically at upload completion; `byte_size` and
/// `content_digest` are immutable afterwards. Mutations are limited to
/// visibility toggles, soft-delete, and download counter increments.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileObject {
    /// Unique file identifier.
    pub file_id: FileId,
    /// Owning account.
    pub owner_id: OwnerId,
    /// Name shown to callers (the declared upload filename).
    pub display_name: String,
    /// Byte store key holding the assembled content.
    pub location: String,
    /// Size of the assembled content in bytes.
    pub byte_size: u64,
    /// SHA-256 digest of the assembled content.
    pub content_digest: ContentDigest,
    /// Best-effort media type guessed from the display name.
    pub mime_hint: Option<String>,
    /// Creation instant.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Hours until expiry; 0 means unbounded.
    pub ttl_hours: u32,
    /// Public or private.
    pub visibility: Visibility,
    /// Number of completed reads.
    pub download_count: u64,
    /// False once soft-deleted.
    pub active: bool,
}

impl FileObject {
    /// Byte store key for a finalized file owned by `owner_id`.
    pub fn object_key(owner_id: OwnerId, file_id: FileId) -> String {
        format!("files/{owner_id}/{file_id}")
    }

    /// Guess a media type from a filename.
    pub fn guess_mime(display_name: &str) -> Option<String> {
        mime_guess::from_path(display_name)
            .first()
            .map(|m| m.essence_str().to_string())
    }

    /// The instant this file expires, if it has a bounded TTL.
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        if self.ttl_hours == 0 {
            None
        } else {
            Some(self.created_at + Duration::hours(i64::from(self.ttl_hours)))
        }
    }

    /// Derive the effective lifecycle state at `now`.
    ///
    /// Soft-delete wins over expiry: a deleted file stays `Deleted` even
    /// after its TTL elapses.
    pub fn state_at(&self, now: OffsetDateTime) -> FileState {
        if !self.active {
            return FileState::Deleted;
        }
        match self.expires_at() {
            Some(expiry) if now > expiry => FileState::Expired,
            _ => FileState::Active,
        }
    }

    /// Whether the file is readable at `now` (active and unexpired).
    pub fn is_live_at(&self, now: OffsetDateTime) -> bool {
        self.state_at(now) == FileState::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn sample_file(ttl_hours: u32) -> FileObject {
        let owner = OwnerId::new();
        let id = FileId::new();
        FileObject {
            file_id: id,
            owner_id: owner,
            display_name: "report.pdf".to_string(),
            location: FileObject::object_key(owner, id),
            byte_size: 1024,
            content_digest: ContentDigest::compute(b"report"),
            mime_hint: FileObject::guess_mime("report.pdf"),
            created_at: datetime!(2024-03-01 12:00 UTC),
            ttl_hours,
            visibility: Visibility::Private,
            download_count: 0,
            active: true,
        }
    }

    #[test]
    fn test_visibility_toggle_and_parse() {
        assert_eq!(Visibility::Public.toggled(), Visibility::Private);
        assert_eq!(Visibility::Private.toggled(), Visibility::Public);
        assert_eq!(Visibility::parse("public").unwrap(), Visibility::Public);
        assert!(Visibility::parse("hidden").is_err());
    }

    #[test]
    fn test_unbounded_ttl_never_expires() {
        let file = sample_file(0);
        assert_eq!(file.expires_at(), None);
        assert_eq!(
            file.state_at(datetime!(2099-01-01 00:00 UTC)),
            FileState::Active
        );
    }

    #[test]
    fn test_ttl_expiry_is_time_derived() {
        let file = sample_file(2);
        assert_eq!(
            file.state_at(datetime!(2024-03-01 13:00 UTC)),
            FileState::Active
        );
        assert_eq!(
            file.state_at(datetime!(2024-03-01 15:00 UTC)),
            FileState::Expired
        );
    }

    #[test]
    fn test_soft_delete_wins_over_expiry() {
        let mut file = sample_file(2);
        file.active = false;
        assert_eq!(
            file.state_at(datetime!(2024-03-01 15:00 UTC)),
            FileState::Deleted
        );
    }

    #[test]
    fn test_mime_guess() {
        assert_eq!(
            FileObject::guess_mime("photo.png").as_deref(),
            Some("image/png")
        );
        assert_eq!(FileObject::guess_mime("no-extension"), None);
    }
}
