//! Upload session types and lifecycle.

use crate::id::{OwnerId, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use time::OffsetDateTime;

/// Upload session state.
///
/// Cancelled and swept sessions are deleted outright, so a missing session
/// reads as not-found; a `Completed` row is retained so late chunk
/// submissions can be distinguished as a conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Session is open and accepting chunks.
    Open,
    /// Session was assembled into a file object.
    Completed,
}

impl SessionState {
    /// Stable string form used in persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Completed => "completed",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "open" => Ok(Self::Open),
            "completed" => Ok(Self::Completed),
            other => Err(crate::Error::InvalidArgument(format!(
                "invalid session state: {other}"
            ))),
        }
    }
}

/// An upload session tracking resumable chunked-upload state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadSession {
    /// Unique session identifier.
    pub id: SessionId,
    /// Owning account.
    pub owner_id: OwnerId,
    /// Filename declared at session start.
    pub declared_filename: String,
    /// Total size declared at session start, verified at assembly.
    pub declared_total_size: u64,
    /// Number of chunks the client will submit.
    pub expected_chunk_count: u32,
    /// Current session state.
    pub state: SessionState,
    /// When the session was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl UploadSession {
    /// Create a new open session.
    pub fn new(
        owner_id: OwnerId,
        declared_filename: impl Into<String>,
        declared_total_size: u64,
        expected_chunk_count: u32,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: SessionId::new(),
            owner_id,
            declared_filename: declared_filename.into(),
            declared_total_size,
            expected_chunk_count,
            state: SessionState::Open,
            created_at,
        }
    }

    /// Byte store key for one in-flight fragment.
    pub fn chunk_key(session_id: SessionId, sequence: u32) -> String {
        format!("sessions/{session_id}/chunks/{sequence:06}")
    }

    /// Byte store prefix covering every fragment of this session.
    pub fn chunk_prefix(session_id: SessionId) -> String {
        format!("sessions/{session_id}/")
    }
}

/// A received fragment of an in-flight upload.
///
/// Exclusively owned by its session; removed with it on completion, cancel,
/// or sweep.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkFragment {
    /// Owning session.
    pub session_id: SessionId,
    /// Position in the upload (0-indexed).
    pub sequence: u32,
    /// Fragment length in bytes.
    pub length: u64,
    /// Byte store key holding the fragment.
    pub location: String,
    /// When the fragment was (last) received.
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

/// Received-sequence set for one session, the in-memory view of the bitmap.
///
/// Invariant: cardinality never exceeds the expected chunk count; a session
/// is complete exactly when every index `0..expected` is present.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkBitmap {
    received: BTreeSet<u32>,
}

impl ChunkBitmap {
    /// Build from received sequence numbers.
    pub fn from_sequences(sequences: impl IntoIterator<Item = u32>) -> Self {
        Self {
            received: sequences.into_iter().collect(),
        }
    }

    /// Mark a sequence as received. Re-marking is a no-op (idempotent
    /// overwrite at the storage layer).
    pub fn mark(&mut self, sequence: u32) {
        self.received.insert(sequence);
    }

    /// Number of distinct sequences received.
    pub fn cardinality(&self) -> u32 {
        self.received.len() as u32
    }

    /// Whether every index in `0..expected` has been received.
    pub fn is_complete(&self, expected: u32) -> bool {
        self.cardinality() == expected && self.received.iter().all(|&seq| seq < expected)
    }

    /// Sequences in `0..expected` not yet received, in order.
    pub fn missing(&self, expected: u32) -> Vec<u32> {
        (0..expected).filter(|seq| !self.received.contains(seq)).collect()
    }

    /// Received sequences in ascending order.
    pub fn sequences(&self) -> impl Iterator<Item = u32> + '_ {
        self.received.iter().copied()
    }
}
