//! Metadata store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{FileRepo, QuotaRepo, UploadRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: UploadRepo + FileRepo + QuotaRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store, running migrations.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection avoids
            // persistent "database is locked" failures under concurrent commits.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::info!(path = %path.display(), "sqlite metadata store ready");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::{ChunkFragmentRow, FileRow, QuotaAccountRow, UploadSessionRow};
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl FileRepo for SqliteStore {
        async fn create_file(&self, file: &FileRow) -> MetadataResult<()> {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO files \
                 (file_id, owner_id, display_name, location, byte_size, content_digest, \
                  mime_hint, created_at, ttl_hours, visibility, download_count, active) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(file.file_id)
            .bind(file.owner_id)
            .bind(&file.display_name)
            .bind(&file.location)
            .bind(file.byte_size)
            .bind(&file.content_digest)
            .bind(&file.mime_hint)
            .bind(file.created_at)
            .bind(file.ttl_hours)
            .bind(&file.visibility)
            .bind(file.download_count)
            .bind(file.active)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::AlreadyExists(format!(
                    "file {} already exists",
                    file.file_id
                )));
            }
            Ok(())
        }

        async fn get_file(&self, file_id: Uuid) -> MetadataResult<Option<FileRow>> {
            let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE file_id = ?")
                .bind(file_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn list_files(&self, owner_id: Uuid) -> MetadataResult<Vec<FileRow>> {
            let rows = sqlx::query_as::<_, FileRow>(
                "SELECT * FROM files WHERE owner_id = ? AND active = 1 \
                 ORDER BY created_at DESC, file_id",
            )
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn set_visibility(&self, file_id: Uuid, visibility: &str) -> MetadataResult<()> {
            let result =
                sqlx::query("UPDATE files SET visibility = ? WHERE file_id = ? AND active = 1")
                    .bind(visibility)
                    .bind(file_id)
                    .execute(&self.pool)
                    .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("file {file_id} not found")));
            }
            Ok(())
        }

        async fn set_inactive(&self, file_id: Uuid) -> MetadataResult<bool> {
            let result =
                sqlx::query("UPDATE files SET active = 0 WHERE file_id = ? AND active = 1")
                    .bind(file_id)
                    .execute(&self.pool)
                    .await?;

            if result.rows_affected() == 0 {
                // Already inactive; caller must not release quota twice.
                tracing::debug!(%file_id, "file already inactive, skipping");
                return Ok(false);
            }
            Ok(true)
        }

        async fn increment_download_count(&self, file_id: Uuid) -> MetadataResult<()> {
            sqlx::query("UPDATE files SET download_count = download_count + 1 WHERE file_id = ?")
                .bind(file_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl QuotaRepo for SqliteStore {
        async fn ensure_account(&self, account: &QuotaAccountRow) -> MetadataResult<()> {
            sqlx::query(
                "INSERT OR IGNORE INTO quota_accounts \
                 (owner_id, storage_limit, storage_used, download_limit, download_used, period_anchor) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(account.owner_id)
            .bind(account.storage_limit)
            .bind(account.storage_used)
            .bind(account.download_limit)
            .bind(account.download_used)
            .bind(account.period_anchor)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_account(&self, owner_id: Uuid) -> MetadataResult<Option<QuotaAccountRow>> {
            let row = sqlx::query_as::<_, QuotaAccountRow>(
                "SELECT * FROM quota_accounts WHERE owner_id = ?",
            )
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn adjust_storage_used(&self, owner_id: Uuid, delta: i64) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE quota_accounts \
                 SET storage_used = MAX(0, storage_used + ?) WHERE owner_id = ?",
            )
            .bind(delta)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "quota account {owner_id} not found"
                )));
            }
            Ok(())
        }

        async fn adjust_download_used(&self, owner_id: Uuid, delta: i64) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE quota_accounts \
                 SET download_used = MAX(0, download_used + ?) WHERE owner_id = ?",
            )
            .bind(delta)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "quota account {owner_id} not found"
                )));
            }
            Ok(())
        }

        async fn reset_download_period(
            &self,
            owner_id: Uuid,
            anchor: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE quota_accounts \
                 SET download_used = 0, period_anchor = ? WHERE owner_id = ?",
            )
            .bind(anchor)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "quota account {owner_id} not found"
                )));
            }
            Ok(())
        }

        async fn set_limits(
            &self,
            owner_id: Uuid,
            storage_limit: i64,
            download_limit: i64,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE quota_accounts \
                 SET storage_limit = ?, download_limit = ? WHERE owner_id = ?",
            )
            .bind(storage_limit)
            .bind(download_limit)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "quota account {owner_id} not found"
                )));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl UploadRepo for SqliteStore {
        async fn create_session(&self, session: &UploadSessionRow) -> MetadataResult<()> {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO upload_sessions \
                 (session_id, owner_id, declared_filename, declared_total_size, \
                  expected_chunk_count, state, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(session.session_id)
            .bind(session.owner_id)
            .bind(&session.declared_filename)
            .bind(session.declared_total_size)
            .bind(session.expected_chunk_count)
            .bind(&session.state)
            .bind(session.created_at)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::AlreadyExists(format!(
                    "session {} already exists",
                    session.session_id
                )));
            }
            Ok(())
        }

        async fn get_session(
            &self,
            session_id: Uuid,
        ) -> MetadataResult<Option<UploadSessionRow>> {
            let row = sqlx::query_as::<_, UploadSessionRow>(
                "SELECT * FROM upload_sessions WHERE session_id = ?",
            )
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn set_session_state(&self, session_id: Uuid, state: &str) -> MetadataResult<()> {
            let result = sqlx::query("UPDATE upload_sessions SET state = ? WHERE session_id = ?")
                .bind(state)
                .bind(session_id)
                .execute(&self.pool)
                .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "session {session_id} not found"
                )));
            }
            Ok(())
        }

        async fn delete_session(&self, session_id: Uuid) -> MetadataResult<()> {
            // Fragment rows cascade.
            sqlx::query("DELETE FROM upload_sessions WHERE session_id = ?")
                .bind(session_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn upsert_fragment(&self, fragment: &ChunkFragmentRow) -> MetadataResult<()> {
            sqlx::query(
                "INSERT INTO chunk_fragments (session_id, sequence, length, location, received_at) \
                 VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT (session_id, sequence) DO UPDATE SET \
                 length = excluded.length, location = excluded.location, \
                 received_at = excluded.received_at",
            )
            .bind(fragment.session_id)
            .bind(fragment.sequence)
            .bind(fragment.length)
            .bind(&fragment.location)
            .bind(fragment.received_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn delete_fragments(&self, session_id: Uuid) -> MetadataResult<()> {
            sqlx::query("DELETE FROM chunk_fragments WHERE session_id = ?")
                .bind(session_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn get_fragments(
            &self,
            session_id: Uuid,
        ) -> MetadataResult<Vec<ChunkFragmentRow>> {
            let rows = sqlx::query_as::<_, ChunkFragmentRow>(
                "SELECT * FROM chunk_fragments WHERE session_id = ? ORDER BY sequence",
            )
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn get_received_sequences(&self, session_id: Uuid) -> MetadataResult<Vec<i64>> {
            let rows: Vec<(i64,)> = sqlx::query_as(
                "SELECT sequence FROM chunk_fragments WHERE session_id = ? ORDER BY sequence",
            )
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(|(seq,)| seq).collect())
        }

        async fn get_stale_open_sessions(
            &self,
            older_than: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<UploadSessionRow>> {
            let rows = sqlx::query_as::<_, UploadSessionRow>(
                "SELECT * FROM upload_sessions \
                 WHERE state = 'open' AND created_at < ? \
                 ORDER BY created_at LIMIT ?",
            )
            .bind(older_than)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

            if !rows.is_empty() {
                tracing::debug!(count = rows.len(), "stale open sessions fetched");
            }
            Ok(rows)
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Finalized file objects
CREATE TABLE IF NOT EXISTS files (
    file_id BLOB PRIMARY KEY,
    owner_id BLOB NOT NULL,
    display_name TEXT NOT NULL,
    location TEXT NOT NULL,
    byte_size INTEGER NOT NULL,
    content_digest TEXT NOT NULL,
    mime_hint TEXT,
    created_at TEXT NOT NULL,
    ttl_hours INTEGER NOT NULL DEFAULT 0,
    visibility TEXT NOT NULL DEFAULT 'private',
    download_count INTEGER NOT NULL DEFAULT 0,
    active INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_files_owner_active ON files(owner_id, active, created_at);

-- Per-owner quota accounting
CREATE TABLE IF NOT EXISTS quota_accounts (
    owner_id BLOB PRIMARY KEY,
    storage_limit INTEGER NOT NULL,
    storage_used INTEGER NOT NULL DEFAULT 0,
    download_limit INTEGER NOT NULL,
    download_used INTEGER NOT NULL DEFAULT 0,
    period_anchor TEXT NOT NULL
);

-- Upload sessions
CREATE TABLE IF NOT EXISTS upload_sessions (
    session_id BLOB PRIMARY KEY,
    owner_id BLOB NOT NULL,
    declared_filename TEXT NOT NULL,
    declared_total_size INTEGER NOT NULL,
    expected_chunk_count INTEGER NOT NULL,
    state TEXT NOT NULL DEFAULT 'open',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_state ON upload_sessions(state, created_at);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_owner ON upload_sessions(owner_id);

-- In-flight chunk fragments
CREATE TABLE IF NOT EXISTS chunk_fragments (
    session_id BLOB NOT NULL,
    sequence INTEGER NOT NULL,
    length INTEGER NOT NULL,
    location TEXT NOT NULL,
    received_at TEXT NOT NULL,
    PRIMARY KEY (session_id, sequence),
    FOREIGN KEY (session_id) REFERENCES upload_sessions(session_id) ON DELETE CASCADE
);
"#;
