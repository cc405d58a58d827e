//! Metadata store trait and the SQLite implementation.

use crate::error::MetadataResult;
use crate::models::{ApiKeyRow, BlobRefRow, ContentRecordRow, NewRequestLog, RequestLogRow};
use crate::repos::{AdmitOutcome, BlobRefRepo, ContentRepo, KeyRepo, LogRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;
use tubecache_core::key::{window_is_stale, window_resets_in_secs, AdmitDenial};
use tubecache_core::KeyRole;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: KeyRepo + ContentRepo + BlobRefRepo + LogRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS api_keys (
        api_key         TEXT PRIMARY KEY,
        owner           TEXT NOT NULL,
        role            TEXT NOT NULL DEFAULT 'standard',
        daily_limit     INTEGER NOT NULL,
        usage_count     INTEGER NOT NULL DEFAULT 0,
        window_start    TEXT NOT NULL,
        total_requests  INTEGER NOT NULL DEFAULT 0,
        created_at      TEXT NOT NULL,
        expires_at      TEXT,
        created_by      TEXT,
        is_bootstrap    INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS content_records (
        fingerprint       TEXT PRIMARY KEY,
        canonical_query   TEXT NOT NULL,
        video_id          TEXT,
        stream_kind       TEXT NOT NULL,
        title             TEXT NOT NULL,
        duration          TEXT NOT NULL,
        channel           TEXT NOT NULL,
        views             INTEGER,
        thumbnail         TEXT,
        source_link       TEXT NOT NULL,
        playback_token    TEXT NOT NULL UNIQUE,
        upstream_url      TEXT,
        resolved_at       TEXT NOT NULL,
        source_expires_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS blob_refs (
        fingerprint   TEXT PRIMARY KEY,
        blob_key      TEXT NOT NULL,
        size_bytes    INTEGER NOT NULL,
        content_type  TEXT NOT NULL,
        stored_at     TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS request_logs (
        seq            INTEGER PRIMARY KEY AUTOINCREMENT,
        ts             TEXT NOT NULL,
        endpoint       TEXT NOT NULL,
        query          TEXT,
        caller_ip      TEXT NOT NULL,
        api_key_prefix TEXT,
        outcome        TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_content_records_token ON content_records (playback_token)",
    "CREATE INDEX IF NOT EXISTS idx_api_keys_bootstrap ON api_keys (is_bootstrap)",
];

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store and run migrations.
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
            // SQLite permits limited write concurrency; a single connection also
            // serializes admissions, which the quota accounting relies on.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
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
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyRepo for SqliteStore {
    async fn create_key(&self, key: &ApiKeyRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO api_keys (
                api_key, owner, role, daily_limit, usage_count, window_start,
                total_requests, created_at, expires_at, created_by, is_bootstrap
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&key.api_key)
        .bind(&key.owner)
        .bind(&key.role)
        .bind(key.daily_limit)
        .bind(key.usage_count)
        .bind(key.window_start)
        .bind(key.total_requests)
        .bind(key.created_at)
        .bind(key.expires_at)
        .bind(&key.created_by)
        .bind(key.is_bootstrap)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_key(&self, api_key: &str) -> MetadataResult<Option<ApiKeyRow>> {
        let row = sqlx::query_as::<_, ApiKeyRow>("SELECT * FROM api_keys WHERE api_key = ?")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn admit_key(
        &self,
        api_key: &str,
        required_role: KeyRole,
        now: OffsetDateTime,
    ) -> MetadataResult<AdmitOutcome> {
        // One transaction covers lookup, expiry, rollover, role, quota,
        // and the counter bump. Denial paths return before any write, so
        // dropping the transaction rolls back nothing observable.
        let mut tx = self.pool.begin().await?;

        let key = sqlx::query_as::<_, ApiKeyRow>("SELECT * FROM api_keys WHERE api_key = ?")
            .bind(api_key)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(mut key) = key else {
            return Ok(AdmitOutcome::Denied(AdmitDenial::KeyNotFound));
        };

        // Expiry wins over every other check.
        if let Some(expired_at) = key.expires_at
            && now >= expired_at
        {
            return Ok(AdmitOutcome::Denied(AdmitDenial::KeyExpired { expired_at }));
        }

        if window_is_stale(key.window_start, now) {
            key.usage_count = 0;
            key.window_start = now;
        }

        let role = key.role();
        if required_role == KeyRole::Admin && role != KeyRole::Admin {
            return Ok(AdmitOutcome::Denied(AdmitDenial::InsufficientRole));
        }

        if role != KeyRole::Admin {
            if key.usage_count >= key.daily_limit {
                return Ok(AdmitOutcome::Denied(AdmitDenial::QuotaExceeded {
                    limit: key.daily_limit,
                    resets_in_secs: window_resets_in_secs(now),
                }));
            }
            key.usage_count += 1;
        }
        key.total_requests += 1;

        sqlx::query(
            "UPDATE api_keys SET usage_count = ?, window_start = ?, total_requests = ? \
             WHERE api_key = ?",
        )
        .bind(key.usage_count)
        .bind(key.window_start)
        .bind(key.total_requests)
        .bind(&key.api_key)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(AdmitOutcome::Admitted(key))
    }

    async fn delete_key(&self, api_key: &str) -> MetadataResult<bool> {
        let result = sqlx::query("DELETE FROM api_keys WHERE api_key = ?")
            .bind(api_key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_keys(&self) -> MetadataResult<Vec<ApiKeyRow>> {
        let rows = sqlx::query_as::<_, ApiKeyRow>("SELECT * FROM api_keys ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn count_keys(&self) -> MetadataResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM api_keys")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn count_expired_keys(&self, now: OffsetDateTime) -> MetadataResult<u64> {
        // Timestamp columns are TEXT; comparing them lexicographically
        // against a bound value is format-dependent, so filter in Rust.
        let rows = self.list_keys().await?;
        Ok(rows
            .iter()
            .filter(|k| matches!(k.expires_at, Some(at) if now >= at))
            .count() as u64)
    }

    async fn reset_stale_windows(&self, now: OffsetDateTime) -> MetadataResult<u64> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query_as::<_, ApiKeyRow>("SELECT * FROM api_keys")
            .fetch_all(&mut *tx)
            .await?;
        let mut reset = 0u64;
        for key in rows {
            if window_is_stale(key.window_start, now) {
                sqlx::query("UPDATE api_keys SET usage_count = 0, window_start = ? WHERE api_key = ?")
                    .bind(now)
                    .bind(&key.api_key)
                    .execute(&mut *tx)
                    .await?;
                reset += 1;
            }
        }
        tx.commit().await?;
        Ok(reset)
    }

    async fn get_bootstrap_key(&self) -> MetadataResult<Option<ApiKeyRow>> {
        let row = sqlx::query_as::<_, ApiKeyRow>("SELECT * FROM api_keys WHERE is_bootstrap = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn mark_bootstrap(&self, api_key: &str) -> MetadataResult<()> {
        sqlx::query("UPDATE api_keys SET is_bootstrap = 1 WHERE api_key = ?")
            .bind(api_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ContentRepo for SqliteStore {
    async fn upsert_record(&self, record: &ContentRecordRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO content_records (
                fingerprint, canonical_query, video_id, stream_kind, title,
                duration, channel, views, thumbnail, source_link,
                playback_token, upstream_url, resolved_at, source_expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.fingerprint)
        .bind(&record.canonical_query)
        .bind(&record.video_id)
        .bind(&record.stream_kind)
        .bind(&record.title)
        .bind(&record.duration)
        .bind(&record.channel)
        .bind(record.views)
        .bind(&record.thumbnail)
        .bind(&record.source_link)
        .bind(&record.playback_token)
        .bind(&record.upstream_url)
        .bind(record.resolved_at)
        .bind(record.source_expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_record(&self, fingerprint: &str) -> MetadataResult<Option<ContentRecordRow>> {
        let row = sqlx::query_as::<_, ContentRecordRow>(
            "SELECT * FROM content_records WHERE fingerprint = ?",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_record_by_token(&self, token: &str) -> MetadataResult<Option<ContentRecordRow>> {
        let row = sqlx::query_as::<_, ContentRecordRow>(
            "SELECT * FROM content_records WHERE playback_token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_record(&self, fingerprint: &str) -> MetadataResult<bool> {
        let result = sqlx::query("DELETE FROM content_records WHERE fingerprint = ?")
            .bind(fingerprint)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_records(&self) -> MetadataResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl BlobRefRepo for SqliteStore {
    async fn insert_blob_ref(&self, blob: &BlobRefRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO blob_refs (
                fingerprint, blob_key, size_bytes, content_type, stored_at
            ) VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&blob.fingerprint)
        .bind(&blob.blob_key)
        .bind(blob.size_bytes)
        .bind(&blob.content_type)
        .bind(blob.stored_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_blob_ref(&self, fingerprint: &str) -> MetadataResult<Option<BlobRefRow>> {
        let row = sqlx::query_as::<_, BlobRefRow>("SELECT * FROM blob_refs WHERE fingerprint = ?")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn count_blob_refs(&self) -> MetadataResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blob_refs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn total_blob_bytes(&self) -> MetadataResult<u64> {
        let total: Option<i64> = sqlx::query_scalar("SELECT SUM(size_bytes) FROM blob_refs")
            .fetch_one(&self.pool)
            .await?;
        Ok(total.unwrap_or(0) as u64)
    }
}

#[async_trait]
impl LogRepo for SqliteStore {
    async fn append_log(&self, line: &NewRequestLog) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO request_logs (ts, endpoint, query, caller_ip, api_key_prefix, outcome)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(line.ts)
        .bind(&line.endpoint)
        .bind(&line.query)
        .bind(&line.caller_ip)
        .bind(&line.api_key_prefix)
        .bind(&line.outcome)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_logs(&self, limit: u32) -> MetadataResult<Vec<RequestLogRow>> {
        let rows = sqlx::query_as::<_, RequestLogRow>(
            "SELECT * FROM request_logs ORDER BY seq DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn count_logs(&self) -> MetadataResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM request_logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
