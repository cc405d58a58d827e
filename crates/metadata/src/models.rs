//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;
use tubecache_core::key::{key_status, KeyRole, KeyStatus};
use tubecache_core::StreamKind;

/// API key record with quota window state.
#[derive(Debug, Clone, FromRow)]
pub struct ApiKeyRow {
    /// Plaintext key material, also the primary key.
    pub api_key: String,
    pub owner: String,
    pub role: String,
    pub daily_limit: i64,
    /// Requests admitted in the current UTC-day window.
    pub usage_count: i64,
    pub window_start: OffsetDateTime,
    /// Lifetime admitted requests, never reset.
    pub total_requests: i64,
    pub created_at: OffsetDateTime,
    /// Absent means the key never expires.
    pub expires_at: Option<OffsetDateTime>,
    pub created_by: Option<String>,
    /// Set on the single config-derived bootstrap key.
    pub is_bootstrap: bool,
}

impl ApiKeyRow {
    /// Parsed role; unrecognized stored roles read as standard.
    pub fn role(&self) -> KeyRole {
        KeyRole::parse(&self.role).unwrap_or(KeyRole::Standard)
    }

    /// Derived lifecycle status at `now`.
    pub fn status(&self, now: OffsetDateTime) -> KeyStatus {
        key_status(self.expires_at, now)
    }
}

/// Resolved content record in the fast tier.
///
/// One row per fingerprint; re-resolution replaces the row wholesale.
#[derive(Debug, Clone, FromRow)]
pub struct ContentRecordRow {
    pub fingerprint: String,
    /// Canonical query string, kept so expired sources can re-resolve.
    pub canonical_query: String,
    pub video_id: Option<String>,
    pub stream_kind: String,
    pub title: String,
    pub duration: String,
    pub channel: String,
    pub views: Option<i64>,
    pub thumbnail: Option<String>,
    /// Public watch-page link echoed in responses.
    pub source_link: String,
    pub playback_token: String,
    /// Direct upstream media URL; absent for blob-only records.
    pub upstream_url: Option<String>,
    pub resolved_at: OffsetDateTime,
    /// When the upstream URL stops being trusted.
    pub source_expires_at: OffsetDateTime,
}

impl ContentRecordRow {
    /// Parsed stream kind; unrecognized stored kinds read as video.
    pub fn stream_kind(&self) -> StreamKind {
        StreamKind::parse(&self.stream_kind).unwrap_or(StreamKind::Video)
    }

    /// Whether the upstream URL is still trusted at `now`.
    pub fn source_fresh(&self, now: OffsetDateTime) -> bool {
        now < self.source_expires_at
    }
}

/// Durable blob reference for a fingerprint.
#[derive(Debug, Clone, FromRow)]
pub struct BlobRefRow {
    pub fingerprint: String,
    pub blob_key: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub stored_at: OffsetDateTime,
}

/// Append-only request log line.
#[derive(Debug, Clone, FromRow)]
pub struct RequestLogRow {
    pub seq: i64,
    pub ts: OffsetDateTime,
    pub endpoint: String,
    pub query: Option<String>,
    pub caller_ip: String,
    /// Masked key prefix; never the full key.
    pub api_key_prefix: Option<String>,
    pub outcome: String,
}

/// Request log line before insertion assigns a sequence number.
#[derive(Debug, Clone)]
pub struct NewRequestLog {
    pub ts: OffsetDateTime,
    pub endpoint: String,
    pub query: Option<String>,
    pub caller_ip: String,
    pub api_key_prefix: Option<String>,
    pub outcome: String,
}
