//! Two-tier cache resolver with request coalescing.
//!
//! Resolution order for a fingerprint:
//! 1. Fast tier: a fresh content record answers immediately.
//! 2. Durable tier: a blob reference with a live object synthesizes a
//!    record that streams from storage, with no upstream call.
//! 3. Upstream: the extractor is called with bounded retries, and the
//!    result is written through to both tiers.
//!
//! Concurrent misses for the same fingerprint coalesce onto one in-flight
//! resolution; everyone in the burst shares its outcome, but a failure is
//! never cached for later callers.

use std::collections::HashMap;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::sync::{Mutex, OnceCell};
use tubecache_core::config::CacheConfig;
use tubecache_core::{CanonicalQuery, Fingerprint, PlaybackToken, StreamKind};
use tubecache_metadata::models::{BlobRefRow, ContentRecordRow};
use tubecache_metadata::repos::{BlobRefRepo, ContentRepo};
use tubecache_metadata::MetadataStore;
use tubecache_storage::{blob_key, ObjectStore, StreamingUpload};

use crate::extractor::{retry_backoff, ExtractedContent, Extractor};

/// Lifetime granted to records that stream from the durable tier.
/// Blobs do not expire, so this is effectively forever.
const BLOB_RECORD_TTL_DAYS: i64 = 3650;

/// Resolution error, shared by every caller of a coalesced attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error("no matching content: {0}")]
    NotFound(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("upstream extractor unavailable: {message}")]
    UpstreamUnavailable { message: String, timed_out: bool },

    #[error("upstream extractor rate limited")]
    UpstreamRateLimited,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ResolveError {
    fn internal(e: impl std::fmt::Display) -> Self {
        Self::Internal(e.to_string())
    }

    /// Only transient unavailability is worth retrying; definitive
    /// answers and rate limits are not.
    fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. })
    }
}

type InflightCell = Arc<OnceCell<Result<ContentRecordRow, ResolveError>>>;

/// Cache resolver shared across handlers.
pub struct Resolver {
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn ObjectStore>,
    extractor: Arc<dyn Extractor>,
    /// Client used for background media downloads. No total timeout:
    /// a full media download legitimately outlives an API timeout.
    download_client: reqwest::Client,
    source_ttl: Duration,
    blob_writethrough: bool,
    max_retries: u32,
    inflight: Mutex<HashMap<String, InflightCell>>,
}

impl Resolver {
    /// Create a resolver.
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStore>,
        extractor: Arc<dyn Extractor>,
        cache: &CacheConfig,
        max_retries: u32,
    ) -> Self {
        Self {
            metadata,
            storage,
            extractor,
            download_client: reqwest::Client::new(),
            source_ttl: Duration::seconds(cache.source_ttl_secs as i64),
            blob_writethrough: cache.blob_writethrough,
            max_retries,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a raw query string.
    pub async fn resolve(
        &self,
        raw: &str,
        kind: StreamKind,
    ) -> Result<ContentRecordRow, ResolveError> {
        let canonical =
            CanonicalQuery::parse(raw).map_err(|e| ResolveError::InvalidQuery(e.to_string()))?;
        self.resolve_canonical(&canonical, kind).await
    }

    /// Resolve an already-canonical query.
    pub async fn resolve_canonical(
        &self,
        canonical: &CanonicalQuery,
        kind: StreamKind,
    ) -> Result<ContentRecordRow, ResolveError> {
        let fingerprint = canonical.fingerprint(kind);
        let now = OffsetDateTime::now_utc();

        // Fast tier.
        if let Some(record) = self
            .metadata
            .get_record(fingerprint.as_str())
            .await
            .map_err(ResolveError::internal)?
            && record.source_fresh(now)
        {
            return Ok(record);
        }

        // Coalesce the slow path per fingerprint. The first caller in a
        // burst leads; everyone else awaits the same cell.
        let cell = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(fingerprint.as_str().to_string())
                .or_default()
                .clone()
        };

        let result = cell
            .get_or_init(|| self.resolve_slow(canonical, &fingerprint, kind))
            .await
            .clone();

        // Every caller attempts removal; only the cell it awaited is
        // removed, so a newer in-flight attempt is left alone.
        {
            let mut inflight = self.inflight.lock().await;
            if let Some(current) = inflight.get(fingerprint.as_str())
                && Arc::ptr_eq(current, &cell)
            {
                inflight.remove(fingerprint.as_str());
            }
        }

        result
    }

    async fn resolve_slow(
        &self,
        canonical: &CanonicalQuery,
        fingerprint: &Fingerprint,
        kind: StreamKind,
    ) -> Result<ContentRecordRow, ResolveError> {
        let now = OffsetDateTime::now_utc();

        // A previous leader may have finished between our fast-tier check
        // and winning the cell.
        let stale = self
            .metadata
            .get_record(fingerprint.as_str())
            .await
            .map_err(ResolveError::internal)?;
        if let Some(record) = &stale
            && record.source_fresh(now)
        {
            return Ok(record.clone());
        }

        // Durable tier.
        if let Some(blob) = self
            .metadata
            .get_blob_ref(fingerprint.as_str())
            .await
            .map_err(ResolveError::internal)?
        {
            match self.storage.exists(&blob.blob_key).await {
                Ok(true) => {
                    let record =
                        blob_backed_record(canonical, fingerprint, kind, stale.as_ref(), now);
                    self.metadata
                        .upsert_record(&record)
                        .await
                        .map_err(ResolveError::internal)?;
                    return Ok(record);
                }
                Ok(false) => {
                    tracing::warn!(
                        fingerprint = %fingerprint,
                        blob_key = %blob.blob_key,
                        "blob reference points at a missing object, falling through to upstream"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        fingerprint = %fingerprint,
                        error = %e,
                        "blob existence check failed, falling through to upstream"
                    );
                }
            }
        }

        // Upstream.
        let extracted = self.extract_with_retry(canonical, kind).await?;
        let record = self.upstream_record(canonical, fingerprint, kind, &extracted, now);
        self.metadata
            .upsert_record(&record)
            .await
            .map_err(ResolveError::internal)?;

        if self.blob_writethrough {
            self.spawn_writethrough(record.clone(), kind);
        }

        Ok(record)
    }

    async fn extract_with_retry(
        &self,
        canonical: &CanonicalQuery,
        kind: StreamKind,
    ) -> Result<ExtractedContent, ResolveError> {
        let mut attempt = 0;
        loop {
            match self.extractor.fetch(canonical, kind).await {
                Ok(extracted) => return Ok(extracted),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        query = %canonical,
                        attempt,
                        error = %err,
                        "extraction failed, retrying"
                    );
                    tokio::time::sleep(retry_backoff(attempt)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn upstream_record(
        &self,
        canonical: &CanonicalQuery,
        fingerprint: &Fingerprint,
        kind: StreamKind,
        extracted: &ExtractedContent,
        now: OffsetDateTime,
    ) -> ContentRecordRow {
        let video_id = extracted
            .video_id
            .clone()
            .or_else(|| canonical.video_id().map(str::to_string));
        let source_link = video_id
            .as_deref()
            .map(|id| format!("https://www.youtube.com/watch?v={id}"))
            .unwrap_or_else(|| canonical.upstream_query());

        ContentRecordRow {
            fingerprint: fingerprint.as_str().to_string(),
            canonical_query: canonical.as_canonical_str(),
            video_id,
            stream_kind: kind.as_str().to_string(),
            title: extracted.title.clone(),
            duration: extracted.duration.clone(),
            channel: extracted.channel.clone(),
            views: extracted.views,
            thumbnail: extracted.thumbnail.clone(),
            source_link,
            playback_token: PlaybackToken::new().to_string(),
            upstream_url: Some(extracted.media_url.clone()),
            resolved_at: now,
            source_expires_at: now + self.source_ttl,
        }
    }

    /// Copy resolved media into the blob tier in the background.
    ///
    /// Failures only log; the caller already has a playable answer and
    /// the next resolution simply misses the durable tier again.
    fn spawn_writethrough(&self, record: ContentRecordRow, kind: StreamKind) {
        let Some(url) = record.upstream_url.clone() else {
            return;
        };
        let storage = self.storage.clone();
        let metadata = self.metadata.clone();
        let client = self.download_client.clone();

        tokio::spawn(async move {
            let fingerprint = record.fingerprint.clone();
            if let Err(e) = store_blob(storage, metadata, client, record, kind, &url).await {
                tracing::warn!(
                    fingerprint = %fingerprint,
                    error = %e,
                    "durable write-through failed"
                );
            }
        });
    }

    /// Point-in-time counts for the stats endpoint.
    pub async fn inflight_count(&self) -> usize {
        self.inflight.lock().await.len()
    }
}

async fn store_blob(
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    client: reqwest::Client,
    record: ContentRecordRow,
    kind: StreamKind,
    url: &str,
) -> anyhow::Result<()> {
    use futures::StreamExt;

    if metadata.get_blob_ref(&record.fingerprint).await?.is_some() {
        return Ok(());
    }

    let response = client.get(url).send().await?.error_for_status()?;
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| kind.content_type().to_string());

    let key = blob_key(&record.fingerprint);
    let upload = storage.put_stream(&key).await?;
    let mut stream = response.bytes_stream();

    let size_bytes = async {
        let mut upload: Box<dyn StreamingUpload> = upload;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => upload.write(bytes).await?,
                Err(e) => {
                    upload.abort().await.ok();
                    return Err(anyhow::Error::from(e));
                }
            }
        }
        Ok(upload.finish().await?)
    }
    .await?;

    metadata
        .insert_blob_ref(&BlobRefRow {
            fingerprint: record.fingerprint.clone(),
            blob_key: key,
            size_bytes: size_bytes as i64,
            content_type,
            stored_at: OffsetDateTime::now_utc(),
        })
        .await?;

    tracing::info!(
        fingerprint = %record.fingerprint,
        size_bytes,
        "content written through to blob tier"
    );
    Ok(())
}

fn blob_backed_record(
    canonical: &CanonicalQuery,
    fingerprint: &Fingerprint,
    kind: StreamKind,
    stale: Option<&ContentRecordRow>,
    now: OffsetDateTime,
) -> ContentRecordRow {
    // A stale fast-tier record still carries good metadata; reuse it and
    // only mint a fresh token. After full eviction, fall back to what
    // the query alone can tell us.
    let (title, duration, channel, views, thumbnail, video_id, source_link) = match stale {
        Some(rec) => (
            rec.title.clone(),
            rec.duration.clone(),
            rec.channel.clone(),
            rec.views,
            rec.thumbnail.clone(),
            rec.video_id.clone(),
            rec.source_link.clone(),
        ),
        None => (
            "Unknown".to_string(),
            "Unknown".to_string(),
            "Unknown".to_string(),
            None,
            None,
            canonical.video_id().map(str::to_string),
            canonical.upstream_query(),
        ),
    };

    ContentRecordRow {
        fingerprint: fingerprint.as_str().to_string(),
        canonical_query: canonical.as_canonical_str(),
        video_id,
        stream_kind: kind.as_str().to_string(),
        title,
        duration,
        channel,
        views,
        thumbnail,
        source_link,
        playback_token: PlaybackToken::new().to_string(),
        upstream_url: None,
        resolved_at: now,
        source_expires_at: now + Duration::days(BLOB_RECORD_TTL_DAYS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tubecache_metadata::SqliteStore;
    use tubecache_storage::FilesystemBackend;

    struct MockExtractor {
        calls: AtomicUsize,
        /// Outcomes consumed per call; the last entry repeats.
        script: Vec<Result<ExtractedContent, ResolveError>>,
        delay_ms: u64,
    }

    impl MockExtractor {
        fn ok() -> Self {
            Self::scripted(vec![Ok(sample_content())])
        }

        fn scripted(script: Vec<Result<ExtractedContent, ResolveError>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                script,
                delay_ms: 0,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn sample_content() -> ExtractedContent {
        ExtractedContent {
            title: "Sample".to_string(),
            duration: "1:00".to_string(),
            channel: "Channel".to_string(),
            views: Some(42),
            thumbnail: None,
            video_id: Some("dQw4w9WgXcQ".to_string()),
            media_url: "https://media.example/v.mp4".to_string(),
        }
    }

    fn unavailable() -> ResolveError {
        ResolveError::UpstreamUnavailable {
            message: "down".to_string(),
            timed_out: false,
        }
    }

    #[async_trait]
    impl Extractor for MockExtractor {
        async fn fetch(
            &self,
            _query: &CanonicalQuery,
            _kind: StreamKind,
        ) -> Result<ExtractedContent, ResolveError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
            }
            self.script
                .get(n.min(self.script.len() - 1))
                .cloned()
                .unwrap_or_else(|| Ok(sample_content()))
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStore>,
        extractor: Arc<MockExtractor>,
        resolver: Arc<Resolver>,
    }

    async fn harness(extractor: MockExtractor, max_retries: u32) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(dir.path().join("metadata.db"))
                .await
                .unwrap(),
        );
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(dir.path().join("blobs"))
                .await
                .unwrap(),
        );
        let extractor = Arc::new(extractor);
        let resolver = Arc::new(Resolver::new(
            metadata.clone(),
            storage.clone(),
            extractor.clone(),
            &CacheConfig {
                source_ttl_secs: 3600,
                // Write-through would hit the fake media URL; keep the
                // resolver pass-through in unit tests.
                blob_writethrough: false,
            },
            max_retries,
        ));
        Harness {
            _dir: dir,
            metadata,
            storage,
            extractor,
            resolver,
        }
    }

    #[tokio::test]
    async fn fresh_record_skips_the_extractor() {
        let h = harness(MockExtractor::ok(), 0).await;
        let first = h
            .resolver
            .resolve("dQw4w9WgXcQ", StreamKind::Video)
            .await
            .unwrap();
        let second = h
            .resolver
            .resolve("https://youtu.be/dQw4w9WgXcQ", StreamKind::Video)
            .await
            .unwrap();
        assert_eq!(h.extractor.calls(), 1);
        assert_eq!(first.playback_token, second.playback_token);
    }

    #[tokio::test]
    async fn concurrent_misses_coalesce_to_one_call() {
        let h = harness(
            MockExtractor {
                delay_ms: 50,
                ..MockExtractor::ok()
            },
            0,
        )
        .await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = h.resolver.clone();
            handles.push(tokio::spawn(async move {
                resolver.resolve("dQw4w9WgXcQ", StreamKind::Audio).await
            }));
        }
        let mut tokens = std::collections::HashSet::new();
        for handle in handles {
            tokens.insert(handle.await.unwrap().unwrap().playback_token);
        }
        assert_eq!(h.extractor.calls(), 1);
        assert_eq!(tokens.len(), 1);
        assert_eq!(h.resolver.inflight_count().await, 0);
    }

    #[tokio::test]
    async fn blob_tier_resolves_without_upstream() {
        let h = harness(MockExtractor::ok(), 0).await;

        // Populate both tiers, then evict the fast tier.
        let record = h
            .resolver
            .resolve("dQw4w9WgXcQ", StreamKind::Video)
            .await
            .unwrap();
        let key = blob_key(&record.fingerprint);
        h.storage.put(&key, Bytes::from("media bytes")).await.unwrap();
        h.metadata
            .insert_blob_ref(&BlobRefRow {
                fingerprint: record.fingerprint.clone(),
                blob_key: key,
                size_bytes: 11,
                content_type: "video/mp4".to_string(),
                stored_at: OffsetDateTime::now_utc(),
            })
            .await
            .unwrap();
        h.metadata.delete_record(&record.fingerprint).await.unwrap();

        let resolved = h
            .resolver
            .resolve("dQw4w9WgXcQ", StreamKind::Video)
            .await
            .unwrap();
        assert_eq!(h.extractor.calls(), 1);
        assert!(resolved.upstream_url.is_none());
        assert_ne!(resolved.playback_token, record.playback_token);
    }

    #[tokio::test]
    async fn failures_are_shared_but_not_cached() {
        let h = harness(
            MockExtractor::scripted(vec![Err(unavailable()), Ok(sample_content())]),
            0,
        )
        .await;

        let err = h
            .resolver
            .resolve("dQw4w9WgXcQ", StreamKind::Video)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::UpstreamUnavailable { .. }));

        // The failure was not stored; the next attempt goes upstream again.
        h.resolver
            .resolve("dQw4w9WgXcQ", StreamKind::Video)
            .await
            .unwrap();
        assert_eq!(h.extractor.calls(), 2);
    }

    #[tokio::test]
    async fn only_unavailability_is_retried() {
        let h = harness(
            MockExtractor::scripted(vec![Err(ResolveError::NotFound("gone".to_string()))]),
            2,
        )
        .await;
        let err = h
            .resolver
            .resolve("dQw4w9WgXcQ", StreamKind::Video)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
        assert_eq!(h.extractor.calls(), 1);

        let h = harness(MockExtractor::scripted(vec![Err(unavailable())]), 2).await;
        let err = h
            .resolver
            .resolve("dQw4w9WgXcQ", StreamKind::Video)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::UpstreamUnavailable { .. }));
        assert_eq!(h.extractor.calls(), 3);
    }

    #[tokio::test]
    async fn expired_record_re_resolves_with_a_fresh_token() {
        let h = harness(MockExtractor::ok(), 0).await;
        let mut record = h
            .resolver
            .resolve("dQw4w9WgXcQ", StreamKind::Video)
            .await
            .unwrap();

        // Age the record past its TTL.
        record.source_expires_at = OffsetDateTime::now_utc() - Duration::seconds(1);
        h.metadata.upsert_record(&record).await.unwrap();

        let renewed = h
            .resolver
            .resolve("dQw4w9WgXcQ", StreamKind::Video)
            .await
            .unwrap();
        assert_eq!(h.extractor.calls(), 2);
        assert_ne!(renewed.playback_token, record.playback_token);
    }
}
