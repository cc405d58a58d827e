//! Upstream extractor client.
//!
//! The extractor is an external HTTP API that turns a query into a
//! direct media URL plus descriptive metadata. It is the slowest and
//! least reliable collaborator in the system, so every call is bounded
//! by a timeout and failures are classified before anyone retries.

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;
use tubecache_core::config::UpstreamConfig;
use tubecache_core::{CanonicalQuery, StreamKind};

use crate::resolver::ResolveError;

/// Metadata and media URL returned by a successful extraction.
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    pub title: String,
    pub duration: String,
    pub channel: String,
    pub views: Option<i64>,
    pub thumbnail: Option<String>,
    pub video_id: Option<String>,
    /// Direct media URL for the requested rendition.
    pub media_url: String,
}

/// Abstract extractor collaborator.
#[async_trait]
pub trait Extractor: Send + Sync + 'static {
    /// Resolve one query into media metadata, without retries.
    async fn fetch(
        &self,
        query: &CanonicalQuery,
        kind: StreamKind,
    ) -> Result<ExtractedContent, ResolveError>;
}

/// HTTP extractor client.
pub struct HttpExtractor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExtractor {
    /// Build a client from upstream configuration.
    pub fn new(config: &UpstreamConfig) -> Result<Self, ResolveError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ResolveError::Internal(format!("http client init: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, kind: StreamKind) -> String {
        // The upstream API exposes one path per rendition.
        let path = match kind {
            StreamKind::Video => "ytmp4",
            StreamKind::Audio => "ytmp3",
        };
        format!("{}/{}", self.base_url, path)
    }
}

#[derive(Debug, Deserialize)]
struct UpstreamEnvelope {
    #[serde(default)]
    status: bool,
    result: Option<UpstreamResult>,
}

#[derive(Debug, Deserialize)]
struct UpstreamResult {
    title: Option<String>,
    duration: Option<String>,
    channel: Option<String>,
    views: Option<i64>,
    thumbnail: Option<String>,
    id: Option<String>,
    url: Option<String>,
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn fetch(
        &self,
        query: &CanonicalQuery,
        kind: StreamKind,
    ) -> Result<ExtractedContent, ResolveError> {
        let response = self
            .client
            .get(self.endpoint(kind))
            .query(&[("url", query.upstream_query())])
            .send()
            .await
            .map_err(|e| ResolveError::UpstreamUnavailable {
                message: e.to_string(),
                timed_out: e.is_timeout(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ResolveError::NotFound(query.to_string()));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ResolveError::UpstreamRateLimited);
        }
        if !status.is_success() {
            return Err(ResolveError::UpstreamUnavailable {
                message: format!("upstream returned {status}"),
                timed_out: false,
            });
        }

        let envelope: UpstreamEnvelope =
            response
                .json()
                .await
                .map_err(|e| ResolveError::UpstreamUnavailable {
                    message: format!("malformed upstream response: {e}"),
                    timed_out: false,
                })?;

        // A well-formed negative answer is a definitive miss, not an outage.
        let Some(result) = envelope.result.filter(|_| envelope.status) else {
            return Err(ResolveError::NotFound(query.to_string()));
        };
        let Some(media_url) = result.url.filter(|u| !u.is_empty()) else {
            return Err(ResolveError::UpstreamUnavailable {
                message: "upstream response missing media url".to_string(),
                timed_out: false,
            });
        };

        Ok(ExtractedContent {
            title: result.title.unwrap_or_else(|| "Unknown".to_string()),
            duration: result.duration.unwrap_or_else(|| "Unknown".to_string()),
            channel: result.channel.unwrap_or_else(|| "Unknown".to_string()),
            views: result.views,
            thumbnail: result.thumbnail,
            video_id: result.id,
            media_url,
        })
    }
}

/// Backoff before retry `attempt` (1-based): 250ms doubling, plus jitter.
pub fn retry_backoff(attempt: u32) -> Duration {
    let base = 250u64.saturating_mul(1 << attempt.min(4));
    let jitter = rand::rng().random_range(0..100);
    Duration::from_millis(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn extractor_for(server: &MockServer) -> HttpExtractor {
        HttpExtractor::new(&UpstreamConfig {
            base_url: server.base_url(),
            timeout_secs: 5,
            max_retries: 0,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn successful_extraction_parses_result() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/ytmp4")
                    .query_param("url", "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
                then.status(200).json_body(serde_json::json!({
                    "status": true,
                    "result": {
                        "title": "Test Video",
                        "duration": "3:32",
                        "channel": "Test Channel",
                        "url": "https://media.example/v.mp4"
                    }
                }));
            })
            .await;

        let query = CanonicalQuery::parse("dQw4w9WgXcQ").unwrap();
        let got = extractor_for(&server)
            .fetch(&query, StreamKind::Video)
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(got.title, "Test Video");
        assert_eq!(got.media_url, "https://media.example/v.mp4");
    }

    #[tokio::test]
    async fn negative_answer_is_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/ytmp3");
                then.status(200)
                    .json_body(serde_json::json!({ "status": false }));
            })
            .await;

        let query = CanonicalQuery::parse("dQw4w9WgXcQ").unwrap();
        let err = extractor_for(&server)
            .fetch(&query, StreamKind::Audio)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[tokio::test]
    async fn server_errors_map_to_unavailable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/ytmp4");
                then.status(503);
            })
            .await;

        let query = CanonicalQuery::parse("dQw4w9WgXcQ").unwrap();
        let err = extractor_for(&server)
            .fetch(&query, StreamKind::Video)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::UpstreamUnavailable { timed_out: false, .. }
        ));
    }

    #[tokio::test]
    async fn rate_limit_maps_to_rate_limited() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/ytmp4");
                then.status(429);
            })
            .await;

        let query = CanonicalQuery::parse("dQw4w9WgXcQ").unwrap();
        let err = extractor_for(&server)
            .fetch(&query, StreamKind::Video)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::UpstreamRateLimited));
    }
}
