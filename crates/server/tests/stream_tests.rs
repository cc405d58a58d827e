//! Integration tests for the playback streaming endpoint.

mod common;

use axum::http::StatusCode;
use common::{TestServer, extraction_envelope, json_request, raw_request};
use httpmock::prelude::*;
use std::time::Duration;
use time::OffsetDateTime;
use tubecache_core::{CanonicalQuery, StreamKind};
use tubecache_metadata::repos::{BlobRefRepo, ContentRepo};

const VIDEO_ID: &str = "dQw4w9WgXcQ";
const MEDIA_BYTES: &[u8] = b"not really an mp3 but plenty for a proxy test";

fn audio_fingerprint() -> String {
    CanonicalQuery::parse(VIDEO_ID)
        .unwrap()
        .fingerprint(StreamKind::Audio)
        .to_string()
}

/// Mock the extraction endpoint and the media host it points at,
/// then resolve the content and return the stream URL.
async fn resolve_stream_url(server: &TestServer, media_path: &str, media: &[u8]) -> String {
    let media_url = format!("{}{media_path}", server.upstream.base_url());
    server
        .upstream
        .mock_async(|when, then| {
            when.method(GET).path("/ytmp3");
            then.status(200)
                .json_body(extraction_envelope(VIDEO_ID, "Test Video", &media_url));
        })
        .await;
    let media_body = media.to_vec();
    server
        .upstream
        .mock_async(move |when, then| {
            when.method(GET).path(media_path);
            then.status(200)
                .header("content-type", "audio/mpeg")
                .body(media_body.clone());
        })
        .await;

    server.insert_key("stream-key", "standard", 100).await;
    let (status, body) = json_request(
        &server.router,
        "GET",
        &format!("/content?query={VIDEO_ID}&api_key=stream-key"),
        None,
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body.get("stream_url")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn unknown_token_is_404() {
    let server = TestServer::new().await;

    let (status, body) = json_request(
        &server.router,
        "GET",
        &format!("/stream/{}", uuid::Uuid::new_v4()),
        None,
        &[],
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body.get("code").and_then(|v| v.as_str()),
        Some("token_not_found")
    );
}

#[tokio::test]
async fn malformed_token_is_404() {
    let server = TestServer::new().await;

    let (status, body) = json_request(
        &server.router,
        "GET",
        "/stream/not-a-token",
        None,
        &[],
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body.get("code").and_then(|v| v.as_str()),
        Some("token_not_found")
    );
}

#[tokio::test]
async fn stream_proxies_upstream_media_without_api_key() {
    let server = TestServer::new().await;
    let stream_url = resolve_stream_url(&server, "/media/a.mp3", MEDIA_BYTES).await;

    let response = raw_request(&server.router, "GET", &stream_url, None, &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("audio/mpeg")
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(body.as_ref(), MEDIA_BYTES);
}

#[tokio::test]
async fn stream_prefers_blob_tier_once_written_through() {
    let server = TestServer::with_config(|c| c.cache.blob_writethrough = true).await;
    let stream_url = resolve_stream_url(&server, "/media/b.mp3", MEDIA_BYTES).await;

    // The write-through copy runs in the background; wait for it to land.
    let fingerprint = audio_fingerprint();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if server
            .metadata()
            .get_blob_ref(&fingerprint)
            .await
            .unwrap()
            .is_some()
        {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("blob write-through did not complete in time");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Take the media host away entirely; the blob tier must carry it.
    server.upstream.reset_async().await;

    let response = raw_request(&server.router, "GET", &stream_url, None, &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok()),
        Some(MEDIA_BYTES.len().to_string().as_str())
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(body.as_ref(), MEDIA_BYTES);
}

#[tokio::test]
async fn expired_source_re_resolves_once() {
    let server = TestServer::new().await;
    let stream_url = resolve_stream_url(&server, "/media/old.mp3", MEDIA_BYTES).await;

    // Expire the stored source.
    let fingerprint = audio_fingerprint();
    let mut record = server
        .metadata()
        .get_record(&fingerprint)
        .await
        .unwrap()
        .unwrap();
    record.source_expires_at = OffsetDateTime::now_utc() - time::Duration::hours(1);
    server.metadata().upsert_record(&record).await.unwrap();

    // The extractor now hands out a different media URL.
    server.upstream.reset_async().await;
    let new_media = b"fresh media bytes after re-resolution".to_vec();
    let new_url = format!("{}/media/new.mp3", server.upstream.base_url());
    let refetch = server
        .upstream
        .mock_async(|when, then| {
            when.method(GET).path("/ytmp3");
            then.status(200)
                .json_body(extraction_envelope(VIDEO_ID, "Test Video", &new_url));
        })
        .await;
    let media_body = new_media.clone();
    server
        .upstream
        .mock_async(move |when, then| {
            when.method(GET).path("/media/new.mp3");
            then.status(200)
                .header("content-type", "audio/mpeg")
                .body(media_body.clone());
        })
        .await;

    let response = raw_request(&server.router, "GET", &stream_url, None, &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    refetch.assert_async().await;
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(body.as_ref(), new_media.as_slice());
}

#[tokio::test]
async fn rejected_media_url_triggers_one_re_resolution() {
    let server = TestServer::new().await;

    // First resolution points at a media URL the host refuses to serve.
    let dead_url = format!("{}/media/dead.mp3", server.upstream.base_url());
    let first = server
        .upstream
        .mock_async(|when, then| {
            when.method(GET).path("/ytmp3");
            then.status(200)
                .json_body(extraction_envelope(VIDEO_ID, "Test Video", &dead_url));
        })
        .await;
    server
        .upstream
        .mock_async(|when, then| {
            when.method(GET).path("/media/dead.mp3");
            then.status(403);
        })
        .await;

    server.insert_key("dead-key", "standard", 100).await;
    let (status, body) = json_request(
        &server.router,
        "GET",
        &format!("/content?query={VIDEO_ID}&api_key=dead-key"),
        None,
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let stream_url = body
        .get("stream_url")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();
    first.delete_async().await;

    // Re-resolution hands out a working URL.
    let live_url = format!("{}/media/live.mp3", server.upstream.base_url());
    server
        .upstream
        .mock_async(|when, then| {
            when.method(GET).path("/ytmp3");
            then.status(200)
                .json_body(extraction_envelope(VIDEO_ID, "Test Video", &live_url));
        })
        .await;
    server
        .upstream
        .mock_async(|when, then| {
            when.method(GET).path("/media/live.mp3");
            then.status(200)
                .header("content-type", "audio/mpeg")
                .body(MEDIA_BYTES.to_vec());
        })
        .await;

    let response = raw_request(&server.router, "GET", &stream_url, None, &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(body.as_ref(), MEDIA_BYTES);
}

#[tokio::test]
async fn blob_survives_source_expiry() {
    let server = TestServer::with_config(|c| c.cache.blob_writethrough = true).await;
    let stream_url = resolve_stream_url(&server, "/media/c.mp3", MEDIA_BYTES).await;

    let fingerprint = audio_fingerprint();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if server
            .metadata()
            .get_blob_ref(&fingerprint)
            .await
            .unwrap()
            .is_some()
        {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("blob write-through did not complete in time");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Expire the source and drop the upstream; the blob still serves.
    let mut record = server
        .metadata()
        .get_record(&fingerprint)
        .await
        .unwrap()
        .unwrap();
    record.source_expires_at = OffsetDateTime::now_utc() - time::Duration::hours(1);
    server.metadata().upsert_record(&record).await.unwrap();
    server.upstream.reset_async().await;

    let response = raw_request(&server.router, "GET", &stream_url, None, &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(body.as_ref(), MEDIA_BYTES);
}
