//! Playback streaming endpoint.
//!
//! Streams media for a playback token without any API key: the token
//! itself was minted by an admitted resolution and is unguessable.
//! Bodies are proxied chunk by chunk; the full object is never held in
//! memory. Dropping the client connection drops the body stream, which
//! cancels the upstream transfer.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use time::OffsetDateTime;
use tubecache_core::{CanonicalQuery, PlaybackToken, StreamKind};
use tubecache_metadata::models::ContentRecordRow;
use tubecache_metadata::repos::{BlobRefRepo, ContentRepo};

use crate::error::{ApiError, ApiResult};
use crate::log;
use crate::state::AppState;

/// GET /stream/{token} - Stream media for a playback token.
pub async fn get_stream(
    State(state): State<AppState>,
    Path(token): Path<String>,
    parts: Parts,
) -> ApiResult<Response> {
    let ip = log::client_ip(&parts.headers, &parts.extensions);
    let result = open_stream(&state, &token).await;
    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    };
    log::emit(&state, "/stream", Some(token.clone()), ip, None, outcome);
    result
}

async fn open_stream(state: &AppState, raw_token: &str) -> ApiResult<Response> {
    // Malformed tokens get the same answer as unknown ones.
    let token = PlaybackToken::parse(raw_token).map_err(|_| ApiError::TokenNotFound)?;
    let record = state
        .metadata
        .get_record_by_token(&token.to_string())
        .await?
        .ok_or(ApiError::TokenNotFound)?;
    let kind = record.stream_kind();

    // Durable tier first: a stored blob never expires under us.
    if let Some(response) = try_blob_stream(state, &record, kind).await? {
        return Ok(response);
    }

    // Upstream proxy, re-resolving the source at most once if it has
    // gone stale or the media host rejects the stored URL.
    let now = OffsetDateTime::now_utc();
    let mut current = record;
    let mut refreshed = false;

    loop {
        let fresh_url = current
            .source_fresh(now)
            .then(|| current.upstream_url.clone())
            .flatten();

        let url = match fresh_url {
            Some(url) => url,
            None => {
                if refreshed {
                    return Err(ApiError::UpstreamUnavailable {
                        message: "media source expired and re-resolution yielded none".to_string(),
                        timed_out: false,
                    });
                }
                refreshed = true;
                current = refresh_record(state, &current, kind).await?;
                if let Some(response) = try_blob_stream(state, &current, kind).await? {
                    return Ok(response);
                }
                continue;
            }
        };

        match proxy_upstream(state, &url, kind).await {
            Ok(response) => return Ok(response),
            Err(err) if !refreshed => {
                tracing::warn!(
                    fingerprint = %current.fingerprint,
                    error = %err,
                    "stored media url rejected, re-resolving once"
                );
                refreshed = true;
                current = refresh_record(state, &current, kind).await?;
                if let Some(response) = try_blob_stream(state, &current, kind).await? {
                    return Ok(response);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// Re-resolve the record's canonical query and return the new record.
async fn refresh_record(
    state: &AppState,
    record: &ContentRecordRow,
    kind: StreamKind,
) -> ApiResult<ContentRecordRow> {
    let canonical = CanonicalQuery::from_canonical(&record.canonical_query)
        .map_err(|e| ApiError::Internal(format!("stored canonical query unreadable: {e}")))?;
    // Force the slow path: the stored record is the one that went stale.
    let mut stale = record.clone();
    stale.source_expires_at = OffsetDateTime::now_utc();
    state.metadata.upsert_record(&stale).await?;
    Ok(state.resolver.resolve_canonical(&canonical, kind).await?)
}

/// Stream from the blob tier if a live blob backs this record.
async fn try_blob_stream(
    state: &AppState,
    record: &ContentRecordRow,
    kind: StreamKind,
) -> ApiResult<Option<Response>> {
    let Some(blob) = state.metadata.get_blob_ref(&record.fingerprint).await? else {
        return Ok(None);
    };
    let meta = match state.storage.head(&blob.blob_key).await {
        Ok(meta) => meta,
        Err(tubecache_storage::StorageError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let stream = state.storage.get_stream(&blob.blob_key).await?;
    let body_stream = stream.map(|result| result.map_err(|e| std::io::Error::other(e.to_string())));

    let content_type = if blob.content_type.is_empty() {
        kind.content_type().to_string()
    } else {
        blob.content_type.clone()
    };

    Ok(Some(
        (
            StatusCode::OK,
            [
                (CONTENT_TYPE, content_type),
                (CONTENT_LENGTH, meta.size.to_string()),
            ],
            Body::from_stream(body_stream),
        )
            .into_response(),
    ))
}

/// Open the upstream media URL and proxy its body through.
async fn proxy_upstream(state: &AppState, url: &str, kind: StreamKind) -> ApiResult<Response> {
    let upstream = state
        .http
        .get(url)
        .send()
        .await
        .map_err(|e| ApiError::UpstreamUnavailable {
            message: e.to_string(),
            timed_out: e.is_timeout(),
        })?;

    let status = upstream.status();
    if !status.is_success() {
        return Err(ApiError::UpstreamUnavailable {
            message: format!("media host returned {status}"),
            timed_out: false,
        });
    }

    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(kind.content_type())
        .to_string();
    let content_length = upstream.content_length();

    let body_stream = upstream
        .bytes_stream()
        .map(|result| result.map_err(|e| std::io::Error::other(e.to_string())));

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type);
    if let Some(len) = content_length {
        response = response.header(CONTENT_LENGTH, len);
    }
    response
        .body(Body::from_stream(body_stream))
        .map_err(|e| ApiError::Internal(e.to_string()))
}
