//! Request logging.
//!
//! Every resolution and admin call appends one line to the request log.
//! The append happens off the request path; a logging failure must never
//! fail the request it describes.

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap};
use std::net::SocketAddr;
use time::OffsetDateTime;
use tubecache_core::key::mask_key;
use tubecache_metadata::models::NewRequestLog;
use tubecache_metadata::repos::LogRepo;

use crate::state::AppState;

/// Best-effort caller address: forwarded header first, then the socket.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
    {
        let forwarded = forwarded.trim();
        if !forwarded.is_empty() {
            return forwarded.to_string();
        }
    }
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Append one request log line in the background.
pub fn emit(
    state: &AppState,
    endpoint: &str,
    query: Option<String>,
    caller_ip: String,
    api_key: Option<&str>,
    outcome: &str,
) {
    let line = NewRequestLog {
        ts: OffsetDateTime::now_utc(),
        endpoint: endpoint.to_string(),
        query,
        caller_ip,
        api_key_prefix: api_key.map(mask_key),
        outcome: outcome.to_string(),
    };
    let metadata = state.metadata.clone();
    tokio::spawn(async move {
        if let Err(e) = metadata.append_log(&line).await {
            tracing::warn!(error = %e, "failed to append request log");
        }
    });
}
