//! Content resolution endpoint.

use axum::extract::{Query, State};
use axum::http::request::Parts;
use axum::Json;
use serde::{Deserialize, Serialize};
use tubecache_core::StreamKind;
use tubecache_metadata::models::ContentRecordRow;

use crate::auth::{self, API_KEY_HEADER};
use crate::error::{ApiError, ApiResult};
use crate::log;
use crate::state::AppState;

/// Query parameters for content resolution.
#[derive(Debug, Deserialize)]
pub struct ContentParams {
    pub query: Option<String>,
    /// True requests the video rendition; the default is audio.
    #[serde(default)]
    pub video: bool,
    pub api_key: Option<String>,
}

/// Resolved content answer.
#[derive(Debug, Serialize)]
pub struct ContentResponse {
    pub id: Option<String>,
    pub title: String,
    pub duration: String,
    pub link: String,
    pub channel: String,
    pub views: Option<i64>,
    pub thumbnail: Option<String>,
    /// Relative playback route; keyless by design.
    pub stream_url: String,
    pub stream_type: String,
}

impl ContentResponse {
    pub fn from_record(record: &ContentRecordRow) -> Self {
        Self {
            id: record.video_id.clone(),
            title: record.title.clone(),
            duration: record.duration.clone(),
            link: record.source_link.clone(),
            channel: record.channel.clone(),
            views: record.views,
            thumbnail: record.thumbnail.clone(),
            stream_url: format!("/stream/{}", record.playback_token),
            stream_type: record.stream_kind().label().to_string(),
        }
    }
}

/// GET /content - Resolve a query into playable content.
pub async fn get_content(
    State(state): State<AppState>,
    Query(params): Query<ContentParams>,
    parts: Parts,
) -> ApiResult<Json<ContentResponse>> {
    let ip = log::client_ip(&parts.headers, &parts.extensions);
    let presented = params
        .api_key
        .clone()
        .or_else(|| auth::header_value(&parts.headers, API_KEY_HEADER).map(str::to_string));

    let result = resolve_content(&state, &params, &parts).await;
    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    };
    log::emit(
        &state,
        "/content",
        params.query.clone(),
        ip,
        presented.as_deref(),
        outcome,
    );
    result
}

async fn resolve_content(
    state: &AppState,
    params: &ContentParams,
    parts: &Parts,
) -> ApiResult<Json<ContentResponse>> {
    let key = auth::gather_key(&[
        params.api_key.as_deref(),
        auth::header_value(&parts.headers, API_KEY_HEADER),
    ])?;
    auth::admit(state, &key, tubecache_core::KeyRole::Standard).await?;

    let query = params
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::BadRequest("query parameter required".to_string()))?;

    let kind = if params.video {
        StreamKind::Video
    } else {
        StreamKind::Audio
    };

    let record = state.resolver.resolve(query, kind).await?;
    Ok(Json(ContentResponse::from_record(&record)))
}
