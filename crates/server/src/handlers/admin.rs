//! Administrative endpoints: key lifecycle, stats, maintenance.
//!
//! Every handler here requires an admin-role key, accepted from the
//! `admin_key` query parameter, the `X-Admin-Key` header, or (on POST
//! bodies) an `admin_key` field. Created key material is returned
//! exactly once; listings only ever show a masked prefix.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tubecache_core::key::{
    days_until_expiry, generate_key_material, mask_key, KeyRole, KeyStatus,
};
use tubecache_metadata::models::{ApiKeyRow, RequestLogRow};
use tubecache_metadata::repos::{BlobRefRepo, ContentRepo, KeyRepo, LogRepo};

use crate::auth::{self, ADMIN_KEY_HEADER};
use crate::error::{ApiError, ApiResult};
use crate::log;
use crate::state::AppState;

const DEFAULT_DAILY_LIMIT: i64 = 100;

/// Query parameters accepted by every admin endpoint.
#[derive(Debug, Deserialize)]
pub struct AdminParams {
    pub admin_key: Option<String>,
}

/// Admit the caller as admin from query, header, or body.
async fn admit_admin(
    state: &AppState,
    params: &AdminParams,
    parts: &Parts,
    body_key: Option<&str>,
) -> ApiResult<ApiKeyRow> {
    let key = auth::gather_key(&[
        params.admin_key.as_deref(),
        auth::header_value(&parts.headers, ADMIN_KEY_HEADER),
        body_key,
    ])?;
    auth::admit(state, &key, KeyRole::Admin).await
}

/// First credential the caller presented, for the request log. Unlike
/// `admit_admin` this never fails; denied requests still get logged
/// against whatever key was offered.
fn presented_key(params: &AdminParams, parts: &Parts, body_key: Option<&str>) -> Option<String> {
    params
        .admin_key
        .clone()
        .or_else(|| auth::header_value(&parts.headers, ADMIN_KEY_HEADER).map(str::to_string))
        .or_else(|| body_key.map(str::to_string))
}

// =============================================================================
// Key creation
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub owner: String,
    pub daily_limit: Option<i64>,
    /// Days until expiry; absent means the key never expires.
    pub expiry_days: Option<i64>,
    pub admin_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateKeyResponse {
    /// Plaintext key material, shown only in this response.
    pub api_key: String,
    pub owner: String,
    pub role: String,
    pub daily_limit: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

/// POST /v1/admin/keys - Mint a standard key.
pub async fn create_key(
    State(state): State<AppState>,
    Query(params): Query<AdminParams>,
    parts: Parts,
    Json(request): Json<CreateKeyRequest>,
) -> ApiResult<(StatusCode, Json<CreateKeyResponse>)> {
    let ip = log::client_ip(&parts.headers, &parts.extensions);
    let presented = presented_key(&params, &parts, request.admin_key.as_deref());

    let result = mint_key(&state, &params, &parts, &request).await;
    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    };
    log::emit(
        &state,
        "/v1/admin/keys",
        Some(format!("create owner={}", request.owner.trim())),
        ip,
        presented.as_deref(),
        outcome,
    );
    result
}

async fn mint_key(
    state: &AppState,
    params: &AdminParams,
    parts: &Parts,
    request: &CreateKeyRequest,
) -> ApiResult<(StatusCode, Json<CreateKeyResponse>)> {
    let admin = admit_admin(state, params, parts, request.admin_key.as_deref()).await?;

    let owner = request.owner.trim();
    if owner.is_empty() {
        return Err(ApiError::BadRequest("owner must not be empty".to_string()));
    }
    let daily_limit = request.daily_limit.unwrap_or(DEFAULT_DAILY_LIMIT);
    if daily_limit <= 0 {
        return Err(ApiError::BadRequest(
            "daily_limit must be positive".to_string(),
        ));
    }
    if let Some(days) = request.expiry_days
        && !(1..=3650).contains(&days)
    {
        return Err(ApiError::BadRequest(
            "expiry_days must be between 1 and 3650".to_string(),
        ));
    }

    let now = OffsetDateTime::now_utc();
    let expires_at = request.expiry_days.map(|days| now + Duration::days(days));
    let key = ApiKeyRow {
        api_key: generate_key_material(),
        owner: owner.to_string(),
        role: KeyRole::Standard.as_str().to_string(),
        daily_limit,
        usage_count: 0,
        window_start: now,
        total_requests: 0,
        created_at: now,
        expires_at,
        created_by: Some(mask_key(&admin.api_key)),
        is_bootstrap: false,
    };
    state.metadata.create_key(&key).await?;
    tracing::info!(key = %mask_key(&key.api_key), owner, "api key created");

    Ok((
        StatusCode::CREATED,
        Json(CreateKeyResponse {
            api_key: key.api_key,
            owner: key.owner,
            role: key.role,
            daily_limit: key.daily_limit,
            expires_at: key.expires_at,
        }),
    ))
}

// =============================================================================
// Key listing
// =============================================================================

#[derive(Debug, Serialize)]
pub struct KeySummary {
    /// Masked key prefix; full material is never listed.
    pub key: String,
    pub owner: String,
    pub role: String,
    pub daily_limit: i64,
    pub usage_count: i64,
    pub total_requests: i64,
    pub status: KeyStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    pub remaining_days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListKeysResponse {
    pub keys: Vec<KeySummary>,
}

/// GET /v1/admin/keys - List keys, masked.
pub async fn list_keys(
    State(state): State<AppState>,
    Query(params): Query<AdminParams>,
    parts: Parts,
) -> ApiResult<Json<ListKeysResponse>> {
    let ip = log::client_ip(&parts.headers, &parts.extensions);
    let presented = presented_key(&params, &parts, None);

    let result = summarize_keys(&state, &params, &parts).await;
    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    };
    log::emit(
        &state,
        "/v1/admin/keys",
        Some("list".to_string()),
        ip,
        presented.as_deref(),
        outcome,
    );
    result
}

async fn summarize_keys(
    state: &AppState,
    params: &AdminParams,
    parts: &Parts,
) -> ApiResult<Json<ListKeysResponse>> {
    admit_admin(state, params, parts, None).await?;

    let now = OffsetDateTime::now_utc();
    let keys = state
        .metadata
        .list_keys()
        .await?
        .into_iter()
        .map(|row| KeySummary {
            key: mask_key(&row.api_key),
            owner: row.owner.clone(),
            role: row.role.clone(),
            daily_limit: row.daily_limit,
            usage_count: row.usage_count,
            total_requests: row.total_requests,
            status: row.status(now),
            expires_at: row.expires_at,
            remaining_days: days_until_expiry(row.expires_at, now),
        })
        .collect();

    Ok(Json(ListKeysResponse { keys }))
}

// =============================================================================
// Key deletion
// =============================================================================

#[derive(Debug, Serialize)]
pub struct DeleteKeyResponse {
    pub deleted: String,
}

/// DELETE /v1/admin/keys/{api_key} - Delete a standard key.
///
/// Deletion takes the full key material, not the masked prefix. Admin
/// and bootstrap rows are refused no matter who asks.
pub async fn delete_key(
    State(state): State<AppState>,
    Path(api_key): Path<String>,
    Query(params): Query<AdminParams>,
    parts: Parts,
) -> ApiResult<Json<DeleteKeyResponse>> {
    let ip = log::client_ip(&parts.headers, &parts.extensions);
    let presented = presented_key(&params, &parts, None);

    let result = remove_key(&state, &api_key, &params, &parts).await;
    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    };
    log::emit(
        &state,
        "/v1/admin/keys",
        Some(format!("delete {}", mask_key(&api_key))),
        ip,
        presented.as_deref(),
        outcome,
    );
    result
}

async fn remove_key(
    state: &AppState,
    api_key: &str,
    params: &AdminParams,
    parts: &Parts,
) -> ApiResult<Json<DeleteKeyResponse>> {
    admit_admin(state, params, parts, None).await?;

    let target = state
        .metadata
        .get_key(api_key)
        .await?
        .ok_or(ApiError::UnknownKey)?;
    if target.role() == KeyRole::Admin || target.is_bootstrap {
        return Err(ApiError::AdminKeyProtected);
    }

    state.metadata.delete_key(api_key).await?;
    tracing::info!(key = %mask_key(api_key), "api key deleted");

    Ok(Json(DeleteKeyResponse {
        deleted: mask_key(api_key),
    }))
}

// =============================================================================
// Stats
// =============================================================================

#[derive(Debug, Serialize)]
pub struct LogLine {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub endpoint: String,
    pub query: Option<String>,
    pub caller_ip: String,
    pub api_key_prefix: Option<String>,
    pub outcome: String,
}

impl From<RequestLogRow> for LogLine {
    fn from(row: RequestLogRow) -> Self {
        Self {
            ts: row.ts,
            endpoint: row.endpoint,
            query: row.query,
            caller_ip: row.caller_ip,
            api_key_prefix: row.api_key_prefix,
            outcome: row.outcome,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_keys: u64,
    pub expired_keys: u64,
    pub content_records: u64,
    pub blob_refs: u64,
    pub blob_bytes: u64,
    pub total_requests_logged: u64,
    pub inflight_resolutions: usize,
    pub recent_logs: Vec<LogLine>,
}

/// GET /v1/admin/stats - Service counters and recent activity.
pub async fn get_stats(
    State(state): State<AppState>,
    Query(params): Query<AdminParams>,
    parts: Parts,
) -> ApiResult<Json<StatsResponse>> {
    let ip = log::client_ip(&parts.headers, &parts.extensions);
    let presented = presented_key(&params, &parts, None);

    let result = collect_stats(&state, &params, &parts).await;
    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    };
    log::emit(
        &state,
        "/v1/admin/stats",
        None,
        ip,
        presented.as_deref(),
        outcome,
    );
    result
}

async fn collect_stats(
    state: &AppState,
    params: &AdminParams,
    parts: &Parts,
) -> ApiResult<Json<StatsResponse>> {
    admit_admin(state, params, parts, None).await?;

    let now = OffsetDateTime::now_utc();
    let recent = state
        .metadata
        .recent_logs(state.config.server.recent_logs_limit)
        .await?;

    Ok(Json(StatsResponse {
        total_keys: state.metadata.count_keys().await?,
        expired_keys: state.metadata.count_expired_keys(now).await?,
        content_records: state.metadata.count_records().await?,
        blob_refs: state.metadata.count_blob_refs().await?,
        blob_bytes: state.metadata.total_blob_bytes().await?,
        total_requests_logged: state.metadata.count_logs().await?,
        inflight_resolutions: state.resolver.inflight_count().await,
        recent_logs: recent.into_iter().map(LogLine::from).collect(),
    }))
}

// =============================================================================
// Maintenance
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct MaintenanceRequest {
    pub admin_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MaintenanceResponse {
    /// Usage windows reset because their UTC day had passed.
    pub windows_reset: u64,
    /// Keys past expiry at the time of the run.
    pub expired_keys: u64,
}

/// POST /v1/admin/maintenance - Roll over stale usage windows.
///
/// Admissions already roll windows lazily; this exists so operators can
/// force the sweep and read the result.
pub async fn run_maintenance(
    State(state): State<AppState>,
    Query(params): Query<AdminParams>,
    parts: Parts,
    body: Bytes,
) -> ApiResult<Json<MaintenanceResponse>> {
    let ip = log::client_ip(&parts.headers, &parts.extensions);

    // The body is optional; an empty POST is a plain sweep request.
    let parsed: ApiResult<MaintenanceRequest> = if body.is_empty() {
        Ok(MaintenanceRequest::default())
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("malformed body: {e}")))
    };
    let (presented, result) = match parsed {
        Ok(request) => (
            presented_key(&params, &parts, request.admin_key.as_deref()),
            sweep(&state, &params, &parts, &request).await,
        ),
        Err(e) => (presented_key(&params, &parts, None), Err(e)),
    };
    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    };
    log::emit(
        &state,
        "/v1/admin/maintenance",
        None,
        ip,
        presented.as_deref(),
        outcome,
    );
    result
}

async fn sweep(
    state: &AppState,
    params: &AdminParams,
    parts: &Parts,
    request: &MaintenanceRequest,
) -> ApiResult<Json<MaintenanceResponse>> {
    admit_admin(state, params, parts, request.admin_key.as_deref()).await?;

    let now = OffsetDateTime::now_utc();
    let windows_reset = state.metadata.reset_stale_windows(now).await?;
    let expired_keys = state.metadata.count_expired_keys(now).await?;
    tracing::info!(windows_reset, expired_keys, "maintenance sweep finished");

    Ok(Json(MaintenanceResponse {
        windows_reset,
        expired_keys,
    }))
}
