//! API key extraction and admission.
//!
//! Keys may arrive in a query parameter, a header, or (for admin calls)
//! the request body. Presenting the same key in more than one place is
//! fine; presenting two different keys is rejected outright rather than
//! guessing which one the caller meant.

use axum::http::HeaderMap;
use time::OffsetDateTime;
use tubecache_core::key::mask_key;
use tubecache_core::KeyRole;
use tubecache_metadata::models::ApiKeyRow;
use tubecache_metadata::repos::{AdmitOutcome, KeyRepo};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Header carrying a standard API key.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Header carrying an admin key.
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Collapse the key candidates from every accepted location into one.
pub fn gather_key(candidates: &[Option<&str>]) -> ApiResult<String> {
    let mut found: Option<&str> = None;
    for candidate in candidates.iter().flatten() {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            continue;
        }
        match found {
            None => found = Some(candidate),
            Some(existing) if existing == candidate => {}
            Some(_) => return Err(ApiError::ConflictingKeys),
        }
    }
    found.map(str::to_string).ok_or(ApiError::MissingKey)
}

/// Read a header value as a string, if present and valid.
pub fn header_value<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Admit one request for `key` at the required role.
pub async fn admit(state: &AppState, key: &str, required_role: KeyRole) -> ApiResult<ApiKeyRow> {
    let now = OffsetDateTime::now_utc();
    match state.metadata.admit_key(key, required_role, now).await? {
        AdmitOutcome::Admitted(row) => Ok(row),
        AdmitOutcome::Denied(denial) => {
            tracing::debug!(
                key = %mask_key(key),
                denial = ?denial,
                "admission denied"
            );
            Err(denial.into())
        }
    }
}
