//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tubecache_core::key::AdmitDenial;

use crate::resolver::ResolveError;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Daily limit, present on quota errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_limit: Option<i64>,
    /// Seconds until the quota window resets, present on quota errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resets_in_secs: Option<i64>,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("api key required")]
    MissingKey,

    #[error("conflicting api keys in request")]
    ConflictingKeys,

    #[error("invalid api key")]
    KeyNotFound,

    #[error("api key expired at {expired_at}")]
    KeyExpired { expired_at: time::OffsetDateTime },

    #[error("daily quota of {limit} requests exhausted")]
    QuotaExceeded { limit: i64, resets_in_secs: i64 },

    #[error("admin role required")]
    InsufficientRole,

    #[error("no such api key")]
    UnknownKey,

    #[error("bootstrap and admin keys cannot be deleted")]
    AdminKeyProtected,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unknown playback token")]
    TokenNotFound,

    #[error("upstream extractor unavailable: {message}")]
    UpstreamUnavailable { message: String, timed_out: bool },

    #[error("upstream extractor rate limited")]
    UpstreamRateLimited,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] tubecache_storage::StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] tubecache_metadata::MetadataError),

    #[error("core error: {0}")]
    Core(#[from] tubecache_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingKey => "api_key_required",
            Self::ConflictingKeys => "conflicting_api_keys",
            Self::KeyNotFound => "invalid_api_key",
            Self::KeyExpired { .. } => "api_key_expired",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::InsufficientRole => "insufficient_role",
            Self::UnknownKey => "key_not_found",
            Self::AdminKeyProtected => "admin_key_protected",
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::TokenNotFound => "token_not_found",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::UpstreamRateLimited => "upstream_rate_limited",
            Self::Internal(_) => "internal_error",
            Self::Storage(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
            Self::Core(_) => "core_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingKey => StatusCode::UNAUTHORIZED,
            Self::ConflictingKeys => StatusCode::BAD_REQUEST,
            Self::KeyNotFound => StatusCode::UNAUTHORIZED,
            Self::KeyExpired { .. } => StatusCode::UNAUTHORIZED,
            Self::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::InsufficientRole => StatusCode::FORBIDDEN,
            Self::UnknownKey => StatusCode::NOT_FOUND,
            Self::AdminKeyProtected => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::TokenNotFound => StatusCode::NOT_FOUND,
            Self::UpstreamUnavailable { timed_out, .. } => {
                if *timed_out {
                    StatusCode::GATEWAY_TIMEOUT
                } else {
                    StatusCode::BAD_GATEWAY
                }
            }
            Self::UpstreamRateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                tubecache_storage::StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Metadata(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<AdmitDenial> for ApiError {
    fn from(denial: AdmitDenial) -> Self {
        match denial {
            AdmitDenial::KeyNotFound => Self::KeyNotFound,
            AdmitDenial::KeyExpired { expired_at } => Self::KeyExpired { expired_at },
            AdmitDenial::QuotaExceeded {
                limit,
                resets_in_secs,
            } => Self::QuotaExceeded {
                limit,
                resets_in_secs,
            },
            AdmitDenial::InsufficientRole => Self::InsufficientRole,
        }
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(q) => Self::NotFound(q),
            ResolveError::InvalidQuery(msg) => Self::BadRequest(msg),
            ResolveError::UpstreamUnavailable { message, timed_out } => {
                Self::UpstreamUnavailable { message, timed_out }
            }
            ResolveError::UpstreamRateLimited => Self::UpstreamRateLimited,
            ResolveError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (daily_limit, resets_in_secs) = match &self {
            Self::QuotaExceeded {
                limit,
                resets_in_secs,
            } => (Some(*limit), Some(*resets_in_secs)),
            _ => (None, None),
        };
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
            daily_limit,
            resets_in_secs,
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
