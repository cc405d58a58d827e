//! Health endpoint, unauthenticated for load balancers and probes.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use time::OffsetDateTime;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: i64,
    pub metadata: &'static str,
    pub storage: &'static str,
}

/// GET /v1/health - Liveness plus backend connectivity.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let metadata = match state.metadata.health_check().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "metadata health check failed");
            "unavailable"
        }
    };
    let storage = match state.storage.health_check().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "storage health check failed");
            "unavailable"
        }
    };
    let status = if metadata == "ok" && storage == "ok" {
        "ok"
    } else {
        "degraded"
    };

    let uptime_secs = (OffsetDateTime::now_utc() - state.started_at).whole_seconds();
    Ok(Json(HealthResponse {
        status,
        uptime_secs,
        metadata,
        storage,
    }))
}
