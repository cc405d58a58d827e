//! Route configuration.

use crate::handlers;
use crate::state::AppState;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Content resolution (standard key required)
        .route("/content", get(handlers::get_content))
        // Playback streaming (keyless; the token is the capability)
        .route("/stream/{token}", get(handlers::get_stream))
        // Health check (intentionally unauthenticated for probes)
        .route("/v1/health", get(handlers::health_check))
        // Admin endpoints (all require an admin-role key)
        .route(
            "/v1/admin/keys",
            post(handlers::create_key).get(handlers::list_keys),
        )
        .route("/v1/admin/keys/{api_key}", delete(handlers::delete_key))
        .route("/v1/admin/stats", get(handlers::get_stats))
        .route("/v1/admin/maintenance", post(handlers::run_maintenance))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
