//! Application state shared across handlers.

use std::sync::Arc;
use time::OffsetDateTime;
use tubecache_core::config::AppConfig;
use tubecache_metadata::MetadataStore;
use tubecache_storage::ObjectStore;

use crate::resolver::Resolver;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Blob storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Cache resolver.
    pub resolver: Arc<Resolver>,
    /// Client for proxying media bodies. No total timeout: streams run
    /// as long as the media does.
    pub http: reqwest::Client,
    /// Process start time, reported by the health endpoint.
    pub started_at: OffsetDateTime,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        resolver: Arc<Resolver>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            storage,
            metadata,
            resolver,
            http: reqwest::Client::new(),
            started_at: OffsetDateTime::now_utc(),
        }
    }
}
