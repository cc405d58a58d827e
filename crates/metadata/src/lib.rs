//! Fast-tier metadata store for tubecache.
//!
//! This crate provides the control-plane data model:
//! - API keys, roles, and per-key daily usage windows
//! - Resolved content records and playback tokens
//! - Blob references linking fingerprints to durable objects
//! - Append-only request logs

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use store::{MetadataStore, SqliteStore};

use std::sync::Arc;
use tubecache_core::config::MetadataConfig;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite { path } => {
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
