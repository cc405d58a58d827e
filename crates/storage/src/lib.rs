//! Durable blob storage abstraction and backends for tubecache.
//!
//! This crate provides:
//! - Blob storage keyed by content fingerprint
//! - Atomic writes (temp file + rename) and streaming uploads
//! - Backend: local filesystem

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use error::{StorageError, StorageResult};
pub use traits::{ByteStream, ObjectMeta, ObjectStore, StreamingUpload};

use std::sync::Arc;
use tubecache_core::config::StorageConfig;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
    }
}

/// Storage key for a fingerprint's blob.
///
/// Fans blobs out across 256 subdirectories so a busy cache does not pile
/// every object into one directory.
pub fn blob_key(fingerprint: &str) -> String {
    let shard = fingerprint.get(..2).unwrap_or("00");
    format!("blobs/{shard}/{fingerprint}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::tempdir;

    #[tokio::test]
    async fn from_config_filesystem_ok() {
        let temp = tempdir().unwrap();
        let config = StorageConfig::Filesystem {
            path: temp.path().join("store"),
        };

        let store = from_config(&config).await.unwrap();
        store
            .put("hello.txt", Bytes::from_static(b"hi"))
            .await
            .unwrap();
        assert!(store.exists("hello.txt").await.unwrap());
    }

    #[test]
    fn blob_keys_shard_by_prefix() {
        let key = blob_key("ab12cd");
        assert_eq!(key, "blobs/ab/ab12cd");
    }
}
