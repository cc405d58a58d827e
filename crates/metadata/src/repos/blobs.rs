//! Blob reference repository.

use crate::error::MetadataResult;
use crate::models::BlobRefRow;
use async_trait::async_trait;

/// Repository for durable blob references.
///
/// References are append-only from the service's point of view; a second
/// write-through for the same fingerprint is a no-op.
#[async_trait]
pub trait BlobRefRepo: Send + Sync {
    /// Record a blob reference. Keeps the existing row if one is present.
    async fn insert_blob_ref(&self, blob: &BlobRefRow) -> MetadataResult<()>;

    /// Get the blob reference for a fingerprint.
    async fn get_blob_ref(&self, fingerprint: &str) -> MetadataResult<Option<BlobRefRow>>;

    /// Count blob references.
    async fn count_blob_refs(&self) -> MetadataResult<u64>;

    /// Sum of stored blob sizes in bytes.
    async fn total_blob_bytes(&self) -> MetadataResult<u64>;
}
