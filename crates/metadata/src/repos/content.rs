//! Content record repository.

use crate::error::MetadataResult;
use crate::models::ContentRecordRow;
use async_trait::async_trait;

/// Repository for resolved content records.
#[async_trait]
pub trait ContentRepo: Send + Sync {
    /// Insert or replace the record for a fingerprint.
    async fn upsert_record(&self, record: &ContentRecordRow) -> MetadataResult<()>;

    /// Get the record for a fingerprint.
    async fn get_record(&self, fingerprint: &str) -> MetadataResult<Option<ContentRecordRow>>;

    /// Get the record owning a playback token.
    async fn get_record_by_token(&self, token: &str) -> MetadataResult<Option<ContentRecordRow>>;

    /// Delete the record for a fingerprint. Returns whether a row was removed.
    async fn delete_record(&self, fingerprint: &str) -> MetadataResult<bool>;

    /// Count records.
    async fn count_records(&self) -> MetadataResult<u64>;
}
