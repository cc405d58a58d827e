//! API key repository.

use crate::error::MetadataResult;
use crate::models::ApiKeyRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use tubecache_core::key::AdmitDenial;
use tubecache_core::KeyRole;

/// Outcome of a single admission attempt.
#[derive(Debug, Clone)]
pub enum AdmitOutcome {
    /// Key admitted; the row reflects the post-admission counters.
    Admitted(ApiKeyRow),
    /// Key denied; no counter moved.
    Denied(AdmitDenial),
}

/// Repository for API key operations.
#[async_trait]
pub trait KeyRepo: Send + Sync {
    /// Create a key. Fails if the material already exists.
    async fn create_key(&self, key: &ApiKeyRow) -> MetadataResult<()>;

    /// Get a key by its material.
    async fn get_key(&self, api_key: &str) -> MetadataResult<Option<ApiKeyRow>>;

    /// Admit one request against a key, atomically.
    ///
    /// In a single transaction: look up the key, check expiry, roll the
    /// usage window over if the UTC date changed, check the role, check
    /// the quota, and on success bump both counters. Denial paths write
    /// nothing.
    async fn admit_key(
        &self,
        api_key: &str,
        required_role: KeyRole,
        now: OffsetDateTime,
    ) -> MetadataResult<AdmitOutcome>;

    /// Delete a key by its material. Returns whether a row was removed.
    async fn delete_key(&self, api_key: &str) -> MetadataResult<bool>;

    /// List all keys, newest first.
    async fn list_keys(&self) -> MetadataResult<Vec<ApiKeyRow>>;

    /// Count keys.
    async fn count_keys(&self) -> MetadataResult<u64>;

    /// Count keys whose expiry has passed at `now`.
    async fn count_expired_keys(&self, now: OffsetDateTime) -> MetadataResult<u64>;

    /// Reset usage windows whose UTC date is older than `now`'s.
    /// Returns the number of rows reset.
    async fn reset_stale_windows(&self, now: OffsetDateTime) -> MetadataResult<u64>;

    /// Get the current bootstrap key row, if one exists.
    async fn get_bootstrap_key(&self) -> MetadataResult<Option<ApiKeyRow>>;

    /// Promote an existing row to bootstrap status.
    async fn mark_bootstrap(&self, api_key: &str) -> MetadataResult<()>;
}
