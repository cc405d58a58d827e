//! Request log repository.

use crate::error::MetadataResult;
use crate::models::{NewRequestLog, RequestLogRow};
use async_trait::async_trait;

/// Repository for the append-only request log.
#[async_trait]
pub trait LogRepo: Send + Sync {
    /// Append one log line.
    async fn append_log(&self, line: &NewRequestLog) -> MetadataResult<()>;

    /// Most recent log lines, newest first.
    async fn recent_logs(&self, limit: u32) -> MetadataResult<Vec<RequestLogRow>>;

    /// Count log lines.
    async fn count_logs(&self) -> MetadataResult<u64>;
}
