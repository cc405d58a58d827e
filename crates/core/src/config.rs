//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Number of recent request log lines surfaced by the stats endpoint.
    #[serde(default = "default_recent_logs_limit")]
    pub recent_logs_limit: u32,
}

/// Storage backend configuration for the blob tier.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/blobs"),
        }
    }
}

/// Metadata store configuration for the fast tier.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database file.
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
        }
    }
}

/// Upstream extractor configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the extractor API (e.g., "https://extractor.example.com").
    pub base_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
    /// Retry attempts after the first failed extraction call.
    /// Only unavailability is retried; definitive answers never are.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9000".to_string(),
            timeout_secs: default_upstream_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

/// Bootstrap admin key configuration.
///
/// The bootstrap key is required for server operation. It provides initial
/// access to mint further keys. If the configured material changes between
/// restarts, the previous bootstrap key is revoked and a new row is created.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Plaintext bootstrap key material (minimum 8 characters).
    pub bootstrap_key: String,
    /// Owner label recorded on the bootstrap key row.
    #[serde(default = "default_admin_owner")]
    pub owner: String,
}

impl AdminConfig {
    /// Create a test configuration with a dummy bootstrap key.
    ///
    /// **For testing only.**
    pub fn for_testing() -> Self {
        Self {
            bootstrap_key: "test-bootstrap-admin-key".to_string(),
            owner: "Admin".to_string(),
        }
    }

    /// Validate admin configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.bootstrap_key.trim().len() < 8 {
            return Err("admin bootstrap_key must be at least 8 characters".to_string());
        }
        Ok(())
    }
}

/// Cache behavior configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Seconds a resolved upstream URL is trusted before re-resolution.
    #[serde(default = "default_source_ttl_secs")]
    pub source_ttl_secs: u64,
    /// Copy resolved content into the blob tier in the background.
    /// Disabling this leaves the service as a pure pass-through proxy.
    #[serde(default = "default_blob_writethrough")]
    pub blob_writethrough: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            source_ttl_secs: default_source_ttl_secs(),
            blob_writethrough: default_blob_writethrough(),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Upstream extractor configuration.
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Bootstrap admin key configuration (required).
    pub admin: AdminConfig,
    /// Cache behavior configuration.
    #[serde(default)]
    pub cache: CacheConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage, SQLite metadata,
    /// and a dummy bootstrap key.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            metadata: MetadataConfig::default(),
            upstream: UpstreamConfig::default(),
            admin: AdminConfig::for_testing(),
            cache: CacheConfig::default(),
        }
    }

    /// Validate cross-field invariants. Returns the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        self.admin.validate()?;
        if self.upstream.base_url.trim().is_empty() {
            return Err("upstream base_url must not be empty".to_string());
        }
        if self.cache.source_ttl_secs == 0 {
            return Err("cache source_ttl_secs must be positive".to_string());
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            recent_logs_limit: default_recent_logs_limit(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_recent_logs_limit() -> u32 {
    50
}

fn default_upstream_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_admin_owner() -> String {
    "Admin".to_string()
}

fn default_source_ttl_secs() -> u64 {
    3600
}

fn default_blob_writethrough() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_config_defaults_to_writethrough() {
        let json = r#"{"source_ttl_secs": 600}"#;
        let config: CacheConfig = serde_json::from_str(json).unwrap();
        assert!(config.blob_writethrough);
        assert_eq!(config.source_ttl_secs, 600);
    }

    #[test]
    fn short_bootstrap_key_is_rejected() {
        let mut config = AppConfig::for_testing();
        config.admin.bootstrap_key = "short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let mut config = AppConfig::for_testing();
        config.cache.source_ttl_secs = 0;
        assert!(config.validate().is_err());
    }
}
