//! Bootstrap admin key initialization.

use anyhow::{bail, Result};
use time::OffsetDateTime;
use tubecache_core::config::AdminConfig;
use tubecache_core::key::{mask_key, KeyRole};
use tubecache_metadata::models::ApiKeyRow;
use tubecache_metadata::repos::KeyRepo;
use tubecache_metadata::MetadataStore;

/// Ensure the configured bootstrap admin key exists, rotating the
/// previous one if the configured material changed between restarts.
pub async fn ensure_bootstrap_key(metadata: &dyn MetadataStore, config: &AdminConfig) -> Result<()> {
    if let Err(e) = config.validate() {
        bail!("invalid admin config: {e}");
    }
    let material = config.bootstrap_key.trim();
    let now = OffsetDateTime::now_utc();

    if let Some(existing) = metadata.get_key(material).await? {
        if existing.role() != KeyRole::Admin {
            bail!(
                "bootstrap key material collides with an existing non-admin key (owner: {})",
                existing.owner
            );
        }
        if !existing.is_bootstrap {
            if let Some(previous) = metadata.get_bootstrap_key().await? {
                metadata.delete_key(&previous.api_key).await?;
                tracing::info!(
                    key = %mask_key(&previous.api_key),
                    "previous bootstrap key revoked"
                );
            }
            metadata.mark_bootstrap(material).await?;
        }
        tracing::debug!("bootstrap key already exists");
        return Ok(());
    }

    if let Some(previous) = metadata.get_bootstrap_key().await? {
        metadata.delete_key(&previous.api_key).await?;
        tracing::info!(
            key = %mask_key(&previous.api_key),
            "previous bootstrap key revoked"
        );
    }

    let key = ApiKeyRow {
        api_key: material.to_string(),
        owner: config.owner.clone(),
        role: KeyRole::Admin.as_str().to_string(),
        // Admins bypass quota accounting; the limit is never consulted.
        daily_limit: 0,
        usage_count: 0,
        window_start: now,
        total_requests: 0,
        created_at: now,
        expires_at: None,
        created_by: None,
        is_bootstrap: true,
    };
    metadata.create_key(&key).await?;
    tracing::info!(key = %mask_key(material), "bootstrap admin key created");

    Ok(())
}
