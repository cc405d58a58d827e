//! API key roles, quota windows, and admission outcomes.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, Time};

use crate::KEY_PREFIX_LEN;

/// Role attached to an API key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRole {
    /// Normal caller subject to the daily quota.
    Standard,
    /// Administrative caller, exempt from quota accounting.
    Admin,
}

impl KeyRole {
    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "standard" => Ok(Self::Standard),
            "admin" => Ok(Self::Admin),
            _ => Err(crate::Error::InvalidRole(s.to_string())),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Admin => "admin",
        }
    }
}

/// Lifecycle status of a key, derived from its expiry timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Expired,
}

/// Derive a key's status at `now`.
pub fn key_status(expires_at: Option<OffsetDateTime>, now: OffsetDateTime) -> KeyStatus {
    match expires_at {
        Some(at) if now >= at => KeyStatus::Expired,
        _ => KeyStatus::Active,
    }
}

/// Why an admission attempt was denied.
///
/// Denials are ordinary outcomes of the admission state machine, not
/// store failures. Expiry takes precedence over quota when both hold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdmitDenial {
    /// No key row matches the presented material.
    KeyNotFound,
    /// The key's expiry timestamp has passed.
    KeyExpired { expired_at: OffsetDateTime },
    /// The current window's usage count has reached the daily limit.
    QuotaExceeded { limit: i64, resets_in_secs: i64 },
    /// The key exists but lacks the role the operation requires.
    InsufficientRole,
}

/// Whether a usage window opened at `window_start` has rolled over by `now`.
///
/// Windows are aligned to UTC calendar days, so the window is stale as
/// soon as `now` falls on a later date.
pub fn window_is_stale(window_start: OffsetDateTime, now: OffsetDateTime) -> bool {
    now.date() > window_start.date()
}

/// Seconds until the next UTC midnight, when stale windows reset.
pub fn window_resets_in_secs(now: OffsetDateTime) -> i64 {
    let next_midnight = now
        .date()
        .next_day()
        .map(|d| d.with_time(Time::MIDNIGHT).assume_utc())
        .unwrap_or(now + Duration::days(1));
    (next_midnight - now).whole_seconds().max(0)
}

/// Whole days until a key expires; `None` when the key never expires.
/// Already-expired keys report zero.
pub fn days_until_expiry(expires_at: Option<OffsetDateTime>, now: OffsetDateTime) -> Option<i64> {
    expires_at.map(|at| (at - now).whole_days().max(0))
}

/// Generate fresh API key material (32 random bytes, URL-safe base64).
pub fn generate_key_material() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Masked form of a key suitable for listings and logs.
pub fn mask_key(key: &str) -> String {
    let prefix: String = key.chars().take(KEY_PREFIX_LEN).collect();
    format!("{prefix}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn status_flips_exactly_at_expiry() {
        let expiry = datetime!(2026-03-01 12:00:00 UTC);
        assert_eq!(
            key_status(Some(expiry), expiry - Duration::seconds(1)),
            KeyStatus::Active
        );
        assert_eq!(key_status(Some(expiry), expiry), KeyStatus::Expired);
        assert_eq!(key_status(None, expiry), KeyStatus::Active);
    }

    #[test]
    fn window_rolls_over_on_date_change() {
        let start = datetime!(2026-03-01 23:59:59 UTC);
        assert!(!window_is_stale(start, datetime!(2026-03-01 23:59:59.9 UTC)));
        assert!(window_is_stale(start, datetime!(2026-03-02 00:00:00 UTC)));
    }

    #[test]
    fn reset_countdown_reaches_midnight() {
        let now = datetime!(2026-03-01 23:00:00 UTC);
        assert_eq!(window_resets_in_secs(now), 3600);
    }

    #[test]
    fn generated_keys_are_distinct_and_url_safe() {
        let a = generate_key_material();
        let b = generate_key_material();
        assert_ne!(a, b);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert!(a.len() >= 40);
    }

    #[test]
    fn masking_reveals_only_the_prefix() {
        assert_eq!(mask_key("abcdefgh12345678"), "abcdefgh...");
        assert_eq!(mask_key("abc"), "abc...");
    }
}
