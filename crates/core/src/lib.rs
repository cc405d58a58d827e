//! Core domain types and shared logic for the tubecache service.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Query canonicalization and content fingerprints
//! - API key roles, quota windows, and admission outcomes
//! - Stream kinds and playback tokens
//! - Service configuration

pub mod config;
pub mod content;
pub mod error;
pub mod key;
pub mod query;

pub use config::AppConfig;
pub use content::{PlaybackToken, StreamKind};
pub use error::{Error, Result};
pub use key::{AdmitDenial, KeyRole, KeyStatus};
pub use query::{CanonicalQuery, Fingerprint};

/// Reference chunk size for streaming proxied bodies (1 MiB).
pub const STREAM_CHUNK_SIZE: usize = 1024 * 1024;

/// Length of a well-formed video identifier.
pub const VIDEO_ID_LEN: usize = 11;

/// Number of leading key characters revealed in listings and logs.
pub const KEY_PREFIX_LEN: usize = 8;
