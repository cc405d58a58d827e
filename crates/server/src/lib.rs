//! HTTP API server for tubecache.
//!
//! This crate provides the HTTP surface and the resolution engine:
//! - Content resolution endpoint with key admission
//! - Keyless playback streaming by token
//! - Two-tier cache resolver with request coalescing
//! - Upstream extractor client with bounded retries
//! - Admin endpoints (keys, stats, maintenance)

pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod extractor;
pub mod handlers;
pub mod log;
pub mod resolver;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use resolver::{ResolveError, Resolver};
pub use routes::create_router;
pub use state::AppState;
