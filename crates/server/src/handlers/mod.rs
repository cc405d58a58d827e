//! HTTP request handlers.

pub mod admin;
pub mod content;
pub mod health;
pub mod stream;

pub use admin::{create_key, delete_key, get_stats, list_keys, run_maintenance};
pub use content::get_content;
pub use health::health_check;
pub use stream::get_stream;
