//! Repository traits, one per metadata concern.

pub mod blobs;
pub mod content;
pub mod keys;
pub mod logs;

pub use blobs::BlobRefRepo;
pub use content::ContentRepo;
pub use keys::{AdmitOutcome, KeyRepo};
pub use logs::LogRepo;
