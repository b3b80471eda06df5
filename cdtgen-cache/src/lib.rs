//! cdtgen-cache: Generation manifest for CDT recipes
//!
//! This crate provides:
//! - SQLite-based record of what was last emitted per (package, distro, architecture)
//! - Fingerprints for incremental regeneration
//! - Prior source URL, version and build bump for build-number decisions

pub mod db;
pub mod error;
pub mod models;
pub mod schema;

pub use db::ManifestDatabase;
pub use error::{Error, Result};
pub use models::*;
