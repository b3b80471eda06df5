//! cdtgen: CDT recipe generation front end
//!
//! Drives the `cdtgen-meta` pipeline over every allowlisted
//! (package, distro, architecture) tuple, writes recipes atomically and keeps
//! the generation manifest of `cdtgen-cache` current.

pub mod build;
pub mod error;
pub mod orchestrator;
pub mod search;
pub mod writer;

pub use error::{Error, Result};
pub use orchestrator::{CacheMode, Orchestrator, RunOptions, RunReport, TupleOutcome};
