//! cdtgen-meta: RPM repodata to CDT recipe engine
//!
//! This crate provides:
//! - Repodata fetching with checksum validation and a content-addressed cache
//! - Streaming `primary.xml` parsing, including rich dependencies
//! - Dependency mapping through per-package removal and substitution rules
//! - Deterministic `meta.yaml` / `build.sh` emission and fingerprinting
//! - Generator configuration documents

pub mod catalog;
pub mod checksum;
pub mod compression;
pub mod config;
pub mod depexpr;
pub mod error;
pub mod evr;
pub mod hash;
pub mod mapper;
pub mod primary;
pub mod recipe;
pub mod repodata;
pub mod repomd;
mod xml;

pub use catalog::Catalog;
pub use config::{Config, MappingRule, RecipeSource, RepoCoordinate, Tuple};
pub use depexpr::{DependencyExpression, Requirement};
pub use error::{Error, Result};
pub use evr::Evr;
pub use hash::compute_fingerprint;
pub use mapper::map_dependencies;
pub use primary::PackageRecord;
pub use recipe::{emit, EmitContext, PriorEmission, RecipeSpec, RecipeStyle};
pub use repodata::{BlobCache, Fetch, HttpFetcher, MemoryFetcher, RepodataClient};
