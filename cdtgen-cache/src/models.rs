//! Data models for the generation manifest

use chrono::{DateTime, Utc};
use std::fmt;

/// Identity of a generated recipe
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TupleKey {
    pub package: String,
    pub distro: String,
    pub architecture: String,
}

impl TupleKey {
    pub fn new(package: &str, distro: &str, architecture: &str) -> Self {
        Self {
            package: package.to_string(),
            distro: distro.to_string(),
            architecture: architecture.to_string(),
        }
    }
}

impl fmt::Display for TupleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.package, self.distro, self.architecture)
    }
}

/// What was last emitted for a tuple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub key: TupleKey,
    /// Fingerprint of the emitted `meta.yaml` and `build.sh`
    pub fingerprint: String,
    pub source_url: String,
    pub version: String,
    /// Authorized upstream changes folded into the build number
    pub bump: u32,
    pub recorded_at: DateTime<Utc>,
}

impl ManifestEntry {
    pub fn new(key: TupleKey, fingerprint: String, source_url: String, version: String, bump: u32) -> Self {
        Self {
            key,
            fingerprint,
            source_url,
            version,
            bump,
            recorded_at: Utc::now(),
        }
    }
}
