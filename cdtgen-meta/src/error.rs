use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("YAML parsing failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("XML parsing failed: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to fetch {url} after {attempts} attempt(s): {reason}")]
    Fetch {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("Checksum mismatch for {url}: expected {algorithm}:{expected}, got {actual}")]
    Checksum {
        url: String,
        algorithm: String,
        expected: String,
        actual: String,
    },

    #[error("{package}: dependency '{dependency}' is not removed, replaced, or provided by any package in the catalog")]
    UnmappedDependency { package: String, dependency: String },

    #[error("{package}: ambiguous rich dependency {expression}, candidates: {}", .candidates.join(", "))]
    AmbiguousDependency {
        package: String,
        expression: String,
        candidates: Vec<String>,
    },

    #[error("{package}: upstream changed (url: {old_url} -> {new_url}, version: {old_version} -> {new_version}); rerun with --keep-url-changes to bump the build number")]
    BuildNumberPolicy {
        package: String,
        old_url: String,
        new_url: String,
        old_version: String,
        new_version: String,
    },

    #[error("Package {package} not found in {distro}/{architecture}")]
    PackageNotFound {
        package: String,
        distro: String,
        architecture: String,
    },

    #[error("Failed to decompress {format} data: {source}")]
    Decompress {
        format: &'static str,
        source: std::io::Error,
    },

    #[error("Failed to render recipe: {0}")]
    Render(#[from] std::fmt::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Short machine-friendly name of the failure class, used in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Http(_) | Error::Fetch { .. } => "FetchError",
            Error::Checksum { .. } => "ChecksumError",
            Error::UnmappedDependency { .. } => "UnmappedDependencyError",
            Error::AmbiguousDependency { .. } => "AmbiguousDependencyError",
            Error::BuildNumberPolicy { .. } => "BuildNumberPolicyViolation",
            Error::PackageNotFound { .. } => "PackageNotFound",
            Error::Yaml(_) | Error::Config(_) => "ConfigError",
            Error::Xml(_) | Error::Parse(_) | Error::Decompress { .. } => "ParseError",
            Error::Io(_) | Error::Render(_) => "IoError",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
