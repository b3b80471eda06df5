//! Checksum validation for fetched repodata documents

use sha2::{Digest, Sha256, Sha512};

use crate::{Error, Result};

/// A checksum as declared by a repodata index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    /// Algorithm name as written in the index (`sha256`, `sha512`, ...)
    pub algorithm: String,
    /// Lowercase hex digest
    pub value: String,
}

impl Checksum {
    pub fn new(algorithm: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into().to_lowercase(),
            value: value.into().trim().to_lowercase(),
        }
    }

    /// Compute the checksum of `data` with the given algorithm.
    pub fn compute(algorithm: &str, data: &[u8]) -> Result<Self> {
        let value = match algorithm.to_lowercase().as_str() {
            "sha256" => format!("{:x}", Sha256::digest(data)),
            "sha512" => format!("{:x}", Sha512::digest(data)),
            other => {
                return Err(Error::Config(format!(
                    "unsupported checksum algorithm '{}'",
                    other
                )))
            }
        };
        Ok(Self::new(algorithm, value))
    }

    /// Verify `data` against this checksum. A mismatch is never recoverable.
    pub fn verify(&self, url: &str, data: &[u8]) -> Result<()> {
        let actual = Self::compute(&self.algorithm, data)?;
        if actual.value != self.value {
            return Err(Error::Checksum {
                url: url.to_string(),
                algorithm: self.algorithm.clone(),
                expected: self.value.clone(),
                actual: actual.value,
            });
        }
        Ok(())
    }

    /// Content-addressed key, `<algorithm>-<digest>`
    pub fn cache_key(&self) -> String {
        format!("{}-{}", self.algorithm, self.value)
    }
}
