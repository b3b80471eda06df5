//! Repodata client
//!
//! Fetches the index and primary document of a repository, validates and
//! decompresses them, and builds package catalogs. Downloads go through the
//! [`Fetch`] trait; raw bytes are cached by checksum in a [`BlobCache`].

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::checksum::Checksum;
use crate::compression::decompress_auto;
use crate::config::{DistroConfig, RepoCoordinate};
use crate::primary::{join_url, PackageRecord, PrimaryEntries};
use crate::repomd::{RepoMd, REPOMD_PATH};
use crate::{Error, Result};

/// Default timeout for HTTP requests
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Delay before the second attempt; later attempts wait proportionally longer
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Transport used to download repository documents
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Outcome of a failed attempt
#[derive(Debug)]
pub enum AttemptError {
    /// Connection failures, 5xx and 429
    Transient(String),
    /// Anything retrying cannot fix
    Fatal(String),
}

/// Run `op` up to `max_attempts` times with linear backoff.
pub fn with_retries<F>(url: &str, max_attempts: u32, delay: Duration, mut op: F) -> Result<Vec<u8>>
where
    F: FnMut() -> std::result::Result<Vec<u8>, AttemptError>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op() {
            Ok(bytes) => return Ok(bytes),
            Err(AttemptError::Fatal(reason)) => {
                return Err(Error::Fetch {
                    url: url.to_string(),
                    attempts: attempt,
                    reason,
                })
            }
            Err(AttemptError::Transient(reason)) => {
                if attempt >= max_attempts {
                    return Err(Error::Fetch {
                        url: url.to_string(),
                        attempts: attempt,
                        reason,
                    });
                }
                warn!("Fetch attempt {} of {} failed: {}, retrying...", attempt, url, reason);
                std::thread::sleep(delay * attempt);
            }
        }
    }
}

/// HTTP transport with retry support
pub struct HttpFetcher {
    client: Client,
    max_attempts: u32,
    retry_delay: Duration,
}

impl HttpFetcher {
    pub fn new(max_attempts: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("cdtgen/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            max_attempts,
            retry_delay: RETRY_DELAY,
        })
    }

    fn attempt(&self, url: &str) -> std::result::Result<Vec<u8>, AttemptError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| AttemptError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AttemptError::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(AttemptError::Fatal(format!("HTTP {}", status)));
        }

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| AttemptError::Transient(format!("failed to read response: {}", e)))
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!("GET {}", url);
        with_retries(url, self.max_attempts, self.retry_delay, || self.attempt(url))
    }
}

/// Serves documents from memory, for offline runs and tests
#[derive(Default)]
pub struct MemoryFetcher {
    documents: HashMap<String, Vec<u8>>,
    requests: AtomicUsize,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: impl Into<String>, bytes: Vec<u8>) {
        self.documents.insert(url.into(), bytes);
    }

    /// Publish a repository at `base_url` whose primary document is
    /// `primary_xml`, gzip-compressed and referenced from a generated index.
    pub fn with_repository(mut self, base_url: &str, primary_xml: &[u8]) -> Result<Self> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(primary_xml)?;
        let compressed = encoder.finish()?;

        let checksum = Checksum::compute("sha256", &compressed)?;
        let open_checksum = Checksum::compute("sha256", primary_xml)?;
        let location = format!("repodata/{}-primary.xml.gz", checksum.value);
        let repomd = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo">
  <revision>1</revision>
  <data type="primary">
    <checksum type="sha256">{}</checksum>
    <open-checksum type="sha256">{}</open-checksum>
    <location href="{}"/>
    <size>{}</size>
  </data>
</repomd>
"#,
            checksum.value,
            open_checksum.value,
            location,
            compressed.len()
        );

        self.insert(join_url(base_url, REPOMD_PATH), repomd.into_bytes());
        self.insert(join_url(base_url, &location), compressed);
        Ok(self)
    }

    /// Number of fetches served or refused so far
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Fetch for MemoryFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.documents.get(url).cloned().ok_or_else(|| Error::Fetch {
            url: url.to_string(),
            attempts: 1,
            reason: "HTTP 404 Not Found".to_string(),
        })
    }
}

/// Content-addressed store for downloaded repodata documents
///
/// `Memory` lives as long as its client. `Disk` is shared between workers
/// and runs; entries are keyed by checksum, so concurrent writers of the
/// same key always write identical bytes.
pub enum BlobCache {
    Memory(Mutex<HashMap<String, Vec<u8>>>),
    Disk(PathBuf),
}

impl BlobCache {
    pub fn memory() -> Self {
        BlobCache::Memory(Mutex::new(HashMap::new()))
    }

    pub fn disk(dir: impl Into<PathBuf>) -> Self {
        BlobCache::Disk(dir.into())
    }

    /// Cached bytes for `checksum`, re-verified. Corrupt disk entries are
    /// evicted and reported as missing.
    pub fn get(&self, checksum: &Checksum) -> Result<Option<Vec<u8>>> {
        let key = checksum.cache_key();
        match self {
            BlobCache::Memory(map) => Ok(map
                .lock()
                .map_err(|_| Error::Config("repodata cache lock poisoned".into()))?
                .get(&key)
                .cloned()),
            BlobCache::Disk(dir) => {
                let path = dir.join(&key);
                let bytes = match std::fs::read(&path) {
                    Ok(bytes) => bytes,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                    Err(e) => return Err(e.into()),
                };
                if checksum.verify(&path.display().to_string(), &bytes).is_err() {
                    warn!("Evicting corrupt cache entry {}", path.display());
                    let _ = std::fs::remove_file(&path);
                    return Ok(None);
                }
                Ok(Some(bytes))
            }
        }
    }

    pub fn put(&self, checksum: &Checksum, bytes: &[u8]) -> Result<()> {
        let key = checksum.cache_key();
        match self {
            BlobCache::Memory(map) => {
                map.lock()
                    .map_err(|_| Error::Config("repodata cache lock poisoned".into()))?
                    .insert(key, bytes.to_vec());
            }
            BlobCache::Disk(dir) => {
                std::fs::create_dir_all(dir)?;
                let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
                tmp.write_all(bytes)?;
                tmp.persist(dir.join(&key)).map_err(|e| Error::Io(e.error))?;
            }
        }
        Ok(())
    }

    pub fn location(&self) -> Option<&Path> {
        match self {
            BlobCache::Memory(_) => None,
            BlobCache::Disk(dir) => Some(dir),
        }
    }
}

/// Downloads and decodes the repodata of distro repositories
pub struct RepodataClient {
    fetcher: Arc<dyn Fetch>,
    cache: Arc<BlobCache>,
}

impl RepodataClient {
    pub fn new(fetcher: Arc<dyn Fetch>, cache: Arc<BlobCache>) -> Self {
        Self { fetcher, cache }
    }

    pub fn fetch_repomd(&self, coord: &RepoCoordinate) -> Result<RepoMd> {
        let url = join_url(&coord.base_url, REPOMD_PATH);
        let bytes = self.fetcher.fetch(&url)?;
        RepoMd::from_xml(&bytes)
    }

    /// The decompressed primary document of a repository, checksum-verified.
    pub fn fetch_primary(&self, coord: &RepoCoordinate) -> Result<Vec<u8>> {
        let repomd = self.fetch_repomd(coord)?;
        let primary = repomd.primary()?;
        let url = join_url(&coord.base_url, &primary.location);

        let compressed = match self.cache.get(&primary.checksum)? {
            Some(bytes) => {
                debug!("Cache hit for {} ({})", coord, primary.checksum.cache_key());
                bytes
            }
            None => {
                let bytes = self.fetcher.fetch(&url)?;
                primary.checksum.verify(&url, &bytes)?;
                self.cache.put(&primary.checksum, &bytes)?;
                bytes
            }
        };

        let xml = decompress_auto(&compressed)?;
        if let Some(open) = &primary.open_checksum {
            open.verify(&url, &xml)?;
        }
        Ok(xml)
    }

    /// Stream the raw package entries of a repository.
    pub fn raw_entries(&self, coord: &RepoCoordinate) -> Result<PrimaryEntries<Cursor<Vec<u8>>>> {
        Ok(PrimaryEntries::new(Cursor::new(self.fetch_primary(coord)?)))
    }

    pub fn records(&self, coord: &RepoCoordinate) -> Result<Vec<PackageRecord>> {
        self.raw_entries(coord)?
            .map(|raw| raw.and_then(|raw| PackageRecord::from_raw(raw, &coord.repo, &coord.base_url)))
            .collect()
    }

    /// Build the catalog of every repository of `distro` for `architecture`.
    pub fn load_catalog(&self, distro_config: &DistroConfig, distro: &str, architecture: &str) -> Result<Catalog> {
        let mut catalog = Catalog::new(distro, architecture);
        for coord in distro_config.coordinates(distro, architecture) {
            let records = self.records(&coord)?;
            debug!("{}: {} records", coord, records.len());
            catalog.extend(records);
        }
        info!(
            "Loaded {} packages for {}/{}",
            catalog.len(),
            distro,
            architecture
        );
        Ok(catalog)
    }
}
