//! Generation runs
//!
//! Each (package, distro, architecture) tuple is processed independently on a
//! bounded worker pool: fetch repodata, pick the package, map dependencies,
//! emit the recipe and write it unless it is unchanged. Manifest updates are
//! committed once every worker is done.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cdtgen_cache::{ManifestDatabase, ManifestEntry, TupleKey};
use cdtgen_meta::config::{Config, RecipeSource, Tuple};
use cdtgen_meta::hash::fingerprint_dir;
use cdtgen_meta::recipe::{emit, EmitContext, PriorEmission, RecipeStyle, META_YAML};
use cdtgen_meta::{map_dependencies, BlobCache, Catalog, Fetch, RepodataClient};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::writer::write_recipe;
use crate::Result;

/// Where downloaded repodata is kept during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheMode {
    /// In-memory cache private to one run
    Standard,
    /// On-disk cache shared by all workers and later runs
    Fast(PathBuf),
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Emit even when the fingerprint is unchanged
    pub force: bool,
    /// Accept upstream URL/version changes and bump the build number
    pub keep_url_changes: bool,
    pub cache_mode: CacheMode,
    pub jobs: usize,
    pub style: RecipeStyle,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            force: false,
            keep_url_changes: false,
            cache_mode: CacheMode::Standard,
            jobs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            style: RecipeStyle::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TupleOutcome {
    Written { version: String, bump: u32 },
    Unchanged,
    /// Maintained by hand at the given path
    Custom(PathBuf),
}

#[derive(Debug)]
pub struct TupleResult {
    pub tuple: Tuple,
    pub outcome: cdtgen_meta::Result<TupleOutcome>,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub results: Vec<TupleResult>,
}

impl RunReport {
    fn count(&self, pred: impl Fn(&TupleOutcome) -> bool) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome.as_ref().is_ok_and(&pred))
            .count()
    }

    pub fn written(&self) -> usize {
        self.count(|o| matches!(o, TupleOutcome::Written { .. }))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, TupleOutcome::Unchanged))
    }

    pub fn custom(&self) -> usize {
        self.count(|o| matches!(o, TupleOutcome::Custom(_)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Tuple, &cdtgen_meta::Error)> {
        self.results
            .iter()
            .filter_map(|r| r.outcome.as_ref().err().map(|e| (&r.tuple, e)))
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Catalogs loaded during one run, keyed by (distro, architecture)
#[derive(Default)]
struct CatalogMemo(Mutex<HashMap<(String, String), Arc<Catalog>>>);

impl CatalogMemo {
    fn get_or_load(
        &self,
        tuple: &Tuple,
        load: impl FnOnce() -> cdtgen_meta::Result<Catalog>,
    ) -> cdtgen_meta::Result<Arc<Catalog>> {
        let key = (tuple.distro.clone(), tuple.architecture.clone());
        if let Some(catalog) = self.lock()?.get(&key) {
            return Ok(catalog.clone());
        }
        // Loaded without the lock held; two workers racing on the same key
        // build equal catalogs.
        let catalog = Arc::new(load()?);
        Ok(self.lock()?.entry(key).or_insert(catalog).clone())
    }

    fn lock(&self) -> cdtgen_meta::Result<std::sync::MutexGuard<'_, HashMap<(String, String), Arc<Catalog>>>> {
        self.0
            .lock()
            .map_err(|_| cdtgen_meta::Error::Config("catalog cache lock poisoned".into()))
    }
}

pub fn tuple_key(tuple: &Tuple) -> TupleKey {
    TupleKey::new(&tuple.package, &tuple.distro, &tuple.architecture)
}

pub struct Orchestrator {
    config: Config,
    output_root: PathBuf,
    custom_root: PathBuf,
    fetcher: Arc<dyn Fetch>,
}

impl Orchestrator {
    /// Custom recipes are looked up in `custom/`, next to `output_root`.
    pub fn new(config: Config, output_root: impl Into<PathBuf>, fetcher: Arc<dyn Fetch>) -> Self {
        let output_root = output_root.into();
        let custom_root = output_root
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join("custom");
        Self {
            config,
            output_root,
            custom_root,
            fetcher,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn source_for(&self, tuple: &Tuple) -> RecipeSource {
        self.config
            .build_defs
            .source_for(&tuple.package, &tuple.distro, &self.custom_root)
    }

    /// Generate every tuple into its directory under the output root.
    pub fn run(&self, tuples: &[Tuple], manifest: &mut ManifestDatabase, options: &RunOptions) -> Result<RunReport> {
        let jobs = tuples
            .iter()
            .map(|t| (t.clone(), self.output_root.join(t.dir_name())))
            .collect();
        self.execute(jobs, manifest, options)
    }

    /// Generate a single tuple into `out_dir`.
    pub fn generate_one(
        &self,
        tuple: &Tuple,
        out_dir: &Path,
        manifest: &mut ManifestDatabase,
        options: &RunOptions,
    ) -> Result<RunReport> {
        self.execute(vec![(tuple.clone(), out_dir.to_path_buf())], manifest, options)
    }

    fn execute(
        &self,
        jobs: Vec<(Tuple, PathBuf)>,
        manifest: &mut ManifestDatabase,
        options: &RunOptions,
    ) -> Result<RunReport> {
        let snapshot = manifest.all()?;
        let cache = Arc::new(match &options.cache_mode {
            CacheMode::Standard => BlobCache::memory(),
            CacheMode::Fast(dir) => BlobCache::disk(dir),
        });
        if let Some(dir) = cache.location() {
            debug!("Sharing repodata cache at {}", dir.display());
        }
        let client = RepodataClient::new(self.fetcher.clone(), cache);
        let catalogs = CatalogMemo::default();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.jobs.max(1))
            .build()?;

        info!("Generating {} tuple(s) with {} worker(s)", jobs.len(), options.jobs.max(1));
        let processed: Vec<(TupleResult, Option<ManifestEntry>)> = pool.install(|| {
            jobs.par_iter()
                .map(|(tuple, out_dir)| {
                    match self.process(tuple, out_dir, &snapshot, &client, &catalogs, options) {
                        Ok((outcome, entry)) => (
                            TupleResult {
                                tuple: tuple.clone(),
                                outcome: Ok(outcome),
                            },
                            entry,
                        ),
                        Err(e) => {
                            warn!("{}: {}", tuple, e);
                            (
                                TupleResult {
                                    tuple: tuple.clone(),
                                    outcome: Err(e),
                                },
                                None,
                            )
                        }
                    }
                })
                .collect()
        });

        let mut report = RunReport::default();
        let mut entries = Vec::new();
        for (result, entry) in processed {
            report.results.push(result);
            entries.extend(entry);
        }
        manifest.record_many(&entries)?;

        Ok(report)
    }

    fn process(
        &self,
        tuple: &Tuple,
        out_dir: &Path,
        snapshot: &HashMap<TupleKey, ManifestEntry>,
        client: &RepodataClient,
        catalogs: &CatalogMemo,
        options: &RunOptions,
    ) -> cdtgen_meta::Result<(TupleOutcome, Option<ManifestEntry>)> {
        let rule = match self.source_for(tuple) {
            RecipeSource::Custom(path) => {
                if !path.is_dir() {
                    warn!("{}: custom recipe {} does not exist", tuple, path.display());
                }
                return Ok((TupleOutcome::Custom(path), None));
            }
            RecipeSource::Generated(rule) => rule,
        };

        let settings = &self.config.settings;
        let distro = settings.distro(&tuple.distro)?;
        let catalog = catalogs.get_or_load(tuple, || {
            client.load_catalog(&distro, &tuple.distro, &tuple.architecture)
        })?;

        let record = match &rule.subfolder {
            Some(repo) => catalog.best_in(&tuple.package, repo),
            None => catalog.best(&tuple.package),
        }
        .ok_or_else(|| cdtgen_meta::Error::PackageNotFound {
            package: tuple.package.clone(),
            distro: tuple.distro.clone(),
            architecture: tuple.architecture.clone(),
        })?;
        debug!("{}: using {} from {}", tuple, record.nvra(), record.repo);

        let requirements = map_dependencies(record, &rule, &catalog)?;

        let key = tuple_key(tuple);
        let recorded = snapshot.get(&key);
        let mut ctx = EmitContext {
            distro: &tuple.distro,
            architecture: &tuple.architecture,
            rule: &rule,
            build_number: &settings.build_number,
            style: options.style,
            prior: None,
            keep_url_changes: options.keep_url_changes,
        };
        let prior = match recorded {
            Some(entry) => Some(PriorEmission {
                source_url: entry.source_url.clone(),
                version: entry.version.clone(),
                bump: entry.bump,
            }),
            None => recover_prior(out_dir, &settings.build_number.placeholder, ctx.offset()),
        };
        ctx.prior = prior.as_ref();

        let spec = emit(record, &requirements, &ctx)?;
        let fingerprint = spec.fingerprint();

        if !options.force
            && recorded.is_some_and(|e| e.fingerprint == fingerprint)
            && fingerprint_dir(out_dir)?.as_deref() == Some(fingerprint.as_str())
        {
            debug!("{}: unchanged", tuple);
            return Ok((TupleOutcome::Unchanged, None));
        }

        write_recipe(out_dir, &spec)?;
        info!("{}: wrote {} {}", tuple, spec.package, spec.version);

        let entry = ManifestEntry::new(
            key,
            fingerprint,
            spec.source_url.clone(),
            spec.version.clone(),
            spec.bump,
        );
        Ok((
            TupleOutcome::Written {
                version: spec.version,
                bump: spec.bump,
            },
            Some(entry),
        ))
    }
}

/// Prior emission recovered from a `meta.yaml` left by an earlier run.
fn recover_prior(out_dir: &Path, placeholder: &str, offset: u32) -> Option<PriorEmission> {
    let text = std::fs::read_to_string(out_dir.join(META_YAML)).ok()?;
    let prior = PriorEmission::from_recipe_text(&text, placeholder, offset);
    if prior.is_some() {
        debug!("Recovered prior emission from {}", out_dir.display());
    }
    prior
}
