//! cdtgen CLI
//!
//! Generates CDT recipes from the repository metadata of RPM-based distros.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use cdtgen::build::{build_all, recipe_dirs};
use cdtgen::orchestrator::tuple_key;
use cdtgen::search::{search_repo, SearchQuery};
use cdtgen::{CacheMode, Orchestrator, Result, RunOptions, RunReport};
use cdtgen_cache::ManifestDatabase;
use cdtgen_meta::config::{Config, RecipeSource, Settings, Tuple};
use cdtgen_meta::{BlobCache, HttpFetcher, RecipeStyle, RepodataClient};

static CHECK_MARK: LazyLock<colored::ColoredString> = LazyLock::new(|| "✔".bright_green().bold());
static CROSS_MARK: LazyLock<colored::ColoredString> = LazyLock::new(|| "〤".bright_red().bold());

#[derive(Parser)]
#[command(name = "cdtgen")]
#[command(about = "Generate CDT recipes from RPM repository metadata", long_about = None)]
#[command(version)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Directory holding allowlist.yaml, build_defs.yaml and settings.yaml
    #[arg(long, env = "CDTGEN_CONFIG_DIR", default_value = ".", global = true)]
    config_dir: PathBuf,

    /// Root directory of generated recipes
    #[arg(long, default_value = "cdts", global = true)]
    output_root: PathBuf,

    /// Generation manifest (default: <output-root>/.cdtgen-manifest.sdb)
    #[arg(long, global = true)]
    manifest: Option<PathBuf>,

    /// Shared repodata cache used by --fast
    #[arg(long, env = "CDTGEN_CACHE_DIR", default_value = ".cdtgen-cache/repodata", global = true)]
    cache_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate recipes for every allowlisted package, distro and architecture
    GenerateAll {
        /// Emit even if the recipe is unchanged
        #[arg(long)]
        force: bool,

        /// Reuse downloaded repodata through the shared cache
        #[arg(long)]
        fast: bool,

        /// Accept upstream URL or version changes and bump the build number
        #[arg(long)]
        keep_url_changes: bool,

        /// Number of parallel workers (default: available parallelism)
        #[arg(short, long)]
        jobs: Option<usize>,
    },

    /// Generate the recipe of a single package
    GenerateOne {
        package: String,

        /// Directory to write meta.yaml and build.sh into
        #[arg(long)]
        output_dir: PathBuf,

        #[arg(long)]
        architecture: String,

        #[arg(long)]
        distro: String,

        /// Use {% set %} header variables in meta.yaml
        #[arg(long)]
        conda_forge_style: bool,

        #[arg(long)]
        force: bool,

        #[arg(long)]
        fast: bool,

        #[arg(long)]
        keep_url_changes: bool,
    },

    /// Build every generated recipe with the downstream build tool
    BuildAll {
        #[arg(long, default_value = "conda")]
        tool: String,

        /// Print the build commands without running them
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the names of every recipe the allowlists would generate
    ListPackageNames,

    /// Search package names in the repositories of a distro
    Search {
        term: String,

        #[arg(long, default_value = "alma9")]
        distro: String,

        #[arg(long, default_value = "x86_64")]
        architecture: String,

        /// Only search this repository
        #[arg(long)]
        repo: Option<String>,

        /// Only show exact name matches
        #[arg(long)]
        exact: bool,
    },
}

fn setup_logging(level: &str) {
    let level = match level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    let result = match &cli.command {
        Commands::GenerateAll {
            force,
            fast,
            keep_url_changes,
            jobs,
        } => cmd_generate_all(&cli, *force, *fast, *keep_url_changes, *jobs),
        Commands::GenerateOne {
            package,
            output_dir,
            architecture,
            distro,
            conda_forge_style,
            force,
            fast,
            keep_url_changes,
        } => {
            let tuple = Tuple::new(package, distro, architecture);
            let style = conda_forge_style.then_some(RecipeStyle::CondaForge);
            cmd_generate_one(&cli, &tuple, output_dir, style, *force, *fast, *keep_url_changes)
        }
        Commands::BuildAll { tool, dry_run } => cmd_build_all(&cli, tool, *dry_run),
        Commands::ListPackageNames => cmd_list_package_names(&cli),
        Commands::Search {
            term,
            distro,
            architecture,
            repo,
            exact,
        } => cmd_search(&cli, term, distro, architecture, repo.as_deref(), *exact),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("[{}] {}", &*CROSS_MARK, e);
            ExitCode::FAILURE
        }
    }
}

fn manifest_path(cli: &Cli) -> PathBuf {
    cli.manifest
        .clone()
        .unwrap_or_else(|| cli.output_root.join(".cdtgen-manifest.sdb"))
}

fn orchestrator(cli: &Cli) -> Result<Orchestrator> {
    let config = Config::load(&cli.config_dir)?;
    let fetcher = HttpFetcher::new(config.settings.max_attempts)?;
    Ok(Orchestrator::new(config, &cli.output_root, Arc::new(fetcher)))
}

fn run_options(cli: &Cli, config: &Config, force: bool, fast: bool, keep_url_changes: bool) -> RunOptions {
    RunOptions {
        force,
        keep_url_changes,
        cache_mode: if fast {
            CacheMode::Fast(cli.cache_dir.clone())
        } else {
            CacheMode::Standard
        },
        style: config.settings.style,
        ..Default::default()
    }
}

fn print_summary(report: &RunReport, started: Instant) {
    for result in &report.results {
        match &result.outcome {
            Ok(outcome) => info!("{}: {:?}", result.tuple, outcome),
            Err(e) => eprintln!("[{}] {}: {}: {}", &*CROSS_MARK, result.tuple, e.kind(), e),
        }
    }

    let failed = report.failures().count();
    println!();
    if failed == 0 {
        println!("[{}] All tuples generated", &*CHECK_MARK);
    }
    println!("[{}] {} recipes written", "+".bright_blue().bold(), report.written());
    println!("[{}] {} recipes unchanged", "+".bright_blue().bold(), report.unchanged());
    println!("[{}] {} custom recipes skipped", "+".bright_blue().bold(), report.custom());
    println!("[{}] {} tuples failed", "+".bright_blue().bold(), failed);
    println!(
        "[{}] Processed {} tuple(s) in {:#?}",
        "+".bright_blue().bold(),
        report.results.len(),
        started.elapsed()
    );
}

fn cmd_generate_all(cli: &Cli, force: bool, fast: bool, keep_url_changes: bool, jobs: Option<usize>) -> Result<bool> {
    let started = Instant::now();
    let orchestrator = orchestrator(cli)?;
    let tuples = orchestrator.config().tuples()?;
    let mut options = run_options(cli, orchestrator.config(), force, fast, keep_url_changes);
    if let Some(jobs) = jobs {
        options.jobs = jobs;
    }

    let mut manifest = ManifestDatabase::open(&manifest_path(cli))?;
    let report = orchestrator.run(&tuples, &mut manifest, &options)?;

    let keep: HashSet<_> = tuples.iter().map(tuple_key).collect();
    for key in manifest.remove_stale(&keep)? {
        warn!("Dropped manifest entry of {}, no longer allowlisted", key);
    }

    print_summary(&report, started);
    Ok(report.is_success())
}

fn cmd_generate_one(
    cli: &Cli,
    tuple: &Tuple,
    output_dir: &Path,
    style: Option<RecipeStyle>,
    force: bool,
    fast: bool,
    keep_url_changes: bool,
) -> Result<bool> {
    let started = Instant::now();
    let orchestrator = orchestrator(cli)?;
    let mut options = run_options(cli, orchestrator.config(), force, fast, keep_url_changes);
    if let Some(style) = style {
        options.style = style;
    }
    options.jobs = 1;

    let mut manifest = ManifestDatabase::open(&manifest_path(cli))?;
    let report = orchestrator.generate_one(tuple, output_dir, &mut manifest, &options)?;

    print_summary(&report, started);
    Ok(report.is_success())
}

fn cmd_build_all(cli: &Cli, tool: &str, dry_run: bool) -> Result<bool> {
    let started = Instant::now();
    let dirs = recipe_dirs(&cli.output_root)?;
    let report = build_all(&dirs, tool, dry_run);

    for (dir, reason) in &report.failed {
        eprintln!("[{}] {}: {}", &*CROSS_MARK, dir.display(), reason);
    }
    println!();
    println!(
        "[{}] {} recipes built successfully",
        "+".bright_blue().bold(),
        report.succeeded.len()
    );
    println!("[{}] {} recipes failed to build", "+".bright_blue().bold(), report.failed.len());
    println!(
        "[{}] Processed {}/{} recipe(s) in {:#?}",
        "+".bright_blue().bold(),
        report.succeeded.len() + report.failed.len(),
        dirs.len(),
        started.elapsed()
    );
    Ok(report.failed.is_empty())
}

fn cmd_list_package_names(cli: &Cli) -> Result<bool> {
    let orchestrator = orchestrator(cli)?;
    for tuple in orchestrator.config().tuples()? {
        if matches!(orchestrator.source_for(&tuple), RecipeSource::Generated(_)) {
            println!("{}", tuple.dir_name());
        }
    }
    Ok(true)
}

fn cmd_search(
    cli: &Cli,
    term: &str,
    distro: &str,
    architecture: &str,
    repo: Option<&str>,
    exact: bool,
) -> Result<bool> {
    let settings = match Config::load(&cli.config_dir) {
        Ok(config) => config.settings,
        Err(e) => {
            debug!("Using built-in distros: {}", e);
            Settings::default()
        }
    };
    let distro_config = settings.distro(distro)?;
    let repos: Vec<String> = match repo {
        Some(repo) => vec![repo.to_string()],
        None => distro_config.repos.clone(),
    };

    let fetcher = HttpFetcher::new(settings.max_attempts)?;
    let client = RepodataClient::new(Arc::new(fetcher), Arc::new(BlobCache::memory()));
    let query = SearchQuery {
        term: term.to_string(),
        exact,
    };

    let mut hits = Vec::new();
    let mut ok = true;
    for repo in &repos {
        let coord = distro_config.coordinate(distro, architecture, repo);
        match search_repo(&client, &coord, &query) {
            Ok(found) => {
                println!("{}/{}: {} package(s)", distro, repo, found.len());
                hits.extend(found);
            }
            Err(e) => {
                eprintln!("[{}] {}: {}", &*CROSS_MARK, coord, e);
                ok = false;
            }
        }
    }

    println!("{}", "=".repeat(60));
    println!("SUMMARY: {} packages found matching '{}'", hits.len(), term);
    println!("{}", "=".repeat(60));
    for hit in &hits {
        println!("{} (from {})", hit.full_name, hit.repo);
    }
    Ok(ok)
}
