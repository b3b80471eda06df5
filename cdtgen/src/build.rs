//! Downstream builds of emitted recipes
//!
//! Runs `<tool> build <dir>` once per recipe directory, sequentially.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{error, info};

use crate::Result;

/// Recipe directories under `output_root`, sorted
pub fn recipe_dirs(output_root: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/*/{}",
        glob::Pattern::escape(&output_root.display().to_string()),
        cdtgen_meta::recipe::META_YAML
    );
    let mut dirs: Vec<PathBuf> = glob::glob(&pattern)?
        .filter_map(|entry| entry.ok())
        .filter_map(|path| path.parent().map(Path::to_path_buf))
        .collect();
    dirs.sort();
    Ok(dirs)
}

#[derive(Debug, Default)]
pub struct BuildReport {
    pub succeeded: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

fn build_command(tool: &str, dir: &Path) -> Command {
    let mut cmd = Command::new(tool);
    cmd.arg("build").arg(dir);
    cmd
}

/// Build every recipe directory. With `dry_run` the commands are only logged.
pub fn build_all(dirs: &[PathBuf], tool: &str, dry_run: bool) -> BuildReport {
    let mut report = BuildReport::default();
    for dir in dirs {
        if dry_run {
            info!("Would run: {} build {}", tool, dir.display());
            report.succeeded.push(dir.clone());
            continue;
        }

        info!("Building {}", dir.display());
        match build_command(tool, dir).status() {
            Ok(status) if status.success() => report.succeeded.push(dir.clone()),
            Ok(status) => {
                error!("{} build {} exited with {}", tool, dir.display(), status);
                report.failed.push((dir.clone(), format!("exited with {}", status)));
            }
            Err(e) => {
                error!("Failed to execute {}: {}", tool, e);
                report.failed.push((dir.clone(), e.to_string()));
            }
        }
    }
    report
}
