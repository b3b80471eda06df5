//! Atomic recipe output
//!
//! Each file is written to a temporary file in its destination directory and
//! renamed into place, so readers never observe a partial recipe.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use cdtgen_meta::recipe::{RecipeSpec, BUILD_SH, META_YAML};

const SCRIPT_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;

/// Write `contents` to `path` through a temporary sibling file.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    set_mode(tmp.path(), mode)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Write both recipe files into `dir`, `build.sh` first.
pub fn write_recipe(dir: &Path, spec: &RecipeSpec) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    write_atomic(&dir.join(BUILD_SH), spec.build_sh.as_bytes(), SCRIPT_MODE)?;
    write_atomic(&dir.join(META_YAML), spec.meta_yaml.as_bytes(), FILE_MODE)?;
    Ok(())
}
