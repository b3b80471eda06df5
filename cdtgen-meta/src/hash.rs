//! Recipe fingerprints for change detection
//!
//! A fingerprint covers both emitted texts byte for byte. Any formatting
//! difference in the output is a change on disk, so no normalization is
//! applied.

use std::path::Path;

use crate::Result;

/// Compute the fingerprint of a rendered `meta.yaml` / `build.sh` pair.
pub fn compute_fingerprint(meta_yaml: &str, build_sh: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(meta_yaml.as_bytes());
    // Separator so that moving bytes between the files changes the hash
    hasher.update(&[0]);
    hasher.update(build_sh.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Fingerprint of the recipe files currently in `dir`, if both exist.
pub fn fingerprint_dir(dir: &Path) -> Result<Option<String>> {
    let meta = dir.join(crate::recipe::META_YAML);
    let build = dir.join(crate::recipe::BUILD_SH);
    if !meta.is_file() || !build.is_file() {
        return Ok(None);
    }
    let meta_yaml = std::fs::read_to_string(meta)?;
    let build_sh = std::fs::read_to_string(build)?;
    Ok(Some(compute_fingerprint(&meta_yaml, &build_sh)))
}
