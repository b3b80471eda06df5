//! Generator configuration
//!
//! Three YAML documents live in the configuration directory:
//!
//! - `allowlist.yaml`: `{distro: [package, ...]}`
//! - `build_defs.yaml`: per-package build definitions (optional)
//! - `settings.yaml`: build number, architectures, distro overrides (optional)

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};

use crate::recipe::RecipeStyle;
use crate::{Error, Result};

pub const ALLOWLIST_FILE: &str = "allowlist.yaml";
pub const BUILD_DEFS_FILE: &str = "build_defs.yaml";
pub const SETTINGS_FILE: &str = "settings.yaml";

/// Distros known without any settings override
const BUILTIN_DISTROS: [(&str, &str, &[&str]); 3] = [
    (
        "centos7",
        "https://vault.centos.org/7.9.2009/os/{architecture}/",
        &["os"],
    ),
    (
        "alma8",
        "https://vault.almalinux.org/8.9/{repo}/{architecture}/os/",
        &["BaseOS", "AppStream", "PowerTools"],
    ),
    (
        "alma9",
        "https://vault.almalinux.org/9.4/{repo}/{architecture}/os/",
        &["BaseOS", "AppStream", "CRB", "devel"],
    ),
];

/// A value given once for every distro, or per distro
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PerDistro<T> {
    ByDistro(BTreeMap<String, T>),
    All(T),
}

impl<T> PerDistro<T> {
    pub fn get(&self, distro: &str) -> Option<&T> {
        match self {
            PerDistro::ByDistro(map) => map.get(distro),
            PerDistro::All(value) => Some(value),
        }
    }
}

/// License file references: a single path or a list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LicenseFiles(pub Vec<String>);

impl<'de> Deserialize<'de> for LicenseFiles {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Helper {
            One(String),
            Many(Vec<String>),
        }

        match Helper::deserialize(deserializer)? {
            Helper::One(path) => Ok(LicenseFiles(vec![path])),
            Helper::Many(paths) => Ok(LicenseFiles(paths)),
        }
    }
}

/// Per-package entry of `build_defs.yaml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildDef {
    /// Recipe is maintained by hand under the custom tree
    #[serde(default)]
    pub custom: bool,

    #[serde(default)]
    pub license_file: LicenseFiles,

    #[serde(default)]
    pub dep_remove: Option<PerDistro<Vec<String>>>,

    #[serde(default)]
    pub dep_replace: Option<PerDistro<BTreeMap<String, String>>>,

    /// Repository section to take the package from
    #[serde(default)]
    pub subfolder: Option<PerDistro<String>>,

    /// Shell fragment appended verbatim to the build script
    #[serde(default)]
    pub build_append: Option<String>,
}

/// Dependency and recipe rules for one package on one distro
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingRule {
    pub remove: BTreeSet<String>,
    pub replace: BTreeMap<String, String>,
    pub subfolder: Option<String>,
    pub build_append: Option<String>,
    pub license_files: Vec<String>,
}

impl MappingRule {
    /// Packages with replaced dependencies get the build-number offset.
    pub fn uses_replacements(&self) -> bool {
        !self.replace.is_empty()
    }
}

impl BuildDef {
    pub fn mapping_rule(&self, distro: &str) -> MappingRule {
        MappingRule {
            remove: self
                .dep_remove
                .as_ref()
                .and_then(|r| r.get(distro))
                .map(|names| names.iter().cloned().collect())
                .unwrap_or_default(),
            replace: self
                .dep_replace
                .as_ref()
                .and_then(|r| r.get(distro))
                .cloned()
                .unwrap_or_default(),
            subfolder: self.subfolder.as_ref().and_then(|s| s.get(distro)).cloned(),
            build_append: self.build_append.clone(),
            license_files: self.license_file.0.clone(),
        }
    }
}

/// Where the recipe of a package comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipeSource {
    Generated(MappingRule),
    Custom(PathBuf),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct BuildDefs(pub BTreeMap<String, BuildDef>);

impl BuildDefs {
    pub fn get(&self, package: &str) -> Option<&BuildDef> {
        self.0.get(package)
    }

    /// Resolve the recipe source of `package` on `distro`; custom recipes
    /// live at `custom_root/<package>`.
    pub fn source_for(&self, package: &str, distro: &str, custom_root: &Path) -> RecipeSource {
        match self.get(package) {
            Some(def) if def.custom => RecipeSource::Custom(custom_root.join(package)),
            Some(def) => RecipeSource::Generated(def.mapping_rule(distro)),
            None => RecipeSource::Generated(MappingRule::default()),
        }
    }
}

/// Package names to generate, per distro
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Allowlist(pub BTreeMap<String, Vec<String>>);

impl Allowlist {
    /// Sorted, de-duplicated packages of a distro
    pub fn packages(&self, distro: &str) -> Vec<String> {
        self.0
            .get(distro)
            .map(|names| {
                names
                    .iter()
                    .cloned()
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn distros(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

fn default_placeholder() -> String {
    "cdt_build_number".to_string()
}

fn default_offset() -> u32 {
    1000
}

/// The shared build-number counter referenced by every recipe
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BuildNumberConfig {
    #[serde(default = "default_placeholder")]
    pub placeholder: String,

    /// Added for packages with dependency replacements
    #[serde(default = "default_offset")]
    pub offset: u32,
}

impl Default for BuildNumberConfig {
    fn default() -> Self {
        Self {
            placeholder: default_placeholder(),
            offset: default_offset(),
        }
    }
}

/// Mirror layout of a distro
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DistroConfig {
    /// URL template with `{architecture}` and optionally `{repo}`
    pub base_url: String,
    pub repos: Vec<String>,
    #[serde(default)]
    pub architectures: Option<Vec<String>>,
}

/// (distro, architecture, repository subfolder) resolved to a mirror URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoCoordinate {
    pub distro: String,
    pub architecture: String,
    pub repo: String,
    pub base_url: String,
}

impl fmt::Display for RepoCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.distro, self.repo, self.architecture)
    }
}

impl DistroConfig {
    pub fn coordinate(&self, distro: &str, architecture: &str, repo: &str) -> RepoCoordinate {
        RepoCoordinate {
            distro: distro.to_string(),
            architecture: architecture.to_string(),
            repo: repo.to_string(),
            base_url: self
                .base_url
                .replace("{architecture}", architecture)
                .replace("{repo}", repo),
        }
    }

    /// Coordinates of every repository, in configured order.
    pub fn coordinates(&self, distro: &str, architecture: &str) -> Vec<RepoCoordinate> {
        self.repos
            .iter()
            .map(|repo| self.coordinate(distro, architecture, repo))
            .collect()
    }
}

fn default_architectures() -> Vec<String> {
    vec!["x86_64".into(), "aarch64".into(), "ppc64le".into()]
}

fn default_max_attempts() -> u32 {
    3
}

/// Contents of `settings.yaml`
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub build_number: BuildNumberConfig,

    #[serde(default = "default_architectures")]
    pub architectures: Vec<String>,

    #[serde(default)]
    pub style: RecipeStyle,

    /// Attempts per repodata download before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub distros: BTreeMap<String, DistroConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            build_number: BuildNumberConfig::default(),
            architectures: default_architectures(),
            style: RecipeStyle::default(),
            max_attempts: default_max_attempts(),
            distros: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Mirror layout of `distro`, from overrides first, then the built-in table.
    pub fn distro(&self, distro: &str) -> Result<DistroConfig> {
        if let Some(config) = self.distros.get(distro) {
            return Ok(config.clone());
        }
        BUILTIN_DISTROS
            .iter()
            .find(|(name, _, _)| *name == distro)
            .map(|(_, url, repos)| DistroConfig {
                base_url: url.to_string(),
                repos: repos.iter().map(|r| r.to_string()).collect(),
                architectures: None,
            })
            .ok_or_else(|| {
                Error::Config(format!(
                    "unknown distro '{}' (known: {})",
                    distro,
                    self.known_distros().join(", ")
                ))
            })
    }

    pub fn known_distros(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = BUILTIN_DISTROS
            .iter()
            .map(|(name, _, _)| name.to_string())
            .collect();
        names.extend(self.distros.keys().cloned());
        names.into_iter().collect()
    }

    pub fn architectures_for(&self, distro: &str) -> Result<Vec<String>> {
        Ok(self
            .distro(distro)?
            .architectures
            .unwrap_or_else(|| self.architectures.clone()))
    }
}

/// A unit of generation work
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tuple {
    pub package: String,
    pub distro: String,
    pub architecture: String,
}

impl Tuple {
    pub fn new(package: &str, distro: &str, architecture: &str) -> Self {
        Self {
            package: package.to_string(),
            distro: distro.to_string(),
            architecture: architecture.to_string(),
        }
    }

    /// Output directory name, `{package}-{distro}-{architecture}`
    pub fn dir_name(&self) -> String {
        format!("{}-{}-{}", self.package, self.distro, self.architecture)
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// All configuration documents, loaded together
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub allowlist: Allowlist,
    pub build_defs: BuildDefs,
    pub settings: Settings,
}

fn read_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&content).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

fn read_optional_yaml<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T> {
    if path.exists() {
        read_yaml(path)
    } else {
        Ok(T::default())
    }
}

impl Config {
    /// Load and validate the documents of `dir`. The allowlist is required.
    pub fn load(dir: &Path) -> Result<Self> {
        let config = Self {
            allowlist: read_yaml(&dir.join(ALLOWLIST_FILE))?,
            build_defs: read_optional_yaml(&dir.join(BUILD_DEFS_FILE))?,
            settings: read_optional_yaml(&dir.join(SETTINGS_FILE))?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for distro in self.allowlist.distros() {
            self.settings.distro(distro)?;
        }
        Ok(())
    }

    /// Every allowlisted tuple, sorted by distro, package, architecture.
    pub fn tuples(&self) -> Result<Vec<Tuple>> {
        let mut tuples = Vec::new();
        for distro in self.allowlist.distros() {
            let architectures = self.settings.architectures_for(distro)?;
            for package in self.allowlist.packages(distro) {
                for architecture in &architectures {
                    tuples.push(Tuple::new(&package, distro, architecture));
                }
            }
        }
        Ok(tuples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUILD_DEFS: &str = r#"
mesa-libGL:
  license_file: LICENSE.txt
  dep_remove:
    - glibc-common
  dep_replace:
    libY-old: libY
  subfolder:
    alma8: AppStream
  build_append: |
    ln -s libGL.so.1 "${PREFIX}/lib64/libGL.so"
libXrender:
  dep_remove:
    centos7: [libXau]
    alma9: [libXdmcp]
  license_file:
    - COPYING
    - LICENSE
cuda-driver:
  custom: true
"#;

    #[test]
    fn test_parse_build_defs() {
        let defs: BuildDefs = serde_yaml::from_str(BUILD_DEFS).unwrap();

        let gl = defs.get("mesa-libGL").unwrap().mapping_rule("alma8");
        assert!(gl.remove.contains("glibc-common"));
        assert_eq!(gl.replace.get("libY-old").map(String::as_str), Some("libY"));
        assert_eq!(gl.subfolder.as_deref(), Some("AppStream"));
        assert_eq!(gl.license_files, vec!["LICENSE.txt"]);
        assert!(gl.build_append.as_deref().unwrap().contains("libGL.so.1"));
        assert!(gl.uses_replacements());

        let gl7 = defs.get("mesa-libGL").unwrap().mapping_rule("centos7");
        assert_eq!(gl7.subfolder, None);
        assert!(gl7.remove.contains("glibc-common"));
    }

    #[test]
    fn test_per_distro_removal() {
        let defs: BuildDefs = serde_yaml::from_str(BUILD_DEFS).unwrap();
        let def = defs.get("libXrender").unwrap();

        assert!(def.mapping_rule("centos7").remove.contains("libXau"));
        assert!(def.mapping_rule("alma9").remove.contains("libXdmcp"));
        assert!(def.mapping_rule("alma8").remove.is_empty());
        assert_eq!(def.license_file.0, vec!["COPYING", "LICENSE"]);
    }

    #[test]
    fn test_custom_source() {
        let defs: BuildDefs = serde_yaml::from_str(BUILD_DEFS).unwrap();
        let root = Path::new("custom");

        assert_eq!(
            defs.source_for("cuda-driver", "alma8", root),
            RecipeSource::Custom(PathBuf::from("custom/cuda-driver"))
        );
        assert_eq!(
            defs.source_for("unknown", "alma8", root),
            RecipeSource::Generated(MappingRule::default())
        );
    }

    #[test]
    fn test_unknown_build_def_field_rejected() {
        let result: std::result::Result<BuildDefs, _> =
            serde_yaml::from_str("foo:\n  dep_remov: [x]\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_builtin_distros() {
        let settings = Settings::default();
        let alma8 = settings.distro("alma8").unwrap();
        let coords = alma8.coordinates("alma8", "aarch64");
        assert_eq!(coords.len(), 3);
        assert_eq!(
            coords[1].base_url,
            "https://vault.almalinux.org/8.9/AppStream/aarch64/os/"
        );

        let centos = settings.distro("centos7").unwrap();
        assert_eq!(
            centos.coordinate("centos7", "x86_64", "os").base_url,
            "https://vault.centos.org/7.9.2009/os/x86_64/"
        );
        assert!(settings.distro("debian12").is_err());
    }

    #[test]
    fn test_settings_defaults_and_overrides() {
        let settings: Settings = serde_yaml::from_str(
            r#"
build_number:
  offset: 500
distros:
  rocky9:
    base_url: "https://mirror/rocky/9/{repo}/{architecture}/os/"
    repos: [BaseOS]
    architectures: [x86_64]
"#,
        )
        .unwrap();

        assert_eq!(settings.build_number.placeholder, "cdt_build_number");
        assert_eq!(settings.build_number.offset, 500);
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.architectures_for("rocky9").unwrap(), vec!["x86_64"]);
        assert_eq!(settings.architectures_for("alma9").unwrap().len(), 3);
        assert!(settings.known_distros().contains(&"rocky9".to_string()));
    }

    #[test]
    fn test_tuples_sorted_and_deduplicated() {
        let config = Config {
            allowlist: serde_yaml::from_str("centos7: [zlib, bzip2, zlib]\nalma8: [bzip2]\n").unwrap(),
            settings: serde_yaml::from_str("architectures: [x86_64]").unwrap(),
            ..Default::default()
        };
        let names: Vec<_> = config
            .tuples()
            .unwrap()
            .iter()
            .map(Tuple::dir_name)
            .collect();
        assert_eq!(
            names,
            vec!["bzip2-alma8-x86_64", "bzip2-centos7-x86_64", "zlib-centos7-x86_64"]
        );
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ALLOWLIST_FILE), "alma9: [libX11]\n").unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.allowlist.packages("alma9"), vec!["libX11"]);
        assert!(config.build_defs.0.is_empty());

        std::fs::write(dir.path().join(ALLOWLIST_FILE), "solaris: [libX11]\n").unwrap();
        assert!(matches!(Config::load(dir.path()), Err(Error::Config(_))));
    }
}
