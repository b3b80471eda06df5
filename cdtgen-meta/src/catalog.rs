//! Per (distro, architecture) package catalog
//!
//! Holds every usable record of every repository of a distro, and indexes
//! provided capabilities and file paths back to package names.

use std::collections::{BTreeMap, BTreeSet};

use crate::primary::PackageRecord;

#[derive(Debug, Clone)]
pub struct Catalog {
    pub distro: String,
    pub architecture: String,
    packages: BTreeMap<String, Vec<PackageRecord>>,
    provides: BTreeMap<String, BTreeSet<String>>,
}

impl Catalog {
    pub fn new(distro: &str, architecture: &str) -> Self {
        Self {
            distro: distro.to_string(),
            architecture: architecture.to_string(),
            packages: BTreeMap::new(),
            provides: BTreeMap::new(),
        }
    }

    /// Arch preference: the requested arch, then noarch. Anything else
    /// (e.g. i686 multilib in an x86_64 repo) is not part of the catalog.
    fn arch_rank(&self, arch: &str) -> Option<u8> {
        if arch == self.architecture {
            Some(2)
        } else if arch == "noarch" {
            Some(1)
        } else {
            None
        }
    }

    /// Returns `false` if the record was skipped for its architecture.
    pub fn insert(&mut self, record: PackageRecord) -> bool {
        if self.arch_rank(&record.arch).is_none() {
            return false;
        }

        for capability in record.provides.iter().chain(record.files.iter()) {
            self.provides
                .entry(capability.clone())
                .or_default()
                .insert(record.name.clone());
        }
        self.packages
            .entry(record.name.clone())
            .or_default()
            .push(record);
        true
    }

    pub fn extend<I: IntoIterator<Item = PackageRecord>>(&mut self, records: I) {
        for record in records {
            self.insert(record);
        }
    }

    fn pick<'a, I: Iterator<Item = &'a PackageRecord>>(&self, records: I) -> Option<&'a PackageRecord> {
        records.max_by(|a, b| {
            self.arch_rank(&a.arch)
                .cmp(&self.arch_rank(&b.arch))
                .then_with(|| a.evr.cmp(&b.evr))
        })
    }

    /// Best record for `name` across all repositories.
    pub fn best(&self, name: &str) -> Option<&PackageRecord> {
        self.pick(self.packages.get(name)?.iter())
    }

    /// Best record for `name` within one repository subfolder.
    pub fn best_in(&self, name: &str, repo: &str) -> Option<&PackageRecord> {
        self.pick(self.packages.get(name)?.iter().filter(|r| r.repo == repo))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    /// Names of the packages providing `capability`, sorted.
    pub fn providers(&self, capability: &str) -> Vec<&str> {
        self.provides
            .get(capability)
            .map(|names| names.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// All package names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::evr::Evr;

    pub(crate) fn record(name: &str, arch: &str, evr: &str, repo: &str) -> PackageRecord {
        PackageRecord {
            name: name.to_string(),
            evr: Evr::parse(evr).unwrap(),
            arch: arch.to_string(),
            license: "MIT".to_string(),
            summary: String::new(),
            description: String::new(),
            homepage: None,
            requires: Vec::new(),
            provides: vec![name.to_string()],
            files: Vec::new(),
            location: format!("Packages/{}-{}.{}.rpm", name, evr, arch),
            checksum: None,
            source_rpm: None,
            repo: repo.to_string(),
            source_url: format!("https://mirror/{}/Packages/{}-{}.{}.rpm", repo, name, evr, arch),
        }
    }

    #[test]
    fn test_best_prefers_newest_evr() {
        let mut catalog = Catalog::new("alma8", "x86_64");
        catalog.insert(record("bash", "x86_64", "4.4.19-10.el8", "BaseOS"));
        catalog.insert(record("bash", "x86_64", "4.4.20-1.el8", "BaseOS"));
        assert_eq!(catalog.best("bash").unwrap().evr.to_string(), "4.4.20-1.el8");
    }

    #[test]
    fn test_foreign_arch_skipped() {
        let mut catalog = Catalog::new("centos7", "x86_64");
        assert!(!catalog.insert(record("glibc", "i686", "2.17-317.el7", "os")));
        assert!(catalog.insert(record("glibc", "x86_64", "2.17-317.el7", "os")));
        assert_eq!(catalog.best("glibc").unwrap().arch, "x86_64");
    }

    #[test]
    fn test_best_in_repo() {
        let mut catalog = Catalog::new("alma8", "x86_64");
        catalog.insert(record("mesa-libGL", "x86_64", "20.0-1", "BaseOS"));
        catalog.insert(record("mesa-libGL", "x86_64", "21.0-1", "AppStream"));
        assert_eq!(catalog.best_in("mesa-libGL", "BaseOS").unwrap().evr.version, "20.0");
        assert_eq!(catalog.best("mesa-libGL").unwrap().repo, "AppStream");
        assert!(catalog.best_in("mesa-libGL", "PowerTools").is_none());
    }

    #[test]
    fn test_providers_include_files() {
        let mut catalog = Catalog::new("centos7", "x86_64");
        let mut bash = record("bash", "x86_64", "4.2.46-34.el7", "os");
        bash.files.push("/bin/sh".to_string());
        catalog.insert(bash);
        let mut dash = record("dash", "x86_64", "0.5-1", "os");
        dash.files.push("/bin/sh".to_string());
        catalog.insert(dash);

        assert_eq!(catalog.providers("/bin/sh"), vec!["bash", "dash"]);
        assert!(catalog.providers("/bin/zsh").is_empty());
    }
}
