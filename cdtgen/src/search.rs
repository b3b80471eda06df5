//! Package name search across the repositories of a distro

use cdtgen_meta::config::RepoCoordinate;
use cdtgen_meta::RepodataClient;
use tracing::info;

use crate::Result;

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub term: String,
    /// Match the whole name instead of a case-insensitive substring
    pub exact: bool,
}

impl SearchQuery {
    pub fn matches(&self, name: &str) -> bool {
        if self.exact {
            name == self.term
        } else {
            name.to_lowercase().contains(&self.term.to_lowercase())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub name: String,
    /// `name-version-release.arch`
    pub full_name: String,
    pub repo: String,
}

/// Search the package names of one repository.
pub fn search_repo(client: &RepodataClient, coord: &RepoCoordinate, query: &SearchQuery) -> Result<Vec<SearchHit>> {
    info!("Searching in {}: {}", coord, coord.base_url);
    let mut hits = Vec::new();
    for raw in client.raw_entries(coord)? {
        let raw = raw?;
        if !query.matches(&raw.name) {
            continue;
        }
        let full_name = match &raw.rel {
            Some(rel) => format!("{}-{}-{}.{}", raw.name, raw.ver, rel, raw.arch),
            None => format!("{}-{}.{}", raw.name, raw.ver, raw.arch),
        };
        hits.push(SearchHit {
            name: raw.name,
            full_name,
            repo: coord.repo.clone(),
        });
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdtgen_meta::{BlobCache, MemoryFetcher};
    use std::sync::Arc;

    const PRIMARY: &str = r#"<metadata>
<package type="rpm"><name>shadow-utils</name><arch>x86_64</arch>
<version epoch="2" ver="4.9" rel="6.el9"/><location href="Packages/s.rpm"/></package>
<package type="rpm"><name>shadow-utils-subid</name><arch>x86_64</arch>
<version epoch="2" ver="4.9" rel="6.el9"/><location href="Packages/t.rpm"/></package>
<package type="rpm"><name>glibc</name><arch>x86_64</arch>
<version epoch="0" ver="2.34" rel="60.el9"/><location href="Packages/g.rpm"/></package>
</metadata>"#;

    fn client() -> (RepodataClient, RepoCoordinate) {
        let coord = RepoCoordinate {
            distro: "alma9".into(),
            architecture: "x86_64".into(),
            repo: "BaseOS".into(),
            base_url: "https://mirror/9/BaseOS/x86_64/os/".into(),
        };
        let fetcher = MemoryFetcher::new()
            .with_repository(&coord.base_url, PRIMARY.as_bytes())
            .unwrap();
        (
            RepodataClient::new(Arc::new(fetcher), Arc::new(BlobCache::memory())),
            coord,
        )
    }

    #[test]
    fn test_substring_search_is_case_insensitive() {
        let (client, coord) = client();
        let query = SearchQuery {
            term: "SHADOW".into(),
            exact: false,
        };
        let hits = search_repo(&client, &coord, &query).unwrap();
        let names: Vec<_> = hits.iter().map(|h| h.full_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["shadow-utils-4.9-6.el9.x86_64", "shadow-utils-subid-4.9-6.el9.x86_64"]
        );
        assert_eq!(hits[0].repo, "BaseOS");
    }

    #[test]
    fn test_exact_search() {
        let (client, coord) = client();
        let query = SearchQuery {
            term: "shadow-utils".into(),
            exact: true,
        };
        let hits = search_repo(&client, &coord, &query).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "shadow-utils");
    }
}
