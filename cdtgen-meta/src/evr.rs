//! RPM epoch:version-release handling
//!
//! Ordering follows `rpmvercmp`: epochs compare numerically, then version and
//! release are split into alternating numeric/alphabetic segments. `~` sorts
//! before everything (pre-releases), `^` sorts after the base version but
//! before any further segment.

use std::cmp::Ordering;
use std::fmt;

use crate::{Error, Result};

/// A parsed RPM version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Evr {
    pub epoch: u64,
    pub version: String,
    pub release: Option<String>,
}

impl Evr {
    pub fn new(epoch: u64, version: impl Into<String>, release: Option<String>) -> Self {
        Self {
            epoch,
            version: version.into(),
            release,
        }
    }

    /// Parse `[epoch:]version[-release]`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (epoch, rest) = match s.split_once(':') {
            Some(("", rest)) => (0, rest),
            Some((e, rest)) => {
                let epoch = e
                    .parse::<u64>()
                    .map_err(|err| Error::Parse(format!("invalid epoch in '{}': {}", s, err)))?;
                (epoch, rest)
            }
            None => (0, s),
        };

        let (version, release) = match rest.split_once('-') {
            Some((v, r)) => (v, Some(r.to_string())),
            None => (rest, None),
        };

        if version.is_empty() {
            return Err(Error::Parse(format!("empty version in '{}'", s)));
        }

        Ok(Self::new(epoch, version, release))
    }

    /// Build from the `epoch`/`ver`/`rel` attribute triple used in repodata.
    pub fn from_attrs(epoch: Option<&str>, ver: &str, rel: Option<&str>) -> Result<Self> {
        let epoch = match epoch {
            None | Some("") => 0,
            Some(e) => e
                .parse::<u64>()
                .map_err(|err| Error::Parse(format!("invalid epoch '{}': {}", e, err)))?,
        };
        Ok(Self::new(
            epoch,
            ver,
            rel.filter(|r| !r.is_empty()).map(str::to_string),
        ))
    }
}

impl fmt::Display for Evr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.version)?;
        if let Some(ref release) = self.release {
            write!(f, "-{}", release)?;
        }
        Ok(())
    }
}

impl Ord for Evr {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| rpmvercmp(&self.version, &other.version))
            .then_with(|| match (&self.release, &other.release) {
                (Some(a), Some(b)) => rpmvercmp(a, b),
                (a, b) => a.is_some().cmp(&b.is_some()),
            })
    }
}

impl PartialOrd for Evr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn is_separator(b: u8) -> bool {
    !b.is_ascii_alphanumeric() && b != b'~' && b != b'^'
}

/// Compare two version (or release) strings the way rpm does.
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let mut one = a.as_bytes();
    let mut two = b.as_bytes();

    loop {
        while let Some((&c, rest)) = one.split_first() {
            if !is_separator(c) {
                break;
            }
            one = rest;
        }
        while let Some((&c, rest)) = two.split_first() {
            if !is_separator(c) {
                break;
            }
            two = rest;
        }

        let one_first = one.first().copied();
        let two_first = two.first().copied();

        if one_first == Some(b'~') || two_first == Some(b'~') {
            if one_first != Some(b'~') {
                return Ordering::Greater;
            }
            if two_first != Some(b'~') {
                return Ordering::Less;
            }
            one = &one[1..];
            two = &two[1..];
            continue;
        }

        if one_first == Some(b'^') || two_first == Some(b'^') {
            if one.is_empty() {
                return Ordering::Less;
            }
            if two.is_empty() {
                return Ordering::Greater;
            }
            if one_first != Some(b'^') {
                return Ordering::Greater;
            }
            if two_first != Some(b'^') {
                return Ordering::Less;
            }
            one = &one[1..];
            two = &two[1..];
            continue;
        }

        if one.is_empty() || two.is_empty() {
            break;
        }

        let numeric = one[0].is_ascii_digit();
        let take = |s: &[u8]| -> usize {
            s.iter()
                .take_while(|c| {
                    if numeric {
                        c.is_ascii_digit()
                    } else {
                        c.is_ascii_alphabetic()
                    }
                })
                .count()
        };

        let len_one = take(one);
        let len_two = take(two);
        let (seg_one, rest_one) = one.split_at(len_one);
        let (seg_two, rest_two) = two.split_at(len_two);

        // Segment types differ: numeric is newer than alpha.
        if seg_two.is_empty() {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let ord = if numeric {
            let trim = |s: &[u8]| -> usize { s.iter().take_while(|&&c| c == b'0').count() };
            let seg_one = &seg_one[trim(seg_one)..];
            let seg_two = &seg_two[trim(seg_two)..];
            seg_one.len().cmp(&seg_two.len()).then_with(|| seg_one.cmp(seg_two))
        } else {
            seg_one.cmp(seg_two)
        };

        if ord != Ordering::Equal {
            return ord;
        }

        one = rest_one;
        two = rest_two;
    }

    match (one.is_empty(), two.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        _ => Ordering::Greater,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let evr = Evr::parse("1:2.3.4-5.el8").unwrap();
        assert_eq!(evr.epoch, 1);
        assert_eq!(evr.version, "2.3.4");
        assert_eq!(evr.release.as_deref(), Some("5.el8"));
        assert_eq!(evr.to_string(), "1:2.3.4-5.el8");
    }

    #[test]
    fn test_parse_without_epoch_or_release() {
        let evr = Evr::parse("2.17").unwrap();
        assert_eq!(evr.epoch, 0);
        assert_eq!(evr.release, None);
        assert_eq!(evr.to_string(), "2.17");
    }

    #[test]
    fn test_parse_rejects_bad_epoch() {
        assert!(Evr::parse("x:1.0").is_err());
        assert!(Evr::parse("1:").is_err());
    }

    #[test]
    fn test_rpmvercmp_numeric_segments() {
        assert_eq!(rpmvercmp("1.10", "1.9"), Ordering::Greater);
        assert_eq!(rpmvercmp("1.010", "1.10"), Ordering::Equal);
        assert_eq!(rpmvercmp("2.17", "2.17.1"), Ordering::Less);
    }

    #[test]
    fn test_rpmvercmp_alpha_vs_numeric() {
        assert_eq!(rpmvercmp("1.0a", "1.0"), Ordering::Greater);
        assert_eq!(rpmvercmp("1.a", "1.1"), Ordering::Less);
        assert_eq!(rpmvercmp("el7", "el8"), Ordering::Less);
    }

    #[test]
    fn test_rpmvercmp_tilde_and_caret() {
        assert_eq!(rpmvercmp("1.0~rc1", "1.0"), Ordering::Less);
        assert_eq!(rpmvercmp("1.0~rc1", "1.0~rc2"), Ordering::Less);
        assert_eq!(rpmvercmp("1.0^git1", "1.0"), Ordering::Greater);
        assert_eq!(rpmvercmp("1.0^git1", "1.0.1"), Ordering::Less);
    }

    #[test]
    fn test_evr_ordering() {
        let a = Evr::parse("2.17-317.el7").unwrap();
        let b = Evr::parse("2.17-326.el7").unwrap();
        let c = Evr::parse("1:1.0-1").unwrap();
        assert!(a < b);
        assert!(b < c);
    }
}
