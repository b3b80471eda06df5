//! `primary.xml` parsing
//!
//! [`PrimaryEntries`] streams raw `<package>` entries out of a (decompressed)
//! primary document; [`PackageRecord::from_raw`] normalizes one of them into
//! the structured record the rest of the pipeline works with.

use std::io::BufRead;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::checksum::Checksum;
use crate::depexpr::DependencyExpression;
use crate::evr::Evr;
use crate::xml::{attr, text};
use crate::Result;

/// An `rpm:entry` element of a provides/requires list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub name: String,
    pub flags: Option<String>,
    pub epoch: Option<String>,
    pub ver: Option<String>,
    pub rel: Option<String>,
}

impl RawEntry {
    fn from_element(e: &BytesStart<'_>) -> Result<Self> {
        Ok(Self {
            name: attr(e, b"name")?.unwrap_or_default(),
            flags: attr(e, b"flags")?,
            epoch: attr(e, b"epoch")?,
            ver: attr(e, b"ver")?,
            rel: attr(e, b"rel")?,
        })
    }
}

/// A `<package>` entry exactly as published
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPackage {
    pub name: String,
    pub arch: String,
    pub epoch: Option<String>,
    pub ver: String,
    pub rel: Option<String>,
    pub checksum: Option<Checksum>,
    pub summary: String,
    pub description: String,
    pub url: Option<String>,
    pub location: String,
    pub license: String,
    pub source_rpm: Option<String>,
    pub provides: Vec<RawEntry>,
    pub requires: Vec<RawEntry>,
    pub files: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Provides,
    Requires,
    Other,
}

enum TextTarget {
    Name,
    Arch,
    Checksum(String),
    Summary,
    Description,
    Url,
    License,
    SourceRpm,
    File,
}

/// Streaming iterator over the `<package>` entries of a primary document
pub struct PrimaryEntries<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    done: bool,
}

impl<R: BufRead> PrimaryEntries<R> {
    pub fn new(source: R) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.trim_text(true);
        Self {
            reader,
            buf: Vec::new(),
            done: false,
        }
    }

    fn next_package(&mut self) -> Result<Option<RawPackage>> {
        let mut current: Option<RawPackage> = None;
        let mut section = Section::None;
        let mut target: Option<TextTarget> = None;

        loop {
            self.buf.clear();
            let event = self.reader.read_event_into(&mut self.buf)?;
            match event {
                Event::Start(e) => {
                    let name = e.local_name();
                    let Some(pkg) = current.as_mut() else {
                        if name.as_ref() == b"package" {
                            current = Some(RawPackage::default());
                        }
                        continue;
                    };
                    match name.as_ref() {
                        b"name" => target = Some(TextTarget::Name),
                        b"arch" => target = Some(TextTarget::Arch),
                        b"checksum" => {
                            let algorithm = attr(&e, b"type")?.unwrap_or_else(|| "sha256".into());
                            target = Some(TextTarget::Checksum(algorithm));
                        }
                        b"summary" => target = Some(TextTarget::Summary),
                        b"description" => target = Some(TextTarget::Description),
                        b"url" => target = Some(TextTarget::Url),
                        b"license" => target = Some(TextTarget::License),
                        b"sourcerpm" => target = Some(TextTarget::SourceRpm),
                        b"file" => target = Some(TextTarget::File),
                        b"provides" => section = Section::Provides,
                        b"requires" => section = Section::Requires,
                        b"conflicts" | b"obsoletes" | b"recommends" | b"suggests"
                        | b"supplements" | b"enhances" => section = Section::Other,
                        b"version" => apply_version(pkg, &e)?,
                        b"location" => pkg.location = attr(&e, b"href")?.unwrap_or_default(),
                        b"entry" => push_entry(pkg, section, &e)?,
                        _ => {}
                    }
                }
                Event::Empty(e) => {
                    if let Some(pkg) = current.as_mut() {
                        match e.local_name().as_ref() {
                            b"version" => apply_version(pkg, &e)?,
                            b"location" => pkg.location = attr(&e, b"href")?.unwrap_or_default(),
                            b"entry" => push_entry(pkg, section, &e)?,
                            _ => {}
                        }
                    }
                }
                Event::Text(t) => {
                    if let (Some(pkg), Some(tgt)) = (current.as_mut(), target.take()) {
                        let value = text(&t)?;
                        match tgt {
                            TextTarget::Name => pkg.name = value,
                            TextTarget::Arch => pkg.arch = value,
                            TextTarget::Checksum(algo) => pkg.checksum = Some(Checksum::new(algo, value)),
                            TextTarget::Summary => pkg.summary = value,
                            TextTarget::Description => pkg.description = value,
                            TextTarget::Url => pkg.url = Some(value),
                            TextTarget::License => pkg.license = value,
                            TextTarget::SourceRpm => pkg.source_rpm = Some(value),
                            TextTarget::File => pkg.files.push(value),
                        }
                    }
                }
                Event::End(e) => {
                    target = None;
                    match e.local_name().as_ref() {
                        b"provides" | b"requires" | b"conflicts" | b"obsoletes" | b"recommends"
                        | b"suggests" | b"supplements" | b"enhances" => section = Section::None,
                        b"package" => {
                            if let Some(pkg) = current.take() {
                                return Ok(Some(pkg));
                            }
                        }
                        _ => {}
                    }
                }
                Event::Eof => return Ok(None),
                _ => {}
            }
        }
    }
}

fn apply_version(pkg: &mut RawPackage, e: &BytesStart<'_>) -> Result<()> {
    pkg.epoch = attr(e, b"epoch")?;
    pkg.ver = attr(e, b"ver")?.unwrap_or_default();
    pkg.rel = attr(e, b"rel")?;
    Ok(())
}

fn push_entry(pkg: &mut RawPackage, section: Section, e: &BytesStart<'_>) -> Result<()> {
    match section {
        Section::Provides => pkg.provides.push(RawEntry::from_element(e)?),
        Section::Requires => pkg.requires.push(RawEntry::from_element(e)?),
        Section::None | Section::Other => {}
    }
    Ok(())
}

impl<R: BufRead> Iterator for PrimaryEntries<R> {
    type Item = Result<RawPackage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_package() {
            Ok(Some(pkg)) => Some(Ok(pkg)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// A binary package of a distro repository, normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    pub name: String,
    pub evr: Evr,
    pub arch: String,
    pub license: String,
    pub summary: String,
    pub description: String,
    pub homepage: Option<String>,
    pub requires: Vec<DependencyExpression>,
    pub provides: Vec<String>,
    pub files: Vec<String>,
    pub location: String,
    pub checksum: Option<Checksum>,
    pub source_rpm: Option<String>,
    /// Repository subfolder the record was read from
    pub repo: String,
    /// Absolute URL of the binary RPM
    pub source_url: String,
}

impl PackageRecord {
    /// Normalize a raw entry read from `repo` served at `base_url`.
    ///
    /// `rpmlib(...)` requirements describe rpm features, not packages, and
    /// are dropped here.
    pub fn from_raw(raw: RawPackage, repo: &str, base_url: &str) -> Result<Self> {
        let evr = Evr::from_attrs(raw.epoch.as_deref(), &raw.ver, raw.rel.as_deref())?;

        let requires = raw
            .requires
            .iter()
            .filter(|e| !e.name.starts_with("rpmlib("))
            .map(|e| {
                DependencyExpression::from_entry(
                    &e.name,
                    e.flags.as_deref(),
                    e.epoch.as_deref(),
                    e.ver.as_deref(),
                    e.rel.as_deref(),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let provides = raw.provides.into_iter().map(|e| e.name).collect();
        let source_url = join_url(base_url, &raw.location);

        Ok(Self {
            name: raw.name,
            evr,
            arch: raw.arch,
            license: raw.license,
            summary: raw.summary,
            description: raw.description,
            homepage: raw.url,
            requires,
            provides,
            files: raw.files,
            location: raw.location,
            checksum: raw.checksum,
            source_rpm: raw.source_rpm,
            repo: repo.to_string(),
            source_url,
        })
    }

    /// Upstream version without epoch or release
    pub fn version(&self) -> &str {
        &self.evr.version
    }

    /// `name-version-release.arch`
    pub fn nvra(&self) -> String {
        match &self.evr.release {
            Some(rel) => format!("{}-{}-{}.{}", self.name, self.evr.version, rel, self.arch),
            None => format!("{}-{}.{}", self.name, self.evr.version, self.arch),
        }
    }
}

/// Join a repository base URL and a relative location.
pub fn join_url(base: &str, location: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        location.trim_start_matches('/')
    )
}

/// Parse every record of a decompressed primary document.
pub fn parse_primary(xml: &[u8], repo: &str, base_url: &str) -> Result<Vec<PackageRecord>> {
    PrimaryEntries::new(xml)
        .map(|raw| raw.and_then(|raw| PackageRecord::from_raw(raw, repo, base_url)))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::depexpr::{Comparison, Requirement};

    pub(crate) const PRIMARY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="2">
<package type="rpm">
  <name>libX11</name>
  <arch>x86_64</arch>
  <version epoch="0" ver="1.6.7" rel="4.el7_9"/>
  <checksum type="sha256" pkgid="YES">aaaa</checksum>
  <summary>Core X11 protocol client library</summary>
  <description>Core X11 protocol client library.</description>
  <url>http://www.x.org</url>
  <location href="Packages/libX11-1.6.7-4.el7_9.x86_64.rpm"/>
  <format>
    <rpm:license>MIT</rpm:license>
    <rpm:sourcerpm>libX11-1.6.7-4.el7_9.src.rpm</rpm:sourcerpm>
    <rpm:provides>
      <rpm:entry name="libX11" flags="EQ" epoch="0" ver="1.6.7" rel="4.el7_9"/>
      <rpm:entry name="libX11.so.6()(64bit)"/>
    </rpm:provides>
    <rpm:requires>
      <rpm:entry name="rpmlib(CompressedFileNames)" flags="LE" epoch="0" ver="3.0.4" rel="1" pre="1"/>
      <rpm:entry name="libX11-common" flags="GE" epoch="0" ver="1.6.7" rel="4.el7_9"/>
      <rpm:entry name="(libxcb or libxcb-compat)"/>
    </rpm:requires>
    <rpm:conflicts>
      <rpm:entry name="libX11-ancient"/>
    </rpm:conflicts>
    <file>/usr/lib64/libX11.so.6</file>
  </format>
</package>
<package type="rpm">
  <name>libX11-common</name>
  <arch>noarch</arch>
  <version epoch="0" ver="1.6.7" rel="4.el7_9"/>
  <location href="Packages/libX11-common-1.6.7-4.el7_9.noarch.rpm"/>
  <format>
    <rpm:license>MIT</rpm:license>
  </format>
</package>
</metadata>"#;

    #[test]
    fn test_stream_raw_entries() {
        let entries: Vec<_> = PrimaryEntries::new(PRIMARY.as_bytes())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(entries.len(), 2);

        let x11 = &entries[0];
        assert_eq!(x11.name, "libX11");
        assert_eq!(x11.ver, "1.6.7");
        assert_eq!(x11.license, "MIT");
        assert_eq!(x11.provides.len(), 2);
        // conflicts are not mixed into requires
        assert_eq!(x11.requires.len(), 3);
        assert_eq!(x11.files, vec!["/usr/lib64/libX11.so.6"]);
        assert_eq!(x11.checksum, Some(Checksum::new("sha256", "aaaa")));
    }

    #[test]
    fn test_record_normalization() {
        let records = parse_primary(PRIMARY.as_bytes(), "os", "https://mirror/7/os/x86_64/").unwrap();
        let x11 = &records[0];

        assert_eq!(
            x11.source_url,
            "https://mirror/7/os/x86_64/Packages/libX11-1.6.7-4.el7_9.x86_64.rpm"
        );
        assert_eq!(x11.nvra(), "libX11-1.6.7-4.el7_9.x86_64");
        assert_eq!(x11.version(), "1.6.7");
        assert_eq!(x11.repo, "os");

        // rpmlib() dropped; the rich dependency keeps its tree shape
        assert_eq!(x11.requires.len(), 2);
        assert_eq!(
            x11.requires[0],
            DependencyExpression::Leaf(Requirement::versioned(
                "libX11-common",
                Comparison::Ge,
                Evr::parse("1.6.7-4.el7_9").unwrap()
            ))
        );
        assert_eq!(
            x11.requires[1],
            DependencyExpression::Or(vec![
                DependencyExpression::Leaf(Requirement::unversioned("libxcb")),
                DependencyExpression::Leaf(Requirement::unversioned("libxcb-compat")),
            ])
        );
    }

    #[test]
    fn test_malformed_document_reports_error() {
        let xml = b"<metadata><package><name>x</name></wrong></metadata>";
        let result: Result<Vec<_>> = PrimaryEntries::new(&xml[..]).collect();
        assert!(result.is_err());
    }
}
