//! Repository index (`repodata/repomd.xml`) parsing
//!
//! The index lists the metadata documents of a repository together with
//! their location and checksum.

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::checksum::Checksum;
use crate::xml::{attr, text};
use crate::{Error, Result};

/// Path of the index below a repository base URL
pub const REPOMD_PATH: &str = "repodata/repomd.xml";

/// One `<data>` entry of the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoData {
    /// Document type (`primary`, `filelists`, `other`, ...)
    pub data_type: String,
    /// Location relative to the repository base URL
    pub location: String,
    /// Checksum of the document as published (compressed)
    pub checksum: Checksum,
    /// Checksum of the decompressed document
    pub open_checksum: Option<Checksum>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct RepoMd {
    pub revision: Option<String>,
    pub data: Vec<RepoData>,
}

#[derive(Default)]
struct PendingData {
    data_type: String,
    location: Option<String>,
    checksum: Option<Checksum>,
    open_checksum: Option<Checksum>,
    size: Option<u64>,
}

enum TextTarget {
    Revision,
    Checksum(String),
    OpenChecksum(String),
    Size,
}

impl RepoMd {
    pub fn from_xml(xml: &[u8]) -> Result<Self> {
        let mut reader = Reader::from_reader(xml);
        reader.trim_text(true);

        let mut repomd = RepoMd::default();
        let mut pending: Option<PendingData> = None;
        let mut target: Option<TextTarget> = None;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"revision" => target = Some(TextTarget::Revision),
                    b"data" => {
                        pending = Some(PendingData {
                            data_type: attr(&e, b"type")?.unwrap_or_default(),
                            ..Default::default()
                        })
                    }
                    b"checksum" if pending.is_some() => {
                        let algorithm = attr(&e, b"type")?.unwrap_or_else(|| "sha256".into());
                        target = Some(TextTarget::Checksum(algorithm));
                    }
                    b"open-checksum" if pending.is_some() => {
                        let algorithm = attr(&e, b"type")?.unwrap_or_else(|| "sha256".into());
                        target = Some(TextTarget::OpenChecksum(algorithm));
                    }
                    b"size" if pending.is_some() => target = Some(TextTarget::Size),
                    b"location" => {
                        if let Some(p) = pending.as_mut() {
                            p.location = attr(&e, b"href")?;
                        }
                    }
                    _ => {}
                },
                Event::Empty(e) => {
                    if e.local_name().as_ref() == b"location" {
                        if let Some(p) = pending.as_mut() {
                            p.location = attr(&e, b"href")?;
                        }
                    }
                }
                Event::Text(t) => {
                    let value = text(&t)?;
                    match (target.take(), pending.as_mut()) {
                        (Some(TextTarget::Revision), _) => repomd.revision = Some(value),
                        (Some(TextTarget::Checksum(algo)), Some(p)) => {
                            p.checksum = Some(Checksum::new(algo, value))
                        }
                        (Some(TextTarget::OpenChecksum(algo)), Some(p)) => {
                            p.open_checksum = Some(Checksum::new(algo, value))
                        }
                        (Some(TextTarget::Size), Some(p)) => p.size = value.parse().ok(),
                        _ => {}
                    }
                }
                Event::End(e) => {
                    target = None;
                    if e.local_name().as_ref() == b"data" {
                        if let Some(p) = pending.take() {
                            repomd.data.push(finish(p)?);
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        Ok(repomd)
    }

    pub fn get(&self, data_type: &str) -> Option<&RepoData> {
        self.data.iter().find(|d| d.data_type == data_type)
    }

    /// The `primary` entry, which every usable repository must publish.
    pub fn primary(&self) -> Result<&RepoData> {
        self.get("primary")
            .ok_or_else(|| Error::Parse("repomd.xml has no primary data entry".into()))
    }
}

fn finish(p: PendingData) -> Result<RepoData> {
    let location = p.location.ok_or_else(|| {
        Error::Parse(format!("repomd data '{}' has no location", p.data_type))
    })?;
    let checksum = p.checksum.ok_or_else(|| {
        Error::Parse(format!("repomd data '{}' has no checksum", p.data_type))
    })?;
    Ok(RepoData {
        data_type: p.data_type,
        location,
        checksum,
        open_checksum: p.open_checksum,
        size: p.size,
    })
}
