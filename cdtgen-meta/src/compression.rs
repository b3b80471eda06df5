//! Decompression of repodata documents
//!
//! Repositories publish `primary.xml` as gzip (EL7/EL8), xz or zstd
//! (newer createrepo_c). The format is detected from magic bytes.

use std::io::Read;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    None,
    Gzip,
    Xz,
    Zstd,
}

impl CompressionFormat {
    /// Magic bytes: gzip `1f 8b`, xz `fd 37 7a 58 5a 00`, zstd `28 b5 2f fd`
    pub fn from_magic_bytes(data: &[u8]) -> Self {
        if data.starts_with(&[0x1f, 0x8b]) {
            Self::Gzip
        } else if data.starts_with(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]) {
            Self::Xz
        } else if data.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Self::Zstd
        } else {
            Self::None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Xz => "xz",
            Self::Zstd => "zstd",
        }
    }
}

/// Decompress `data`, detecting the format from its magic bytes.
pub fn decompress_auto(data: &[u8]) -> Result<Vec<u8>> {
    let format = CompressionFormat::from_magic_bytes(data);
    let mut output = Vec::new();
    let wrap = |source| Error::Decompress {
        format: format.name(),
        source,
    };

    match format {
        CompressionFormat::None => output.extend_from_slice(data),
        CompressionFormat::Gzip => {
            flate2::read::GzDecoder::new(data)
                .read_to_end(&mut output)
                .map_err(wrap)?;
        }
        CompressionFormat::Xz => {
            xz2::read::XzDecoder::new(data)
                .read_to_end(&mut output)
                .map_err(wrap)?;
        }
        CompressionFormat::Zstd => {
            zstd::Decoder::new(data)
                .map_err(wrap)?
                .read_to_end(&mut output)
                .map_err(wrap)?;
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_magic_detection() {
        assert_eq!(
            CompressionFormat::from_magic_bytes(&[0x1f, 0x8b, 0x08]),
            CompressionFormat::Gzip
        );
        assert_eq!(
            CompressionFormat::from_magic_bytes(&[0x28, 0xb5, 0x2f, 0xfd, 0x00]),
            CompressionFormat::Zstd
        );
        assert_eq!(
            CompressionFormat::from_magic_bytes(b"<?xml"),
            CompressionFormat::None
        );
    }

    #[test]
    fn test_gzip_roundtrip() {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"<metadata/>").unwrap();
        let compressed = encoder.finish().unwrap();

        assert_eq!(decompress_auto(&compressed).unwrap(), b"<metadata/>");
    }

    #[test]
    fn test_plain_passthrough() {
        assert_eq!(decompress_auto(b"<metadata/>").unwrap(), b"<metadata/>");
    }

    #[test]
    fn test_truncated_gzip_fails() {
        let err = decompress_auto(&[0x1f, 0x8b, 0x08, 0x00]).unwrap_err();
        assert!(matches!(err, Error::Decompress { format: "gzip", .. }));
    }
}
