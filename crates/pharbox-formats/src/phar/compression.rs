//! Per-entry compression codecs
//!
//! PHAR entries are compressed individually. GZ entries hold a raw deflate
//! stream (no zlib or gzip framing), BZ2 entries a complete bzip2 stream.
//! The codec is recorded in the entry flags.

use std::fmt;
use std::io::Read;

use flate2::Compression;
use flate2::read::{DeflateDecoder, DeflateEncoder};

use crate::phar::constants::{ENTRY_COMPRESSED_BZ2, ENTRY_COMPRESSED_GZ, ENTRY_COMPRESSION_MASK};
use crate::phar::error::{PharError, PharResult};

/// Archive-wide entry compression algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionAlgorithm {
    /// Stored as-is
    #[default]
    None,
    /// Raw deflate
    Gz,
    /// bzip2
    Bz2,
}

impl CompressionAlgorithm {
    /// Parse a configuration name (`NONE`, `GZ`, `BZ2`), case-insensitive
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "NONE" => Some(Self::None),
            "GZ" | "GZIP" => Some(Self::Gz),
            "BZ2" | "BZIP2" => Some(Self::Bz2),
            _ => None,
        }
    }

    /// Canonical name
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Gz => "GZ",
            Self::Bz2 => "BZ2",
        }
    }

    /// Entry flag bit
    pub const fn entry_flag(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Gz => ENTRY_COMPRESSED_GZ,
            Self::Bz2 => ENTRY_COMPRESSED_BZ2,
        }
    }

    /// Decode the compression bits of an entry's flags
    pub fn from_entry_flags(flags: u32) -> PharResult<Self> {
        match flags & ENTRY_COMPRESSION_MASK {
            0 => Ok(Self::None),
            ENTRY_COMPRESSED_GZ => Ok(Self::Gz),
            ENTRY_COMPRESSED_BZ2 => Ok(Self::Bz2),
            other => Err(PharError::InvalidManifest(format!(
                "unknown entry compression flags 0x{other:04x}"
            ))),
        }
    }

    /// PHP extension the archive needs at runtime to read such entries
    pub const fn required_extension(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Gz => Some("zlib"),
            Self::Bz2 => Some("bz2"),
        }
    }

    /// Cargo feature providing the codec, when it is optional
    pub const fn cargo_feature(self) -> Option<&'static str> {
        match self {
            Self::Bz2 => Some("bzip2"),
            Self::None | Self::Gz => None,
        }
    }

    /// Check whether the codec was compiled in
    pub const fn is_available(self) -> bool {
        match self {
            Self::None | Self::Gz => true,
            Self::Bz2 => cfg!(feature = "bzip2"),
        }
    }

    /// Error for a codec that was not compiled in
    pub fn unsupported_error(self) -> PharError {
        PharError::UnsupportedCompression {
            algorithm: self.name(),
            feature: self.cargo_feature().unwrap_or("default"),
            extension: self.required_extension().unwrap_or("none"),
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// CRC32 (IEEE) as stored in entry records
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}

/// Compress entry contents
pub fn compress(data: &[u8], algorithm: CompressionAlgorithm) -> PharResult<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Gz => {
            let mut encoder = DeflateEncoder::new(data, Compression::default());
            let mut compressed = Vec::new();
            encoder.read_to_end(&mut compressed).map_err(|e| {
                PharError::CompressionError(format!("deflate compression failed: {e}"))
            })?;
            Ok(compressed)
        }
        CompressionAlgorithm::Bz2 => compress_bz2(data),
    }
}

/// Decompress entry contents, bounded by the size recorded in the manifest
pub fn decompress(
    data: &[u8],
    algorithm: CompressionAlgorithm,
    expected_size: usize,
) -> PharResult<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Gz => read_bounded(DeflateDecoder::new(data), expected_size, "deflate"),
        CompressionAlgorithm::Bz2 => decompress_bz2(data, expected_size),
    }
}

#[cfg(feature = "bzip2")]
fn compress_bz2(data: &[u8]) -> PharResult<Vec<u8>> {
    let mut encoder = bzip2::read::BzEncoder::new(data, bzip2::Compression::default());
    let mut compressed = Vec::new();
    encoder
        .read_to_end(&mut compressed)
        .map_err(|e| PharError::CompressionError(format!("bzip2 compression failed: {e}")))?;
    Ok(compressed)
}

#[cfg(not(feature = "bzip2"))]
fn compress_bz2(_data: &[u8]) -> PharResult<Vec<u8>> {
    Err(CompressionAlgorithm::Bz2.unsupported_error())
}

#[cfg(feature = "bzip2")]
fn decompress_bz2(data: &[u8], expected_size: usize) -> PharResult<Vec<u8>> {
    read_bounded(bzip2::read::BzDecoder::new(data), expected_size, "bzip2")
}

#[cfg(not(feature = "bzip2"))]
fn decompress_bz2(_data: &[u8], _expected_size: usize) -> PharResult<Vec<u8>> {
    Err(CompressionAlgorithm::Bz2.unsupported_error())
}

/// Read at most one byte past `expected_size` so oversized streams are caught
fn read_bounded<R: Read>(decoder: R, expected_size: usize, codec: &str) -> PharResult<Vec<u8>> {
    let mut decompressed = Vec::with_capacity(expected_size);
    decoder
        .take(expected_size as u64 + 1)
        .read_to_end(&mut decompressed)
        .map_err(|e| PharError::CompressionError(format!("{codec} decompression failed: {e}")))?;

    if decompressed.len() != expected_size {
        return Err(PharError::CompressionError(format!(
            "{codec} stream does not match the recorded size of {expected_size} bytes"
        )));
    }

    Ok(decompressed)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &[u8] = b"<?php\n\nnamespace App;\n\nfinal class Kernel\n{\n}\n<?php\n\nnamespace App;\n";

    #[test]
    fn test_names() {
        assert_eq!(CompressionAlgorithm::from_name("gz"), Some(CompressionAlgorithm::Gz));
        assert_eq!(CompressionAlgorithm::from_name("BZIP2"), Some(CompressionAlgorithm::Bz2));
        assert_eq!(CompressionAlgorithm::from_name("none"), Some(CompressionAlgorithm::None));
        assert_eq!(CompressionAlgorithm::from_name("lz4"), None);
        assert_eq!(CompressionAlgorithm::Gz.to_string(), "GZ");
    }

    #[test]
    fn test_required_extension() {
        assert_eq!(CompressionAlgorithm::None.required_extension(), None);
        assert_eq!(CompressionAlgorithm::Gz.required_extension(), Some("zlib"));
        assert_eq!(CompressionAlgorithm::Bz2.required_extension(), Some("bz2"));
    }

    #[test]
    fn test_entry_flags() {
        for algorithm in [
            CompressionAlgorithm::None,
            CompressionAlgorithm::Gz,
            CompressionAlgorithm::Bz2,
        ] {
            let flags = 0o644 | algorithm.entry_flag();
            assert_eq!(
                CompressionAlgorithm::from_entry_flags(flags).unwrap(),
                algorithm
            );
        }
        assert!(CompressionAlgorithm::from_entry_flags(0x3000).is_err());
    }

    #[test]
    fn test_gz_is_raw_deflate() {
        let compressed = compress(SAMPLE, CompressionAlgorithm::Gz).expect("compress");
        // Raw deflate has no zlib (0x78) or gzip (0x1f 0x8b) header
        assert_ne!(compressed[0], 0x78);
        assert_ne!(&compressed[..2], &[0x1f, 0x8b]);

        let decompressed =
            decompress(&compressed, CompressionAlgorithm::Gz, SAMPLE.len()).expect("decompress");
        assert_eq!(decompressed, SAMPLE);
    }

    #[cfg(feature = "bzip2")]
    #[test]
    fn test_bz2_stream() {
        let compressed = compress(SAMPLE, CompressionAlgorithm::Bz2).expect("compress");
        assert_eq!(&compressed[..3], b"BZh");

        let decompressed =
            decompress(&compressed, CompressionAlgorithm::Bz2, SAMPLE.len()).expect("decompress");
        assert_eq!(decompressed, SAMPLE);
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let compressed = compress(SAMPLE, CompressionAlgorithm::Gz).expect("compress");
        let result = decompress(&compressed, CompressionAlgorithm::Gz, SAMPLE.len() - 1);
        assert!(matches!(result, Err(PharError::CompressionError(_))));
    }

    #[test]
    fn test_crc32_known_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0);
    }
}
