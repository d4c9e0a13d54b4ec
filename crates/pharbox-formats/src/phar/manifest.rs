//! PHAR manifest records
//!
//! The manifest follows the stub and describes every entry:
//!
//! ```text
//! u32    manifest length (bytes after this field, entries included)
//! u32    entry count
//! [u8;2] API version, big-endian nibbles (0x11 0x10 = 1.1.1)
//! u32    global flags
//! u32    alias length, alias bytes
//! u32    metadata length, metadata bytes (PHP serialized)
//! entry records...
//! ```
//!
//! All integers are little-endian.

use binrw::{BinRead, BinWrite};

use crate::phar::constants::{API_VERSION, ENTRY_COMPRESSION_MASK, ENTRY_PERMISSION_MASK};
use crate::phar::error::{PharError, PharResult};

/// Size of the fixed part of an entry record (without name and metadata)
pub const ENTRY_RECORD_FIXED_SIZE: usize = 4 + 4 + 4 + 4 + 4 + 4 + 4;

/// Manifest header preceding the entry records
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[br(little)]
#[bw(little)]
pub struct ManifestHeader {
    /// Bytes following this field up to the first entry's contents
    pub manifest_length: u32,

    /// Number of entry records
    pub entry_count: u32,

    /// API version nibbles
    pub api_version: [u8; 2],

    /// Global flags (signature, compression summary)
    pub flags: u32,

    /// Alias length
    pub alias_length: u32,

    /// Alias used by `Phar::mapPhar()`
    #[br(count = alias_length)]
    pub alias: Vec<u8>,

    /// Metadata length
    pub metadata_length: u32,

    /// Serialized archive metadata
    #[br(count = metadata_length)]
    pub metadata: Vec<u8>,
}

impl ManifestHeader {
    /// Create a header; `manifest_length` is filled in by [`Self::finalize`]
    pub fn new(entry_count: u32, flags: u32, alias: &str, metadata: &[u8]) -> Self {
        Self {
            manifest_length: 0,
            entry_count,
            api_version: API_VERSION,
            flags,
            alias_length: alias.len() as u32,
            alias: alias.as_bytes().to_vec(),
            metadata_length: metadata.len() as u32,
            metadata: metadata.to_vec(),
        }
    }

    /// Encoded size of the header, excluding the leading length field
    pub fn body_len(&self) -> usize {
        4 + 2 + 4 + 4 + self.alias.len() + 4 + self.metadata.len()
    }

    /// Set `manifest_length` from the header and its entry records
    pub fn finalize(&mut self, records: &[EntryRecord]) -> PharResult<()> {
        let total = self.body_len() + records.iter().map(EntryRecord::encoded_len).sum::<usize>();
        self.manifest_length = u32::try_from(total).map_err(|_| {
            PharError::InvalidManifest(format!("manifest of {total} bytes exceeds 4 GiB"))
        })?;
        Ok(())
    }

    /// Check the API version is one this crate reads (1.1.x)
    pub fn validate(&self) -> PharResult<()> {
        if self.api_version[0] != API_VERSION[0] || self.api_version[1] & 0xF0 != API_VERSION[1] {
            return Err(PharError::UnsupportedApiVersion(self.api_version));
        }
        Ok(())
    }

    /// Alias as text (lossy)
    pub fn alias_str(&self) -> String {
        String::from_utf8_lossy(&self.alias).into_owned()
    }
}

/// Manifest record for a single entry
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[br(little)]
#[bw(little)]
pub struct EntryRecord {
    /// Name length
    pub name_length: u32,

    /// Entry path inside the archive, `/`-separated
    #[br(count = name_length)]
    pub name: Vec<u8>,

    /// Size before compression
    pub uncompressed_size: u32,

    /// Unix modification time
    pub timestamp: u32,

    /// Size as stored
    pub compressed_size: u32,

    /// CRC32 of the uncompressed contents
    pub crc32: u32,

    /// Permission bits and compression flags
    pub flags: u32,

    /// Metadata length
    pub metadata_length: u32,

    /// Serialized entry metadata
    #[br(count = metadata_length)]
    pub metadata: Vec<u8>,
}

impl EntryRecord {
    /// Encoded size of this record
    pub fn encoded_len(&self) -> usize {
        ENTRY_RECORD_FIXED_SIZE + self.name.len() + self.metadata.len()
    }

    /// Permission bits
    pub fn permissions(&self) -> u32 {
        self.flags & ENTRY_PERMISSION_MASK
    }

    /// Compression bits
    pub fn compression_flags(&self) -> u32 {
        self.flags & ENTRY_COMPRESSION_MASK
    }

    /// Name as text
    pub fn name_str(&self) -> PharResult<String> {
        String::from_utf8(self.name.clone()).map_err(|_| {
            PharError::InvalidManifest(format!(
                "entry name is not valid UTF-8: {}",
                String::from_utf8_lossy(&self.name)
            ))
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use binrw::io::Cursor;
    use pretty_assertions::assert_eq;

    fn record(name: &str) -> EntryRecord {
        EntryRecord {
            name_length: name.len() as u32,
            name: name.as_bytes().to_vec(),
            uncompressed_size: 5,
            timestamp: 1_700_000_000,
            compressed_size: 5,
            crc32: 0x3610_a686,
            flags: 0o644 | 0x1000,
            metadata_length: 0,
            metadata: Vec::new(),
        }
    }

    #[test]
    fn test_header_layout() {
        let header = ManifestHeader::new(1, 0x0001_0000, "app.phar", b"");
        let mut buffer = Vec::new();
        header
            .write(&mut Cursor::new(&mut buffer))
            .expect("write should succeed");

        assert_eq!(buffer.len(), 4 + header.body_len());
        assert_eq!(&buffer[8..10], &[0x11, 0x10]);
        assert_eq!(&buffer[10..14], &0x0001_0000u32.to_le_bytes());
        assert_eq!(&buffer[14..18], &8u32.to_le_bytes());
        assert_eq!(&buffer[18..26], b"app.phar");
    }

    #[test]
    fn test_finalize_counts_records() {
        let records = vec![record("index.php"), record("src/a.php")];
        let mut header = ManifestHeader::new(2, 0, "", b"");
        header.finalize(&records).expect("finalize should succeed");

        let expected = header.body_len() + records[0].encoded_len() + records[1].encoded_len();
        assert_eq!(header.manifest_length as usize, expected);
    }

    #[test]
    fn test_record_read_back() {
        let original = record("src/Kernel.php");
        let mut buffer = Vec::new();
        original
            .write(&mut Cursor::new(&mut buffer))
            .expect("write should succeed");
        assert_eq!(buffer.len(), original.encoded_len());

        let parsed = EntryRecord::read(&mut Cursor::new(&buffer)).expect("read should succeed");
        assert_eq!(parsed, original);
        assert_eq!(parsed.permissions(), 0o644);
        assert_eq!(parsed.compression_flags(), 0x1000);
    }

    #[test]
    fn test_api_version_validation() {
        let mut header = ManifestHeader::new(0, 0, "", b"");
        assert!(header.validate().is_ok());

        header.api_version = [0x11, 0x11];
        assert!(header.validate().is_ok());

        header.api_version = [0x10, 0x00];
        assert!(matches!(
            header.validate(),
            Err(PharError::UnsupportedApiVersion([0x10, 0x00]))
        ));
    }
}
