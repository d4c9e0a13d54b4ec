//! In-memory PHAR archive model with parse and build

use std::collections::BTreeMap;
use std::io::Cursor;

use binrw::{BinRead, BinWrite};
use tracing::debug;

use crate::phar::compression::{self, CompressionAlgorithm};
use crate::phar::constants::{
    DEFAULT_FILE_PERMISSIONS, ENTRY_PERMISSION_MASK, FLAG_SIGNATURE, HEADER_COMPRESSED_BZ2,
    HEADER_COMPRESSED_GZ,
};
use crate::phar::error::{PharError, PharResult};
use crate::phar::manifest::{ENTRY_RECORD_FIXED_SIZE, EntryRecord, ManifestHeader};
use crate::phar::signature::{Signature, SignatureAlgorithm};
use crate::phar::stub::{DEFAULT_STUB, manifest_offset, normalize_stub};

/// Normalize an entry name to the `/`-separated relative form PHAR uses
///
/// Backslashes become slashes, leading `/` and `./` are dropped, `.`
/// segments are removed. Empty names and `..` segments are rejected.
pub fn normalize_entry_name(name: &str) -> PharResult<String> {
    let unified = name.replace('\\', "/");
    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(PharError::InvalidEntryName(name.to_string())),
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Err(PharError::InvalidEntryName(name.to_string()));
    }

    Ok(segments.join("/"))
}

/// A file stored in the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PharEntry {
    /// Path inside the archive
    pub name: String,
    /// Uncompressed contents
    pub contents: Vec<u8>,
    /// Codec applied when the archive is written
    pub compression: CompressionAlgorithm,
    /// Unix modification time
    pub timestamp: u32,
    /// Permission bits
    pub permissions: u32,
    /// Serialized entry metadata
    pub metadata: Vec<u8>,
}

impl PharEntry {
    /// Create an uncompressed entry with default permissions
    pub fn new(name: &str, contents: Vec<u8>, timestamp: u32) -> PharResult<Self> {
        Ok(Self {
            name: normalize_entry_name(name)?,
            contents,
            compression: CompressionAlgorithm::None,
            timestamp,
            permissions: DEFAULT_FILE_PERMISSIONS,
            metadata: Vec::new(),
        })
    }

    /// Check whether the entry is stored compressed
    pub fn is_compressed(&self) -> bool {
        self.compression != CompressionAlgorithm::None
    }
}

/// Complete archive: stub, manifest fields and entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PharFile {
    /// Normalized stub, ending with `__HALT_COMPILER(); ?>\r\n`
    pub stub: Vec<u8>,
    /// Alias used by `Phar::mapPhar()`
    pub alias: String,
    /// Serialized archive metadata
    pub metadata: Vec<u8>,
    /// Entries keyed by name
    pub entries: BTreeMap<String, PharEntry>,
    /// Signature found when parsing, if any
    pub signature: Option<Signature>,
}

impl Default for PharFile {
    fn default() -> Self {
        Self {
            stub: DEFAULT_STUB.as_bytes().to_vec(),
            alias: String::new(),
            metadata: Vec::new(),
            entries: BTreeMap::new(),
            signature: None,
        }
    }
}

impl PharFile {
    /// Create an empty archive with the default stub
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stub
    pub fn set_stub(&mut self, stub: &[u8]) -> PharResult<()> {
        self.stub = normalize_stub(stub)?;
        Ok(())
    }

    /// Insert or replace an entry
    pub fn insert(&mut self, entry: PharEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    /// Parse a complete archive
    pub fn parse(data: &[u8]) -> PharResult<Self> {
        let offset = manifest_offset(data)?;
        let stub = data[..offset].to_vec();

        let mut cursor = Cursor::new(&data[offset..]);
        let header = ManifestHeader::read(&mut cursor)?;
        header.validate()?;

        let manifest_end = offset
            .checked_add(4)
            .and_then(|start| start.checked_add(header.manifest_length as usize))
            .filter(|end| *end <= data.len())
            .ok_or_else(|| {
                PharError::InvalidManifest(format!(
                    "manifest length {} exceeds archive size {}",
                    header.manifest_length,
                    data.len()
                ))
            })?;

        // Each record takes at least the fixed part, which bounds the count
        let max_entries = (manifest_end - offset) / ENTRY_RECORD_FIXED_SIZE;
        if header.entry_count as usize > max_entries {
            return Err(PharError::InvalidManifest(format!(
                "entry count {} does not fit in a {} byte manifest",
                header.entry_count, header.manifest_length
            )));
        }

        let mut records = Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            records.push(EntryRecord::read(&mut cursor)?);
        }

        if offset + cursor.position() as usize != manifest_end {
            return Err(PharError::InvalidManifest(format!(
                "manifest length {} does not match its records",
                header.manifest_length
            )));
        }

        let signature = if header.flags & FLAG_SIGNATURE != 0 {
            Some(Signature::parse(data)?)
        } else {
            None
        };
        let contents_end = signature.as_ref().map_or(data.len(), |s| s.signed_len);

        let mut position = manifest_end;
        let mut entries = BTreeMap::new();
        for record in records {
            let name = record.name_str()?;
            let end = position
                .checked_add(record.compressed_size as usize)
                .filter(|end| *end <= contents_end)
                .ok_or_else(|| PharError::CorruptEntry {
                    name: name.clone(),
                    reason: "contents run past the end of the archive".to_string(),
                })?;

            let compression = CompressionAlgorithm::from_entry_flags(record.flags)?;
            let contents = compression::decompress(
                &data[position..end],
                compression,
                record.uncompressed_size as usize,
            )
            .map_err(|e| PharError::CorruptEntry {
                name: name.clone(),
                reason: e.to_string(),
            })?;

            let crc = compression::crc32(&contents);
            if crc != record.crc32 {
                return Err(PharError::CorruptEntry {
                    name,
                    reason: format!("CRC32 mismatch: expected {:08x}, got {crc:08x}", record.crc32),
                });
            }

            position = end;
            entries.insert(
                name.clone(),
                PharEntry {
                    name,
                    contents,
                    compression,
                    timestamp: record.timestamp,
                    permissions: record.permissions(),
                    metadata: record.metadata,
                },
            );
        }

        debug!(
            "Parsed PHAR: {} entries, alias {:?}, signature {:?}",
            entries.len(),
            header.alias_str(),
            signature.as_ref().map(|s| s.kind)
        );

        Ok(Self {
            stub,
            alias: header.alias_str(),
            metadata: header.metadata,
            entries,
            signature,
        })
    }

    /// Build the archive bytes, signed with `algorithm`
    pub fn build(&self, algorithm: &SignatureAlgorithm) -> PharResult<Vec<u8>> {
        let mut flags = FLAG_SIGNATURE;
        let mut records = Vec::with_capacity(self.entries.len());
        let mut payloads = Vec::with_capacity(self.entries.len());

        for entry in self.entries.values() {
            let stored = compression::compress(&entry.contents, entry.compression)?;
            flags |= match entry.compression {
                CompressionAlgorithm::None => 0,
                CompressionAlgorithm::Gz => HEADER_COMPRESSED_GZ,
                CompressionAlgorithm::Bz2 => HEADER_COMPRESSED_BZ2,
            };

            records.push(EntryRecord {
                name_length: to_u32(entry.name.len(), &entry.name)?,
                name: entry.name.as_bytes().to_vec(),
                uncompressed_size: to_u32(entry.contents.len(), &entry.name)?,
                timestamp: entry.timestamp,
                compressed_size: to_u32(stored.len(), &entry.name)?,
                crc32: compression::crc32(&entry.contents),
                flags: (entry.permissions & ENTRY_PERMISSION_MASK) | entry.compression.entry_flag(),
                metadata_length: to_u32(entry.metadata.len(), &entry.name)?,
                metadata: entry.metadata.clone(),
            });
            payloads.push(stored);
        }

        let entry_count = u32::try_from(records.len())
            .map_err(|_| PharError::InvalidManifest("too many entries".to_string()))?;
        let mut header = ManifestHeader::new(entry_count, flags, &self.alias, &self.metadata);
        header.finalize(&records)?;

        let mut manifest = Vec::new();
        {
            let mut cursor = Cursor::new(&mut manifest);
            header.write(&mut cursor)?;
            for record in &records {
                record.write(&mut cursor)?;
            }
        }

        let payload_len: usize = payloads.iter().map(Vec::len).sum();
        let mut data = Vec::with_capacity(self.stub.len() + manifest.len() + payload_len + 80);
        data.extend_from_slice(&self.stub);
        data.extend_from_slice(&manifest);
        for payload in &payloads {
            data.extend_from_slice(payload);
        }

        let trailer = algorithm.trailer(&data)?;
        data.extend_from_slice(&trailer);
        Ok(data)
    }
}

fn to_u32(value: usize, name: &str) -> PharResult<u32> {
    u32::try_from(value).map_err(|_| PharError::CorruptEntry {
        name: name.to_string(),
        reason: "entry larger than 4 GiB".to_string(),
    })
}
