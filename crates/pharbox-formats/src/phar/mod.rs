//! PHAR archive container
//!
//! A PHAR is a PHP bootstrap stub followed by a binary manifest, the entry
//! contents and an optional signature trailer:
//!
//! ```text
//! <?php ... __HALT_COMPILER(); ?>\r\n
//! [manifest header][entry record]...
//! [entry contents]...
//! [signature]["GBMB"]
//! ```
//!
//! [`PharFile`] parses and builds the complete byte layout. [`Phar`] binds an
//! archive to a path on disk with PHP's buffering semantics: mutations are
//! written through unless a buffering session is open.
//!
//! # Usage
//!
//! ```rust,no_run
//! use pharbox_formats::phar::{CompressionAlgorithm, Phar};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut phar = Phar::create("build/app.phar", "app.phar")?;
//! phar.start_buffering()?;
//! phar.add_from_string("index.php", "<?php echo 'hello';")?;
//! phar.set_stub(b"#!/usr/bin/env php\n<?php Phar::mapPhar('app.phar'); require 'phar://app.phar/index.php'; __HALT_COMPILER();")?;
//! phar.compress_files(CompressionAlgorithm::Gz)?;
//! phar.stop_buffering()?;
//! # Ok(())
//! # }
//! ```

mod archive;
mod compression;
mod error;
mod file;
mod manifest;
pub mod metadata;
mod signature;
mod stub;

pub use archive::{Phar, public_key_path};
pub use compression::{CompressionAlgorithm, compress, crc32, decompress};
pub use error::{PharError, PharResult};
pub use file::{PharEntry, PharFile, normalize_entry_name};
pub use manifest::{ENTRY_RECORD_FIXED_SIZE, EntryRecord, ManifestHeader};
pub use signature::{Signature, SignatureAlgorithm, SignatureType};
pub use stub::{DEFAULT_STUB, manifest_offset, normalize_stub};

/// PHAR format constants
pub mod constants {
    /// Token that ends the stub
    pub const HALT_COMPILER: &str = "__HALT_COMPILER();";

    /// Manifest API version written by this crate (1.1.1)
    pub const API_VERSION: [u8; 2] = [0x11, 0x10];

    /// Magic closing a signature trailer
    pub const SIGNATURE_MAGIC: &[u8; 4] = b"GBMB";

    /// Global flag: the archive carries a signature
    pub const FLAG_SIGNATURE: u32 = 0x0001_0000;

    /// Global flag: at least one entry is deflate-compressed
    pub const HEADER_COMPRESSED_GZ: u32 = 0x0000_1000;

    /// Global flag: at least one entry is bzip2-compressed
    pub const HEADER_COMPRESSED_BZ2: u32 = 0x0000_2000;

    /// Entry flag: contents are deflate-compressed
    pub const ENTRY_COMPRESSED_GZ: u32 = 0x0000_1000;

    /// Entry flag: contents are bzip2-compressed
    pub const ENTRY_COMPRESSED_BZ2: u32 = 0x0000_2000;

    /// Compression bits of the entry flags
    pub const ENTRY_COMPRESSION_MASK: u32 = 0x0000_F000;

    /// Permission bits of the entry flags
    pub const ENTRY_PERMISSION_MASK: u32 = 0x0000_01FF;

    /// Permissions given to new entries and written archives
    pub const DEFAULT_FILE_PERMISSIONS: u32 = 0o644;
}
