//! Error types for PHAR operations

use std::path::PathBuf;

use thiserror::Error;

/// PHAR operation result type
pub type PharResult<T> = Result<T, PharError>;

/// Errors raised while reading, building or writing PHAR archives
#[derive(Debug, Error)]
pub enum PharError {
    /// The stub does not contain `__HALT_COMPILER();`
    #[error("Invalid stub: missing __HALT_COMPILER(); token")]
    MissingHaltCompiler,

    /// Manifest API version is not 1.1.x
    #[error("Unsupported manifest API version: {0:02x?}")]
    UnsupportedApiVersion([u8; 2]),

    /// Manifest is truncated or inconsistent
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// Entry contents do not match their manifest record
    #[error("Corrupt entry {name}: {reason}")]
    CorruptEntry {
        /// Entry name
        name: String,
        /// What failed to match
        reason: String,
    },

    /// Entry name is empty or escapes the archive root
    #[error("Invalid entry name: {0:?}")]
    InvalidEntryName(String),

    /// Entry does not exist
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// Compression codec not compiled in
    #[error(
        "Unsupported compression algorithm {algorithm}: rebuild with the `{feature}` cargo \
         feature enabled (the archive will require the PHP `{extension}` extension)"
    )]
    UnsupportedCompression {
        /// Codec name
        algorithm: &'static str,
        /// Cargo feature that provides it
        feature: &'static str,
        /// PHP extension needed to read entries compressed with it
        extension: &'static str,
    },

    /// Compression or decompression failed
    #[error("Compression error: {0}")]
    CompressionError(String),

    /// Signature trailer is malformed or does not match
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Signature algorithm cannot be produced or checked
    #[error("Unsupported signature algorithm: {0}")]
    UnsupportedSignature(String),

    /// OpenSSL signature check without a public key
    #[error("Missing public key: {} (required to verify an OpenSSL signature)", .0.display())]
    MissingPublicKey(PathBuf),

    /// Buffering calls out of order
    #[error("Invalid archive state: {0}")]
    State(String),

    /// I/O error with the offending path
    #[error("I/O error on {}: {source}", path.display())]
    IoPath {
        /// Path being read or written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary read/write error
    #[error("Binary format error: {0}")]
    BinRw(#[from] binrw::Error),

    /// Directory traversal error
    #[error("Directory traversal error: {0}")]
    Walk(#[from] walkdir::Error),

    /// Key or signature primitive error
    #[error(transparent)]
    Crypto(#[from] pharbox_crypto::CryptoError),
}

impl PharError {
    /// Attach a path to an I/O error
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoPath {
            path: path.into(),
            source,
        }
    }

    /// The underlying OS error, if this is an I/O failure
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::IoPath { source, .. } | Self::Io(source) => source.raw_os_error(),
            _ => None,
        }
    }

    /// Check if the archive bytes themselves are at fault
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::MissingHaltCompiler
                | Self::UnsupportedApiVersion(_)
                | Self::InvalidManifest(_)
                | Self::CorruptEntry { .. }
                | Self::InvalidSignature(_)
                | Self::BinRw(_)
        )
    }
}
