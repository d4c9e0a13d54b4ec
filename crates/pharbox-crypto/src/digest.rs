//! Message digests used by PHAR signatures
//!
//! PHAR hash signatures are plain digests of everything preceding the
//! signature trailer. Only the algorithms the container can still produce
//! are implemented; SHA-1 archives can be read but not verified.

use sha2::{Digest, Sha256, Sha512};

/// Digest algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    /// MD5 (legacy, 16 bytes)
    Md5,
    /// SHA-256 (32 bytes)
    Sha256,
    /// SHA-512 (64 bytes)
    Sha512,
}

impl DigestAlgorithm {
    /// Compute the digest of `data`
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Md5 => md5::compute(data).0.to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// Digest length in bytes
    pub const fn output_len(self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Display name, as PHP reports it
    pub const fn name(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha256 => "SHA-256",
            Self::Sha512 => "SHA-512",
        }
    }
}

/// Lowercase hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
