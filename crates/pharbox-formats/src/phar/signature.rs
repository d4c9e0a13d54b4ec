//! Signature trailer
//!
//! Signed archives end with a trailer that covers every preceding byte:
//!
//! ```text
//! hash signatures:     [digest][u32 flags]["GBMB"]
//! OpenSSL signatures:  [signature][u32 signature length][u32 flags]["GBMB"]
//! ```

use std::fmt;

use pharbox_crypto::{DigestAlgorithm, PrivateKey, PublicKey, SignatureHash};

use crate::phar::constants::SIGNATURE_MAGIC;
use crate::phar::error::{PharError, PharResult};

/// Signature type as recorded in the trailer flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureType {
    /// MD5 digest
    Md5,
    /// SHA-1 digest (readable, not produced)
    Sha1,
    /// SHA-256 digest
    Sha256,
    /// SHA-512 digest
    Sha512,
    /// RSA over SHA-1 (readable, not produced)
    OpenSsl,
    /// RSA over SHA-256
    OpenSslSha256,
    /// RSA over SHA-512
    OpenSslSha512,
}

impl SignatureType {
    /// Decode trailer flags
    pub fn from_flags(flags: u32) -> PharResult<Self> {
        match flags {
            0x0001 => Ok(Self::Md5),
            0x0002 => Ok(Self::Sha1),
            0x0003 => Ok(Self::Sha256),
            0x0004 => Ok(Self::Sha512),
            0x0010 => Ok(Self::OpenSsl),
            0x0011 => Ok(Self::OpenSslSha256),
            0x0012 => Ok(Self::OpenSslSha512),
            other => Err(PharError::InvalidSignature(format!(
                "unknown signature flags 0x{other:04x}"
            ))),
        }
    }

    /// Trailer flags
    pub const fn flags(self) -> u32 {
        match self {
            Self::Md5 => 0x0001,
            Self::Sha1 => 0x0002,
            Self::Sha256 => 0x0003,
            Self::Sha512 => 0x0004,
            Self::OpenSsl => 0x0010,
            Self::OpenSslSha256 => 0x0011,
            Self::OpenSslSha512 => 0x0012,
        }
    }

    /// Check for RSA signatures, which carry an explicit length
    pub const fn is_openssl(self) -> bool {
        matches!(
            self,
            Self::OpenSsl | Self::OpenSslSha256 | Self::OpenSslSha512
        )
    }

    /// Fixed digest length of hash signatures
    pub const fn digest_len(self) -> Option<usize> {
        match self {
            Self::Md5 => Some(16),
            Self::Sha1 => Some(20),
            Self::Sha256 => Some(32),
            Self::Sha512 => Some(64),
            Self::OpenSsl | Self::OpenSslSha256 | Self::OpenSslSha512 => None,
        }
    }

    /// Name as reported by `Phar::getSignature()`
    pub const fn name(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA-1",
            Self::Sha256 => "SHA-256",
            Self::Sha512 => "SHA-512",
            Self::OpenSsl => "OpenSSL",
            Self::OpenSslSha256 => "OpenSSL_SHA256",
            Self::OpenSslSha512 => "OpenSSL_SHA512",
        }
    }
}

impl fmt::Display for SignatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Algorithm used when writing an archive
#[derive(Debug, Clone, Default)]
pub enum SignatureAlgorithm {
    /// MD5 digest
    Md5,
    /// SHA-256 digest
    #[default]
    Sha256,
    /// SHA-512 digest
    Sha512,
    /// RSA PKCS#1 v1.5 over SHA-256 with the given private key
    OpenSsl(PrivateKey),
}

impl SignatureAlgorithm {
    /// Parse a configuration name; `OPENSSL` needs a key and is rejected here
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "MD5" => Some(Self::Md5),
            "SHA256" | "SHA-256" => Some(Self::Sha256),
            "SHA512" | "SHA-512" => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Type recorded in the trailer
    pub const fn signature_type(&self) -> SignatureType {
        match self {
            Self::Md5 => SignatureType::Md5,
            Self::Sha256 => SignatureType::Sha256,
            Self::Sha512 => SignatureType::Sha512,
            Self::OpenSsl(_) => SignatureType::OpenSslSha256,
        }
    }

    /// Build the trailer for `data`
    pub fn trailer(&self, data: &[u8]) -> PharResult<Vec<u8>> {
        let kind = self.signature_type();
        let mut trailer = match self {
            Self::Md5 => DigestAlgorithm::Md5.digest(data),
            Self::Sha256 => DigestAlgorithm::Sha256.digest(data),
            Self::Sha512 => DigestAlgorithm::Sha512.digest(data),
            Self::OpenSsl(key) => {
                let mut signature = key.sign(SignatureHash::Sha256, data)?;
                let length = u32::try_from(signature.len()).map_err(|_| {
                    PharError::InvalidSignature("signature larger than 4 GiB".to_string())
                })?;
                signature.extend_from_slice(&length.to_le_bytes());
                signature
            }
        };
        trailer.extend_from_slice(&kind.flags().to_le_bytes());
        trailer.extend_from_slice(SIGNATURE_MAGIC);
        Ok(trailer)
    }
}

/// Parsed signature trailer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Signature type
    pub kind: SignatureType,
    /// Digest or RSA signature bytes
    pub bytes: Vec<u8>,
    /// Number of leading archive bytes the signature covers
    pub signed_len: usize,
}

impl Signature {
    /// Split the trailer off the end of an archive
    pub fn parse(data: &[u8]) -> PharResult<Self> {
        let len = data.len();
        if len < 8 || &data[len - 4..] != SIGNATURE_MAGIC {
            return Err(PharError::InvalidSignature(
                "missing GBMB signature magic".to_string(),
            ));
        }

        let kind = SignatureType::from_flags(read_u32_le(data, len - 8))?;

        let (start, end) = if let Some(digest_len) = kind.digest_len() {
            let end = len - 8;
            let start = end.checked_sub(digest_len).ok_or_else(|| {
                PharError::InvalidSignature(format!("archive too short for a {kind} digest"))
            })?;
            (start, end)
        } else {
            if len < 12 {
                return Err(PharError::InvalidSignature(
                    "archive too short for an OpenSSL signature".to_string(),
                ));
            }
            let end = len - 12;
            let signature_len = read_u32_le(data, end) as usize;
            let start = end.checked_sub(signature_len).ok_or_else(|| {
                PharError::InvalidSignature(format!(
                    "signature length {signature_len} exceeds archive size"
                ))
            })?;
            (start, end)
        };

        Ok(Self {
            kind,
            bytes: data[start..end].to_vec(),
            signed_len: start,
        })
    }

    /// Signature bytes as uppercase hex, as PHP reports hash signatures
    pub fn hash_hex(&self) -> String {
        self.bytes
            .iter()
            .fold(String::with_capacity(self.bytes.len() * 2), |mut acc, b| {
                use std::fmt::Write;
                // Writing to String cannot fail
                let _ = write!(acc, "{b:02X}");
                acc
            })
    }

    /// Check the signature against the archive bytes it was parsed from
    ///
    /// OpenSSL signatures need the public key from the `.pubkey` sidecar.
    pub fn verify(&self, data: &[u8], public_key: Option<&PublicKey>) -> PharResult<bool> {
        let signed = data.get(..self.signed_len).ok_or_else(|| {
            PharError::InvalidSignature("signed region exceeds archive size".to_string())
        })?;

        let digest = match self.kind {
            SignatureType::Md5 => DigestAlgorithm::Md5,
            SignatureType::Sha256 => DigestAlgorithm::Sha256,
            SignatureType::Sha512 => DigestAlgorithm::Sha512,
            SignatureType::OpenSslSha256 | SignatureType::OpenSslSha512 => {
                let key = public_key.ok_or_else(|| {
                    PharError::UnsupportedSignature(format!(
                        "{} requires a public key",
                        self.kind
                    ))
                })?;
                let hash = if self.kind == SignatureType::OpenSslSha256 {
                    SignatureHash::Sha256
                } else {
                    SignatureHash::Sha512
                };
                return Ok(key.verify(hash, signed, &self.bytes)?);
            }
            SignatureType::Sha1 | SignatureType::OpenSsl => {
                return Err(PharError::UnsupportedSignature(format!(
                    "{} signatures cannot be verified",
                    self.kind
                )));
            }
        };

        Ok(digest.digest(signed) == self.bytes)
    }
}

fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}
