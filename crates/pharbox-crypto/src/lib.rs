//! Cryptographic primitives for PHAR archives
//!
//! This crate provides the digests and RSA operations behind PHAR signature
//! trailers:
//!
//! - **Digests**: MD5, SHA-256 and SHA-512 hash signatures
//! - **Keys**: PEM private key loading (plain or passphrase-protected)
//! - **Signatures**: PKCS#1 v1.5 signing and verification, the scheme used
//!   by PHP's OpenSSL archive signatures
//!
//! # Examples
//!
//! ```no_run
//! use pharbox_crypto::{PrivateKey, SignatureHash};
//!
//! let pem = std::fs::read_to_string("private.pem")?;
//! let key = PrivateKey::from_pem(&pem, Some("passphrase"))?;
//! let signature = key.sign(SignatureHash::Sha256, b"archive bytes")?;
//! assert!(key.public_key().verify(SignatureHash::Sha256, b"archive bytes", &signature)?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]

pub mod digest;
pub mod error;
pub mod keys;

pub use digest::{DigestAlgorithm, sha256_hex};
pub use error::CryptoError;
pub use keys::{PrivateKey, PublicKey, SignatureHash};
