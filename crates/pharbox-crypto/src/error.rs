//! Error types for cryptographic operations

use thiserror::Error;

/// Errors that can occur during key handling and signing
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The key is not a PEM document this crate understands
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// The key is encrypted but no passphrase was given
    #[error("The private key is encrypted: a passphrase is required")]
    PassphraseRequired,

    /// Decrypting or decoding the private key failed
    #[error("Could not retrieve the private key, check that the passphrase is correct: {0}")]
    InvalidPassphrase(String),

    /// Legacy OpenSSL-encrypted PKCS#1 keys cannot be decrypted here
    #[error(
        "Unsupported key encryption: {0}. Convert the key to encrypted PKCS#8 with \
         `openssl pkcs8 -topk8 -v2 aes-256-cbc`"
    )]
    UnsupportedEncryption(String),

    /// Exporting the public key failed
    #[error("Could not export the public key: {0}")]
    PublicKeyExport(String),

    /// Producing a signature failed
    #[error("Signing failed: {0}")]
    Signing(String),

    /// The signature bytes are malformed
    #[error("Invalid signature encoding: {0}")]
    InvalidSignature(String),
}
