//! # cwatch-crypto
//!
//! Cryptographic primitives for the temporary contact number protocol.
//!
//! The suite is fixed: Ed25519 for report authorization and BLAKE3 in
//! key-derivation mode for every chained or public value.
//!
//! ## Modules
//!
//! - [`blake3`]: Domain-separated BLAKE3 derivation and field encoding
//! - [`ed25519`]: Ed25519 signing and verification (RFC 8032)

pub mod blake3;
pub mod ed25519;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Ed25519 signature verification failed.
    #[error("signature verification failed")]
    SignatureVerification,

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Bytes do not describe a valid curve point.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
