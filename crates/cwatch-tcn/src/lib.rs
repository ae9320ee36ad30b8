//! # cwatch-tcn
//!
//! The temporary contact number protocol: a one-way key ratchet that yields
//! a fresh broadcast identifier every rotation period, and signed reports that
//! disclose a window of that ratchet after a positive test.
//!
//! ## Modules
//!
//! - [`ratchet`]: Report authorization key, temporary contact keys and numbers.
//! - [`report`]: Creating, verifying and replaying signed reports.
//! - [`wire`]: Canonical byte encoding of reports.
//! - [`window`]: Rotation period and disclosure window sizing.
//! - [`generator`]: The process-wide broadcast key state.
//!
//! ## Key Concepts
//!
//! - **RAK**: Ed25519 signing key, created once per installation.
//! - **TCK**: chained 32-byte key; each ratchet step binds the RAK's public key.
//! - **TCN**: 16-byte public number derived from a TCK and its index.

pub mod generator;
pub mod ratchet;
pub mod report;
pub mod window;
pub mod wire;

use cwatch_crypto::CryptoError;

/// Error types for ratchet and report operations.
#[derive(Debug, thiserror::Error)]
pub enum TcnError {
    /// Key material could not be loaded or used.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The report signature does not validate against its verification key.
    #[error("report signature is invalid")]
    InvalidSignature,

    /// A report field violates the report invariants.
    #[error("malformed report: {0}")]
    MalformedReport(String),

    /// The 16-bit period counter cannot advance any further.
    #[error("temporary contact key ratchet exhausted at index {index}")]
    RatchetExhausted { index: u16 },

    /// A cancellable operation observed its cancellation flag.
    #[error("operation cancelled")]
    Cancelled,

    /// A thread panicked while holding the broadcast key lock.
    #[error("broadcast key state poisoned")]
    StatePoisoned,
}

impl TcnError {
    /// Whether the failed operation may succeed if simply repeated.
    ///
    /// Verification failures are permanent for a given report; exhaustion
    /// needs a new report authorization key before anything changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TcnError::Cancelled)
    }
}

/// Convenience result type for protocol operations.
pub type Result<T> = std::result::Result<T, TcnError>;
