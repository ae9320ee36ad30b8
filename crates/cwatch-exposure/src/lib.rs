//! # cwatch-exposure
//!
//! Exposure matching: replaying received disclosure reports and flagging
//! the locally stored observations they cover.
//!
//! ## Modules
//!
//! - [`matcher`]: Chunked, cancellable identifier matching against a store.
//! - [`processor`]: Async pipeline that verifies, recomputes off-thread, then matches.
//! - [`notifier`]: Whether the user should be told about an exposure.
//! - [`memory`]: In-memory [`ContactStore`](cwatch_types::store::ContactStore).

pub mod matcher;
pub mod memory;
pub mod notifier;
pub mod processor;

use cwatch_tcn::TcnError;
use cwatch_types::store::StoreError;

/// Error types for exposure processing.
#[derive(Debug, thiserror::Error)]
pub enum ExposureError {
    /// Verification or recomputation failed.
    #[error("report error: {0}")]
    Tcn(#[from] TcnError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The caller cancelled; flags applied so far are kept.
    #[error("exposure matching cancelled after {newly_flagged} new flags")]
    Cancelled { newly_flagged: usize },

    /// A blocking worker task failed to complete.
    #[error("worker task failed: {0}")]
    Task(String),
}

impl ExposureError {
    /// Whether processing the same report again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExposureError::Tcn(e) => e.is_retryable(),
            ExposureError::Store(e) => e.is_retryable(),
            ExposureError::Cancelled { .. } | ExposureError::Task(_) => true,
        }
    }
}

/// Convenience result type for exposure operations.
pub type Result<T> = std::result::Result<T, ExposureError>;
