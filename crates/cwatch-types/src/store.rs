//! Storage collaborator interface.
//!
//! The protocol core never performs I/O itself. Everything that must survive
//! a restart is handed to a [`ContactStore`]; the SQLite implementation lives
//! in `cwatch-db` and an in-memory one in `cwatch-exposure`.

use crate::contact::{ContactEvent, ContactObservation};
use crate::report::SignedReport;
use crate::{Tcn, UnixMillis};

/// Errors surfaced by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend failed; `retryable` tells callers whether to try again.
    #[error("storage backend error: {message}")]
    Backend { message: String, retryable: bool },
}

impl StoreError {
    /// Build a backend error.
    pub fn backend(message: impl Into<String>, retryable: bool) -> Self {
        StoreError::Backend {
            message: message.into(),
            retryable,
        }
    }

    /// Whether the failed operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Backend { retryable: true, .. })
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable storage used by the proximity and exposure components.
pub trait ContactStore {
    /// Persist a finalized contact.
    fn persist_contact_event(&mut self, event: &ContactEvent) -> StoreResult<()>;

    /// Create or update the observation for `identifier`.
    ///
    /// `last_seen` is overwritten; the stored closest distance is kept as a
    /// running minimum of `closest_distance`.
    fn upsert_observation(
        &mut self,
        identifier: &Tcn,
        last_seen: UnixMillis,
        closest_distance: f64,
    ) -> StoreResult<()>;

    /// Look up one observation by exact identifier bytes.
    fn observation(&self, identifier: &Tcn) -> StoreResult<Option<ContactObservation>>;

    /// Flag every stored observation whose identifier is in `identifiers`.
    ///
    /// Returns how many observations went from unflagged to flagged. The flag
    /// is never cleared, so repeating a call returns 0.
    fn mark_potentially_infectious(&mut self, identifiers: &[Tcn]) -> StoreResult<usize>;

    /// Queue a locally created report for upload.
    fn enqueue_signed_report_for_upload(&mut self, report: &SignedReport) -> StoreResult<()>;

    /// The most recently seen potentially infectious observation, if any.
    fn most_recent_exposure(&self) -> StoreResult<Option<ContactObservation>>;

    /// Remember a report received from the distribution channel.
    ///
    /// Returns `false` if a report with the same signature was already stored.
    fn save_received_report(&mut self, report: &SignedReport) -> StoreResult<bool>;

    /// Whether matching already completed for the report with this signature.
    fn is_report_processed(&self, signature: &[u8; 64]) -> StoreResult<bool>;

    /// Record that matching completed for the report with this signature.
    fn mark_report_processed(&mut self, signature: &[u8; 64]) -> StoreResult<()>;
}
