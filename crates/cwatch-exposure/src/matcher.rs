//! Matching disclosed identifiers against stored observations.
//!
//! Flags are monotonic, so every function here is idempotent and safe to
//! interrupt: a cancelled run keeps the flags it already set and a rerun
//! reports only what is newly flagged.

use cwatch_types::cancel::CancelFlag;
use cwatch_types::store::ContactStore;
use cwatch_types::Tcn;
use tracing::debug;

use crate::{ExposureError, Result};

/// Identifiers handed to the store per batch.
pub const DEFAULT_CHUNK_SIZE: usize = 300_000;

/// Flag every stored observation whose identifier is in `identifiers`.
///
/// Returns how many observations were newly flagged.
pub fn match_and_flag<S>(identifiers: &[Tcn], store: &mut S) -> Result<usize>
where
    S: ContactStore + ?Sized,
{
    match_and_flag_chunked(identifiers, store, DEFAULT_CHUNK_SIZE, &CancelFlag::new())
}

/// [`match_and_flag`] in batches of `chunk_size`, checking `cancel` before
/// each batch.
///
/// # Errors
///
/// [`ExposureError::Cancelled`] carries the count flagged before the flag was
/// observed.
pub fn match_and_flag_chunked<S>(
    identifiers: &[Tcn],
    store: &mut S,
    chunk_size: usize,
    cancel: &CancelFlag,
) -> Result<usize>
where
    S: ContactStore + ?Sized,
{
    let mut newly_flagged = 0;
    for chunk in identifiers.chunks(chunk_size.max(1)) {
        if cancel.is_cancelled() {
            return Err(ExposureError::Cancelled { newly_flagged });
        }
        newly_flagged += store.mark_potentially_infectious(chunk)?;
    }
    debug!(
        identifiers = identifiers.len(),
        newly_flagged, "Matched disclosed identifiers"
    );
    Ok(newly_flagged)
}
