//! Signed disclosure reports.
//!
//! A report reveals the temporary contact key at `start_index` together with
//! the public verification key, so anyone can replay the ratchet up to
//! `end_index` and recover every number broadcast in that window. Someone
//! who only overheard the numbers cannot.

use cwatch_crypto::ed25519::{Signature, VerifyingKey};
use cwatch_types::cancel::CancelFlag;
use cwatch_types::report::{MemoType, Report, SignedReport};
use cwatch_types::Tcn;
use tracing::{debug, error};

use crate::ratchet::{initial_key, ReportAuthorizationKey, TemporaryContactKey};
use crate::wire::{self, MAX_MEMO_LEN};
use crate::{Result, TcnError};

/// Ratchet steps between cancellation checks during recomputation.
pub const RECOMPUTE_CHECK_INTERVAL: usize = 256;

/// A report whose signature and invariants have been checked.
///
/// Only [`verify`] constructs one, so holding a `VerifiedReport` is proof
/// that verification succeeded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedReport {
    report: Report,
}

impl VerifiedReport {
    /// The verified report content.
    pub fn report(&self) -> &Report {
        &self.report
    }

    /// Number of identifiers this report discloses.
    pub fn identifier_count(&self) -> usize {
        usize::from(self.report.end_index - self.report.start_index) + 1
    }
}

/// Create a signed report disclosing periods `start_index..=end_index`.
///
/// The verification key is re-derived from `rak`, and the key at
/// `start_index` is recomputed from the chain seed, so no rotated-out key has
/// to be retained by the caller.
///
/// # Errors
///
/// - [`TcnError::MalformedReport`] if `start_index > end_index` or the memo
///   exceeds 255 bytes.
pub fn create_signed_report(
    rak: &ReportAuthorizationKey,
    memo_type: MemoType,
    memo_data: &[u8],
    start_index: u16,
    end_index: u16,
) -> Result<SignedReport> {
    check_indices(start_index, end_index)?;
    if memo_data.len() > MAX_MEMO_LEN {
        return Err(TcnError::MalformedReport(format!(
            "memo is {} bytes, max {MAX_MEMO_LEN}",
            memo_data.len()
        )));
    }

    let start_key = key_at(rak, start_index)?;
    let report = Report {
        report_verification_public_key_bytes: rak.verification_key_bytes(),
        temporary_contact_key_bytes: *start_key.tck_bytes(),
        start_index,
        end_index,
        memo_type,
        memo_data: memo_data.to_vec(),
    };

    let bytes = wire::encode_report(&report)?;
    let signature_bytes = rak.signing_key().sign(&bytes).to_bytes();

    debug!(start_index, end_index, "Created signed report");

    Ok(SignedReport {
        report,
        signature_bytes,
    })
}

/// Check the invariants and signature of a received report.
///
/// All-or-nothing: no partial result is produced on failure.
///
/// The verification key is the signer's RAK public key, not a key derived
/// per report, so there is nothing to re-derive here. A report that pairs a
/// disclosed temporary contact key with some other verification key still
/// verifies if that key signed it, but the ratchet mixes the verification
/// key into every step, so it replays numbers nobody broadcast.
///
/// # Errors
///
/// - [`TcnError::MalformedReport`] if the indices are inverted, the memo is
///   too long, or the verification key is not a valid curve point.
/// - [`TcnError::InvalidSignature`] if the signature does not validate.
pub fn verify(signed: &SignedReport) -> Result<VerifiedReport> {
    let report = &signed.report;
    check_indices(report.start_index, report.end_index)?;
    let bytes = wire::encode_report(report)?;

    let verifying_key = VerifyingKey::from_bytes(&report.report_verification_public_key_bytes)
        .map_err(|e| TcnError::MalformedReport(format!("verification key: {e}")))?;

    let signature = Signature::from_bytes(&signed.signature_bytes);
    verifying_key.verify(&bytes, &signature).map_err(|_| {
        error!(
            start_index = report.start_index,
            end_index = report.end_index,
            "Report signature verification failed"
        );
        TcnError::InvalidSignature
    })?;

    Ok(VerifiedReport {
        report: report.clone(),
    })
}

/// Replay the disclosed window and collect every temporary contact number.
///
/// The disclosed key's own number comes first, followed by one number per
/// ratchet step, so the result holds `end_index - start_index + 1` numbers
/// for indices `start_index..=end_index` in order.
pub fn recompute_identifiers(verified: &VerifiedReport) -> Vec<Tcn> {
    let mut out = Vec::with_capacity(verified.identifier_count());
    replay(verified, &mut out, |_| false);
    out
}

/// [`recompute_identifiers`] with cooperative cancellation.
///
/// The flag is checked every [`RECOMPUTE_CHECK_INTERVAL`] ratchet steps.
///
/// # Errors
///
/// Returns [`TcnError::Cancelled`] if the flag was raised; the partial list
/// is discarded.
pub fn recompute_identifiers_cancellable(
    verified: &VerifiedReport,
    cancel: &CancelFlag,
) -> Result<Vec<Tcn>> {
    let mut out = Vec::with_capacity(verified.identifier_count());
    let finished = replay(verified, &mut out, |step| {
        step % RECOMPUTE_CHECK_INTERVAL == 0 && cancel.is_cancelled()
    });
    if finished {
        Ok(out)
    } else {
        Err(TcnError::Cancelled)
    }
}

/// Returns `false` if `stop` interrupted the replay.
fn replay(verified: &VerifiedReport, out: &mut Vec<Tcn>, stop: impl Fn(usize) -> bool) -> bool {
    let report = &verified.report;
    let mut key = TemporaryContactKey::from_parts(
        report.start_index,
        report.report_verification_public_key_bytes,
        report.temporary_contact_key_bytes,
    );

    let mut step = 0usize;
    loop {
        if stop(step) {
            return false;
        }
        out.push(key.temporary_contact_number());
        if key.index() >= report.end_index {
            return true;
        }
        key = match key.ratchet() {
            Some(next) => next,
            None => return true,
        };
        step += 1;
    }
}

fn check_indices(start_index: u16, end_index: u16) -> Result<()> {
    if start_index > end_index {
        return Err(TcnError::MalformedReport(format!(
            "start index {start_index} is after end index {end_index}"
        )));
    }
    Ok(())
}

/// Walk the chain from the seed to `index`.
fn key_at(rak: &ReportAuthorizationKey, index: u16) -> Result<TemporaryContactKey> {
    let mut key = initial_key(rak);
    while key.index() < index {
        key = key.ratchet().ok_or(TcnError::RatchetExhausted { index: key.index() })?;
    }
    Ok(key)
}
