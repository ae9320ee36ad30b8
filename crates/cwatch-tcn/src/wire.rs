//! Canonical byte encoding of disclosure reports.
//!
//! ## Wire format
//!
//! ```text
//! Report {
//!     rvk:        [u8; 32],  // report verification public key
//!     tck:        [u8; 32],  // temporary contact key at start_index
//!     start:      u16 LE,
//!     end:        u16 LE,
//!     memo_type:  u8,        // 1 = CovidWatchV1
//!     memo_len:   u8,
//!     memo_data:  [u8; memo_len],
//! }
//! SignedReport = Report || signature [u8; 64]
//! ```
//!
//! The signature covers exactly the encoded `Report` bytes.

use cwatch_types::report::{MemoType, Report, SignedReport};

use crate::{Result, TcnError};

/// Maximum memo length representable in the one-byte length prefix.
pub const MAX_MEMO_LEN: usize = u8::MAX as usize;

/// Length of the fixed-size report prefix before the memo bytes.
pub const REPORT_HEADER_LEN: usize = 32 + 32 + 2 + 2 + 1 + 1;

/// Length of an Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

/// Encode a report into its canonical signed bytes.
///
/// # Errors
///
/// Returns [`TcnError::MalformedReport`] if the memo is longer than
/// [`MAX_MEMO_LEN`].
pub fn encode_report(report: &Report) -> Result<Vec<u8>> {
    let memo_len = u8::try_from(report.memo_data.len()).map_err(|_| {
        TcnError::MalformedReport(format!(
            "memo is {} bytes, max {MAX_MEMO_LEN}",
            report.memo_data.len()
        ))
    })?;

    let mut out = Vec::with_capacity(REPORT_HEADER_LEN + report.memo_data.len());
    out.extend_from_slice(&report.report_verification_public_key_bytes);
    out.extend_from_slice(&report.temporary_contact_key_bytes);
    out.extend_from_slice(&report.start_index.to_le_bytes());
    out.extend_from_slice(&report.end_index.to_le_bytes());
    out.push(report.memo_type.to_u8());
    out.push(memo_len);
    out.extend_from_slice(&report.memo_data);
    Ok(out)
}

/// Decode a report, requiring that `data` contains nothing else.
pub fn decode_report(data: &[u8]) -> Result<Report> {
    let (report, consumed) = decode_report_prefix(data)?;
    if consumed != data.len() {
        return Err(TcnError::MalformedReport(format!(
            "{} trailing bytes after report",
            data.len() - consumed
        )));
    }
    Ok(report)
}

/// Encode a signed report: report bytes followed by the signature.
pub fn encode_signed_report(signed: &SignedReport) -> Result<Vec<u8>> {
    let mut out = encode_report(&signed.report)?;
    out.extend_from_slice(&signed.signature_bytes);
    Ok(out)
}

/// Decode a signed report.
///
/// Decoding checks structure only; call [`crate::report::verify`] before
/// trusting the content.
pub fn decode_signed_report(data: &[u8]) -> Result<SignedReport> {
    let (report, consumed) = decode_report_prefix(data)?;
    let rest = &data[consumed..];
    let signature_bytes: [u8; SIGNATURE_LEN] = rest.try_into().map_err(|_| {
        TcnError::MalformedReport(format!(
            "expected {SIGNATURE_LEN} signature bytes, got {}",
            rest.len()
        ))
    })?;
    Ok(SignedReport {
        report,
        signature_bytes,
    })
}

fn decode_report_prefix(data: &[u8]) -> Result<(Report, usize)> {
    if data.len() < REPORT_HEADER_LEN {
        return Err(TcnError::MalformedReport(format!(
            "report too short: {} bytes, need at least {REPORT_HEADER_LEN}",
            data.len()
        )));
    }

    let mut report_verification_public_key_bytes = [0u8; 32];
    report_verification_public_key_bytes.copy_from_slice(&data[0..32]);
    let mut temporary_contact_key_bytes = [0u8; 32];
    temporary_contact_key_bytes.copy_from_slice(&data[32..64]);
    let start_index = u16::from_le_bytes([data[64], data[65]]);
    let end_index = u16::from_le_bytes([data[66], data[67]]);
    let memo_type = MemoType::from_u8(data[68])
        .ok_or_else(|| TcnError::MalformedReport(format!("unknown memo type {}", data[68])))?;
    let memo_len = data[69] as usize;

    let end = REPORT_HEADER_LEN + memo_len;
    if data.len() < end {
        return Err(TcnError::MalformedReport(format!(
            "memo truncated: declared {memo_len} bytes, {} available",
            data.len() - REPORT_HEADER_LEN
        )));
    }

    Ok((
        Report {
            report_verification_public_key_bytes,
            temporary_contact_key_bytes,
            start_index,
            end_index,
            memo_type,
            memo_data: data[REPORT_HEADER_LEN..end].to_vec(),
        },
        end,
    ))
}
