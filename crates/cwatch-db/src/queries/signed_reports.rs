//! Disclosure report query functions.
//!
//! Local reports (our own disclosures) carry an upload state. Received
//! reports carry an `is_processed` flag set once matching completes. Both are
//! keyed by signature bytes.

use cwatch_types::report::{MemoType, Report, SignedReport, UploadState};
use cwatch_types::UnixMillis;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::{blob_array, DbError, Result};

const COLUMNS: &str =
    "signature, rvk, tck, start_index, end_index, memo_type, memo_data, is_local, upload_state, is_processed";

/// Store a locally created report, queued for upload.
pub fn insert_local(conn: &Connection, signed: &SignedReport, now: UnixMillis) -> Result<()> {
    insert(conn, signed, true, now).map(|_| ())
}

/// Store a received report. Returns `false` if it was already stored.
pub fn insert_received(conn: &Connection, signed: &SignedReport, now: UnixMillis) -> Result<bool> {
    insert(conn, signed, false, now)
}

fn insert(conn: &Connection, signed: &SignedReport, is_local: bool, now: UnixMillis) -> Result<bool> {
    let report = &signed.report;
    let changed = conn.execute(
        "INSERT OR IGNORE INTO signed_reports
             (signature, rvk, tck, start_index, end_index, memo_type, memo_data,
              is_local, upload_state, is_processed, stored_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        rusqlite::params![
            signed.signature_bytes.as_slice(),
            report.report_verification_public_key_bytes.as_slice(),
            report.temporary_contact_key_bytes.as_slice(),
            report.start_index,
            report.end_index,
            report.memo_type.to_u8(),
            report.memo_data,
            is_local,
            UploadState::NotUploaded.as_i64(),
            // our own reports never need matching
            is_local,
            now as i64,
        ],
    )?;
    Ok(changed == 1)
}

/// Get a report by signature.
pub fn get(conn: &Connection, signature: &[u8; 64]) -> Result<StoredReport> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM signed_reports WHERE signature = ?1"),
        [signature.as_slice()],
        ReportRow::from_row,
    )
    .optional()?
    .ok_or_else(|| DbError::NotFound("signed report".into()))?
    .into_stored()
}

/// Local reports not yet uploaded, oldest first.
pub fn pending_uploads(conn: &Connection) -> Result<Vec<StoredReport>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM signed_reports
         WHERE is_local = 1 AND upload_state = ?1 ORDER BY stored_at"
    ))?;
    let rows = stmt
        .query_map([UploadState::NotUploaded.as_i64()], ReportRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(ReportRow::into_stored).collect()
}

/// Update the upload state of a local report.
pub fn set_upload_state(conn: &Connection, signature: &[u8; 64], state: UploadState) -> Result<()> {
    let changed = conn.execute(
        "UPDATE signed_reports SET upload_state = ?1 WHERE signature = ?2 AND is_local = 1",
        rusqlite::params![state.as_i64(), signature.as_slice()],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound("local signed report".into()));
    }
    Ok(())
}

/// Whether matching completed for a report. Unknown reports are unprocessed.
pub fn is_processed(conn: &Connection, signature: &[u8; 64]) -> Result<bool> {
    let processed: Option<bool> = conn
        .query_row(
            "SELECT is_processed FROM signed_reports WHERE signature = ?1",
            [signature.as_slice()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(processed.unwrap_or(false))
}

/// Mark a stored report as processed.
pub fn mark_processed(conn: &Connection, signature: &[u8; 64]) -> Result<()> {
    let changed = conn.execute(
        "UPDATE signed_reports SET is_processed = 1 WHERE signature = ?1",
        [signature.as_slice()],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound("signed report".into()));
    }
    Ok(())
}

/// Received reports still awaiting matching, oldest first.
pub fn unprocessed(conn: &Connection) -> Result<Vec<StoredReport>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM signed_reports
         WHERE is_local = 0 AND is_processed = 0 ORDER BY stored_at"
    ))?;
    let rows = stmt
        .query_map([], ReportRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(ReportRow::into_stored).collect()
}

/// A report together with its storage flags.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredReport {
    pub signed: SignedReport,
    pub is_local: bool,
    pub upload_state: UploadState,
    pub is_processed: bool,
}

#[derive(Debug)]
struct ReportRow {
    signature: Vec<u8>,
    rvk: Vec<u8>,
    tck: Vec<u8>,
    start_index: u16,
    end_index: u16,
    memo_type: u8,
    memo_data: Vec<u8>,
    is_local: bool,
    upload_state: i64,
    is_processed: bool,
}

impl ReportRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            signature: row.get(0)?,
            rvk: row.get(1)?,
            tck: row.get(2)?,
            start_index: row.get(3)?,
            end_index: row.get(4)?,
            memo_type: row.get(5)?,
            memo_data: row.get(6)?,
            is_local: row.get(7)?,
            upload_state: row.get(8)?,
            is_processed: row.get(9)?,
        })
    }

    fn into_stored(self) -> Result<StoredReport> {
        let memo_type = MemoType::from_u8(self.memo_type)
            .ok_or_else(|| DbError::Corrupt(format!("memo type {}", self.memo_type)))?;
        let upload_state = UploadState::from_i64(self.upload_state)
            .ok_or_else(|| DbError::Corrupt(format!("upload state {}", self.upload_state)))?;
        Ok(StoredReport {
            signed: SignedReport {
                report: Report {
                    report_verification_public_key_bytes: blob_array(self.rvk, "rvk")?,
                    temporary_contact_key_bytes: blob_array(self.tck, "tck")?,
                    start_index: self.start_index,
                    end_index: self.end_index,
                    memo_type,
                    memo_data: self.memo_data,
                },
                signature_bytes: blob_array(self.signature, "signature")?,
            },
            is_local: self.is_local,
            upload_state,
            is_processed: self.is_processed,
        })
    }
}
