//! Disclosure report structures.
//!
//! These are plain data; signing, verification and the byte codec live in
//! `cwatch-tcn`.

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

/// Type of the free-form memo attached to a report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoType {
    CovidWatchV1,
}

impl MemoType {
    /// Wire value of this memo type.
    pub fn to_u8(self) -> u8 {
        match self {
            MemoType::CovidWatchV1 => 1,
        }
    }

    /// Parse a wire value; unknown values return `None`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MemoType::CovidWatchV1),
            _ => None,
        }
    }
}

/// The disclosed payload of a positive-test report.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    #[serde_as(as = "serde_with::hex::Hex")]
    pub report_verification_public_key_bytes: [u8; 32],
    /// The temporary contact key at `start_index`.
    #[serde_as(as = "serde_with::hex::Hex")]
    pub temporary_contact_key_bytes: [u8; 32],
    pub start_index: u16,
    pub end_index: u16,
    pub memo_type: MemoType,
    #[serde_as(as = "serde_with::hex::Hex")]
    pub memo_data: Vec<u8>,
}

/// A report together with its Ed25519 signature.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedReport {
    pub report: Report,
    #[serde_as(as = "serde_with::hex::Hex")]
    pub signature_bytes: [u8; 64],
}

/// Upload progress of a locally created report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    NotUploaded,
    Uploading,
    Uploaded,
}

impl UploadState {
    /// Stable storage code.
    pub fn as_i64(self) -> i64 {
        match self {
            UploadState::NotUploaded => 0,
            UploadState::Uploading => 1,
            UploadState::Uploaded => 2,
        }
    }

    /// Parse a storage code.
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(UploadState::NotUploaded),
            1 => Some(UploadState::Uploading),
            2 => Some(UploadState::Uploaded),
            _ => None,
        }
    }
}
