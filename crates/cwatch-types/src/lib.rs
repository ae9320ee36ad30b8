//! # cwatch-types
//!
//! Shared domain types used across the cwatch workspace: broadcast
//! identifiers, disclosure reports, contact records, proximity events and the
//! storage collaborator interface.

pub mod cancel;
pub mod contact;
pub mod events;
pub mod report;
pub mod store;

use base64::Engine;

/// A 16-byte temporary contact number, the rotating broadcast identifier.
pub type Tcn = [u8; 16];

/// Raw bytes of a temporary contact key.
pub type TckBytes = [u8; 32];

/// Milliseconds since the Unix epoch.
pub type UnixMillis = u64;

/// Length of a temporary contact number in bytes.
pub const TCN_LEN: usize = 16;

/// Capacity of the recently-broadcast ring buffer used for self-observation.
pub const MAX_ADVERTISED_TCNS: usize = 65_535;

/// Human-readable form of an identifier, used for logging and events.
pub fn identifier_string(tcn: &Tcn) -> String {
    base64::engine::general_purpose::STANDARD.encode(tcn)
}

/// Parse the human-readable form back into identifier bytes.
///
/// Returns `None` when the string is not base64 or does not decode to
/// exactly [`TCN_LEN`] bytes.
pub fn parse_identifier(s: &str) -> Option<Tcn> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(s).ok()?;
    bytes.try_into().ok()
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> UnixMillis {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
