//! Contact and observation records.

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::{Tcn, UnixMillis};

/// A single sighting reported by the radio transport.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde_as(as = "serde_with::hex::Hex")]
    pub identifier: Tcn,
    /// Raw received signal strength in dBm.
    pub rssi: f64,
    /// Model id extracted from the advertisement; 0 when unknown.
    #[serde(default)]
    pub device_model_id: u32,
    /// Advertised TX power level in dBm, when the advertisement carried one.
    #[serde(default)]
    pub tx_power_level: Option<f64>,
    pub timestamp: UnixMillis,
}

/// A finalized contact emitted once an identifier stayed within the danger
/// threshold for longer than the record threshold.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContactEvent {
    #[serde_as(as = "serde_with::hex::Hex")]
    pub identifier: Tcn,
    pub average_distance: f64,
    pub start_time: UnixMillis,
    pub end_time: UnixMillis,
}

impl ContactEvent {
    /// Duration of the contact in milliseconds.
    pub fn duration_millis(&self) -> u64 {
        self.end_time.saturating_sub(self.start_time)
    }
}

/// Durable per-identifier observation state.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContactObservation {
    #[serde_as(as = "serde_with::hex::Hex")]
    pub identifier: Tcn,
    pub last_seen: UnixMillis,
    /// Running minimum of every estimated distance seen for this identifier.
    pub closest_estimated_distance_meters: f64,
    /// Set once by exposure matching, never cleared.
    pub was_potentially_infectious: bool,
}
