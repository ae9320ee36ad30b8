//! Distance estimation from received signal strength.
//!
//! Log-distance path-loss model:
//!
//! ```text
//! d = 10 ^ ((P_1m - RSSI) / (10 * n))
//! ```
//!
//! where `P_1m` is the RSSI measured at one meter and `n` the path-loss
//! exponent (2.0 in free space).

/// Smallest distance ever reported, in meters.
pub const DISTANCE_FLOOR_METERS: f64 = 0.01;

/// Free-space path-loss exponent.
pub const DEFAULT_PATH_LOSS_EXPONENT: f64 = 2.0;

/// Typical attenuation between the antenna and one meter, in dB.
///
/// Subtracted from an advertised TX power level to obtain `P_1m`.
pub const TX_POWER_LOSS_AT_ONE_METER_DB: f64 = 41.0;

/// Estimate the distance to a transmitter in meters.
///
/// Never returns NaN or a value below [`DISTANCE_FLOOR_METERS`]. A NaN input
/// yields `+inf`, so an unusable sample never qualifies as close. A
/// non-positive or NaN exponent falls back to [`DEFAULT_PATH_LOSS_EXPONENT`].
pub fn estimate_distance_meters(
    rssi: f64,
    measured_power_at_one_meter: f64,
    path_loss_exponent: f64,
) -> f64 {
    let exponent = if path_loss_exponent > 0.0 {
        path_loss_exponent
    } else {
        DEFAULT_PATH_LOSS_EXPONENT
    };
    let distance = 10f64.powf((measured_power_at_one_meter - rssi) / (10.0 * exponent));
    if distance.is_nan() {
        return f64::INFINITY;
    }
    distance.max(DISTANCE_FLOOR_METERS)
}

/// Derive the one-meter RSSI from an advertised TX power level.
pub fn measured_power_from_tx_power(tx_power_level: f64) -> f64 {
    tx_power_level - TX_POWER_LOSS_AT_ONE_METER_DB
}
