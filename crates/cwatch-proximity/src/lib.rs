//! # cwatch-proximity
//!
//! Turns radio sightings into contacts.
//!
//! ## Modules
//!
//! - [`advertisement`]: Manufacturer-data parsing (model id, TCN, bridge id).
//! - [`calibration`]: Per-device-model calibration profiles.
//! - [`distance`]: Log-distance path-loss distance estimation.
//! - [`accumulator`]: The per-identifier contact state machine.
//! - [`range`]: In-range/left-range hysteresis and alert throttling.

pub mod accumulator;
pub mod advertisement;
pub mod calibration;
pub mod distance;
pub mod range;

/// Error types for proximity processing.
#[derive(Debug, thiserror::Error)]
pub enum ProximityError {
    /// No calibration profile exists for a model and no default is set.
    #[error("no calibration profile for device model {model_id}")]
    CalibrationMissing { model_id: u32 },

    /// Calibration data could not be parsed.
    #[error("invalid calibration data: {0}")]
    Calibration(String),

    /// A thread panicked while holding the accumulator lock.
    #[error("accumulator state poisoned")]
    LockPoisoned,
}

/// Convenience result type for proximity operations.
pub type Result<T> = std::result::Result<T, ProximityError>;
