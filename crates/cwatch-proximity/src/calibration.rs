//! Per-device-model calibration.
//!
//! Different phone models bias RSSI differently, so both the one-meter power
//! and the "too close" threshold come from a profile keyed by the model id
//! carried in advertisements. Profile `"0"` is the default.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ProximityError, Result};

/// Key of the default profile.
pub const DEFAULT_PROFILE_KEY: &str = "0";

/// One-meter RSSI of the built-in default profile, in dBm.
pub const DEFAULT_MEASURED_POWER: f64 = -59.0;

/// Danger threshold of the built-in default profile, in meters.
pub const DEFAULT_CONTACT_MIN_DISTANCE: f64 = 6.0;

/// Calibration constants for one device model.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub measured_power_at_one_meter: f64,
    pub contact_min_distance: f64,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            measured_power_at_one_meter: DEFAULT_MEASURED_POWER,
            contact_min_distance: DEFAULT_CONTACT_MIN_DISTANCE,
        }
    }
}

#[derive(Deserialize)]
struct CalibrationFile {
    #[serde(default)]
    models: HashMap<String, String>,
    #[serde(flatten)]
    profiles: HashMap<String, DeviceProfile>,
}

/// Profiles keyed by model number, plus the model-name lookup.
#[derive(Clone, Debug)]
pub struct CalibrationTable {
    profiles: HashMap<String, DeviceProfile>,
    /// Platform model identifier (e.g. `"iPhone12,1"`) to model number.
    models: HashMap<String, String>,
}

impl Default for CalibrationTable {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(DEFAULT_PROFILE_KEY.to_string(), DeviceProfile::default());
        Self {
            profiles,
            models: HashMap::new(),
        }
    }
}

impl CalibrationTable {
    /// Parse calibration JSON.
    ///
    /// ```json
    /// {
    ///   "0":  { "measured_power_at_one_meter": -59.0, "contact_min_distance": 6.0 },
    ///   "12": { "measured_power_at_one_meter": -62.5, "contact_min_distance": 5.0 },
    ///   "models": { "iPhone12,1": "12" }
    /// }
    /// ```
    ///
    /// A file without a `"0"` entry gets the built-in default profile.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: CalibrationFile =
            serde_json::from_str(json).map_err(|e| ProximityError::Calibration(e.to_string()))?;
        let mut profiles = file.profiles;
        for (key, profile) in &profiles {
            if !profile.contact_min_distance.is_finite()
                || !profile.measured_power_at_one_meter.is_finite()
            {
                return Err(ProximityError::Calibration(format!(
                    "profile {key} has non-finite values"
                )));
            }
        }
        profiles
            .entry(DEFAULT_PROFILE_KEY.to_string())
            .or_insert_with(DeviceProfile::default);
        Ok(Self {
            profiles,
            models: file.models,
        })
    }

    /// Add or replace a profile.
    pub fn insert(&mut self, model_id: u32, profile: DeviceProfile) {
        self.profiles.insert(model_id.to_string(), profile);
    }

    /// Exact lookup without fallback.
    pub fn profile(&self, model_id: u32) -> Result<&DeviceProfile> {
        self.profiles
            .get(&model_id.to_string())
            .ok_or(ProximityError::CalibrationMissing { model_id })
    }

    /// Profile for `model_id`, falling back to the default profile.
    pub fn profile_or_default(&self, model_id: u32) -> DeviceProfile {
        match self.profile(model_id) {
            Ok(profile) => *profile,
            Err(e) => {
                debug!(error = %e, "Using default calibration profile");
                self.profiles
                    .get(DEFAULT_PROFILE_KEY)
                    .copied()
                    .unwrap_or_default()
            }
        }
    }

    /// Model number advertised by a device with the given platform model
    /// identifier; unknown identifiers map to 0.
    pub fn model_number(&self, model_identifier: &str) -> u32 {
        self.models
            .get(model_identifier)
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }

    /// Platform model identifier for a model number, if known.
    pub fn model_name(&self, model_id: u32) -> Option<&str> {
        let wanted = model_id.to_string();
        self.models
            .iter()
            .find(|(_, number)| **number == wanted)
            .map(|(name, _)| name.as_str())
    }

    /// Number of profiles including the default.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Always false; the default profile is always present.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "0":  { "measured_power_at_one_meter": -60.0, "contact_min_distance": 4.0 },
        "12": { "measured_power_at_one_meter": -62.5, "contact_min_distance": 5.0 },
        "models": { "iPhone12,1": "12", "Pixel 4": "not-a-number" }
    }"#;

    #[test]
    fn test_from_json() {
        let table = CalibrationTable::from_json(JSON).expect("parse");
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.profile(12).expect("profile 12").measured_power_at_one_meter,
            -62.5
        );
        assert_eq!(table.profile_or_default(0).contact_min_distance, 4.0);
    }

    #[test]
    fn test_unknown_model_falls_back_to_default() {
        let table = CalibrationTable::from_json(JSON).expect("parse");
        assert!(matches!(
            table.profile(999),
            Err(ProximityError::CalibrationMissing { model_id: 999 })
        ));
        assert_eq!(table.profile_or_default(999), *table.profile(0).expect("default"));
    }

    #[test]
    fn test_missing_default_gets_builtin() {
        let table = CalibrationTable::from_json(
            r#"{ "3": { "measured_power_at_one_meter": -55.0, "contact_min_distance": 3.0 } }"#,
        )
        .expect("parse");
        assert_eq!(table.profile_or_default(7), DeviceProfile::default());
    }

    #[test]
    fn test_model_lookup() {
        let table = CalibrationTable::from_json(JSON).expect("parse");
        assert_eq!(table.model_number("iPhone12,1"), 12);
        assert_eq!(table.model_number("Pixel 4"), 0);
        assert_eq!(table.model_number("Nokia 3310"), 0);
        assert_eq!(table.model_name(12), Some("iPhone12,1"));
        assert_eq!(table.model_name(44), None);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            CalibrationTable::from_json("[1, 2]"),
            Err(ProximityError::Calibration(_))
        ));
        assert!(matches!(
            CalibrationTable::from_json(r#"{ "0": { "measured_power_at_one_meter": -59.0 } }"#),
            Err(ProximityError::Calibration(_))
        ));
    }

    #[test]
    fn test_default_table() {
        let mut table = CalibrationTable::default();
        assert_eq!(table.profile_or_default(5), DeviceProfile::default());
        table.insert(
            5,
            DeviceProfile {
                measured_power_at_one_meter: -70.0,
                contact_min_distance: 2.0,
            },
        );
        assert_eq!(table.profile_or_default(5).contact_min_distance, 2.0);
    }
}
