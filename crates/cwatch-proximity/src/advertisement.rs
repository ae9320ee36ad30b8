//! Manufacturer-data parsing.
//!
//! Layout:
//!
//! | Offset | Size | Field                                       |
//! |--------|------|---------------------------------------------|
//! | 0      | 2    | device model id, little-endian              |
//! | 2      | 16   | temporary contact number                    |
//! | 18     | 4    | short temporary id of a bridging device     |
//!
//! Every field is optional from the end: a 2-byte payload carries only the
//! model id, and anything shorter carries nothing.

use cwatch_types::{Tcn, TCN_LEN};

use crate::calibration::DeviceProfile;
use crate::distance::measured_power_from_tx_power;

const MODEL_ID_END: usize = 2;
const TCN_END: usize = MODEL_ID_END + TCN_LEN;
const SHORT_ID_END: usize = TCN_END + 4;

/// Fields extracted from one advertisement's manufacturer data.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Advertisement {
    /// Model id used to select a calibration profile; 0 when absent.
    pub device_model_id: u32,
    pub tcn: Option<Tcn>,
    /// Present when a bridging device relays someone else's number.
    pub short_identifier: Option<[u8; 4]>,
}

/// Parse manufacturer data. Never fails; missing fields are left empty.
pub fn parse_manufacturer_data(data: &[u8]) -> Advertisement {
    let device_model_id = match data.get(..MODEL_ID_END) {
        Some(&[lo, hi]) => u32::from(u16::from_le_bytes([lo, hi])),
        _ => 0,
    };
    let tcn = data
        .get(MODEL_ID_END..TCN_END)
        .and_then(|bytes| bytes.try_into().ok());
    let short_identifier = data
        .get(TCN_END..SHORT_ID_END)
        .and_then(|bytes| bytes.try_into().ok());
    Advertisement {
        device_model_id,
        tcn,
        short_identifier,
    }
}

/// Build manufacturer data for our own advertisement.
pub fn encode_manufacturer_data(device_model_id: u16, tcn: &Tcn) -> Vec<u8> {
    let mut out = Vec::with_capacity(TCN_END);
    out.extend_from_slice(&device_model_id.to_le_bytes());
    out.extend_from_slice(tcn);
    out
}

/// One-meter power for a sighting: the advertised TX power when present,
/// else the calibration profile.
pub fn measured_power(tx_power_level: Option<f64>, profile: &DeviceProfile) -> f64 {
    match tx_power_level {
        Some(tx) if tx.is_finite() => measured_power_from_tx_power(tx),
        _ => profile.measured_power_at_one_meter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_payload() {
        let mut data = vec![0x34, 0x12];
        data.extend_from_slice(&[9u8; 16]);
        data.extend_from_slice(&[1, 2, 3, 4]);
        let ad = parse_manufacturer_data(&data);
        assert_eq!(ad.device_model_id, 0x1234);
        assert_eq!(ad.tcn, Some([9u8; 16]));
        assert_eq!(ad.short_identifier, Some([1, 2, 3, 4]));
    }

    #[test]
    fn test_short_payloads() {
        assert_eq!(parse_manufacturer_data(&[]), Advertisement::default());
        assert_eq!(parse_manufacturer_data(&[7]), Advertisement::default());

        let ad = parse_manufacturer_data(&[7, 0, 1, 2, 3]);
        assert_eq!(ad.device_model_id, 7);
        assert_eq!(ad.tcn, None);
        assert_eq!(ad.short_identifier, None);

        let mut data = vec![1, 0];
        data.extend_from_slice(&[5u8; 16]);
        data.push(0xff);
        let ad = parse_manufacturer_data(&data);
        assert_eq!(ad.tcn, Some([5u8; 16]));
        assert_eq!(ad.short_identifier, None);
    }

    #[test]
    fn test_encode_is_parsed_back() {
        let data = encode_manufacturer_data(12, &[3u8; 16]);
        assert_eq!(data.len(), 18);
        let ad = parse_manufacturer_data(&data);
        assert_eq!(ad.device_model_id, 12);
        assert_eq!(ad.tcn, Some([3u8; 16]));
    }

    #[test]
    fn test_measured_power_prefers_tx_power() {
        let profile = DeviceProfile::default();
        assert_eq!(measured_power(Some(-20.0), &profile), -61.0);
        assert_eq!(
            measured_power(None, &profile),
            profile.measured_power_at_one_meter
        );
        assert_eq!(
            measured_power(Some(f64::NAN), &profile),
            profile.measured_power_at_one_meter
        );
    }
}
