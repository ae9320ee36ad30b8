//! Rotation period and disclosure window sizing.
//!
//! The ratchet itself is clock-free: it advances by one index per call. This
//! module converts wall-clock policy (how often numbers rotate, how far back
//! a disclosure reaches) into index arithmetic.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default identifier rotation period.
pub const DEFAULT_ROTATION_PERIOD: Duration = Duration::from_secs(15 * 60);

/// Default disclosure window in days.
pub const DEFAULT_DISCLOSURE_DAYS: u32 = 14;

/// Rotation and disclosure policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisclosureWindow {
    /// How long a single number is broadcast before the key is ratcheted.
    pub rotation_period: Duration,
    /// How many days of past numbers a report discloses.
    pub disclosure_days: u32,
}

impl Default for DisclosureWindow {
    fn default() -> Self {
        Self {
            rotation_period: DEFAULT_ROTATION_PERIOD,
            disclosure_days: DEFAULT_DISCLOSURE_DAYS,
        }
    }
}

impl DisclosureWindow {
    /// Number of rotation periods covered by the disclosure window.
    ///
    /// A zero rotation period is treated as one second.
    pub fn periods(&self) -> u64 {
        let window_secs = u64::from(self.disclosure_days) * 24 * 60 * 60;
        let period_secs = self.rotation_period.as_secs().max(1);
        window_secs / period_secs
    }

    /// First index to disclose when the current index is `end_index`,
    /// clamped to 0.
    pub fn start_index(&self, end_index: u16) -> u16 {
        let start = u64::from(end_index).saturating_sub(self.periods());
        // start <= end_index, so this always fits
        u16::try_from(start).unwrap_or(0)
    }

    /// `(start_index, end_index)` for a report ending at `end_index`.
    pub fn bounds(&self, end_index: u16) -> (u16, u16) {
        (self.start_index(end_index), end_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_periods() {
        // 14 days of 15-minute periods
        assert_eq!(DisclosureWindow::default().periods(), 1344);
    }

    #[test]
    fn test_start_index_clamped() {
        let window = DisclosureWindow::default();
        assert_eq!(window.start_index(0), 0);
        assert_eq!(window.start_index(100), 0);
        assert_eq!(window.start_index(1344), 0);
        assert_eq!(window.start_index(2000), 656);
        assert_eq!(window.bounds(u16::MAX), (u16::MAX - 1344, u16::MAX));
    }

    #[test]
    fn test_custom_period() {
        let window = DisclosureWindow {
            rotation_period: Duration::from_secs(60 * 60),
            disclosure_days: 1,
        };
        assert_eq!(window.periods(), 24);
        assert_eq!(window.start_index(30), 6);
    }

    #[test]
    fn test_zero_period_does_not_divide_by_zero() {
        let window = DisclosureWindow {
            rotation_period: Duration::ZERO,
            disclosure_days: 1,
        };
        assert_eq!(window.periods(), 86_400);
        assert_eq!(window.start_index(500), 0);
    }
}
