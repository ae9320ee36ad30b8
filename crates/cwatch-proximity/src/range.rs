//! In-range status and alert pacing.

use cwatch_types::events::ProximityEvent;
use cwatch_types::UnixMillis;

/// Default distance past the danger threshold needed to leave range.
pub const DEFAULT_EXIT_MARGIN: f64 = 5.0;

/// Session-wide "someone is too close" flag with exit hysteresis.
///
/// Entering needs `distance <= min`; leaving needs `distance > min + margin`
/// or a quiet timeout. Samples in between change nothing.
#[derive(Clone, Debug)]
pub struct RangeMonitor {
    exit_margin: f64,
    too_close: bool,
}

impl RangeMonitor {
    pub fn new(exit_margin: f64) -> Self {
        Self {
            exit_margin: exit_margin.max(0.0),
            too_close: false,
        }
    }

    /// Whether some identifier is currently considered too close.
    pub fn is_too_close(&self) -> bool {
        self.too_close
    }

    /// Feed one distance estimate. Returns the status change, if any.
    pub fn on_sample(&mut self, distance: f64, contact_min_distance: f64) -> Option<ProximityEvent> {
        if distance <= contact_min_distance {
            if !self.too_close {
                self.too_close = true;
                return Some(ProximityEvent::ContactInRange {
                    estimated_distance: distance,
                });
            }
        } else if self.too_close && distance > contact_min_distance + self.exit_margin {
            self.too_close = false;
            return Some(ProximityEvent::ContactsLeftRange);
        }
        None
    }

    /// Clear the flag after a quiet period.
    pub fn reset(&mut self) -> Option<ProximityEvent> {
        if std::mem::take(&mut self.too_close) {
            Some(ProximityEvent::ContactsLeftRange)
        } else {
            None
        }
    }
}

impl Default for RangeMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_EXIT_MARGIN)
    }
}

/// Allows at most one alert per interval.
#[derive(Clone, Debug)]
pub struct AlertThrottle {
    min_interval_millis: u64,
    last_alert: Option<UnixMillis>,
}

impl AlertThrottle {
    pub fn new(min_interval_millis: u64) -> Self {
        Self {
            min_interval_millis,
            last_alert: None,
        }
    }

    /// Returns true and starts a new interval if an alert may fire at `now`.
    pub fn try_alert(&mut self, now: UnixMillis) -> bool {
        let allowed = match self.last_alert {
            None => true,
            Some(last) => now.saturating_sub(last) >= self.min_interval_millis,
        };
        if allowed {
            self.last_alert = Some(now);
        }
        allowed
    }
}
