//! Contact accumulation.
//!
//! Per identifier: `Unseen -> Encountered -> Recorded`, with a global quiet
//! timer that sends every unrecorded encounter back to timing from scratch.
//!
//! - A sample qualifies when `distance <= contact_min_distance`. Only
//!   qualifying samples touch per-identifier state or the quiet timer.
//! - The first qualifying sample starts an encounter (`count = 1`,
//!   `sum = distance`, `start = now`).
//! - A qualifying sample with `now - start > time_till_record` records the
//!   contact. Each encounter episode records at most once.
//! - When no qualifying sample for any identifier arrives for
//!   `quiet_timeout`, the timer fires: unrecorded encounters lose their start
//!   time, recorded ones end their episode, and the range flag clears.
//!
//! Far samples never expire an encounter. Only the quiet timer does.
//!
//! Identifiers not seen for `retention` are forgotten on every call,
//! whether or not the quiet timer fires.
//!
//! The timer is evaluated lazily against the timestamp of each call, so the
//! accumulator has no clock of its own. Callers that want the timer to fire
//! during silence call [`ContactAccumulator::tick`] periodically.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use cwatch_types::contact::ContactEvent;
use cwatch_types::events::ProximityEvent;
use cwatch_types::{identifier_string, Tcn, UnixMillis};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::range::{RangeMonitor, DEFAULT_EXIT_MARGIN};
use crate::{ProximityError, Result};

/// Accumulator timing and hysteresis parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AccumulatorConfig {
    /// How long an encounter must last before it is recorded.
    pub time_till_record: Duration,
    /// Silence after which unrecorded encounters restart.
    pub quiet_timeout: Duration,
    /// Extra distance beyond the threshold needed to leave range.
    pub exit_margin: f64,
    /// How long an identifier is remembered after its last qualifying sample.
    pub retention: Duration,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            time_till_record: Duration::from_secs(60),
            quiet_timeout: Duration::from_secs(28),
            exit_margin: DEFAULT_EXIT_MARGIN,
            retention: Duration::from_secs(60 * 60),
        }
    }
}

/// Running state for one identifier.
#[derive(Clone, Debug, PartialEq)]
pub struct ContactRecord {
    /// `None` until the first qualifying sample, and again after the quiet
    /// timer fires.
    pub start_time: Option<UnixMillis>,
    /// Set when the contact is recorded.
    pub end_time: Option<UnixMillis>,
    pub last_seen: UnixMillis,
    pub last_distance: f64,
    pub sample_count: u64,
    pub distance_sum: f64,
}

impl ContactRecord {
    fn started(now: UnixMillis, distance: f64) -> Self {
        Self {
            start_time: Some(now),
            end_time: None,
            last_seen: now,
            last_distance: distance,
            sample_count: 1,
            distance_sum: distance,
        }
    }

    /// Mean of the accumulated samples, or `None` before the first one.
    pub fn average_distance(&self) -> Option<f64> {
        (self.sample_count > 0).then(|| self.distance_sum / self.sample_count as f64)
    }

    pub fn is_recorded(&self) -> bool {
        self.end_time.is_some()
    }
}

/// Per-identifier contact state machine.
pub struct ContactAccumulator {
    config: AccumulatorConfig,
    records: HashMap<Tcn, ContactRecord>,
    last_qualifying_at: Option<UnixMillis>,
    range: RangeMonitor,
    sender: broadcast::Sender<ProximityEvent>,
}

impl ContactAccumulator {
    pub fn new(config: AccumulatorConfig) -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            range: RangeMonitor::new(config.exit_margin),
            config,
            records: HashMap::new(),
            last_qualifying_at: None,
            sender,
        }
    }

    /// Receive every event this accumulator emits.
    pub fn subscribe(&self) -> broadcast::Receiver<ProximityEvent> {
        self.sender.subscribe()
    }

    /// Apply one distance sample and return the events it caused, in order.
    pub fn observe(
        &mut self,
        identifier: &Tcn,
        distance: f64,
        contact_min_distance: f64,
        now: UnixMillis,
    ) -> Vec<ProximityEvent> {
        self.forget_stale(now);
        let mut events = self.expire_if_quiet(now);
        events.extend(self.range.on_sample(distance, contact_min_distance));

        if distance <= contact_min_distance {
            self.last_qualifying_at = Some(now);
            events.extend(self.accumulate(identifier, distance, now));
        }

        self.publish(&events);
        events
    }

    /// Fire the quiet timer if it is due at `now`.
    pub fn tick(&mut self, now: UnixMillis) -> Vec<ProximityEvent> {
        self.forget_stale(now);
        let events = self.expire_if_quiet(now);
        self.publish(&events);
        events
    }

    fn accumulate(&mut self, identifier: &Tcn, distance: f64, now: UnixMillis) -> Option<ProximityEvent> {
        let time_till_record = duration_millis(self.config.time_till_record);
        let record = match self.records.get_mut(identifier) {
            Some(record) => record,
            None => {
                debug!(tcn = %identifier_string(identifier), distance, "Encounter started");
                self.records
                    .insert(*identifier, ContactRecord::started(now, distance));
                return None;
            }
        };

        record.last_seen = now;
        record.last_distance = distance;
        if record.is_recorded() {
            return None;
        }

        let start = match record.start_time {
            Some(start) => start,
            None => {
                debug!(tcn = %identifier_string(identifier), distance, "Encounter restarted");
                *record = ContactRecord::started(now, distance);
                return None;
            }
        };

        record.sample_count += 1;
        record.distance_sum += distance;

        if now.saturating_sub(start) <= time_till_record {
            return None;
        }

        record.end_time = Some(now);
        let event = ContactEvent {
            identifier: *identifier,
            average_distance: record.average_distance().unwrap_or(distance),
            start_time: start,
            end_time: now,
        };
        info!(
            tcn = %identifier_string(identifier),
            average_distance = event.average_distance,
            duration_ms = event.duration_millis(),
            samples = record.sample_count,
            "Contact recorded"
        );
        Some(ProximityEvent::ContactRecorded(event))
    }

    fn expire_if_quiet(&mut self, now: UnixMillis) -> Vec<ProximityEvent> {
        let quiet = duration_millis(self.config.quiet_timeout);
        let due = matches!(self.last_qualifying_at, Some(last) if now.saturating_sub(last) >= quiet);
        if !due {
            return Vec::new();
        }
        self.last_qualifying_at = None;

        let before = self.records.len();
        self.records.retain(|_, record| !record.is_recorded());
        let mut reset = 0usize;
        for record in self.records.values_mut() {
            if record.start_time.take().is_some() {
                reset += 1;
            }
        }
        debug!(
            reset,
            dropped = before - self.records.len(),
            "Quiet timer fired"
        );

        self.range.reset().into_iter().collect()
    }

    fn forget_stale(&mut self, now: UnixMillis) {
        let retention = duration_millis(self.config.retention);
        let before = self.records.len();
        self.records
            .retain(|_, record| now.saturating_sub(record.last_seen) < retention);
        let dropped = before - self.records.len();
        if dropped > 0 {
            debug!(dropped, "Forgot stale identifiers");
        }
    }

    fn publish(&self, events: &[ProximityEvent]) {
        for event in events {
            // no subscribers is fine
            let _ = self.sender.send(event.clone());
        }
    }

    /// Current state for `identifier`.
    pub fn record(&self, identifier: &Tcn) -> Option<&ContactRecord> {
        self.records.get(identifier)
    }

    /// Number of identifiers currently tracked.
    pub fn tracked(&self) -> usize {
        self.records.len()
    }

    /// Whether some identifier is currently considered too close.
    pub fn is_in_range(&self) -> bool {
        self.range.is_too_close()
    }

    pub fn config(&self) -> &AccumulatorConfig {
        &self.config
    }
}

impl Default for ContactAccumulator {
    fn default() -> Self {
        Self::new(AccumulatorConfig::default())
    }
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// A [`ContactAccumulator`] behind a mutex, shareable across threads.
///
/// Samples for one identifier are applied in the order callers acquire the
/// lock.
pub struct SharedAccumulator {
    inner: Mutex<ContactAccumulator>,
}

impl SharedAccumulator {
    pub fn new(accumulator: ContactAccumulator) -> Self {
        Self {
            inner: Mutex::new(accumulator),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ContactAccumulator>> {
        self.inner.lock().map_err(|_| ProximityError::LockPoisoned)
    }

    pub fn observe(
        &self,
        identifier: &Tcn,
        distance: f64,
        contact_min_distance: f64,
        now: UnixMillis,
    ) -> Result<Vec<ProximityEvent>> {
        Ok(self
            .lock()?
            .observe(identifier, distance, contact_min_distance, now))
    }

    pub fn tick(&self, now: UnixMillis) -> Result<Vec<ProximityEvent>> {
        Ok(self.lock()?.tick(now))
    }

    pub fn subscribe(&self) -> Result<broadcast::Receiver<ProximityEvent>> {
        Ok(self.lock()?.subscribe())
    }

    pub fn tracked(&self) -> Result<usize> {
        Ok(self.lock()?.tracked())
    }

    pub fn is_in_range(&self) -> Result<bool> {
        Ok(self.lock()?.is_in_range())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Tcn = [0xaa; 16];
    const B: Tcn = [0xbb; 16];
    const MIN: f64 = 6.0;
    const SEC: u64 = 1_000;

    fn recorded(events: &[ProximityEvent]) -> Vec<&ContactEvent> {
        events
            .iter()
            .filter_map(|e| match e {
                ProximityEvent::ContactRecorded(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_steady_contact_records_once() {
        let mut acc = ContactAccumulator::default();
        let mut all = Vec::new();
        for s in 0..=61u64 {
            all.extend(acc.observe(&A, 2.0, MIN, s * SEC));
        }
        // keep going: the episode must not record twice
        for s in 62..=120u64 {
            all.extend(acc.observe(&A, 2.0, MIN, s * SEC));
        }

        let contacts = recorded(&all);
        assert_eq!(contacts.len(), 1);
        let contact = contacts[0];
        assert_eq!(contact.identifier, A);
        assert_eq!(contact.average_distance, 2.0);
        assert!(contact.end_time - contact.start_time >= 60 * SEC);
        assert_eq!(contact.start_time, 0);
        assert_eq!(contact.end_time, 61 * SEC);
    }

    #[test]
    fn test_not_recorded_at_exactly_threshold() {
        let mut acc = ContactAccumulator::default();
        let mut all = Vec::new();
        for s in 0..=60u64 {
            all.extend(acc.observe(&A, 2.0, MIN, s * SEC));
        }
        assert!(recorded(&all).is_empty());
    }

    #[test]
    fn test_quiet_gap_restarts_encounter() {
        let mut acc = ContactAccumulator::default();
        let mut all = Vec::new();
        for s in 0..30u64 {
            all.extend(acc.observe(&A, 2.0, MIN, s * SEC));
        }
        let late = 29 * SEC + 29 * SEC;
        all.extend(acc.observe(&A, 2.0, MIN, late));

        assert!(recorded(&all).is_empty());
        let record = acc.record(&A).expect("tracked");
        assert_eq!(record.start_time, Some(late));
        assert_eq!(record.sample_count, 1);
        assert_eq!(record.distance_sum, 2.0);
    }

    #[test]
    fn test_gap_below_quiet_timeout_carries_over() {
        let mut acc = ContactAccumulator::default();
        let mut all = Vec::new();
        for s in 0..30u64 {
            all.extend(acc.observe(&A, 2.0, MIN, s * SEC));
        }
        // 27s of silence, then continue past the record threshold
        for s in 56..=62u64 {
            all.extend(acc.observe(&A, 2.0, MIN, s * SEC));
        }
        let contacts = recorded(&all);
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].start_time, 0);
    }

    #[test]
    fn test_average_distance() {
        let mut acc = ContactAccumulator::default();
        let mut all = Vec::new();
        for s in 0..=61u64 {
            let d = if s % 2 == 0 { 1.0 } else { 3.0 };
            all.extend(acc.observe(&A, d, MIN, s * SEC));
        }
        let contacts = recorded(&all);
        assert_eq!(contacts.len(), 1);
        assert!((contacts[0].average_distance - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_far_samples_do_not_expire_or_count() {
        let mut acc = ContactAccumulator::default();
        let mut all = Vec::new();
        for s in 0..=61u64 {
            all.extend(acc.observe(&A, 2.0, MIN, s * SEC));
            // B is always too far and never tracked
            all.extend(acc.observe(&B, 50.0, MIN, s * SEC));
        }
        assert_eq!(recorded(&all).len(), 1);
        assert!(acc.record(&B).is_none());

        let mut acc = ContactAccumulator::default();
        acc.observe(&A, 2.0, MIN, 0);
        acc.observe(&A, 9.0, MIN, 5 * SEC);
        let record = acc.record(&A).expect("tracked");
        assert_eq!(record.start_time, Some(0));
        assert_eq!(record.sample_count, 1);
    }

    #[test]
    fn test_far_samples_do_not_hold_off_quiet_timer() {
        let mut acc = ContactAccumulator::default();
        acc.observe(&A, 2.0, MIN, 0);
        for s in 1..=40u64 {
            acc.observe(&B, 50.0, MIN, s * SEC);
        }
        assert_eq!(acc.record(&A).expect("tracked").start_time, None);
    }

    #[test]
    fn test_other_identifier_keeps_timer_alive() {
        let mut acc = ContactAccumulator::default();
        let mut all = Vec::new();
        all.extend(acc.observe(&A, 2.0, MIN, 0));
        // only B is seen for a while, but it qualifies
        for s in 1..=50u64 {
            all.extend(acc.observe(&B, 3.0, MIN, s * SEC));
        }
        all.extend(acc.observe(&A, 2.0, MIN, 61 * SEC));
        let contacts = recorded(&all);
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].identifier, A);
    }

    #[test]
    fn test_tick_fires_quiet_timer() {
        let mut acc = ContactAccumulator::default();
        let events = acc.observe(&A, 2.0, MIN, 0);
        assert!(matches!(
            events.as_slice(),
            [ProximityEvent::ContactInRange { .. }]
        ));
        assert!(acc.tick(27 * SEC).is_empty());
        assert_eq!(acc.tick(28 * SEC), vec![ProximityEvent::ContactsLeftRange]);
        assert!(acc.tick(60 * SEC).is_empty());
        assert_eq!(acc.record(&A).expect("tracked").start_time, None);
        assert!(!acc.is_in_range());
    }

    #[test]
    fn test_new_episode_after_quiet_can_record_again() {
        let mut acc = ContactAccumulator::default();
        let mut all = Vec::new();
        for s in 0..=61u64 {
            all.extend(acc.observe(&A, 2.0, MIN, s * SEC));
        }
        for s in 100..=161u64 {
            all.extend(acc.observe(&A, 4.0, MIN, s * SEC));
        }
        let contacts = recorded(&all);
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[1].start_time, 100 * SEC);
        assert_eq!(contacts[1].average_distance, 4.0);
    }

    #[test]
    fn test_idle_records_dropped_after_retention() {
        let mut acc = ContactAccumulator::default();
        acc.observe(&A, 2.0, MIN, 0);
        acc.tick(30 * SEC);
        assert_eq!(acc.tracked(), 1);

        acc.observe(&B, 2.0, MIN, 2 * 60 * 60 * SEC);
        acc.tick(2 * 60 * 60 * SEC + 30 * SEC);
        assert!(acc.record(&A).is_none());
        assert!(acc.record(&B).is_some());
    }

    #[test]
    fn test_continuous_traffic_keeps_record_map_bounded() {
        let mut acc = ContactAccumulator::default();
        let rotation = 15 * 60 * SEC;
        let mut contacts = 0;
        let mut peak = 0;
        // one nearby phone for 6 hours, a sample every 10s, new number every 15 min
        for t in (0..6 * 60 * 60 * SEC).step_by(10_000) {
            let id = [(t / rotation) as u8; 16];
            contacts += recorded(&acc.observe(&id, 1.0, MIN, t)).len();
            peak = peak.max(acc.tracked());
        }
        assert_eq!(contacts, 24);
        // the current number plus those seen within the last hour
        assert!(peak <= 5, "tracked peaked at {peak}");
        assert!(acc.record(&[23u8; 16]).is_some());
        assert!(acc.record(&[0u8; 16]).is_none());
    }

    #[test]
    fn test_subscribers_receive_events() {
        let mut acc = ContactAccumulator::default();
        let mut rx1 = acc.subscribe();
        let mut rx2 = acc.subscribe();
        for s in 0..=61u64 {
            acc.observe(&A, 2.0, MIN, s * SEC);
        }
        for rx in [&mut rx1, &mut rx2] {
            assert!(matches!(
                rx.try_recv().expect("in range"),
                ProximityEvent::ContactInRange { .. }
            ));
            assert!(matches!(
                rx.try_recv().expect("recorded"),
                ProximityEvent::ContactRecorded(_)
            ));
        }
    }

    #[test]
    fn test_shared_accumulator_across_threads() {
        use std::sync::Arc;

        // threads interleave their clocks, so keep the quiet timer out of it
        let config = AccumulatorConfig {
            quiet_timeout: Duration::from_secs(3600),
            ..AccumulatorConfig::default()
        };
        let shared = Arc::new(SharedAccumulator::new(ContactAccumulator::new(config)));
        let handles: Vec<_> = (0..4u8)
            .map(|i| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    let id = [i; 16];
                    let mut recorded = 0;
                    for s in 0..=61u64 {
                        let events = shared.observe(&id, 1.0, MIN, s * SEC).expect("observe");
                        recorded += events
                            .iter()
                            .filter(|e| matches!(e, ProximityEvent::ContactRecorded(_)))
                            .count();
                    }
                    recorded
                })
            })
            .collect();
        let total: usize = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .sum();
        assert_eq!(total, 4);
        assert_eq!(shared.tracked().expect("tracked"), 4);
    }
}
