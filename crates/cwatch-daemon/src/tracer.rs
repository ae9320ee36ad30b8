//! The contact tracer: everything that happens to one radio sighting.
//!
//! 1. Pick the calibration profile and estimate the distance.
//! 2. Persist the observation (running closest distance).
//! 3. Outside the warm-up window, feed the accumulator.
//! 4. Persist recorded contacts.
//!
//! Sightings of our own broadcasts are filtered out by the caller.

use std::sync::Mutex;

use cwatch_proximity::accumulator::{AccumulatorConfig, ContactAccumulator, SharedAccumulator};
use cwatch_proximity::advertisement::measured_power;
use cwatch_proximity::calibration::CalibrationTable;
use cwatch_proximity::distance::estimate_distance_meters;
use cwatch_proximity::range::AlertThrottle;
use cwatch_proximity::ProximityError;
use cwatch_types::contact::Observation;
use cwatch_types::events::ProximityEvent;
use cwatch_types::store::{ContactStore, StoreError};
use cwatch_types::{identifier_string, UnixMillis};
use tracing::{debug, trace};

#[derive(Debug, thiserror::Error)]
pub enum TracerError {
    #[error(transparent)]
    Proximity(#[from] ProximityError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Tracer settings.
#[derive(Clone, Debug)]
pub struct TracerConfig {
    pub accumulator: AccumulatorConfig,
    pub path_loss_exponent: f64,
    pub warmup_millis: u64,
    pub min_millis_between_alerts: u64,
}

/// What happened to one sighting.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservationOutcome {
    pub estimated_distance: f64,
    /// Whether the sighting reached the accumulator.
    pub accumulated: bool,
    /// Events in emission order. `ContactInRange` events suppressed by the
    /// alert throttle are not included.
    pub events: Vec<ProximityEvent>,
}

pub struct ContactTracer {
    accumulator: SharedAccumulator,
    calibration: CalibrationTable,
    path_loss_exponent: f64,
    warmup_until: UnixMillis,
    throttle: Mutex<AlertThrottle>,
}

impl ContactTracer {
    pub fn new(config: TracerConfig, calibration: CalibrationTable, started_at: UnixMillis) -> Self {
        Self {
            accumulator: SharedAccumulator::new(ContactAccumulator::new(config.accumulator)),
            calibration,
            path_loss_exponent: config.path_loss_exponent,
            warmup_until: started_at.saturating_add(config.warmup_millis),
            throttle: Mutex::new(AlertThrottle::new(config.min_millis_between_alerts)),
        }
    }

    /// Process one sighting of someone else's identifier.
    pub fn observe<S>(&self, store: &mut S, obs: &Observation) -> Result<ObservationOutcome, TracerError>
    where
        S: ContactStore + ?Sized,
    {
        let profile = self.calibration.profile_or_default(obs.device_model_id);
        let power = measured_power(obs.tx_power_level, &profile);
        let distance = estimate_distance_meters(obs.rssi, power, self.path_loss_exponent);
        trace!(
            tcn = %identifier_string(&obs.identifier),
            rssi = obs.rssi,
            model = obs.device_model_id,
            distance,
            "Observation"
        );

        store.upsert_observation(&obs.identifier, obs.timestamp, distance)?;

        if obs.timestamp < self.warmup_until {
            debug!("Sampling warm-up, not accumulating");
            return Ok(ObservationOutcome {
                estimated_distance: distance,
                accumulated: false,
                events: Vec::new(),
            });
        }

        let events = self.accumulator.observe(
            &obs.identifier,
            distance,
            profile.contact_min_distance,
            obs.timestamp,
        )?;
        self.persist(store, &events)?;

        Ok(ObservationOutcome {
            estimated_distance: distance,
            accumulated: true,
            events: self.throttled(events, obs.timestamp)?,
        })
    }

    /// Fire the quiet timer if due.
    pub fn tick(&self, now: UnixMillis) -> Result<Vec<ProximityEvent>, TracerError> {
        Ok(self.accumulator.tick(now)?)
    }

    pub fn tracked(&self) -> Result<usize, TracerError> {
        Ok(self.accumulator.tracked()?)
    }

    pub fn is_in_range(&self) -> Result<bool, TracerError> {
        Ok(self.accumulator.is_in_range()?)
    }

    fn persist<S>(&self, store: &mut S, events: &[ProximityEvent]) -> Result<(), TracerError>
    where
        S: ContactStore + ?Sized,
    {
        for event in events {
            if let ProximityEvent::ContactRecorded(contact) = event {
                store.persist_contact_event(contact)?;
            }
        }
        Ok(())
    }

    fn throttled(
        &self,
        events: Vec<ProximityEvent>,
        now: UnixMillis,
    ) -> Result<Vec<ProximityEvent>, TracerError> {
        let mut throttle = self
            .throttle
            .lock()
            .map_err(|_| ProximityError::LockPoisoned)?;
        Ok(events
            .into_iter()
            .filter(|event| {
                !matches!(event, ProximityEvent::ContactInRange { .. }) || throttle.try_alert(now)
            })
            .collect())
    }
}
