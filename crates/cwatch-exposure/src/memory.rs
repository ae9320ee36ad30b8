//! In-memory contact store for tests and ephemeral runs.

use std::collections::{HashMap, HashSet};

use cwatch_types::contact::{ContactEvent, ContactObservation};
use cwatch_types::report::SignedReport;
use cwatch_types::store::{ContactStore, StoreResult};
use cwatch_types::{Tcn, UnixMillis};

/// A [`ContactStore`] backed by hash maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    observations: HashMap<Tcn, ContactObservation>,
    contact_events: Vec<ContactEvent>,
    upload_queue: Vec<SignedReport>,
    received: HashMap<[u8; 64], SignedReport>,
    processed: HashSet<[u8; 64]>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contact_events(&self) -> &[ContactEvent] {
        &self.contact_events
    }

    /// Reports queued for upload, oldest first.
    pub fn upload_queue(&self) -> &[SignedReport] {
        &self.upload_queue
    }

    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    pub fn received_count(&self) -> usize {
        self.received.len()
    }
}

impl ContactStore for MemoryStore {
    fn persist_contact_event(&mut self, event: &ContactEvent) -> StoreResult<()> {
        self.contact_events.push(event.clone());
        Ok(())
    }

    fn upsert_observation(
        &mut self,
        identifier: &Tcn,
        last_seen: UnixMillis,
        closest_distance: f64,
    ) -> StoreResult<()> {
        self.observations
            .entry(*identifier)
            .and_modify(|obs| {
                obs.last_seen = last_seen;
                if closest_distance < obs.closest_estimated_distance_meters {
                    obs.closest_estimated_distance_meters = closest_distance;
                }
            })
            .or_insert_with(|| ContactObservation {
                identifier: *identifier,
                last_seen,
                closest_estimated_distance_meters: closest_distance,
                was_potentially_infectious: false,
            });
        Ok(())
    }

    fn observation(&self, identifier: &Tcn) -> StoreResult<Option<ContactObservation>> {
        Ok(self.observations.get(identifier).cloned())
    }

    fn mark_potentially_infectious(&mut self, identifiers: &[Tcn]) -> StoreResult<usize> {
        let mut newly = 0;
        for id in identifiers {
            if let Some(obs) = self.observations.get_mut(id) {
                if !obs.was_potentially_infectious {
                    obs.was_potentially_infectious = true;
                    newly += 1;
                }
            }
        }
        Ok(newly)
    }

    fn enqueue_signed_report_for_upload(&mut self, report: &SignedReport) -> StoreResult<()> {
        self.upload_queue.push(report.clone());
        Ok(())
    }

    fn most_recent_exposure(&self) -> StoreResult<Option<ContactObservation>> {
        Ok(self
            .observations
            .values()
            .filter(|obs| obs.was_potentially_infectious)
            .max_by_key(|obs| obs.last_seen)
            .cloned())
    }

    fn save_received_report(&mut self, report: &SignedReport) -> StoreResult<bool> {
        if self.received.contains_key(&report.signature_bytes) {
            return Ok(false);
        }
        self.received
            .insert(report.signature_bytes, report.clone());
        Ok(true)
    }

    fn is_report_processed(&self, signature: &[u8; 64]) -> StoreResult<bool> {
        Ok(self.processed.contains(signature))
    }

    fn mark_report_processed(&mut self, signature: &[u8; 64]) -> StoreResult<()> {
        self.processed.insert(*signature);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_keeps_running_minimum() {
        let mut store = MemoryStore::new();
        let id = [1u8; 16];
        store.upsert_observation(&id, 10, 4.0).expect("insert");
        store.upsert_observation(&id, 20, 6.0).expect("update");
        store.upsert_observation(&id, 30, 1.5).expect("update");
        let obs = store.observation(&id).expect("get").expect("present");
        assert_eq!(obs.last_seen, 30);
        assert_eq!(obs.closest_estimated_distance_meters, 1.5);
        assert_eq!(store.observation_count(), 1);
    }

    #[test]
    fn test_most_recent_exposure() {
        let mut store = MemoryStore::new();
        store.upsert_observation(&[1u8; 16], 100, 2.0).expect("a");
        store.upsert_observation(&[2u8; 16], 300, 2.0).expect("b");
        store.upsert_observation(&[3u8; 16], 200, 2.0).expect("c");
        assert!(store.most_recent_exposure().expect("none").is_none());

        store
            .mark_potentially_infectious(&[[1u8; 16], [3u8; 16]])
            .expect("flag");
        let latest = store.most_recent_exposure().expect("get").expect("some");
        assert_eq!(latest.identifier, [3u8; 16]);
    }
}
