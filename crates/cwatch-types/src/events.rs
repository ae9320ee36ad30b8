//! Events emitted by the proximity state machine.

use serde::{Deserialize, Serialize};

use crate::contact::ContactEvent;

/// Notifications fanned out to every proximity subscriber.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProximityEvent {
    /// Some identifier entered the danger threshold.
    ContactInRange { estimated_distance: f64 },
    /// No identifier is within the danger threshold any more.
    ContactsLeftRange,
    /// A contact crossed the record threshold.
    ContactRecorded(ContactEvent),
}

impl ProximityEvent {
    /// Event type name as used on the daemon event bus.
    pub fn name(&self) -> &'static str {
        match self {
            ProximityEvent::ContactInRange { .. } => "contact_in_range",
            ProximityEvent::ContactsLeftRange => "contacts_left_range",
            ProximityEvent::ContactRecorded(_) => "contact_recorded",
        }
    }
}
