//! Event emission.
//!
//! Proximity and exposure events are pushed to subscribers as JSON-RPC
//! notifications. Each subscriber has an independent buffer; slow
//! subscribers lose the oldest events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cwatch_types::events::ProximityEvent;
use cwatch_types::now_millis;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Event type emitted when matching flags new observations.
pub const EXPOSURE_DETECTED: &str = "exposure_detected";

/// An event emitted by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type name (e.g. "contact_recorded").
    pub event_type: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    /// Type-specific payload.
    pub payload: serde_json::Value,
}

impl Event {
    pub fn from_proximity(event: &ProximityEvent) -> Self {
        Self {
            event_type: event.name().to_string(),
            timestamp: now_millis(),
            payload: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn exposure_detected(newly_flagged: usize) -> Self {
        Self {
            event_type: EXPOSURE_DETECTED.to_string(),
            timestamp: now_millis(),
            payload: serde_json::json!({ "newly_flagged": newly_flagged }),
        }
    }
}

/// Event bus for broadcasting events to subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: Event) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Emit a batch of proximity events in order.
    pub fn emit_proximity(&self, events: &[ProximityEvent]) {
        for event in events {
            self.emit(Event::from_proximity(event));
        }
    }

    /// Subscribe to events. Returns a receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Number of events emitted so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}
