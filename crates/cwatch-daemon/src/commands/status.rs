//! Exposure status and diagnostics command handlers.

use std::sync::Arc;

use cwatch_db::queries::{contact_events, observations, settings};
use cwatch_exposure::notifier;
use serde_json::Value;

use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Settings key for the user's self-reported status.
pub const USER_REPORTED_SICK: &str = "user_reported_sick";

/// Most recent exposure and whether to notify.
pub async fn exposure_status(state: &Arc<DaemonState>) -> Result {
    let store = state.store.lock().await;
    let sick = settings::get_bool(store.conn(), USER_REPORTED_SICK, false).map_err(super::db_error)?;
    let status = notifier::exposure_status(&*store, sick)
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;
    serde_json::to_value(status).map_err(|e| RpcError::internal_error(&e.to_string()))
}

/// Params: `sick` (bool).
pub async fn set_user_reported_sick(state: &Arc<DaemonState>, params: &Value) -> Result {
    let sick = params
        .get("sick")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| RpcError::invalid_params("sick required"))?;
    let store = state.store.lock().await;
    settings::set_bool(store.conn(), USER_REPORTED_SICK, sick).map_err(super::db_error)?;
    Ok(serde_json::json!({"updated": true}))
}

/// Recorded contacts ending at or after `since` (ms, default 0).
pub async fn list_contact_events(state: &Arc<DaemonState>, params: &Value) -> Result {
    let since = params.get("since").and_then(|v| v.as_u64()).unwrap_or(0);
    let store = state.store.lock().await;
    let events = contact_events::list_since(store.conn(), since).map_err(super::db_error)?;
    serde_json::to_value(events).map_err(|e| RpcError::internal_error(&e.to_string()))
}

/// Daemon status snapshot.
pub async fn get_status(state: &Arc<DaemonState>) -> Result {
    let (observation_count, flagged, contacts) = {
        let store = state.store.lock().await;
        (
            observations::count(store.conn()).map_err(super::db_error)?,
            observations::count_flagged(store.conn()).map_err(super::db_error)?,
            contact_events::count(store.conn()).map_err(super::db_error)?,
        )
    };
    let tracked = state
        .tracer
        .tracked()
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;
    let in_range = state
        .tracer
        .is_in_range()
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;

    Ok(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": state.started_at,
        "observations": observation_count,
        "flagged_observations": flagged,
        "contact_events": contacts,
        "tracked_encounters": tracked,
        "contact_in_range": in_range,
        "events_emitted": state.event_bus.sequence(),
    }))
}

/// Acknowledge a subscription. The connection handler attaches the event
/// stream.
pub async fn subscribe_events(state: &Arc<DaemonState>) -> Result {
    Ok(serde_json::json!({
        "subscribed": true,
        "sequence": state.event_bus.sequence(),
    }))
}
