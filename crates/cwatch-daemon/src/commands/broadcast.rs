//! Broadcast and observation command handlers.

use std::sync::Arc;

use cwatch_db::queries::settings;
use cwatch_proximity::advertisement::{encode_manufacturer_data, parse_manufacturer_data};
use cwatch_types::contact::Observation;
use cwatch_types::{identifier_string, now_millis};
use serde_json::Value;
use tracing::{debug, warn};

use crate::keys::CURRENT_TCK_SETTING;
use crate::rpc::RpcError;
use crate::tracer::ObservationOutcome;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// The number to advertise right now.
///
/// A new number is persisted before it is returned so a restart never
/// reuses an index.
pub async fn identifier_to_broadcast(state: &Arc<DaemonState>) -> Result {
    let rotation = state.config.keys.rotation_period().as_millis();
    let rotation = u64::try_from(rotation).unwrap_or(u64::MAX);
    let (tcn, is_new) = state
        .keys
        .identifier_to_broadcast(now_millis(), rotation)
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;

    if is_new {
        let key = state
            .keys
            .current_key()
            .map_err(|e| RpcError::internal_error(&e.to_string()))?;
        let store = state.store.lock().await;
        settings::set_json(store.conn(), CURRENT_TCK_SETTING, &key).map_err(super::db_error)?;
        debug!(tcn = %identifier_string(&tcn), "Broadcasting new number");
    }

    let manufacturer_data = encode_manufacturer_data(state.config.proximity.local_model_id, &tcn);
    Ok(serde_json::json!({
        "identifier": hex::encode(tcn),
        "is_new": is_new,
        "manufacturer_data": hex::encode(manufacturer_data),
    }))
}

/// A sighting reported by the radio transport.
///
/// Params are an [`Observation`].
pub async fn identifier_observed(state: &Arc<DaemonState>, params: &Value) -> Result {
    let obs: Observation = serde_json::from_value(params.clone())
        .map_err(|e| RpcError::invalid_params(&e.to_string()))?;
    observe(state, &obs).await
}

/// A raw advertisement: `manufacturer_data` (hex), `rssi`, optional
/// `tx_power_level` and `timestamp`.
pub async fn advertisement_observed(state: &Arc<DaemonState>, params: &Value) -> Result {
    let data = params
        .get("manufacturer_data")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::invalid_params("manufacturer_data required"))?;
    let data = hex::decode(data).map_err(|_| RpcError::invalid_params("manufacturer_data must be hex"))?;
    let rssi = params
        .get("rssi")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| RpcError::invalid_params("rssi required"))?;

    let advertisement = parse_manufacturer_data(&data);
    let Some(identifier) = advertisement.tcn else {
        // bridged short ids need a connection to resolve
        return Ok(serde_json::json!({"ignored": true, "reason": "no_identifier"}));
    };

    let obs = Observation {
        identifier,
        rssi,
        device_model_id: advertisement.device_model_id,
        tx_power_level: params.get("tx_power_level").and_then(|v| v.as_f64()),
        timestamp: params
            .get("timestamp")
            .and_then(|v| v.as_u64())
            .unwrap_or_else(now_millis),
    };
    observe(state, &obs).await
}

async fn observe(state: &Arc<DaemonState>, obs: &Observation) -> Result {
    let own = state
        .keys
        .is_own(&obs.identifier)
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;
    if own {
        return Ok(serde_json::json!({"ignored": true, "reason": "own_identifier"}));
    }

    let outcome: ObservationOutcome = {
        let mut store = state.store.lock().await;
        state.tracer.observe(&mut *store, obs).map_err(|e| {
            warn!(error = %e, "Failed to record observation");
            RpcError::internal_error(&e.to_string())
        })?
    };
    state.event_bus.emit_proximity(&outcome.events);

    Ok(serde_json::json!({
        "ignored": false,
        "estimated_distance": finite_or_null(outcome.estimated_distance),
        "accumulated": outcome.accumulated,
        "events": outcome.events,
    }))
}

/// JSON has no infinity.
fn finite_or_null(value: f64) -> Value {
    if value.is_finite() {
        serde_json::json!(value)
    } else {
        Value::Null
    }
}
