//! Disclosure report command handlers.

use std::sync::Arc;

use cwatch_db::queries::{settings, signed_reports};
use cwatch_exposure::processor::ProcessOutcome;
use cwatch_exposure::ExposureError;
use cwatch_tcn::wire::{decode_signed_report, encode_signed_report};
use cwatch_types::report::{MemoType, SignedReport, UploadState};
use cwatch_types::store::ContactStore;
use serde_json::Value;
use tracing::{info, warn};

use crate::commands::status::USER_REPORTED_SICK;
use crate::events::Event;
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Sign a report disclosing our recent numbers and queue it for upload.
///
/// Optional params: `memo_data` (hex, at most 255 bytes).
pub async fn create_report(state: &Arc<DaemonState>, params: &Value) -> Result {
    let memo_data = match params.get("memo_data").and_then(|v| v.as_str()) {
        Some(text) => hex::decode(text).map_err(|_| RpcError::invalid_params("memo_data must be hex"))?,
        None => Vec::new(),
    };

    let signed = state
        .keys
        .create_report(&state.config.keys.window(), MemoType::CovidWatchV1, &memo_data)
        .map_err(|e| match e {
            crate::keys::KeyError::Tcn(e) => RpcError::invalid_params(&e.to_string()),
            other => RpcError::internal_error(&other.to_string()),
        })?;
    let wire = encode_signed_report(&signed).map_err(|e| RpcError::internal_error(&e.to_string()))?;

    {
        let mut store = state.store.lock().await;
        store
            .enqueue_signed_report_for_upload(&signed)
            .map_err(super::db_error)?;
        settings::set_bool(store.conn(), USER_REPORTED_SICK, true).map_err(super::db_error)?;
    }

    info!(
        start_index = signed.report.start_index,
        end_index = signed.report.end_index,
        "Created disclosure report"
    );
    Ok(serde_json::json!({
        "signature": hex::encode(signed.signature_bytes),
        "start_index": signed.report.start_index,
        "end_index": signed.report.end_index,
        "report": hex::encode(wire),
    }))
}

/// Match one received report against stored observations.
///
/// Params: `report` (hex wire bytes) or `signed_report` (JSON).
pub async fn ingest_report(state: &Arc<DaemonState>, params: &Value) -> Result {
    let signed = parse_report(params)?;
    let outcome = state
        .processor
        .process(signed, &state.cancel)
        .await
        .map_err(exposure_error)?;

    let newly_flagged = outcome.newly_flagged();
    if newly_flagged > 0 {
        state.event_bus.emit(Event::exposure_detected(newly_flagged));
    }
    Ok(match outcome {
        ProcessOutcome::AlreadyProcessed => serde_json::json!({
            "already_processed": true,
            "newly_flagged": 0,
        }),
        ProcessOutcome::Matched {
            identifiers,
            newly_flagged,
        } => serde_json::json!({
            "already_processed": false,
            "identifiers": identifiers,
            "newly_flagged": newly_flagged,
        }),
    })
}

/// Match a batch of received reports. Invalid reports are counted and
/// skipped.
///
/// Params: `reports`, an array of hex wire strings.
pub async fn ingest_reports(state: &Arc<DaemonState>, params: &Value) -> Result {
    let items = params
        .get("reports")
        .and_then(|v| v.as_array())
        .ok_or_else(|| RpcError::invalid_params("reports required"))?;

    let mut reports = Vec::with_capacity(items.len());
    let mut malformed = 0usize;
    for item in items {
        match item.as_str().map(decode_wire) {
            Some(Ok(signed)) => reports.push(signed),
            _ => malformed += 1,
        }
    }
    if malformed > 0 {
        warn!(malformed, "Skipping undecodable reports");
    }

    let summary = state
        .processor
        .process_batch(reports, &state.cancel)
        .await
        .map_err(exposure_error)?;
    if summary.newly_flagged > 0 {
        state.event_bus.emit(Event::exposure_detected(summary.newly_flagged));
    }
    Ok(serde_json::json!({
        "processed": summary.processed,
        "skipped": summary.skipped,
        "rejected": summary.rejected + malformed,
        "newly_flagged": summary.newly_flagged,
    }))
}

/// Local reports waiting to be uploaded.
pub async fn pending_uploads(state: &Arc<DaemonState>) -> Result {
    let store = state.store.lock().await;
    let pending = signed_reports::pending_uploads(store.conn()).map_err(super::db_error)?;
    let mut out = Vec::with_capacity(pending.len());
    for stored in &pending {
        let wire = encode_signed_report(&stored.signed)
            .map_err(|e| RpcError::internal_error(&e.to_string()))?;
        out.push(serde_json::json!({
            "signature": hex::encode(stored.signed.signature_bytes),
            "report": hex::encode(wire),
        }));
    }
    Ok(Value::Array(out))
}

/// Record upload progress for a local report.
///
/// Params: `signature` (hex), `state` ("not_uploaded" | "uploading" | "uploaded").
pub async fn set_upload_state(state: &Arc<DaemonState>, params: &Value) -> Result {
    let signature = super::hex_param::<64>(params, "signature")?;
    let upload_state: UploadState = params
        .get("state")
        .cloned()
        .ok_or_else(|| RpcError::invalid_params("state required"))
        .and_then(|v| serde_json::from_value(v).map_err(|e| RpcError::invalid_params(&e.to_string())))?;

    let store = state.store.lock().await;
    match signed_reports::set_upload_state(store.conn(), &signature, upload_state) {
        Ok(()) => Ok(serde_json::json!({"updated": true})),
        Err(cwatch_db::DbError::NotFound(_)) => Err(RpcError::invalid_params("unknown local report")),
        Err(e) => Err(super::db_error(e)),
    }
}

fn parse_report(params: &Value) -> std::result::Result<SignedReport, RpcError> {
    if let Some(text) = params.get("report").and_then(|v| v.as_str()) {
        return decode_wire(text);
    }
    if let Some(json) = params.get("signed_report") {
        return serde_json::from_value(json.clone())
            .map_err(|e| RpcError::invalid_params(&e.to_string()));
    }
    Err(RpcError::invalid_params("report or signed_report required"))
}

fn decode_wire(text: &str) -> std::result::Result<SignedReport, RpcError> {
    let bytes = hex::decode(text).map_err(|_| RpcError::invalid_params("report must be hex"))?;
    decode_signed_report(&bytes).map_err(|e| RpcError::report_rejected(&e.to_string()))
}

fn exposure_error(e: ExposureError) -> RpcError {
    match e {
        ExposureError::Tcn(e) => RpcError::report_rejected(&e.to_string()),
        ExposureError::Cancelled { newly_flagged } => RpcError::cancelled(newly_flagged),
        other if other.is_retryable() => RpcError::retry_later(&other.to_string()),
        other => RpcError::internal_error(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{broadcast, test_state};
    use cwatch_tcn::ratchet::{initial_key, ReportAuthorizationKey};
    use cwatch_tcn::report::create_signed_report;

    #[tokio::test]
    async fn test_create_report_queues_upload() {
        let state = test_state("cmd-create");
        broadcast::identifier_to_broadcast(&state).await.expect("broadcast");

        let created = create_report(&state, &serde_json::json!({"memo_data": "abcd"}))
            .await
            .expect("create");
        assert_eq!(created["start_index"], 0);
        assert_eq!(created["end_index"], 0);

        let pending = pending_uploads(&state).await.expect("pending");
        assert_eq!(pending.as_array().expect("array").len(), 1);
        assert_eq!(pending[0]["signature"], created["signature"]);

        let params = serde_json::json!({"signature": created["signature"], "state": "uploaded"});
        set_upload_state(&state, &params).await.expect("uploaded");
        let pending = pending_uploads(&state).await.expect("pending");
        assert!(pending.as_array().expect("array").is_empty());

        let store = state.store.lock().await;
        assert!(settings::get_bool(store.conn(), USER_REPORTED_SICK, false).expect("sick"));
    }

    #[tokio::test]
    async fn test_set_upload_state_unknown_report() {
        let state = test_state("cmd-upload-unknown");
        let params = serde_json::json!({"signature": hex::encode([0u8; 64]), "state": "uploading"});
        let err = set_upload_state(&state, &params).await.expect_err("unknown");
        assert_eq!(err.code, -32602);
    }

    #[tokio::test]
    async fn test_ingest_report_flags_observation() {
        let state = test_state("cmd-ingest");
        let rak = ReportAuthorizationKey::from_bytes(&[44u8; 32]);
        let key = initial_key(&rak);
        let seen = key.ratchet().expect("ratchet").temporary_contact_number();

        let params = serde_json::json!({
            "identifier": hex::encode(seen),
            "rssi": -80.0,
            "timestamp": 2_000,
        });
        broadcast::identifier_observed(&state, &params).await.expect("observe");

        let mut events = state.event_bus.subscribe();
        let signed = create_signed_report(&rak, MemoType::CovidWatchV1, b"", 0, 3).expect("report");
        let wire = encode_signed_report(&signed).expect("encode");
        let result = ingest_report(&state, &serde_json::json!({"report": hex::encode(&wire)}))
            .await
            .expect("ingest");
        assert_eq!(result["identifiers"], 4);
        assert_eq!(result["newly_flagged"], 1);
        assert_eq!(events.try_recv().expect("event").event_type, "exposure_detected");

        let again = ingest_report(&state, &serde_json::json!({"signed_report": signed}))
            .await
            .expect("again");
        assert_eq!(again["already_processed"], true);
    }

    #[tokio::test]
    async fn test_ingest_rejects_tampered_report() {
        let state = test_state("cmd-tampered");
        let rak = ReportAuthorizationKey::from_bytes(&[45u8; 32]);
        let mut signed = create_signed_report(&rak, MemoType::CovidWatchV1, b"", 0, 3).expect("report");
        signed.report.end_index = 5;
        let err = ingest_report(&state, &serde_json::json!({"signed_report": signed}))
            .await
            .expect_err("rejected");
        assert_eq!(err.code, -32020);

        let err = ingest_report(&state, &serde_json::json!({"report": "00"}))
            .await
            .expect_err("short");
        assert_eq!(err.code, -32020);
    }

    #[tokio::test]
    async fn test_ingest_batch_counts() {
        let state = test_state("cmd-batch");
        let rak = ReportAuthorizationKey::from_bytes(&[46u8; 32]);
        let signed = create_signed_report(&rak, MemoType::CovidWatchV1, b"", 0, 1).expect("report");
        let wire = hex::encode(encode_signed_report(&signed).expect("encode"));

        let result = ingest_reports(&state, &serde_json::json!({"reports": [wire, wire, "zz"]}))
            .await
            .expect("batch");
        assert_eq!(result["processed"], 1);
        assert_eq!(result["skipped"], 1);
        assert_eq!(result["rejected"], 1);
        assert_eq!(result["newly_flagged"], 0);
    }
}
