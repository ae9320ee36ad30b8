//! JSON-RPC server over Unix socket.
//!
//! Listens on a Unix domain socket, accepts connections, and dispatches
//! JSON-RPC method calls to the appropriate command handlers. Messages are
//! newline-delimited. After `subscribe_events` the connection also receives
//! `event` notifications.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::commands;
use crate::events::Event;
use crate::DaemonState;

/// Outbound messages buffered per connection.
const OUTBOUND_BUFFER: usize = 256;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Method name.
    pub method: String,
    /// Parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    /// JSON-RPC version.
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Result or error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Server-initiated notification carrying one daemon event.
#[derive(Debug, Serialize)]
pub struct RpcNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: &'a Event,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcError {
    /// Error code.
    pub code: i32,
    /// Error name.
    pub message: String,
    /// Optional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl<'a> RpcNotification<'a> {
    pub fn event(event: &'a Event) -> Self {
        Self {
            jsonrpc: "2.0",
            method: "event",
            params: event,
        }
    }
}

impl RpcError {
    // Standard JSON-RPC errors

    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self {
            code: -32700,
            message: "PARSE_ERROR".to_string(),
            data: None,
        }
    }

    /// Invalid request (-32600).
    pub fn invalid_request() -> Self {
        Self {
            code: -32600,
            message: "INVALID_REQUEST".to_string(),
            data: None,
        }
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: "METHOD_NOT_FOUND".to_string(),
            data: Some(serde_json::json!({"method": method})),
        }
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self {
            code: -32602,
            message: "INVALID_PARAMS".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self {
            code: -32603,
            message: "INTERNAL_ERROR".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Report failed verification (-32020).
    pub fn report_rejected(detail: &str) -> Self {
        Self {
            code: -32020,
            message: "REPORT_REJECTED".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Matching was cancelled by shutdown (-32030).
    pub fn cancelled(newly_flagged: usize) -> Self {
        Self {
            code: -32030,
            message: "CANCELLED".to_string(),
            data: Some(serde_json::json!({"newly_flagged": newly_flagged})),
        }
    }

    /// Storage is busy; the call may be retried (-32031).
    pub fn retry_later(detail: &str) -> Self {
        Self {
            code: -32031,
            message: "RETRY_LATER".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    /// Create a new RPC server.
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove stale socket file
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    // Responses and notifications share one writer.
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    let writer_task = tokio::spawn(async move {
        while let Some(mut message) = out_rx.recv().await {
            message.push('\n');
            writer.write_all(message.as_bytes()).await?;
            writer.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });
    let mut forwarder: Option<tokio::task::JoinHandle<()>> = None;

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break; // EOF
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => {
                if request.method == "subscribe_events" && forwarder.is_none() {
                    forwarder = Some(tokio::spawn(forward_events(
                        state.event_bus.subscribe(),
                        out_tx.clone(),
                    )));
                }
                dispatch_request(state.clone(), request).await
            }
            Err(_) => RpcResponse::error(serde_json::Value::Null, RpcError::parse_error()),
        };

        if out_tx.send(serde_json::to_string(&response)?).await.is_err() {
            break; // writer gone
        }
    }

    if let Some(forwarder) = forwarder {
        forwarder.abort();
    }
    drop(out_tx);
    writer_task.await??;
    Ok(())
}

/// Push bus events to one subscriber until it disconnects.
async fn forward_events(mut events: broadcast::Receiver<Event>, out: mpsc::Sender<String>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let message = match serde_json::to_string(&RpcNotification::event(&event)) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Dropping unserializable event: {}", e);
                        continue;
                    }
                };
                if out.send(message).await.is_err() {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Event subscriber lagging, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Dispatch a JSON-RPC request to the appropriate command handler.
pub async fn dispatch_request(state: Arc<DaemonState>, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    let method = request.method.as_str();

    if request.jsonrpc != "2.0" {
        return RpcResponse::error(id, RpcError::invalid_request());
    }

    debug!("Dispatching RPC method: {}", method);

    let result = match method {
        // Broadcast and observation
        "identifier_to_broadcast" => commands::broadcast::identifier_to_broadcast(&state).await,
        "identifier_observed" => {
            commands::broadcast::identifier_observed(&state, &request.params).await
        }
        "advertisement_observed" => {
            commands::broadcast::advertisement_observed(&state, &request.params).await
        }

        // Reports
        "create_report" => commands::reports::create_report(&state, &request.params).await,
        "ingest_report" => commands::reports::ingest_report(&state, &request.params).await,
        "ingest_reports" => commands::reports::ingest_reports(&state, &request.params).await,
        "pending_uploads" => commands::reports::pending_uploads(&state).await,
        "set_upload_state" => commands::reports::set_upload_state(&state, &request.params).await,

        // Status
        "exposure_status" => commands::status::exposure_status(&state).await,
        "set_user_reported_sick" => {
            commands::status::set_user_reported_sick(&state, &request.params).await
        }
        "list_contact_events" => {
            commands::status::list_contact_events(&state, &request.params).await
        }
        "get_status" => commands::status::get_status(&state).await,

        // Event subscription; the forwarder is attached by the connection
        "subscribe_events" => commands::status::subscribe_events(&state).await,

        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => RpcResponse::error(id, err),
    }
}
