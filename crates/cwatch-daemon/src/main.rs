//! cwatch-daemon: the contact tracing daemon.
//!
//! Single OS process running a Tokio async runtime. The radio transport and
//! the UI talk to the daemon via JSON-RPC over a Unix socket.

mod commands;
mod config;
mod events;
mod keys;
mod rpc;
mod tracer;

use std::sync::Arc;
use std::time::Duration;

use cwatch_db::queries::{observations, settings, signed_reports};
use cwatch_db::SqliteStore;
use cwatch_exposure::processor::ReportProcessor;
use cwatch_types::cancel::CancelFlag;
use cwatch_types::{now_millis, UnixMillis};
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

use crate::config::DaemonConfig;
use crate::events::EventBus;
use crate::keys::{KeyManager, CURRENT_TCK_SETTING};
use crate::rpc::RpcServer;
use crate::tracer::{ContactTracer, TracerConfig};

/// Daemon-wide shared state.
pub struct DaemonState {
    /// Contact store.
    pub store: Arc<Mutex<SqliteStore>>,
    /// Configuration.
    pub config: DaemonConfig,
    /// Event bus for pushing events to subscribers.
    pub event_bus: EventBus,
    /// Distance estimation and contact accumulation.
    pub tracer: ContactTracer,
    /// RAK and broadcast chain.
    pub keys: KeyManager,
    /// Received-report matching.
    pub processor: ReportProcessor<SqliteStore>,
    /// Raised on shutdown to stop long-running matching.
    pub cancel: CancelFlag,
    /// Shutdown signal sender.
    pub shutdown_tx: broadcast::Sender<()>,
    pub started_at: UnixMillis,
}

impl DaemonState {
    pub fn new(
        config: DaemonConfig,
        store: SqliteStore,
        keys: KeyManager,
        started_at: UnixMillis,
    ) -> anyhow::Result<Self> {
        let proximity = &config.proximity;
        let tracer = ContactTracer::new(
            TracerConfig {
                accumulator: proximity.accumulator(),
                path_loss_exponent: proximity.path_loss_exponent,
                warmup_millis: proximity.sampling_warmup_secs.saturating_mul(1_000),
                min_millis_between_alerts: proximity.min_secs_between_alerts.saturating_mul(1_000),
            },
            proximity.calibration()?,
            started_at,
        );
        let store = Arc::new(Mutex::new(store));
        let processor = ReportProcessor::with_chunk_size(store.clone(), config.exposure.chunk_size);
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

        Ok(Self {
            store,
            config,
            event_bus: EventBus::new(1000),
            tracer,
            keys,
            processor,
            cancel: CancelFlag::new(),
            shutdown_tx,
            started_at,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = DaemonConfig::load()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("cwatch={}", config.advanced.log_level).parse()?),
        )
        .init();

    info!("cwatch daemon starting");

    let data_dir = config.data_dir();

    // Ensure data directory exists
    std::fs::create_dir_all(&data_dir)?;

    // 2. Open database
    let db_path = data_dir.join("cwatch.db");
    let conn = cwatch_db::open(&db_path)?;

    // 3. Keys, resuming the broadcast chain where it stopped
    let persisted = settings::get_json(&conn, CURRENT_TCK_SETTING)?;
    let keys = KeyManager::load_or_create(&data_dir, persisted)?;

    // 4. Drop observations older than the disclosure window
    let window_millis = u64::from(config.keys.disclosure_window_days) * 24 * 60 * 60 * 1_000;
    let pruned = observations::prune_before(&conn, now_millis().saturating_sub(window_millis))?;
    if pruned > 0 {
        info!(pruned, "Pruned expired observations");
    }

    // 5. Build daemon state
    let state = Arc::new(DaemonState::new(config, SqliteStore::new(conn), keys, now_millis())?);

    // 6. Finish matching interrupted by the last shutdown
    tokio::spawn(resume_matching(state.clone()));

    // 7. Quiet timer
    let tick_task = tokio::spawn(run_ticks(state.clone()));

    // 8. Start IPC server
    let socket_path = data_dir.join("daemon.sock");
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());

    info!("Starting JSON-RPC server on {:?}", socket_path);

    // 9. Run the RPC server until shutdown
    let mut shutdown_rx = state.shutdown_tx.subscribe();
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!("RPC server error: {}", e);
            }
        }
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    // Graceful shutdown
    info!("Daemon shutting down gracefully");
    state.cancel.cancel();
    tick_task.abort();

    // Clean up socket file
    let _ = std::fs::remove_file(&socket_path);

    info!("Daemon stopped");
    Ok(())
}

/// Fire the accumulator's quiet timer during radio silence.
async fn run_ticks(state: Arc<DaemonState>) {
    let secs = state.config.advanced.tick_interval_secs.max(1);
    let mut interval = tokio::time::interval(Duration::from_secs(secs));
    loop {
        interval.tick().await;
        match state.tracer.tick(now_millis()) {
            Ok(events) => state.event_bus.emit_proximity(&events),
            Err(e) => warn!(error = %e, "Quiet timer check failed"),
        }
    }
}

/// Re-run matching for received reports that never completed.
async fn resume_matching(state: Arc<DaemonState>) {
    let pending = {
        let store = state.store.lock().await;
        match signed_reports::unprocessed(store.conn()) {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Could not load unprocessed reports");
                return;
            }
        }
    };
    if pending.is_empty() {
        return;
    }

    info!(count = pending.len(), "Resuming exposure matching");
    let reports = pending.into_iter().map(|stored| stored.signed).collect();
    match state.processor.process_batch(reports, &state.cancel).await {
        Ok(summary) if summary.newly_flagged > 0 => {
            state
                .event_bus
                .emit(events::Event::exposure_detected(summary.newly_flagged));
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Resumed matching stopped"),
    }
}
