//! devtimerd - The device-timer daemon
//!
//! Wires together:
//! - Configuration loading
//! - Store initialization
//! - Polling engine and calibration manager
//! - nftables gateway adapter
//! - IPC server

mod handlers;

use anyhow::{Context, Result};
use clap::Parser;
use devtimer_api::{ClientRole, Event, EventPayload};
use devtimer_config::load_config;
use devtimer_core::{CalibrationManager, CoreEngine, CoreEvent};
use devtimer_host_api::HostAdapter;
use devtimer_host_linux::{NftablesConfig, NftablesHost};
use devtimer_ipc::{IpcServer, ServerMessage};
use devtimer_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use devtimer_util::default_config_path;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::handlers::{CommandContext, handle_command};

/// devtimerd - Per-device internet quotas enforced at the gateway
#[derive(Parser, Debug)]
#[command(name = "devtimerd")]
#[command(about = "Per-device internet quotas enforced at the gateway", long_about = None)]
struct Args {
    /// Configuration file path (default: /etc/device-timer/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set DEVICE_TIMER_SOCKET env var)
    #[arg(short, long, env = "DEVICE_TIMER_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set DEVICE_TIMER_DATA_DIR env var)
    #[arg(short, long, env = "DEVICE_TIMER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Main service state
struct Service {
    engine: CoreEngine,
    host: Arc<dyn HostAdapter>,
    ipc: Arc<IpcServer>,
    store: Arc<dyn Store>,
    core_events: mpsc::UnboundedReceiver<CoreEvent>,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let policy = load_config(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(
            config_path = %args.config.display(),
            device_count = policy.devices.len(),
            "Configuration loaded"
        );

        let socket_path = args
            .socket
            .clone()
            .unwrap_or_else(|| policy.daemon.socket_path.clone());

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| policy.daemon.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join("device-timer.db");
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        store.append_audit(AuditEvent::new(AuditEventType::DaemonStarted))?;

        let host: Arc<dyn HostAdapter> = Arc::new(NftablesHost::new(NftablesConfig::default()));

        let (core_tx, core_events) = mpsc::unbounded_channel();
        let calibration = Arc::new(CalibrationManager::new(host.clone(), store.clone(), core_tx));
        let engine = CoreEngine::new(policy, store.clone(), host.clone(), calibration);

        let mut ipc = IpcServer::new(&socket_path);
        ipc.start().await?;

        info!(socket_path = %socket_path.display(), "IPC server started");

        Ok(Self {
            engine,
            host,
            ipc: Arc::new(ipc),
            store,
            core_events,
        })
    }

    async fn run(self) -> Result<()> {
        let Service {
            mut engine,
            host,
            ipc,
            store,
            mut core_events,
        } = self;

        let mut ipc_messages = ipc
            .take_message_receiver()
            .await
            .context("IPC message receiver already taken")?;

        let ipc_accept = ipc.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        // Every snapshot the engine publishes goes out as a status_updated event
        let mut status_rx = engine.subscribe_status();
        let ipc_status = ipc.clone();
        tokio::spawn(async move {
            while status_rx.changed().await.is_ok() {
                let snapshot = status_rx.borrow_and_update().clone();
                ipc_status.broadcast_event(Event::new(EventPayload::StatusUpdated((*snapshot).clone())));
            }
        });

        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup())
            .context("Failed to create SIGHUP handler")?;

        // First tick fires immediately so clients never see an empty snapshot for long
        let mut tick_timer = tokio::time::interval(engine.policy().daemon.poll_interval());
        tick_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Daemon running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    if on_signal(SignalKind::terminate()).is_break() {
                        break;
                    }
                }
                _ = sigint.recv() => {
                    if on_signal(SignalKind::interrupt()).is_break() {
                        break;
                    }
                }
                // Caught so the default action cannot kill enforcement
                _ = sighup.recv() => {
                    if on_signal(SignalKind::hangup()).is_break() {
                        break;
                    }
                }

                _ = tick_timer.tick() => {
                    let events = engine.tick(devtimer_util::now()).await;
                    for event in events {
                        handle_core_event(&ipc, event);
                    }
                }

                // Calibration progress from sampling tasks
                Some(event) = core_events.recv() => {
                    handle_core_event(&ipc, event);
                }

                Some(msg) = ipc_messages.recv() => {
                    let ctx = CommandContext {
                        engine: &engine,
                        store: store.as_ref(),
                        host: host.as_ref(),
                    };
                    handle_ipc_message(&ctx, &ipc, store.as_ref(), msg).await;
                }
            }
        }

        info!("Shutting down devtimerd");

        engine.calibration().shutdown();
        ipc.broadcast_event(Event::new(EventPayload::Shutdown));

        if let Err(e) = store.append_audit(AuditEvent::new(AuditEventType::DaemonStopped)) {
            warn!(error = %e, "Failed to log daemon shutdown");
        }

        info!("Shutdown complete");
        Ok(())
    }
}

/// SIGTERM and SIGINT stop the daemon; SIGHUP is logged and ignored.
fn on_signal(kind: SignalKind) -> ControlFlow<()> {
    if kind == SignalKind::hangup() {
        info!("Received SIGHUP, ignoring");
        ControlFlow::Continue(())
    } else {
        info!(signal = ?kind, "Received shutdown signal, shutting down gracefully");
        ControlFlow::Break(())
    }
}

fn handle_core_event(ipc: &IpcServer, event: CoreEvent) {
    match event {
        CoreEvent::DeviceStateChanged { device_id, from, to } => {
            info!(device_id = %device_id, from = ?from, to = %to, "Device state changed");
        }

        CoreEvent::AccessChanged { device_id, blocked } => {
            info!(device_id = %device_id, blocked, "Gateway access changed");
        }

        CoreEvent::UsageDayRolledOver { day } => {
            info!(day = %day, "Usage day rolled over");
            ipc.broadcast_event(Event::new(EventPayload::UsageDayRolledOver { day }));
        }

        CoreEvent::CalibrationChanged(snapshot) => {
            debug!(
                device_id = %snapshot.device_id,
                status = %snapshot.status,
                samples = snapshot.sample_count,
                "Calibration changed"
            );
            ipc.broadcast_event(Event::new(EventPayload::CalibrationChanged(snapshot)));
        }
    }
}

async fn handle_ipc_message(
    ctx: &CommandContext<'_>,
    ipc: &IpcServer,
    store: &dyn Store,
    msg: ServerMessage,
) {
    match msg {
        ServerMessage::Request { client_id, request } => {
            let role = ipc
                .get_client_info(&client_id)
                .await
                .map(|info| info.role)
                .unwrap_or(ClientRole::Observer);

            let response = handle_command(ctx, &client_id, role, request.request_id, request.command);

            if let Err(e) = ipc.send_response(&client_id, response).await {
                debug!(client_id = %client_id, error = %e, "Failed to send response");
            }
        }

        ServerMessage::ClientConnected { client_id, info } => {
            info!(
                client_id = %client_id,
                role = ?info.role,
                uid = ?info.uid,
                "Client connected"
            );

            let _ = store.append_audit(AuditEvent::new(AuditEventType::ClientConnected {
                client_id: client_id.to_string(),
                role: format!("{:?}", info.role),
                uid: info.uid,
            }));
        }

        ServerMessage::ClientDisconnected { client_id } => {
            debug!(client_id = %client_id, "Client disconnected");

            let _ = store.append_audit(AuditEvent::new(AuditEventType::ClientDisconnected {
                client_id: client_id.to_string(),
            }));
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "devtimerd starting");

    let service = Service::new(&args).await?;
    service.run().await
}
