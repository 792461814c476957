//! Session Probe Binary
//!
//! Connects to a session server, maintains the session through recovery,
//! and logs state transitions and exchange data counts. Useful for
//! exercising a server deployment end to end.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin session-probe
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `SESSION_STREAM_URL`: WebSocket endpoint of the session server
//! - `SESSION_ACCESS_TOKEN`: Access token presented on the handshake
//!
//! ## Optional
//! - `SESSION_STATE_FILE`: Path for device/session persistence
//!   (default: `.session-probe.json`)
//! - `SESSION_START_SIMULATOR`: Set to `1` to request the simulator
//! - `SESSION_HEARTBEAT_INTERVAL_SECS`, `SESSION_RECOVERY_MAX_ATTEMPTS`,
//!   and the other `SESSION_*` tuning knobs (see the config module)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use async_trait::async_trait;
use tokio::signal;

use session_stream_client::infrastructure::telemetry;
use session_stream_client::{
    AuthProvider, ClientConfig, ConnectionEvent, ConnectionManager, DesiredStateUpdate,
    FileStorage, MemoryStorage, StorageProvider,
};

/// Token supplier backed by the environment.
///
/// The probe has no refresh endpoint; a rejected token therefore walks
/// the one-refresh-then-forced-logout path immediately.
struct EnvTokenAuth {
    token: Option<String>,
}

impl EnvTokenAuth {
    fn from_env() -> Self {
        Self {
            token: std::env::var("SESSION_ACCESS_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
        }
    }
}

#[async_trait]
impl AuthProvider for EnvTokenAuth {
    async fn access_token(&self) -> Option<String> {
        self.token.clone()
    }

    fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    async fn refresh_access_token(&self) -> bool {
        false
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting session probe");

    let config = ClientConfig::from_env()?;
    log_config(&config);

    let storage = open_storage();
    let auth = Arc::new(EnvTokenAuth::from_env());
    if !auth.is_authenticated() {
        anyhow::bail!("SESSION_ACCESS_TOKEN is required");
    }

    let manager = ConnectionManager::new(config, auth, storage);
    tracing::info!(device_id = %manager.device_id(), "Device identity loaded");

    // Event pump: log lifecycle transitions.
    let mut events = manager.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ConnectionEvent::Connected { session_id } => {
                    tracing::info!(session_id = %session_id, "Session connected");
                }
                ConnectionEvent::Disconnected { reason } => {
                    tracing::warn!(reason = %reason, "Session disconnected");
                }
                ConnectionEvent::RecoveryScheduled { attempt, delay } => {
                    tracing::info!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Recovery scheduled"
                    );
                }
                ConnectionEvent::RecoveryExhausted => {
                    tracing::error!("Recovery exhausted, manual reconnect required");
                }
                ConnectionEvent::ForcedLogout { reason } => {
                    tracing::error!(reason = %reason, "Forced logout");
                }
                ConnectionEvent::StateChanged(_) => {}
            }
        }
    });

    // Data pump: log equity counts as updates land.
    let store = manager.store();
    tokio::spawn(async move {
        let mut equities = store.equities();
        while equities.changed().await.is_ok() {
            let count = equities.borrow_and_update().len();
            tracing::debug!(equities = count, "Exchange data updated");
        }
    });

    let start_simulator = std::env::var("SESSION_START_SIMULATOR")
        .map(|v| v == "1")
        .unwrap_or(false);
    manager.set_desired_state(DesiredStateUpdate {
        connected: Some(true),
        simulator_running: start_simulator.then_some(true),
    });

    await_shutdown().await;

    manager.disconnect("shutdown requested");
    tracing::info!("Session probe stopped");
    Ok(())
}

/// Open file-backed storage, degrading to memory when the path is
/// unusable.
fn open_storage() -> Arc<dyn StorageProvider> {
    let path = std::env::var("SESSION_STATE_FILE")
        .unwrap_or_else(|_| ".session-probe.json".to_string());
    match FileStorage::open(&path) {
        Ok(storage) => {
            tracing::info!(path = %path, "Using file-backed storage");
            Arc::new(storage)
        }
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "Falling back to in-memory storage");
            Arc::new(MemoryStorage::new())
        }
    }
}

/// Load environment variables from a `.env` file if present.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        if let Ok(cwd) = std::env::current_dir() {
            let mut dir = cwd.as_path();
            while let Some(parent) = dir.parent() {
                let env_path = parent.join(".env");
                if env_path.exists() {
                    let _ = dotenvy::from_path(&env_path);
                    return;
                }
                dir = parent;
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        server_url = %config.server_url,
        heartbeat_interval_secs = config.heartbeat.interval.as_secs(),
        miss_cap = config.heartbeat.miss_cap,
        recovery_max_attempts = config.recovery.max_attempts,
        rpc_timeout_secs = config.rpc.timeout.as_secs(),
        "Configuration loaded"
    );
}

/// Wait for Ctrl+C or SIGTERM.
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
