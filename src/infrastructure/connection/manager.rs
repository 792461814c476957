//! Connection Manager
//!
//! Single owner of the connection lifecycle. The manager reconciles
//! actual connectivity toward the desired state, runs the reconnect
//! handshake, supervises the heartbeat monitor and the socket reader for
//! each physical connection, schedules recovery after unexpected loss,
//! and correlates request/response RPCs.
//!
//! All connection state lives in one snapshot behind a watch channel;
//! observers receive the current value immediately and every transition
//! after it. Nothing outside this module mutates the snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{AuthError, AuthProvider, StorageProvider};
use crate::domain::connection::{
    ConnectionQuality, ConnectionState, DesiredState, DesiredStateUpdate, OverallStatus,
    SimulatorStatus,
};
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::identity::{DeviceIdentityManager, SessionStore};
use crate::infrastructure::socket::{
    ClientMessage, OrderRequest, ReconnectFailure, ServerMessage, SocketClient, SocketEvent,
    SocketHandle, TransportError,
};
use crate::infrastructure::store::ExchangeDataStore;

use super::heartbeat::{HeartbeatEvent, HeartbeatMonitor, HeartbeatState};
use super::pending::{PendingRequests, RpcError, new_request_id};
use super::recovery::{RecoveryError, RecoveryManager};

// =============================================================================
// Errors and Events
// =============================================================================

/// Errors surfaced by connection manager operations.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Transport-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Authentication failure.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Correlated request failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Operation requires a live connection.
    #[error("not connected")]
    NotConnected,

    /// The server refused the session handshake.
    #[error("handshake refused: {0}")]
    HandshakeRefused(String),

    /// The server answered with something the protocol does not allow here.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Lifecycle events broadcast alongside state snapshots.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The state snapshot changed.
    StateChanged(ConnectionState),
    /// A session was established or resumed.
    Connected {
        /// Server-assigned session id.
        session_id: String,
    },
    /// The connection ended, intentionally or not.
    Disconnected {
        /// Why the connection ended.
        reason: String,
    },
    /// A recovery attempt was scheduled.
    RecoveryScheduled {
        /// 1-based attempt number.
        attempt: u32,
        /// Backoff delay before the attempt.
        delay: Duration,
    },
    /// Automatic recovery halted; only a manual reconnect can resume it.
    RecoveryExhausted,
    /// The session is unusable; the application must log the user out.
    ForcedLogout {
        /// Why the logout was forced.
        reason: String,
    },
}

/// Outcome of a simulator start/stop request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorOutcome {
    /// Whether the server honored the request.
    pub success: bool,
    /// Simulator status after the request.
    pub status: SimulatorStatus,
    /// Failure detail when `success` is false.
    pub error: Option<String>,
}

/// Outcome of an order submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderOutcome {
    /// Whether the exchange accepted the order.
    pub success: bool,
    /// Exchange-assigned order id on success.
    pub order_id: Option<String>,
    /// Failure detail when `success` is false.
    pub error: Option<String>,
}

// =============================================================================
// Manager
// =============================================================================

struct LiveConnection {
    socket: SocketHandle,
    cancel: CancellationToken,
    generation: u64,
}

struct Inner {
    config: ClientConfig,
    auth: Arc<dyn AuthProvider>,
    identity: DeviceIdentityManager,
    sessions: SessionStore,
    store: Arc<ExchangeDataStore>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    desired: Mutex<DesiredState>,
    pending: PendingRequests,
    live: Mutex<Option<LiveConnection>>,
    recovery: Mutex<RecoveryManager>,
    recovery_cancel: Mutex<Option<CancellationToken>>,
    recovery_running: AtomicBool,
    // Monotonic id per physical connection; loss signals carry the id of
    // the connection they came from so a superseded connection can never
    // tear down its replacement.
    generation: AtomicU64,
    connect_gate: tokio::sync::Mutex<()>,
}

impl Inner {
    fn update_state(&self, f: impl FnOnce(&mut ConnectionState)) {
        self.state_tx.send_modify(f);
        let snapshot = self.state_tx.borrow().clone();
        let _ = self
            .events_tx
            .send(ConnectionEvent::StateChanged(snapshot));
    }
}

/// Owner of the connection lifecycle. Cheap to clone; all clones share
/// the same underlying session.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager over the given collaborators.
    #[must_use]
    pub fn new(
        config: ClientConfig,
        auth: Arc<dyn AuthProvider>,
        storage: Arc<dyn StorageProvider>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::idle());
        let (events_tx, _) = broadcast::channel(64);
        let identity = DeviceIdentityManager::new(Arc::clone(&storage));
        let sessions = SessionStore::new(storage, config.session.inactivity_window);
        let pending = PendingRequests::new(config.rpc.timeout);
        let recovery = RecoveryManager::new(config.recovery.clone());

        Self {
            inner: Arc::new(Inner {
                config,
                auth,
                identity,
                sessions,
                store: Arc::new(ExchangeDataStore::new()),
                state_tx,
                events_tx,
                desired: Mutex::new(DesiredState::default()),
                pending,
                live: Mutex::new(None),
                recovery: Mutex::new(recovery),
                recovery_cancel: Mutex::new(None),
                recovery_running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                connect_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Observation
    // -------------------------------------------------------------------------

    /// Watch the connection state; the receiver holds the current
    /// snapshot and observes every later transition in order.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events_tx.subscribe()
    }

    /// The exchange data store fed by this connection.
    #[must_use]
    pub fn store(&self) -> Arc<ExchangeDataStore> {
        Arc::clone(&self.inner.store)
    }

    /// Durable device identifier presented on every handshake.
    #[must_use]
    pub fn device_id(&self) -> String {
        self.inner.identity.device_id()
    }

    /// Current desired state target.
    #[must_use]
    pub fn desired_state(&self) -> DesiredState {
        *self.inner.desired.lock()
    }

    /// Whether a live session is currently held.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.state_tx.borrow().is_connected
    }

    // -------------------------------------------------------------------------
    // Desired State Reconciliation
    // -------------------------------------------------------------------------

    /// Update the desired state and reconcile toward it.
    ///
    /// The single entry point for intent: connect/disconnect and
    /// simulator start/stop are all driven from here by comparing the
    /// previous target against the new one.
    pub fn set_desired_state(&self, update: DesiredStateUpdate) {
        let (previous, target) = {
            let mut desired = self.inner.desired.lock();
            let previous = *desired;
            *desired = previous.merged(update);
            (previous, *desired)
        };

        if previous == target {
            return;
        }
        tracing::info!(
            connected = target.connected,
            simulator_running = target.simulator_running,
            "Desired state updated"
        );

        let manager = self.clone();
        tokio::spawn(async move {
            if previous.connected != target.connected {
                if target.connected {
                    if let Err(e) = manager.connect().await {
                        tracing::warn!(error = %e, "Connect failed while reconciling desired state");
                    }
                } else {
                    manager.disconnect("desired state requested disconnect");
                }
            }

            if previous.simulator_running != target.simulator_running && manager.is_connected() {
                let result = if target.simulator_running {
                    manager.start_simulator().await.map(drop)
                } else {
                    manager.stop_simulator().await.map(drop)
                };
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Simulator reconcile failed");
                }
            }
        });
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Connect and run the session handshake.
    ///
    /// A rejected token gets exactly one refresh-and-retry before the
    /// manager forces logout. Already connected is a successful no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when the transport, the handshake, or
    /// authentication fails.
    pub async fn connect(&self) -> Result<bool, ConnectionError> {
        let _gate = self.inner.connect_gate.lock().await;

        if self.is_connected() {
            return Ok(true);
        }
        if !self.inner.auth.is_authenticated() {
            return Err(AuthError::NotAuthenticated.into());
        }

        self.inner.desired.lock().connected = true;
        self.inner.update_state(|s| {
            s.is_connecting = true;
            s.overall_status = OverallStatus::Connecting;
            s.error = None;
        });

        match self.establish().await {
            Ok(()) => Ok(true),
            Err(ConnectionError::Auth(AuthError::TokenRejected(detail))) => {
                tracing::warn!(reason = %detail, "Token rejected, attempting one refresh");
                if self.inner.auth.refresh_access_token().await {
                    match self.establish().await {
                        Ok(()) => Ok(true),
                        Err(e) => {
                            self.forced_logout("token rejected after refresh");
                            Err(e)
                        }
                    }
                } else {
                    self.forced_logout("token refresh failed");
                    Err(AuthError::RefreshFailed.into())
                }
            }
            Err(e) => {
                let breaker = {
                    let mut recovery = self.inner.recovery.lock();
                    recovery.on_probe_failure();
                    recovery.breaker_state()
                };
                let desired_connected = self.inner.desired.lock().connected;
                if desired_connected {
                    self.inner.update_state(|s| {
                        s.is_connecting = false;
                        s.is_recovering = true;
                        s.overall_status = OverallStatus::Recovering;
                        s.circuit_breaker_state = breaker;
                        s.error = Some(e.to_string());
                    });
                    self.spawn_recovery();
                } else {
                    self.inner.update_state(|s| {
                        s.is_connecting = false;
                        s.overall_status = OverallStatus::Disconnected;
                        s.circuit_breaker_state = breaker;
                        s.error = Some(e.to_string());
                    });
                }
                Err(e)
            }
        }
    }

    /// Tear down the connection and stop all recovery. Idempotent.
    ///
    /// Cancels the heartbeat monitor and any pending backoff timer,
    /// rejects in-flight requests, and clears the exchange data cache so
    /// stale data is never presented as live.
    pub fn disconnect(&self, reason: &str) {
        self.inner.desired.lock().connected = false;

        if let Some(token) = self.inner.recovery_cancel.lock().take() {
            token.cancel();
        }
        let live = self.inner.live.lock().take();
        let was_live = live.is_some();
        if let Some(live) = live {
            live.cancel.cancel();
            live.socket.close();
        }
        self.inner.pending.reject_all();
        self.inner.store.reset();

        let was_active = {
            let state = self.inner.state_tx.borrow();
            was_live || state.is_connecting || state.is_recovering || state.is_connected
        };
        self.inner.update_state(|s| {
            s.is_connected = false;
            s.is_connecting = false;
            s.is_recovering = false;
            s.overall_status = OverallStatus::Disconnected;
            s.recovery_attempt = 0;
            s.missed_heartbeats = 0;
            s.heartbeat_latency_ms = None;
            s.connection_quality = ConnectionQuality::Good;
        });

        if was_active {
            tracing::info!(reason = %reason, "Disconnected");
            let _ = self.inner.events_tx.send(ConnectionEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    /// Explicit user-initiated reconnect.
    ///
    /// Resets the attempt counter and, when the circuit breaker is open,
    /// admits it as the one half-open probe. A failed probe reopens the
    /// breaker.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when the probe fails.
    pub async fn manual_reconnect(&self) -> Result<bool, ConnectionError> {
        if let Some(token) = self.inner.recovery_cancel.lock().take() {
            token.cancel();
        }
        let breaker = {
            let mut recovery = self.inner.recovery.lock();
            recovery.on_manual_reconnect();
            recovery.breaker_state()
        };
        self.inner.update_state(|s| {
            s.recovery_attempt = 0;
            s.circuit_breaker_state = breaker;
        });

        tracing::info!("Manual reconnect requested");
        self.connect().await
    }

    // -------------------------------------------------------------------------
    // RPC Operations
    // -------------------------------------------------------------------------

    /// Request the exchange simulator be started.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when disconnected or the request fails.
    pub async fn start_simulator(&self) -> Result<SimulatorOutcome, ConnectionError> {
        self.inner.desired.lock().simulator_running = true;
        let request_id = new_request_id("start_simulator");
        let response = self
            .request(
                &request_id,
                ClientMessage::StartSimulator {
                    request_id: request_id.clone(),
                },
            )
            .await?;

        match response {
            ServerMessage::SimulatorStarted {
                success,
                status,
                error,
                ..
            } => {
                let status = status.unwrap_or(if success {
                    SimulatorStatus::Running
                } else {
                    SimulatorStatus::Error
                });
                self.inner.update_state(|s| s.simulator_status = status);
                Ok(SimulatorOutcome {
                    success,
                    status,
                    error,
                })
            }
            other => Err(Self::unexpected("start_simulator", &other)),
        }
    }

    /// Request the exchange simulator be stopped.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when disconnected or the request fails.
    pub async fn stop_simulator(&self) -> Result<SimulatorOutcome, ConnectionError> {
        self.inner.desired.lock().simulator_running = false;
        let request_id = new_request_id("stop_simulator");
        let response = self
            .request(
                &request_id,
                ClientMessage::StopSimulator {
                    request_id: request_id.clone(),
                },
            )
            .await?;

        match response {
            ServerMessage::SimulatorStopped {
                success,
                status,
                error,
                ..
            } => {
                let status = status.unwrap_or(if success {
                    SimulatorStatus::Stopped
                } else {
                    SimulatorStatus::Error
                });
                self.inner.update_state(|s| s.simulator_status = status);
                Ok(SimulatorOutcome {
                    success,
                    status,
                    error,
                })
            }
            other => Err(Self::unexpected("stop_simulator", &other)),
        }
    }

    /// Submit an order to the exchange.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when disconnected or the request fails.
    pub async fn submit_order(&self, order: OrderRequest) -> Result<OrderOutcome, ConnectionError> {
        let request_id = new_request_id("submit_order");
        let response = self
            .request(
                &request_id,
                ClientMessage::SubmitOrder {
                    request_id: request_id.clone(),
                    order,
                },
            )
            .await?;

        match response {
            ServerMessage::OrderResult {
                success,
                order_id,
                error,
                ..
            } => Ok(OrderOutcome {
                success,
                order_id,
                error,
            }),
            other => Err(Self::unexpected("submit_order", &other)),
        }
    }

    async fn request(
        &self,
        request_id: &str,
        message: ClientMessage,
    ) -> Result<ServerMessage, ConnectionError> {
        let socket = self
            .inner
            .live
            .lock()
            .as_ref()
            .map(|live| live.socket.clone())
            .ok_or(ConnectionError::NotConnected)?;

        let waiter = self.inner.pending.register(request_id);
        if let Err(e) = socket.send(message).await {
            // The request never made it out; nothing will answer it.
            self.inner.pending.discard(request_id);
            return Err(e.into());
        }
        Ok(self.inner.pending.wait(request_id, waiter).await?)
    }

    fn unexpected(operation: &str, response: &ServerMessage) -> ConnectionError {
        ConnectionError::Protocol(format!(
            "unexpected response to {operation}: {response:?}"
        ))
    }

    // -------------------------------------------------------------------------
    // Session Establishment
    // -------------------------------------------------------------------------

    async fn establish(&self) -> Result<(), ConnectionError> {
        let inner = &self.inner;

        let token = inner
            .auth
            .access_token()
            .await
            .ok_or(AuthError::NotAuthenticated)?;
        let device_id = inner.identity.device_id();
        let prior_session = inner.sessions.current().map(|record| record.session_id);

        let (socket, events) = SocketClient::connect(&inner.config.server_url).await?;
        let cancel = CancellationToken::new();
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let heartbeat_state = Arc::new(HeartbeatState::new(inner.config.heartbeat.clone()));

        // The reader must be live before the handshake response arrives.
        tokio::spawn(run_reader(
            self.clone(),
            events,
            Arc::clone(&heartbeat_state),
            cancel.clone(),
            generation,
        ));

        let request_id = new_request_id("reconnect");
        let waiter = inner.pending.register(&request_id);
        let handshake = ClientMessage::Reconnect {
            request_id: request_id.clone(),
            device_id: device_id.clone(),
            access_token: token,
            session_id: prior_session.clone(),
        };
        if let Err(e) = socket.send(handshake).await {
            inner.pending.discard(&request_id);
            cancel.cancel();
            socket.close();
            return Err(e.into());
        }

        let response = match inner.pending.wait(&request_id, waiter).await {
            Ok(response) => response,
            Err(e) => {
                cancel.cancel();
                socket.close();
                return Err(e.into());
            }
        };

        let (success, session_id, simulator_status, failure, message) = match response {
            ServerMessage::ReconnectResult {
                success,
                session_id,
                simulator_status,
                failure,
                message,
                ..
            } => (success, session_id, simulator_status, failure, message),
            other => {
                cancel.cancel();
                socket.close();
                return Err(Self::unexpected("reconnect", &other));
            }
        };

        if !success {
            cancel.cancel();
            socket.close();
            let detail = message.unwrap_or_else(|| "reconnect refused".to_string());
            return match failure {
                Some(ReconnectFailure::TokenRejected) => {
                    Err(AuthError::TokenRejected(detail).into())
                }
                Some(ReconnectFailure::SessionExpired) => {
                    // The server forgot us; next handshake starts fresh.
                    inner.sessions.clear();
                    Err(ConnectionError::HandshakeRefused(detail))
                }
                Some(ReconnectFailure::Internal) | None => {
                    Err(ConnectionError::HandshakeRefused(detail))
                }
            };
        }

        let session_id = session_id.unwrap_or_else(|| device_id.clone());
        let resumed = prior_session.as_deref() == Some(session_id.as_str());
        if resumed {
            inner.sessions.update_activity();
        } else {
            inner.sessions.begin(session_id.clone());
        }

        let breaker = {
            let mut recovery = inner.recovery.lock();
            recovery.on_success();
            recovery.breaker_state()
        };

        *inner.live.lock() = Some(LiveConnection {
            socket: socket.clone(),
            cancel: cancel.clone(),
            generation,
        });

        // A server-initiated teardown can land while the handshake is
        // still completing; honor it instead of promoting the connection.
        if !inner.desired.lock().connected {
            if let Some(live) = inner.live.lock().take() {
                live.cancel.cancel();
                live.socket.close();
            }
            return Err(ConnectionError::HandshakeRefused(
                "session torn down during handshake".to_string(),
            ));
        }

        let (hb_tx, hb_rx) = mpsc::channel(8);
        let monitor = HeartbeatMonitor::new(
            heartbeat_state,
            inner.config.heartbeat.clone(),
            hb_tx,
            cancel,
        );
        tokio::spawn(monitor.run());
        tokio::spawn(run_heartbeat_pump(
            self.clone(),
            hb_rx,
            socket,
            device_id,
            generation,
        ));

        inner.update_state(|s| {
            s.is_connected = true;
            s.is_connecting = false;
            s.is_recovering = false;
            s.overall_status = OverallStatus::Connected;
            s.recovery_attempt = 0;
            s.connection_quality = ConnectionQuality::Good;
            s.missed_heartbeats = 0;
            s.heartbeat_latency_ms = None;
            s.circuit_breaker_state = breaker;
            if let Some(status) = simulator_status {
                s.simulator_status = status;
            }
            s.error = None;
        });
        let _ = inner.events_tx.send(ConnectionEvent::Connected {
            session_id: session_id.clone(),
        });
        tracing::info!(session_id = %session_id, resumed, "Session established");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Loss Handling and Recovery
    // -------------------------------------------------------------------------

    fn handle_message(&self, message: ServerMessage, heartbeat: &HeartbeatState) {
        match message {
            ServerMessage::HeartbeatAck {
                client_time_ms,
                simulator_status,
                ..
            } => {
                let health = heartbeat.record_ack(client_time_ms);
                self.inner.sessions.update_activity();
                self.inner.update_state(|s| {
                    s.connection_quality = health.quality;
                    s.missed_heartbeats = health.missed;
                    s.heartbeat_latency_ms = health.latency_ms;
                    s.last_heartbeat_time = health.last_ack;
                    if let Some(status) = simulator_status {
                        s.simulator_status = status;
                    }
                });
            }
            ServerMessage::ExchangeData(update) => {
                self.inner.store.ingest(&update);
            }
            ServerMessage::SessionInvalidated { reason } => {
                let reason =
                    reason.unwrap_or_else(|| "session invalidated by server".to_string());
                tracing::warn!(reason = %reason, "Session invalidated");
                self.forced_logout(&reason);
            }
            ServerMessage::ConnectionReplaced => {
                // Another connection owns this device's session now;
                // stand down without recovery.
                tracing::warn!("Connection replaced by another client");
                self.disconnect("connection replaced by another client");
            }
            response => {
                self.inner.pending.complete(response);
            }
        }
    }

    fn handle_connection_lost(&self, reason: &str, generation: u64) {
        // Only the connection the signal came from may be torn down. No
        // live entry means the loss was already handled or the handshake
        // error path owns the cleanup; a different generation means the
        // signal is from a connection that has already been replaced.
        let live = {
            let mut guard = self.inner.live.lock();
            match guard.as_ref() {
                Some(live) if live.generation == generation => guard.take(),
                _ => None,
            }
        };
        let Some(live) = live else {
            tracing::debug!(generation, "Ignoring loss signal for a stale connection");
            return;
        };
        live.cancel.cancel();
        live.socket.close();
        self.inner.pending.reject_all();
        self.inner.store.reset();

        let _ = self.inner.events_tx.send(ConnectionEvent::Disconnected {
            reason: reason.to_string(),
        });

        if self.inner.desired.lock().connected {
            tracing::warn!(reason = %reason, "Connection lost, starting recovery");
            self.inner.update_state(|s| {
                s.is_connected = false;
                s.is_connecting = false;
                s.is_recovering = true;
                s.overall_status = OverallStatus::Recovering;
                s.error = Some(reason.to_string());
            });
            self.spawn_recovery();
        } else {
            self.inner.update_state(|s| {
                s.is_connected = false;
                s.is_connecting = false;
                s.is_recovering = false;
                s.overall_status = OverallStatus::Disconnected;
                s.error = Some(reason.to_string());
            });
        }
    }

    fn forced_logout(&self, reason: &str) {
        tracing::error!(reason = %reason, "Forcing logout");
        self.disconnect(reason);
        self.inner.sessions.clear();
        let _ = self.inner.events_tx.send(ConnectionEvent::ForcedLogout {
            reason: reason.to_string(),
        });
    }

    fn spawn_recovery(&self) {
        if self.inner.recovery_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let token = CancellationToken::new();
        *self.inner.recovery_cancel.lock() = Some(token.clone());

        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_recovery(token).await;
            manager.inner.recovery_running.store(false, Ordering::SeqCst);
        });
    }

    async fn run_recovery(&self, cancel: CancellationToken) {
        let inner = &self.inner;
        let mut refresh_attempted = false;

        loop {
            if cancel.is_cancelled() || !inner.desired.lock().connected {
                break;
            }

            let decision = {
                let mut recovery = inner.recovery.lock();
                recovery.next_attempt(inner.auth.is_authenticated(), self.is_connected())
            };

            let scheduled = match decision {
                Ok(scheduled) => scheduled,
                Err(RecoveryError::AlreadyConnected) => break,
                Err(RecoveryError::NotAuthenticated) => {
                    self.forced_logout("recovery requires authentication");
                    break;
                }
                Err(
                    err @ (RecoveryError::CircuitOpen | RecoveryError::AttemptsExhausted { .. }),
                ) => {
                    let breaker = inner.recovery.lock().breaker_state();
                    tracing::error!(error = %err, "Automatic recovery halted");
                    inner.update_state(|s| {
                        s.is_recovering = false;
                        s.overall_status = OverallStatus::Disconnected;
                        s.circuit_breaker_state = breaker;
                        s.error = Some(err.to_string());
                    });
                    let _ = inner.events_tx.send(ConnectionEvent::RecoveryExhausted);
                    break;
                }
            };

            inner.sessions.record_reconnect_attempt();
            let breaker = inner.recovery.lock().breaker_state();
            inner.update_state(|s| {
                s.is_recovering = true;
                s.overall_status = OverallStatus::Recovering;
                s.recovery_attempt = scheduled.attempt;
                s.circuit_breaker_state = breaker;
            });
            let _ = inner.events_tx.send(ConnectionEvent::RecoveryScheduled {
                attempt: scheduled.attempt,
                delay: scheduled.delay,
            });
            tracing::info!(
                attempt = scheduled.attempt,
                delay_ms = scheduled.delay.as_millis() as u64,
                "Recovery attempt scheduled"
            );

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(scheduled.delay) => {}
            }

            // The probe runs under the same gate as connect() so a manual
            // reconnect landing mid-probe coalesces with it instead of
            // racing it with a second physical connection.
            let result = {
                let _gate = inner.connect_gate.lock().await;
                if cancel.is_cancelled()
                    || !inner.desired.lock().connected
                    || self.is_connected()
                {
                    break;
                }
                self.establish().await
            };

            match result {
                Ok(()) => break,
                Err(ConnectionError::Auth(AuthError::TokenRejected(detail))) => {
                    if refresh_attempted || !inner.auth.refresh_access_token().await {
                        self.forced_logout(&format!("token rejected during recovery: {detail}"));
                        break;
                    }
                    tracing::warn!("Token refreshed, retrying recovery");
                    refresh_attempted = true;
                }
                Err(e) => {
                    inner.recovery.lock().on_probe_failure();
                    tracing::warn!(
                        error = %e,
                        attempt = scheduled.attempt,
                        "Recovery attempt failed"
                    );
                }
            }
        }
    }
}

// =============================================================================
// Per-Connection Tasks
// =============================================================================

async fn run_reader(
    manager: ConnectionManager,
    mut events: mpsc::Receiver<SocketEvent>,
    heartbeat: Arc<HeartbeatState>,
    cancel: CancellationToken,
    generation: u64,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            SocketEvent::Message(message) => manager.handle_message(message, &heartbeat),
            SocketEvent::Closed { reason } => {
                // Reject first so a handshake waiter unblocks even when
                // the connection was never promoted to live; a superseded
                // connection must not drain its replacement's waiters.
                if manager.inner.generation.load(Ordering::SeqCst) == generation {
                    manager.inner.pending.reject_all();
                }
                manager.handle_connection_lost(
                    reason.as_deref().unwrap_or("connection closed"),
                    generation,
                );
                break;
            }
        }
    }
}

async fn run_heartbeat_pump(
    manager: ConnectionManager,
    mut events: mpsc::Receiver<HeartbeatEvent>,
    socket: SocketHandle,
    device_id: String,
    generation: u64,
) {
    while let Some(event) = events.recv().await {
        match event {
            HeartbeatEvent::SendHeartbeat { client_time_ms } => {
                let message = ClientMessage::Heartbeat {
                    device_id: device_id.clone(),
                    client_time_ms,
                };
                if socket.send(message).await.is_err() {
                    // Socket gone; the reader owns the loss handling.
                    break;
                }
            }
            HeartbeatEvent::HealthChanged(health) => {
                manager.inner.update_state(|s| {
                    s.connection_quality = health.quality;
                    s.missed_heartbeats = health.missed;
                    s.heartbeat_latency_ms = health.latency_ms;
                });
            }
            HeartbeatEvent::MissCapReached { missed } => {
                tracing::error!(missed, "Heartbeat miss cap reached, forcing reconnect");
                manager.inner.update_state(|s| {
                    s.connection_quality = ConnectionQuality::Poor;
                    s.missed_heartbeats = missed;
                });
                manager.handle_connection_lost("heartbeat miss cap reached", generation);
                break;
            }
        }
    }
}
