//! Connection Lifecycle Types
//!
//! State snapshot and classification enums for the connection manager.
//! `ConnectionState` is owned exclusively by the manager; everything else
//! observes consistent snapshots through its watch channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Classification Enums
// =============================================================================

/// Connection quality as classified by the heartbeat monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionQuality {
    /// No missed heartbeats and latency below the low threshold.
    #[default]
    Good,
    /// Some misses or elevated latency; non-blocking indicator only.
    Degraded,
    /// Miss cap reached or latency above the high threshold.
    Poor,
}

/// Circuit breaker state guarding automatic recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    /// Normal operation; automatic retries allowed.
    #[default]
    Closed,
    /// Retry budget exhausted; automatic retries halted.
    Open,
    /// Manual reconnect in flight; one probe attempt allowed.
    HalfOpen,
}

impl CircuitBreakerState {
    /// Whether moving to `next` is a legal transition.
    ///
    /// The breaker only walks Closed -> Open -> HalfOpen -> Closed (with
    /// HalfOpen -> Open when the probe fails); it never skips backward.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Closed, Self::Open)
                | (Self::Open, Self::HalfOpen)
                | (Self::HalfOpen, Self::Closed | Self::Open)
        )
    }
}

/// Simulator process status as last reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulatorStatus {
    /// No status received yet.
    #[default]
    Unknown,
    /// Start requested, awaiting confirmation.
    Starting,
    /// Running.
    Running,
    /// Stop requested, awaiting confirmation.
    Stopping,
    /// Stopped.
    Stopped,
    /// Server reported a simulator error.
    Error,
}

/// Overall lifecycle status of the logical session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    /// Never connected; no desire to connect yet.
    #[default]
    Idle,
    /// Handshake in progress.
    Connecting,
    /// Live, authenticated session.
    Connected,
    /// Lost the socket while desired state is connected; retrying.
    Recovering,
    /// Desired state explicitly requested disconnection.
    Disconnected,
}

// =============================================================================
// Desired State
// =============================================================================

/// The connectivity/simulator target the application wants.
///
/// The reconciliation loop continuously drives actual state toward this
/// target; only the UI layer sets it, through the manager's single setter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DesiredState {
    /// Whether a live session should be maintained.
    pub connected: bool,
    /// Whether the exchange simulator should be running.
    pub simulator_running: bool,
}

/// Partial update to [`DesiredState`]; `None` fields are left unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct DesiredStateUpdate {
    /// New connectivity target, if changing.
    pub connected: Option<bool>,
    /// New simulator target, if changing.
    pub simulator_running: Option<bool>,
}

impl DesiredState {
    /// Apply a partial update, returning the merged target.
    #[must_use]
    pub fn merged(self, update: DesiredStateUpdate) -> Self {
        Self {
            connected: update.connected.unwrap_or(self.connected),
            simulator_running: update.simulator_running.unwrap_or(self.simulator_running),
        }
    }
}

// =============================================================================
// Connection State Snapshot
// =============================================================================

/// Full connection state snapshot published on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionState {
    /// Live, authenticated socket.
    pub is_connected: bool,
    /// Handshake in progress.
    pub is_connecting: bool,
    /// Automatic recovery in progress.
    pub is_recovering: bool,
    /// Heartbeat-derived quality classification.
    pub connection_quality: ConnectionQuality,
    /// Simulator status last reported by the server.
    pub simulator_status: SimulatorStatus,
    /// Overall lifecycle status.
    pub overall_status: OverallStatus,
    /// Current recovery attempt number (0 when not recovering).
    pub recovery_attempt: u32,
    /// Time of the last heartbeat acknowledgement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_time: Option<DateTime<Utc>>,
    /// Last measured heartbeat round-trip, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_latency_ms: Option<u64>,
    /// Consecutive missed heartbeats.
    pub missed_heartbeats: u32,
    /// Circuit breaker state for automatic recovery.
    pub circuit_breaker_state: CircuitBreakerState,
    /// Terminal error description, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionState {
    /// Snapshot for a fresh, idle session.
    #[must_use]
    pub fn idle() -> Self {
        Self::default()
    }
}
