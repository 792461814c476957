//! Session Wire Message Types
//!
//! JSON messages exchanged with the session server. Every message carries
//! a mandatory `type` discriminator; request/response pairs correlate via
//! a client-generated `request_id`.
//!
//! # Message Families
//!
//! - `heartbeat` / `heartbeat_ack`: liveness and latency probing
//! - `reconnect` / `reconnect_result`: session handshake and resumption
//! - `start_simulator` / `simulator_started`
//! - `stop_simulator` / `simulator_stopped`
//! - `submit_order` / `order_result`
//! - `exchange_data`: sequenced FULL/DELTA market state (server push)
//! - `session_invalidated`, `connection_replaced`: server-side teardown

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::connection::SimulatorStatus;
use crate::domain::market::{MarketUpdate, OrderSide};

// =============================================================================
// Client -> Server
// =============================================================================

/// Order submission payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Ticker symbol.
    pub symbol: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Quantity to trade.
    pub quantity: Decimal,
    /// Limit price; absent for market orders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
}

/// Messages the client sends to the server.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "heartbeat", "device_id": "...", "client_time_ms": 1756303402000}
/// {"type": "reconnect", "request_id": "reconnect-...-k3j9x", "device_id": "...",
///  "access_token": "...", "session_id": "sess-42"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Liveness probe with the client's send time for latency measurement.
    Heartbeat {
        /// Durable device identifier.
        device_id: String,
        /// Client send time, Unix milliseconds.
        client_time_ms: i64,
    },

    /// Session handshake: presented on every connect so the server can
    /// recognize a returning client and resume its session.
    Reconnect {
        /// Correlation id.
        request_id: String,
        /// Durable device identifier.
        device_id: String,
        /// Current access token.
        access_token: String,
        /// Prior session id to resume, if one is held.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    /// Request to start the exchange simulator.
    StartSimulator {
        /// Correlation id.
        request_id: String,
    },

    /// Request to stop the exchange simulator.
    StopSimulator {
        /// Correlation id.
        request_id: String,
    },

    /// Order submission.
    SubmitOrder {
        /// Correlation id.
        request_id: String,
        /// Order payload.
        order: OrderRequest,
    },
}

impl ClientMessage {
    /// Correlation id, for messages that expect a response.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Heartbeat { .. } => None,
            Self::Reconnect { request_id, .. }
            | Self::StartSimulator { request_id }
            | Self::StopSimulator { request_id }
            | Self::SubmitOrder { request_id, .. } => Some(request_id),
        }
    }
}

// =============================================================================
// Server -> Client
// =============================================================================

/// Why a reconnect handshake was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconnectFailure {
    /// The presented access token was rejected.
    TokenRejected,
    /// The referenced session no longer exists server-side.
    SessionExpired,
    /// Server-side failure unrelated to credentials.
    Internal,
}

/// Messages the server pushes to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Acknowledgement of a heartbeat; echoes the client send time.
    HeartbeatAck {
        /// Echo of the client's send time, Unix milliseconds.
        client_time_ms: i64,
        /// Server receive time, Unix milliseconds.
        server_time_ms: i64,
        /// Simulator status piggybacked on the ack.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        simulator_status: Option<SimulatorStatus>,
    },

    /// Outcome of a `reconnect` handshake.
    ReconnectResult {
        /// Correlation id.
        request_id: String,
        /// Whether the session was established or resumed.
        success: bool,
        /// Session id assigned or confirmed by the server.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        /// Simulator status at resume time.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        simulator_status: Option<SimulatorStatus>,
        /// Failure classification when `success` is false.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failure: Option<ReconnectFailure>,
        /// Human-readable failure detail.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Response to `start_simulator`.
    SimulatorStarted {
        /// Correlation id.
        request_id: String,
        /// Whether the simulator started.
        success: bool,
        /// Reported simulator status.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<SimulatorStatus>,
        /// Failure detail when `success` is false.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Response to `stop_simulator`.
    SimulatorStopped {
        /// Correlation id.
        request_id: String,
        /// Whether the simulator stopped.
        success: bool,
        /// Reported simulator status.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<SimulatorStatus>,
        /// Failure detail when `success` is false.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Response to `submit_order`.
    OrderResult {
        /// Correlation id.
        request_id: String,
        /// Whether the order was accepted.
        success: bool,
        /// Exchange-assigned order id on success.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        order_id: Option<String>,
        /// Failure detail when `success` is false.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Sequenced FULL or DELTA market state.
    ExchangeData(MarketUpdate),

    /// The server invalidated this session; the client must log out.
    SessionInvalidated {
        /// Server-provided reason.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Another connection took over this device's session.
    ConnectionReplaced,
}

impl ServerMessage {
    /// Correlation id for response messages.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::ReconnectResult { request_id, .. }
            | Self::SimulatorStarted { request_id, .. }
            | Self::SimulatorStopped { request_id, .. }
            | Self::OrderResult { request_id, .. } => Some(request_id),
            _ => None,
        }
    }
}
