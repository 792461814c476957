#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Session Stream Client - Resilient Trading Session Layer
//!
//! A client-side resilience and state-synchronization layer for a trading
//! session over a WebSocket transport. One logical session survives
//! network loss, token expiry, and server-side invalidation: the
//! connection manager reconciles actual connectivity toward a desired
//! state, heartbeats classify link quality, bounded-backoff recovery with
//! a circuit breaker handles unexpected loss, and a sequence-validated
//! merge cache keeps exchange data consistent across reconnects.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Pure types and merge logic, no I/O
//!   - `connection`: Lifecycle state snapshot and classification enums
//!   - `market`: Market data records and the sequence-validated cache
//!
//! - **Application**: Port definitions
//!   - `ports`: Auth and storage contracts consumed by the core
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `socket`: Wire messages, JSON codec, transport socket client
//!   - `connection`: Connection manager, heartbeat, recovery, RPCs
//!   - `identity`: Durable device id and session record store
//!   - `store`: Observable exchange data store
//!   - `storage`: Memory and file-backed storage providers
//!   - `config`: Environment-driven configuration
//!   - `telemetry`: Tracing initialization
//!
//! # Data Flow
//!
//! ```text
//! Session Server WS ──► Socket Reader ──► Merge Cache ──► watch channels ──► UI
//!        ▲                   │
//!        │                   ├─► Heartbeat Acks ──► Quality Classification
//!        │                   └─► RPC Responses  ──► Pending Request Table
//!        └── Connection Manager (desired state, handshake, recovery)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core session and market data types.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{
    CircuitBreakerState, ConnectionQuality, ConnectionState, DesiredState, DesiredStateUpdate,
    OverallStatus, SimulatorStatus,
};
pub use domain::market::{
    AppliedUpdate, EquityRecord, ExchangeCache, MarketUpdate, OrderRecord, OrderSide, OrderStatus,
    PortfolioSnapshot, Position, SequenceError, UpdateKind,
};

// Application ports
pub use application::ports::{AuthError, AuthProvider, StorageError, StorageProvider};

// Infrastructure config
pub use infrastructure::config::{
    ClientConfig, ConfigError, HeartbeatSettings, RecoverySettings, RpcSettings, SessionSettings,
};

// Connection manager surface
pub use infrastructure::connection::{
    ConnectionError, ConnectionEvent, ConnectionManager, OrderOutcome, SimulatorOutcome,
};

// Identity
pub use infrastructure::identity::{DeviceIdentityManager, SessionRecord, SessionStore};

// Wire messages (for integration tests)
pub use infrastructure::socket::{
    ClientMessage, OrderRequest, ReconnectFailure, ServerMessage,
};

// Storage providers
pub use infrastructure::storage::{FileStorage, MemoryStorage};

// Exchange data store
pub use infrastructure::store::ExchangeDataStore;

// Telemetry
pub use infrastructure::telemetry::{TelemetryGuard, init as init_telemetry};
