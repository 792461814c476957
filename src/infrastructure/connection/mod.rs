//! Connection Management
//!
//! The connection manager and its supporting components: heartbeat
//! monitoring, bounded-backoff recovery with circuit breaking, and the
//! pending-request table for correlated RPCs.

pub mod heartbeat;
pub mod manager;
pub mod pending;
pub mod recovery;

pub use heartbeat::{HeartbeatEvent, HeartbeatHealth, HeartbeatMonitor, HeartbeatState};
pub use manager::{
    ConnectionError, ConnectionEvent, ConnectionManager, OrderOutcome, SimulatorOutcome,
};
pub use pending::{PendingRequests, RpcError, new_request_id};
pub use recovery::{BackoffPolicy, CircuitBreaker, RecoveryError, RecoveryManager, ScheduledAttempt};
