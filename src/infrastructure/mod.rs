//! Infrastructure layer - Adapters and external integrations.

/// Configuration and settings.
pub mod config;

/// Connection manager, heartbeat monitor, recovery manager, pending RPCs.
pub mod connection;

/// Durable device identity and session records.
pub mod identity;

/// Transport socket client, wire messages and codec.
pub mod socket;

/// Storage provider implementations.
pub mod storage;

/// Exchange data store with observable read models.
pub mod store;

/// Tracing initialization.
pub mod telemetry;
