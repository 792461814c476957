//! Port Interfaces
//!
//! Contracts for the collaborators the session core consumes.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`AuthProvider`]: access-token supply and refresh
//! - [`StorageProvider`]: durable string key/value storage for identity and
//!   session records
//!
//! Storage failures are caught and logged by callers, never propagated;
//! authentication failures short-circuit recovery (one refresh, then
//! forced logout).

use async_trait::async_trait;
use thiserror::Error;

// =============================================================================
// Auth Port
// =============================================================================

/// Errors surfaced by the auth collaborator.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// No valid token is available and refresh failed or was not attempted.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The server rejected the presented token.
    #[error("token rejected: {0}")]
    TokenRejected(String),

    /// Token refresh failed; the session must be abandoned.
    #[error("token refresh failed")]
    RefreshFailed,
}

/// Access-token supplier consumed by the connection manager.
///
/// The handshake carries the current token; a rejected token triggers
/// exactly one `refresh_access_token` before the manager gives up and
/// forces logout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Current access token, if one is held.
    async fn access_token(&self) -> Option<String>;

    /// Whether a usable session credential is currently held.
    fn is_authenticated(&self) -> bool;

    /// Attempt a token refresh. Returns `true` when a new token was
    /// obtained.
    async fn refresh_access_token(&self) -> bool;
}

// =============================================================================
// Storage Port
// =============================================================================

/// Error surfaced by the storage collaborator.
///
/// Callers treat storage as best-effort: failures are logged at warn and
/// the caller degrades to in-process state.
#[derive(Debug, Clone, Error)]
#[error("storage failure: {0}")]
pub struct StorageError(pub String);

/// Durable string key/value storage.
///
/// Backed by whatever the host platform offers (a file, a browser storage
/// shim, an in-memory map in tests).
#[cfg_attr(test, mockall::automock)]
pub trait StorageProvider: Send + Sync {
    /// Read the value for a key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the backing store is unavailable.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write the value for a key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the backing store is unavailable.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the backing store is unavailable.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}
