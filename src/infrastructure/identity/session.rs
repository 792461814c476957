//! Session Record Store
//!
//! Persists a lightweight session record so a returning client can resume
//! its logical session. Any read past the expiry time clears the record
//! and forces full re-authentication.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::application::ports::StorageProvider;

/// Storage key under which the session record is persisted.
const SESSION_KEY: &str = "session.record";

/// Persisted session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Server-assigned session identifier.
    pub session_id: String,
    /// Last activity tick.
    pub last_active: DateTime<Utc>,
    /// Reconnect attempts made within this session.
    pub reconnect_attempts: u32,
    /// Instant after which the session is invalid.
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Whether the record has passed its expiry time.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Store for the single session record.
///
/// Storage failures are logged and swallowed; the session then lives only
/// in process memory, which still covers reconnects within one run.
pub struct SessionStore {
    storage: Arc<dyn StorageProvider>,
    window: chrono::Duration,
}

impl SessionStore {
    /// Create a store with the given inactivity window.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageProvider>, inactivity_window: Duration) -> Self {
        let window = chrono::Duration::from_std(inactivity_window)
            .unwrap_or_else(|_| chrono::Duration::hours(8));
        Self { storage, window }
    }

    /// Current session record, or `None` when absent or expired.
    ///
    /// An expired or unreadable record is cleared so a half-dead session
    /// can never be resumed.
    #[must_use]
    pub fn current(&self) -> Option<SessionRecord> {
        let raw = match self.storage.get(SESSION_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "Session storage unavailable");
                return None;
            }
        };

        let record: SessionRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unparseable session record");
                self.clear();
                return None;
            }
        };

        if record.is_expired() {
            tracing::info!(
                session_id = %record.session_id,
                "Session expired after inactivity, re-authentication required"
            );
            self.clear();
            return None;
        }

        Some(record)
    }

    /// Start a new session for the given server-assigned id.
    pub fn begin(&self, session_id: impl Into<String>) -> SessionRecord {
        let now = Utc::now();
        let record = SessionRecord {
            session_id: session_id.into(),
            last_active: now,
            reconnect_attempts: 0,
            expires_at: now + self.window,
        };
        self.persist(&record);
        record
    }

    /// Refresh the activity tick, pushing out the expiry time.
    pub fn update_activity(&self) {
        if let Some(mut record) = self.current() {
            let now = Utc::now();
            record.last_active = now;
            record.expires_at = now + self.window;
            self.persist(&record);
        }
    }

    /// Increment the reconnect attempt counter, returning the new count.
    pub fn record_reconnect_attempt(&self) -> u32 {
        self.current().map_or(0, |mut record| {
            record.reconnect_attempts += 1;
            self.persist(&record);
            record.reconnect_attempts
        })
    }

    /// Remove the session record (logout).
    pub fn clear(&self) {
        if let Err(e) = self.storage.remove(SESSION_KEY) {
            tracing::warn!(error = %e, "Failed to clear session record");
        }
    }

    fn persist(&self, record: &SessionRecord) {
        match serde_json::to_string(record) {
            Ok(raw) => {
                if let Err(e) = self.storage.set(SESSION_KEY, &raw) {
                    tracing::warn!(error = %e, "Failed to persist session record");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialize session record"),
        }
    }
}
