//! Pending Request Correlation
//!
//! Request/response correlation over the socket. Every client-initiated
//! operation gets a unique `request_id`; the response carrying the same id
//! resolves exactly one waiter. Waiters are bounded by a hard deadline,
//! and an intentional or unexpected disconnect rejects everything still
//! in flight so no caller hangs on a dead connection.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::sync::oneshot;

use crate::infrastructure::socket::ServerMessage;

/// Length of the random suffix in a request id.
const REQUEST_ID_SUFFIX_LEN: usize = 8;

/// Build a request id of the form `{operation}-{timestamp}-{random}`.
#[must_use]
pub fn new_request_id(operation: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(REQUEST_ID_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!(
        "{operation}-{}-{suffix}",
        chrono::Utc::now().timestamp_millis()
    )
}

/// RPC failure modes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// No response arrived within the deadline.
    #[error("request {request_id} timed out after {timeout:?}")]
    Timeout {
        /// Correlation id of the abandoned request.
        request_id: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// The connection went away while the request was in flight.
    #[error("request {request_id} rejected: connection closed")]
    ConnectionClosed {
        /// Correlation id of the rejected request.
        request_id: String,
    },
}

/// Table of in-flight requests awaiting a correlated response.
pub struct PendingRequests {
    waiters: Mutex<HashMap<String, oneshot::Sender<ServerMessage>>>,
    timeout: Duration,
}

impl PendingRequests {
    /// Create a table with the given response deadline.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Register a waiter for `request_id` before sending the request.
    ///
    /// Registering before the send closes the race against a response
    /// arriving faster than the caller resumes.
    #[must_use]
    pub fn register(&self, request_id: &str) -> oneshot::Receiver<ServerMessage> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(request_id.to_string(), tx);
        rx
    }

    /// Wait for the correlated response, bounded by the deadline.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Timeout`] when the deadline elapses, removing
    /// the stale waiter, or [`RpcError::ConnectionClosed`] when the table
    /// was drained by a disconnect.
    pub async fn wait(
        &self,
        request_id: &str,
        receiver: oneshot::Receiver<ServerMessage>,
    ) -> Result<ServerMessage, RpcError> {
        match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(RpcError::ConnectionClosed {
                request_id: request_id.to_string(),
            }),
            Err(_) => {
                self.waiters.lock().remove(request_id);
                Err(RpcError::Timeout {
                    request_id: request_id.to_string(),
                    timeout: self.timeout,
                })
            }
        }
    }

    /// Drop the waiter for a request whose send never made it out.
    ///
    /// Without this, a failed send would leave the entry in the table
    /// until the next disconnect drained it.
    pub fn discard(&self, request_id: &str) {
        self.waiters.lock().remove(request_id);
    }

    /// Resolve the waiter for a response message, if one is registered.
    ///
    /// Returns `false` for responses nobody is waiting on (late replies
    /// after a timeout, or replays after a reconnect).
    pub fn complete(&self, message: ServerMessage) -> bool {
        let Some(request_id) = message.request_id().map(str::to_string) else {
            return false;
        };
        let Some(waiter) = self.waiters.lock().remove(&request_id) else {
            tracing::debug!(request_id = %request_id, "Response without a waiter dropped");
            return false;
        };
        waiter.send(message).is_ok()
    }

    /// Reject everything in flight; each waiter observes a closed channel.
    pub fn reject_all(&self) {
        let drained: Vec<_> = self.waiters.lock().drain().collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "Rejecting in-flight requests");
        }
        // Dropping the senders wakes the receivers with RecvError.
    }

    /// Number of requests currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.waiters.lock().len()
    }
}
