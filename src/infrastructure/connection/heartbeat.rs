//! Heartbeat Monitoring
//!
//! Application-level heartbeats over the live socket. The monitor emits a
//! send request on every interval, tracks whether the acknowledgement
//! arrived within the deadline, counts consecutive misses, and classifies
//! connection quality from the miss count and the measured round-trip.
//!
//! Quality is an advisory indicator only; nothing blocks on DEGRADED or
//! POOR. The single hard consequence is the miss cap: once consecutive
//! misses reach it, the monitor emits [`HeartbeatEvent::MissCapReached`]
//! and the connection manager force-disconnects into recovery.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::connection::ConnectionQuality;
use crate::infrastructure::config::HeartbeatSettings;

// =============================================================================
// Events
// =============================================================================

/// Events emitted by the heartbeat monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// A heartbeat is due; the manager should put one on the wire.
    SendHeartbeat {
        /// Client send time to embed in the message, Unix milliseconds.
        client_time_ms: i64,
    },
    /// Health changed after an ack or a miss.
    HealthChanged(HeartbeatHealth),
    /// Consecutive misses reached the cap; the connection is dead.
    MissCapReached {
        /// Misses counted when the cap was hit.
        missed: u32,
    },
}

/// Heartbeat-derived health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatHealth {
    /// Quality classification.
    pub quality: ConnectionQuality,
    /// Consecutive missed heartbeats.
    pub missed: u32,
    /// Last measured round-trip, if any ack has arrived.
    pub latency_ms: Option<u64>,
    /// Time of the last acknowledgement.
    pub last_ack: Option<DateTime<Utc>>,
}

// =============================================================================
// Shared State
// =============================================================================

struct Outstanding {
    client_time_ms: i64,
    sent_at: Instant,
}

struct StateInner {
    outstanding: Option<Outstanding>,
    missed: u32,
    latency: Option<Duration>,
    last_ack: Option<DateTime<Utc>>,
}

/// Heartbeat bookkeeping shared between the monitor task and the reader
/// that routes acknowledgements.
pub struct HeartbeatState {
    settings: HeartbeatSettings,
    inner: Mutex<StateInner>,
}

impl HeartbeatState {
    /// Create fresh heartbeat state.
    #[must_use]
    pub fn new(settings: HeartbeatSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(StateInner {
                outstanding: None,
                missed: 0,
                latency: None,
                last_ack: None,
            }),
        }
    }

    /// Record that a heartbeat with the given client time was just sent.
    pub fn mark_sent(&self, client_time_ms: i64) {
        let mut inner = self.inner.lock();
        inner.outstanding = Some(Outstanding {
            client_time_ms,
            sent_at: Instant::now(),
        });
    }

    /// Record an acknowledgement.
    ///
    /// An ack that echoes the outstanding probe resets the miss counter
    /// and yields a fresh round-trip measurement. A stale echo (a probe
    /// already counted as missed) still proves the link is alive, so it
    /// resets the miss counter too, just without a latency sample.
    pub fn record_ack(&self, client_time_ms: i64) -> HeartbeatHealth {
        let mut inner = self.inner.lock();

        let matches_outstanding = inner
            .outstanding
            .as_ref()
            .is_some_and(|o| o.client_time_ms == client_time_ms);

        if matches_outstanding {
            if let Some(outstanding) = inner.outstanding.take() {
                inner.latency = Some(outstanding.sent_at.elapsed());
            }
        }
        inner.missed = 0;
        inner.last_ack = Some(Utc::now());

        Self::health_of(&inner, &self.settings)
    }

    /// Count a deadline miss for the outstanding probe, if one exists.
    ///
    /// Returns the updated health, or `None` when no probe was pending.
    pub fn record_miss_if_pending(&self) -> Option<HeartbeatHealth> {
        let mut inner = self.inner.lock();
        inner.outstanding.take()?;
        inner.missed += 1;
        Some(Self::health_of(&inner, &self.settings))
    }

    /// Current health snapshot.
    #[must_use]
    pub fn health(&self) -> HeartbeatHealth {
        let inner = self.inner.lock();
        Self::health_of(&inner, &self.settings)
    }

    fn health_of(inner: &StateInner, settings: &HeartbeatSettings) -> HeartbeatHealth {
        HeartbeatHealth {
            quality: classify(inner.missed, inner.latency, settings),
            missed: inner.missed,
            latency_ms: inner.latency.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            last_ack: inner.last_ack,
        }
    }
}

/// Classify connection quality from the miss count and latest round-trip.
#[must_use]
pub fn classify(
    missed: u32,
    latency: Option<Duration>,
    settings: &HeartbeatSettings,
) -> ConnectionQuality {
    let latency_poor = latency.is_some_and(|l| l > settings.latency_poor);
    if missed >= settings.miss_cap || latency_poor {
        return ConnectionQuality::Poor;
    }

    let latency_degraded = latency.is_some_and(|l| l >= settings.latency_degraded);
    if missed > 0 || latency_degraded {
        return ConnectionQuality::Degraded;
    }

    ConnectionQuality::Good
}

// =============================================================================
// Monitor
// =============================================================================

/// Heartbeat monitor task.
///
/// Runs for the lifetime of one physical connection; cancelled by the
/// manager on any disconnect.
pub struct HeartbeatMonitor {
    state: Arc<HeartbeatState>,
    settings: HeartbeatSettings,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatMonitor {
    /// Create a monitor over shared heartbeat state.
    #[must_use]
    pub fn new(
        state: Arc<HeartbeatState>,
        settings: HeartbeatSettings,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            state,
            settings,
            event_tx,
            cancel,
        }
    }

    /// Run the monitor until cancellation or the miss cap.
    ///
    /// Each cycle sends a probe, waits out the ack deadline, then counts
    /// a miss if the ack has not cleared the outstanding probe.
    pub async fn run(self) {
        let between_beats = self
            .settings
            .interval
            .saturating_sub(self.settings.ack_timeout);

        loop {
            let client_time_ms = Utc::now().timestamp_millis();
            self.state.mark_sent(client_time_ms);
            if self
                .event_tx
                .send(HeartbeatEvent::SendHeartbeat { client_time_ms })
                .await
                .is_err()
            {
                break;
            }

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.settings.ack_timeout) => {}
            }

            if let Some(health) = self.state.record_miss_if_pending() {
                tracing::warn!(
                    missed = health.missed,
                    cap = self.settings.miss_cap,
                    "Heartbeat ack missed"
                );
                if health.missed >= self.settings.miss_cap {
                    let _ = self
                        .event_tx
                        .send(HeartbeatEvent::MissCapReached {
                            missed: health.missed,
                        })
                        .await;
                    break;
                }
                if self
                    .event_tx
                    .send(HeartbeatEvent::HealthChanged(health))
                    .await
                    .is_err()
                {
                    break;
                }
            }

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(between_beats) => {}
            }
        }

        tracing::debug!("Heartbeat monitor stopped");
    }
}
