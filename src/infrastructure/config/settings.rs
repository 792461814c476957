//! Client Configuration Settings
//!
//! Configuration types for the session client, loaded from environment
//! variables. Heartbeat intervals, quality thresholds, and backoff shape
//! are tunable settings, not fixed contracts.

use std::time::Duration;

/// Heartbeat and quality classification settings.
#[derive(Debug, Clone)]
pub struct HeartbeatSettings {
    /// Interval between heartbeat messages.
    pub interval: Duration,
    /// Deadline for the acknowledgement before counting a miss.
    pub ack_timeout: Duration,
    /// Latency at or above which quality degrades.
    pub latency_degraded: Duration,
    /// Latency above which quality is poor.
    pub latency_poor: Duration,
    /// Consecutive misses that force a disconnect.
    pub miss_cap: u32,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            ack_timeout: Duration::from_secs(5),
            latency_degraded: Duration::from_millis(250),
            latency_poor: Duration::from_millis(500),
            miss_cap: 3,
        }
    }
}

/// Recovery backoff and circuit breaker settings.
#[derive(Debug, Clone)]
pub struct RecoverySettings {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for the backoff delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
    /// Jitter factor as a fraction (0.3 = plus or minus 30%).
    pub jitter_factor: f64,
    /// Attempts before the circuit breaker opens.
    pub max_attempts: u32,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.3,
            max_attempts: 10,
        }
    }
}

/// Request/response correlation settings.
#[derive(Debug, Clone)]
pub struct RpcSettings {
    /// Hard deadline for a correlated response.
    pub timeout: Duration,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
        }
    }
}

/// Session record settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Inactivity window after which the session expires and full
    /// re-authentication is required.
    pub inactivity_window: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            inactivity_window: Duration::from_secs(8 * 60 * 60),
        }
    }
}

/// Complete session client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the session server.
    pub server_url: String,
    /// Heartbeat settings.
    pub heartbeat: HeartbeatSettings,
    /// Recovery settings.
    pub recovery: RecoverySettings,
    /// RPC settings.
    pub rpc: RpcSettings,
    /// Session settings.
    pub session: SessionSettings,
}

impl ClientConfig {
    /// Create a configuration for the given endpoint with default tuning.
    #[must_use]
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            heartbeat: HeartbeatSettings::default(),
            recovery: RecoverySettings::default(),
            rpc: RpcSettings::default(),
            session: SessionSettings::default(),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `SESSION_STREAM_URL` is missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_url = std::env::var("SESSION_STREAM_URL")
            .map_err(|_| ConfigError::MissingEnvVar("SESSION_STREAM_URL".to_string()))?;

        if server_url.is_empty() {
            return Err(ConfigError::EmptyValue("SESSION_STREAM_URL".to_string()));
        }

        let heartbeat = HeartbeatSettings {
            interval: parse_env_duration_secs(
                "SESSION_HEARTBEAT_INTERVAL_SECS",
                HeartbeatSettings::default().interval,
            ),
            ack_timeout: parse_env_duration_millis(
                "SESSION_HEARTBEAT_ACK_TIMEOUT_MS",
                HeartbeatSettings::default().ack_timeout,
            ),
            latency_degraded: parse_env_duration_millis(
                "SESSION_LATENCY_DEGRADED_MS",
                HeartbeatSettings::default().latency_degraded,
            ),
            latency_poor: parse_env_duration_millis(
                "SESSION_LATENCY_POOR_MS",
                HeartbeatSettings::default().latency_poor,
            ),
            miss_cap: parse_env_u32(
                "SESSION_HEARTBEAT_MISS_CAP",
                HeartbeatSettings::default().miss_cap,
            ),
        };

        let recovery = RecoverySettings {
            initial_delay: parse_env_duration_millis(
                "SESSION_RECOVERY_INITIAL_DELAY_MS",
                RecoverySettings::default().initial_delay,
            ),
            max_delay: parse_env_duration_millis(
                "SESSION_RECOVERY_MAX_DELAY_MS",
                RecoverySettings::default().max_delay,
            ),
            multiplier: parse_env_f64(
                "SESSION_RECOVERY_MULTIPLIER",
                RecoverySettings::default().multiplier,
            ),
            jitter_factor: parse_env_f64(
                "SESSION_RECOVERY_JITTER_FACTOR",
                RecoverySettings::default().jitter_factor,
            ),
            max_attempts: parse_env_u32(
                "SESSION_RECOVERY_MAX_ATTEMPTS",
                RecoverySettings::default().max_attempts,
            ),
        };

        let rpc = RpcSettings {
            timeout: parse_env_duration_secs(
                "SESSION_RPC_TIMEOUT_SECS",
                RpcSettings::default().timeout,
            ),
        };

        let session = SessionSettings {
            inactivity_window: parse_env_duration_secs(
                "SESSION_INACTIVITY_WINDOW_SECS",
                SessionSettings::default().inactivity_window,
            ),
        };

        Ok(Self {
            server_url,
            heartbeat,
            recovery,
            rpc,
            session,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
