//! Configuration Module
//!
//! Environment-driven settings for the session client.

mod settings;

pub use settings::{
    ClientConfig, ConfigError, HeartbeatSettings, RecoverySettings, RpcSettings, SessionSettings,
};
