//! Tracing Initialization
//!
//! Configures the `tracing` subscriber for the session client.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Log filter (default: `session_stream_client=info`)
//!
//! # Usage
//!
//! ```ignore
//! use session_stream_client::infrastructure::telemetry;
//!
//! // Initialize at startup (returns guard that must be kept alive)
//! let _guard = telemetry::init();
//! ```

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Guard returned by [`init`]; kept for parity with richer exporters so
/// callers hold a handle for the program's lifetime.
pub struct TelemetryGuard {
    _private: (),
}

/// Initialize the tracing subscriber.
///
/// Returns a guard that should be kept alive for the duration of the
/// program.
#[must_use]
#[allow(clippy::expect_used)]
pub fn init() -> TelemetryGuard {
    let env_filter = EnvFilter::from_default_env()
        .add_directive(
            "session_stream_client=info"
                .parse()
                .expect("static directive 'session_stream_client=info' is valid"),
        )
        .add_directive(
            "tungstenite=warn"
                .parse()
                .expect("static directive 'tungstenite=warn' is valid"),
        );

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    TelemetryGuard { _private: () }
}
