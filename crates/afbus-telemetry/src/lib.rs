//! # AF_BUS Telemetry
//!
//! Logging and metrics plumbing for broker processes.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` registry with an `EnvFilter` and a
//!   pretty or JSON `fmt` layer
//! - **Metrics**: Prometheus gauges mirroring the engine's counters
//!
//! ## Usage
//!
//! ```rust,ignore
//! use afbus_telemetry::{init_telemetry, publish_snapshot, encode_metrics, TelemetryConfig};
//!
//! init_telemetry(&TelemetryConfig::from_env())?;
//! publish_snapshot(&broker.metrics());
//! let body = encode_metrics()?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `AFBUS_SERVICE_NAME` | `afbusd` | Service name in logs |
//! | `AFBUS_LOG_LEVEL` | `info` | Log level filter (`RUST_LOG` also honoured) |
//! | `AFBUS_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `AFBUS_JSON_LOGS` | `false` | JSON log lines instead of pretty output |

mod config;
mod logging;
mod metrics;

pub use config::TelemetryConfig;
pub use logging::{env_filter, init_logging};
pub use metrics::{
    encode_metrics, publish_snapshot, register_metrics, BYTES_SENT, CONNECTIONS_ACCEPTED,
    CONNECTIONS_CLOSED, CONNECTIONS_LIVE, DELIVERIES, FANOUT_RETRIES, FILTER_DROPS,
    MESSAGES_RECEIVED, MESSAGES_SENT, REGISTRY, WOULD_BLOCK,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    Metrics(String),
}

/// Register metrics, then install the log subscriber.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    register_metrics()?;
    init_logging(config)
}
