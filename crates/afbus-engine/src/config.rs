//! Broker configuration
//!
//! # Example
//!
//! ```ignore
//! use afbus_engine::BrokerConfig;
//!
//! let config = BrokerConfig::from_env().with_max_backlog(32);
//! config.validate()?;
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Invalid broker configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("send_buffer ({send_buffer}) exceeds max_send_buffer ({max_send_buffer})")]
    SendBufferAboveCeiling {
        send_buffer: usize,
        max_send_buffer: usize,
    },
}

/// Per-broker limits applied to every connection it creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Receive queue length at which senders block.
    pub max_backlog: usize,
    /// Default send-buffer ceiling (largest payload) per connection.
    pub send_buffer: usize,
    /// Upper clamp for the send-buffer option.
    pub max_send_buffer: usize,
    /// Upper clamp for `listen` backlogs.
    pub accept_backlog_limit: usize,
    /// Extra fan-out slots reserved for peers joining mid-send.
    pub multicast_slack: usize,
    /// How often blocked waits re-check for interrupts, in milliseconds.
    pub wait_slice_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_backlog: 10,
            send_buffer: 212_992,
            max_send_buffer: 4 * 1024 * 1024,
            accept_backlog_limit: 128,
            multicast_slack: 8,
            wait_slice_ms: 25,
        }
    }
}

impl BrokerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `AFBUS_MAX_BACKLOG` (default: 10)
    /// - `AFBUS_SEND_BUFFER` (default: 212992)
    /// - `AFBUS_MAX_SEND_BUFFER` (default: 4194304)
    /// - `AFBUS_ACCEPT_BACKLOG_LIMIT` (default: 128)
    /// - `AFBUS_MULTICAST_SLACK` (default: 8)
    /// - `AFBUS_WAIT_SLICE_MS` (default: 25)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_backlog: env_or("AFBUS_MAX_BACKLOG", defaults.max_backlog),
            send_buffer: env_or("AFBUS_SEND_BUFFER", defaults.send_buffer),
            max_send_buffer: env_or("AFBUS_MAX_SEND_BUFFER", defaults.max_send_buffer),
            accept_backlog_limit: env_or(
                "AFBUS_ACCEPT_BACKLOG_LIMIT",
                defaults.accept_backlog_limit,
            ),
            multicast_slack: env_or("AFBUS_MULTICAST_SLACK", defaults.multicast_slack),
            wait_slice_ms: env_or("AFBUS_WAIT_SLICE_MS", defaults.wait_slice_ms),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("max_backlog", self.max_backlog),
            ("send_buffer", self.send_buffer),
            ("max_send_buffer", self.max_send_buffer),
            ("accept_backlog_limit", self.accept_backlog_limit),
        ];
        for (field, value) in sizes {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        if self.wait_slice_ms == 0 {
            return Err(ConfigError::Zero {
                field: "wait_slice_ms",
            });
        }
        if self.send_buffer > self.max_send_buffer {
            return Err(ConfigError::SendBufferAboveCeiling {
                send_buffer: self.send_buffer,
                max_send_buffer: self.max_send_buffer,
            });
        }
        Ok(())
    }

    pub fn with_max_backlog(mut self, max_backlog: usize) -> Self {
        self.max_backlog = max_backlog;
        self
    }

    pub fn with_send_buffer(mut self, send_buffer: usize) -> Self {
        self.send_buffer = send_buffer;
        self
    }

    pub fn with_wait_slice(mut self, slice: Duration) -> Self {
        self.wait_slice_ms = slice.as_millis().max(1) as u64;
        self
    }

    pub fn wait_slice(&self) -> Duration {
        Duration::from_millis(self.wait_slice_ms)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
