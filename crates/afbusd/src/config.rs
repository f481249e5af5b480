//! Daemon configuration
//!
//! Layered lowest to highest: built-in defaults, `AFBUS_*` environment
//! variables, an optional JSON file, then command-line flags (applied by
//! `main`).

use afbus_engine::BrokerConfig;
use afbus_telemetry::TelemetryConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/afbusd.sock";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Where the daemon listens for sessions.
    pub socket_path: PathBuf,
    /// Filter multicast and eavesdrop copies through match rules.
    pub match_rules: bool,
    pub broker: BrokerConfig,
    pub telemetry: TelemetryConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            match_rules: true,
            broker: BrokerConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Defaults overlaid with the environment.
    ///
    /// - `AFBUS_SOCKET`: listening socket path
    /// - `AFBUS_MATCH_RULES`: `false`/`0` disables match-rule filtering
    /// - broker and telemetry variables, see their `from_env`
    pub fn from_env() -> Self {
        Self {
            socket_path: std::env::var("AFBUS_SOCKET")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_SOCKET_PATH)),
            match_rules: std::env::var("AFBUS_MATCH_RULES")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),
            broker: BrokerConfig::from_env(),
            telemetry: TelemetryConfig::from_env(),
        }
    }

    /// Environment, then `path` if given. Fields missing from the file keep
    /// their environment value.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = Self::from_env();
        let Some(path) = path else {
            return Ok(base);
        };

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let file: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?;

        let mut merged = serde_json::to_value(&base).context("Failed to encode base config")?;
        merge(&mut merged, file);
        serde_json::from_value(merged)
            .with_context(|| format!("Invalid daemon config in {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        self.broker.validate().context("Invalid broker config")?;
        if self.socket_path.as_os_str().is_empty() {
            anyhow::bail!("socket_path must not be empty");
        }
        Ok(())
    }
}

fn merge(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
