//! afbusd: AF_BUS broker daemon.

use std::path::PathBuf;

use afbusd::{Daemon, DaemonConfig};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

/// AF_BUS broker daemon
#[derive(Parser, Debug)]
#[command(name = "afbusd")]
#[command(about = "Hosted AF_BUS message broker over a Unix-domain socket")]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listening socket path
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Receive queue length at which senders block
    #[arg(long)]
    max_backlog: Option<usize>,

    /// Log filter, e.g. `debug` or `afbus_engine=trace`
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,

    /// Deliver every multicast copy, ignoring match rules
    #[arg(long)]
    no_match_rules: bool,
}

impl Args {
    fn apply(self, mut config: DaemonConfig) -> DaemonConfig {
        if let Some(socket) = self.socket {
            config.socket_path = socket;
        }
        if let Some(backlog) = self.max_backlog {
            config.broker.max_backlog = backlog;
        }
        if let Some(level) = self.log_level {
            config.telemetry.log_level = level;
        }
        if self.json_logs {
            config.telemetry.json_logs = true;
        }
        if self.no_match_rules {
            config.match_rules = false;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = DaemonConfig::load(args.config.as_deref())?;
    let config = args.apply(config);
    config.validate()?;

    afbus_telemetry::init_telemetry(&config.telemetry).context("Failed to init telemetry")?;

    let daemon = Daemon::new(&config)?;
    let listener = Daemon::bind(&config.socket_path)?;
    info!(
        socket = %config.socket_path.display(),
        match_rules = config.match_rules,
        max_backlog = config.broker.max_backlog,
        "afbusd started. Press Ctrl+C to stop."
    );

    daemon
        .serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    if let Err(e) = std::fs::remove_file(&config.socket_path) {
        tracing::debug!(error = %e, "Socket file already gone");
    }
    info!("afbusd stopped");
    Ok(())
}
