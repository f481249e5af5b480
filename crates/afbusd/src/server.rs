//! Socket acceptor.

use crate::config::DaemonConfig;
use crate::session::Session;
use afbus_engine::{AcceptAll, BusBroker, Credentials, DeliveryFilter, MatchRuleFilter};
use anyhow::{Context, Result};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tracing::{info, warn};

/// A broker plus the filter its sessions manage match rules through.
#[derive(Clone)]
pub struct Daemon {
    broker: BusBroker,
    filter: Option<Arc<MatchRuleFilter>>,
}

impl Daemon {
    pub fn new(config: &DaemonConfig) -> Result<Self> {
        // Sessions answer `metrics` from this registry.
        afbus_telemetry::register_metrics().context("Failed to register metrics")?;
        let filter = config.match_rules.then(|| Arc::new(MatchRuleFilter::new()));
        let delivery: Arc<dyn DeliveryFilter> = match &filter {
            Some(filter) => Arc::clone(filter) as Arc<dyn DeliveryFilter>,
            None => Arc::new(AcceptAll),
        };
        let broker = BusBroker::with_filter(config.broker.clone(), delivery)
            .context("Invalid broker config")?;
        Ok(Self { broker, filter })
    }

    pub fn broker(&self) -> &BusBroker {
        &self.broker
    }

    /// Bind the listening socket, replacing a stale socket file.
    pub fn bind(path: &Path) -> Result<UnixListener> {
        if path.exists() {
            if std::os::unix::net::UnixStream::connect(path).is_ok() {
                anyhow::bail!("another daemon is listening on {}", path.display());
            }
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove stale socket {}", path.display()))?;
        }
        let listener = UnixListener::bind(path)
            .with_context(|| format!("Failed to bind {}", path.display()))?;
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
                warn!(path = %path.display(), error = %e, "Could not restrict socket permissions");
            }
        }
        info!(path = %path.display(), "Daemon listening");
        Ok(listener)
    }

    /// Accept sessions until `shutdown` resolves.
    pub async fn serve(&self, listener: UnixListener, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting sessions");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => self.spawn_session(stream),
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
            }
        }
    }

    fn spawn_session(&self, stream: UnixStream) {
        let credentials = stream
            .peer_cred()
            .map(|cred| {
                let pid = cred.pid().and_then(|p| u32::try_from(p).ok()).unwrap_or(0);
                Credentials::new(pid, cred.uid(), cred.gid())
            })
            .unwrap_or_default();
        let session = Session::new(self.broker.clone(), self.filter.clone(), credentials);
        tokio::spawn(session.run(stream));
    }
}
