//! Broker service
//!
//! [`BusBroker`] owns everything that used to be global: the address
//! registry, the delivery filter, the counters and the table of live
//! connections. [`BusSocket`] is the owning handle to one connection;
//! dropping it closes the connection.

use crate::config::{BrokerConfig, ConfigError};
use crate::domain::{
    AddressRegistry, BusMessage, ConnState, Connection, ConnectionId, ConnectionSnapshot,
    Descriptor, Packet,
};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::ports::{
    AcceptAll, DeliveryFilter, OptionName, OptionValue, Readiness, RecvFlags, SendFlags, Shutdown,
    SocketApi, SocketOption,
};
use afbus_types::{BusAddr, BusName, BusResult, Credentials, SocketAddress};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::info;

pub(crate) struct BrokerShared {
    pub(crate) config: BrokerConfig,
    pub(crate) registry: AddressRegistry<Connection>,
    pub(crate) filter: Arc<dyn DeliveryFilter>,
    pub(crate) metrics: Metrics,
    connections: RwLock<BTreeMap<ConnectionId, Weak<Connection>>>,
    next_id: AtomicU64,
}

impl BrokerShared {
    pub(crate) fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn track(&self, conn: &Arc<Connection>) {
        self.connections
            .write()
            .insert(conn.id(), Arc::downgrade(conn));
    }

    pub(crate) fn forget(&self, id: ConnectionId) {
        self.connections.write().remove(&id);
    }

    fn live(&self) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

/// An in-process AF_BUS broker.
#[derive(Clone)]
pub struct BusBroker {
    shared: Arc<BrokerShared>,
}

impl BusBroker {
    /// Broker with the accept-everything filter.
    pub fn new(config: BrokerConfig) -> Result<Self, ConfigError> {
        Self::with_filter(config, Arc::new(AcceptAll))
    }

    pub fn with_filter(
        config: BrokerConfig,
        filter: Arc<dyn DeliveryFilter>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            max_backlog = config.max_backlog,
            send_buffer = config.send_buffer,
            "Bus broker started"
        );
        Ok(Self {
            shared: Arc::new(BrokerShared {
                config,
                registry: AddressRegistry::new(),
                filter,
                metrics: Metrics::new(),
                connections: RwLock::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.shared.config
    }

    /// Open an unconnected socket owned by a process with `credentials`.
    pub fn socket(&self, credentials: Credentials) -> BusSocket {
        BusSocket {
            conn: Connection::new(&self.shared, credentials),
        }
    }

    /// Connection currently registered at `addr` on bus `name`.
    pub fn lookup(&self, name: &BusName, addr: BusAddr) -> Option<Arc<Connection>> {
        self.shared.registry.lookup_by_id(name, addr)
    }

    /// Every address currently registered on bus `name`, sorted.
    pub fn bound_addresses(&self, name: &BusName) -> Vec<BusAddr> {
        self.shared.registry.addresses(name)
    }

    /// Snapshots of every live connection, ordered by id.
    pub fn connections(&self) -> Vec<ConnectionSnapshot> {
        self.shared.live().iter().map(Connection::snapshot).collect()
    }

    /// The connection table in `/proc/net/bus` layout.
    pub fn render_connections(&self) -> String {
        let mut out = String::from("Num              RefCount Flags    State       Path Address\n");
        for snap in self.connections() {
            let _ = writeln!(
                out,
                "{:016x}: {:08x} {:08x} {:<11} {} {}",
                snap.id,
                snap.refcount,
                snap.flags(),
                snap.state.to_string(),
                snap.name.as_ref().map_or("-", BusName::as_str),
                snap.addr.map_or_else(|| "-".to_string(), |a| a.to_string()),
            );
        }
        out
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let mut snapshot = self.shared.metrics.snapshot();
        snapshot.live_connections = self.shared.live().len() as u64;
        snapshot
    }
}

/// Owning handle to one bus connection.
pub struct BusSocket {
    conn: Arc<Connection>,
}

impl BusSocket {
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// A descriptor passing this socket in a message.
    pub fn descriptor(&self) -> Descriptor {
        Descriptor::Socket(Arc::clone(&self.conn))
    }

    /// Convenience for sending a bare payload.
    pub fn send_bytes(&self, destination: Option<BusAddr>, payload: &[u8]) -> BusResult<usize> {
        self.send(destination, Packet::new(payload), SendFlags::default())
    }

    /// Non-blocking accept.
    pub fn try_accept(&self) -> BusResult<BusSocket> {
        Ok(BusSocket {
            conn: self.conn.accept(true)?,
        })
    }
}

impl SocketApi for BusSocket {
    type Accepted = BusSocket;

    fn id(&self) -> ConnectionId {
        self.conn.id()
    }

    fn state(&self) -> ConnState {
        self.conn.state()
    }

    fn bind(&self, name: &BusName) -> BusResult<()> {
        self.conn.bind(name)
    }

    fn listen(&self, backlog: usize) -> BusResult<()> {
        self.conn.listen(backlog)
    }

    fn connect(&self, name: &BusName) -> BusResult<()> {
        self.conn.connect(name)
    }

    fn accept(&self) -> BusResult<BusSocket> {
        Ok(BusSocket {
            conn: self.conn.accept(false)?,
        })
    }

    fn send(
        &self,
        destination: Option<BusAddr>,
        packet: Packet,
        flags: SendFlags,
    ) -> BusResult<usize> {
        self.conn.send(destination, packet, flags)
    }

    fn recv(&self, buf: &mut [u8], flags: RecvFlags) -> BusResult<(usize, SocketAddress)> {
        self.conn.recv(buf, flags)
    }

    fn recv_message(&self, flags: RecvFlags) -> BusResult<BusMessage> {
        self.conn.recv_message(flags)
    }

    fn set_option(&self, option: SocketOption) -> BusResult<()> {
        self.conn.set_option(option)
    }

    fn get_option(&self, name: OptionName) -> BusResult<OptionValue> {
        self.conn.get_option(name)
    }

    fn shutdown(&self, how: Shutdown) -> BusResult<()> {
        self.conn.shutdown(how)
    }

    fn close(&self) {
        self.conn.close();
    }

    fn interrupt(&self) {
        self.conn.interrupt();
    }

    fn local_address(&self) -> Option<SocketAddress> {
        self.conn.local_address()
    }

    fn peer_address(&self) -> Option<SocketAddress> {
        self.conn.peer().and_then(|p| p.local_address())
    }

    fn peer_credentials(&self) -> Option<Credentials> {
        self.conn.peer().map(|p| p.credentials())
    }

    fn pending_bytes(&self) -> usize {
        self.conn.pending_bytes()
    }

    fn poll(&self) -> Readiness {
        self.conn.poll()
    }
}

impl Drop for BusSocket {
    fn drop(&mut self) {
        self.conn.close();
    }
}

impl std::fmt::Debug for BusSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BusSocket").field(&self.conn.id()).finish()
    }
}
