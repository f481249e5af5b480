//! Connection state machine
//!
//! ```text
//!            bind                listen
//!  Closed ─────────▶ Closed ──────────────▶ Listening ──accept──▶ (master-side
//!    │              (bus master)                                   Established)
//!    │ connect
//!    ▼
//!  Established (client) ◀──── peer ────▶ Established (master-side)
//! ```
//!
//! `connect` builds the master-side end itself and parks it on the
//! listener's accept queue; `accept` just hands it out.
//!
//! ## Lock order
//!
//! registry → connection `inner` → bus members → bus send lock → receive
//! queue → `addresses`. Two connections' `inner` locks are never held at the
//! same time except peer-after-self in `join`, where `self` is already
//! released.

use super::address::BoundAddress;
use super::bus::Bus;
use super::queue::{AcceptQueue, BusMessage, ReceiveQueue};
use super::wait::Waiter;
use crate::ports::{
    Endpoint, OptionName, OptionValue, Readiness, RecvFlags, Shutdown, SocketOption,
};
use crate::service::BrokerShared;
use afbus_types::{BusAddr, BusError, BusName, BusResult, Credentials, SocketAddress};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnState {
    Closed,
    Listening,
    Established,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Listening => "listening",
            Self::Established => "established",
        })
    }
}

pub(crate) struct ConnInner {
    pub(crate) state: ConnState,
    /// `close` has run; the connection cannot be reused.
    pub(crate) closed: bool,
    pub(crate) peer: Option<Arc<Connection>>,
    pub(crate) bus: Option<Arc<Bus>>,
    /// Master address for masters and master-side ends, the allocated
    /// client address for clients.
    pub(crate) local: Option<Arc<BoundAddress>>,
    pub(crate) extra: Vec<Arc<BoundAddress>>,
    pub(crate) bus_master: bool,
    pub(crate) master_side: bool,
    pub(crate) shutdown: u8,
    pub(crate) send_buffer: usize,
    pub(crate) nonblocking: bool,
    pub(crate) send_timeout: Option<Duration>,
    pub(crate) recv_timeout: Option<Duration>,
}

/// One bus endpoint.
pub struct Connection {
    id: ConnectionId,
    pub(crate) shared: Arc<BrokerShared>,
    credentials: Credentials,
    pub(crate) inner: Mutex<ConnInner>,
    pub(crate) queue: ReceiveQueue,
    pub(crate) accept_queue: AcceptQueue,
    /// Every address this connection answers to; read by multicast
    /// selection under the bus lock.
    addresses: RwLock<Vec<BusAddr>>,
    authenticated: AtomicBool,
    eavesdropper: AtomicBool,
    recursion_level: AtomicU32,
    pub(crate) interrupted: AtomicBool,
}

/// Introspection record, one line of the connection table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub refcount: usize,
    pub state: ConnState,
    pub bus_master: bool,
    pub master_side: bool,
    pub authenticated: bool,
    pub eavesdropper: bool,
    pub name: Option<BusName>,
    pub addr: Option<BusAddr>,
    pub queued: usize,
    pub queued_bytes: usize,
}

impl ConnectionSnapshot {
    pub const FLAG_BUS_MASTER: u32 = 0x1;
    pub const FLAG_MASTER_SIDE: u32 = 0x2;
    pub const FLAG_AUTHENTICATED: u32 = 0x4;
    pub const FLAG_EAVESDROPPER: u32 = 0x8;

    pub fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.bus_master {
            flags |= Self::FLAG_BUS_MASTER;
        }
        if self.master_side {
            flags |= Self::FLAG_MASTER_SIDE;
        }
        if self.authenticated {
            flags |= Self::FLAG_AUTHENTICATED;
        }
        if self.eavesdropper {
            flags |= Self::FLAG_EAVESDROPPER;
        }
        flags
    }
}

impl Connection {
    pub(crate) fn new(shared: &Arc<BrokerShared>, credentials: Credentials) -> Arc<Self> {
        let config = &shared.config;
        let conn = Arc::new(Self {
            id: shared.next_id(),
            shared: Arc::clone(shared),
            credentials,
            inner: Mutex::new(ConnInner {
                state: ConnState::Closed,
                closed: false,
                peer: None,
                bus: None,
                local: None,
                extra: Vec::new(),
                bus_master: false,
                master_side: false,
                shutdown: 0,
                send_buffer: config.send_buffer,
                nonblocking: false,
                send_timeout: None,
                recv_timeout: None,
            }),
            queue: ReceiveQueue::new(config.max_backlog),
            accept_queue: AcceptQueue::new(),
            addresses: RwLock::new(Vec::new()),
            authenticated: AtomicBool::new(false),
            eavesdropper: AtomicBool::new(false),
            recursion_level: AtomicU32::new(0),
            interrupted: AtomicBool::new(false),
        });
        shared.track(&conn);
        conn
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn credentials(&self) -> Credentials {
        self.credentials
    }

    pub fn state(&self) -> ConnState {
        self.inner.lock().state
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn is_eavesdropper(&self) -> bool {
        self.eavesdropper.load(Ordering::Acquire)
    }

    pub fn is_master_side(&self) -> bool {
        self.inner.lock().master_side
    }

    pub fn is_bus_master(&self) -> bool {
        self.inner.lock().bus_master
    }

    pub fn recursion_level(&self) -> u32 {
        self.recursion_level.load(Ordering::Acquire)
    }

    pub fn addresses(&self) -> Vec<BusAddr> {
        self.addresses.read().clone()
    }

    pub fn bus(&self) -> Option<Arc<Bus>> {
        self.inner.lock().bus.clone()
    }

    pub(crate) fn set_authenticated(&self, on: bool) {
        self.authenticated.store(on, Ordering::Release);
    }

    /// Returns the previous value.
    pub(crate) fn set_eavesdropper(&self, on: bool) -> bool {
        self.eavesdropper.swap(on, Ordering::AcqRel)
    }

    pub(crate) fn raise_recursion_level(&self, level: u32) {
        self.recursion_level.fetch_max(level, Ordering::AcqRel);
    }

    pub(crate) fn owns_prefix(&self, prefix: u32) -> bool {
        self.addresses.read().iter().any(|a| a.prefix() == prefix)
    }

    pub(crate) fn endpoint(&self) -> Endpoint {
        let inner = self.inner.lock();
        Endpoint {
            id: self.id,
            address: inner.local.as_ref().map(|a| a.socket_address().clone()),
            master_side: inner.master_side,
            eavesdropper: self.is_eavesdropper(),
        }
    }

    fn waiter(&self, timeout: Option<Duration>) -> Waiter<'_> {
        Waiter::new(&self.interrupted, timeout, self.shared.config.wait_slice())
    }

    // ------------------------------------------------------------------
    // bind / listen / connect / accept
    // ------------------------------------------------------------------

    pub(crate) fn bind(self: &Arc<Self>, name: &BusName) -> BusResult<()> {
        fn check(inner: &ConnInner) -> BusResult<()> {
            if inner.closed {
                return Err(BusError::InvalidArgument("socket is closed".into()));
            }
            if inner.local.is_some() || inner.state != ConnState::Closed {
                return Err(BusError::InvalidArgument(
                    "socket is already bound or connected".into(),
                ));
            }
            Ok(())
        }

        check(&self.inner.lock())?;

        let address = Arc::new(BoundAddress::master(name.clone()));
        self.shared.registry.register(&address, self)?;

        let mut inner = self.inner.lock();
        if let Err(e) = check(&inner) {
            drop(inner);
            self.shared.registry.unregister(&address, self);
            return Err(e);
        }
        inner.local = Some(address);
        inner.bus = Some(Arc::new(Bus::new(name.clone(), Arc::downgrade(self))));
        inner.bus_master = true;
        drop(inner);

        *self.addresses.write() = vec![BusAddr::MASTER];
        info!(conn = self.id, bus = %name, "Bound bus master");
        Ok(())
    }

    pub(crate) fn listen(&self, backlog: usize) -> BusResult<()> {
        let mut inner = self.inner.lock();
        if !inner.bus_master || inner.local.is_none() || inner.closed {
            return Err(BusError::InvalidArgument(
                "only a bound bus master can listen".into(),
            ));
        }
        inner.state = ConnState::Listening;
        drop(inner);

        let backlog = backlog.clamp(1, self.shared.config.accept_backlog_limit);
        let mut accept = self.accept_queue.lock();
        accept.backlog = backlog;
        accept.open = true;
        drop(accept);
        self.accept_queue.space.notify_all();

        debug!(conn = self.id, backlog, "Listening");
        Ok(())
    }

    pub(crate) fn connect(self: &Arc<Self>, name: &BusName) -> BusResult<()> {
        let (nonblocking, timeout) = {
            let inner = self.inner.lock();
            if inner.closed {
                return Err(BusError::InvalidArgument("socket is closed".into()));
            }
            match inner.state {
                ConnState::Established => return Err(BusError::AlreadyConnected),
                ConnState::Listening => {
                    return Err(BusError::InvalidArgument(
                        "listening socket cannot connect".into(),
                    ))
                }
                ConnState::Closed => {}
            }
            if inner.local.is_some() {
                return Err(BusError::InvalidArgument(
                    "bound socket cannot connect".into(),
                ));
            }
            (inner.nonblocking, inner.send_timeout)
        };

        let Some(listener) = self.shared.registry.lookup_by_name(name) else {
            debug!(conn = self.id, bus = %name, "Connect to unknown bus");
            return Err(BusError::HostUnreachable);
        };

        let (bus, master_address) = {
            let inner = listener.inner.lock();
            let accepting = inner.state == ConnState::Listening
                && inner.shutdown & Shutdown::RECV == 0
                && !inner.closed;
            match (&inner.bus, &inner.local) {
                (Some(bus), Some(local)) if accepting => (Arc::clone(bus), Arc::clone(local)),
                _ => {
                    warn!(conn = self.id, bus = %name, "Bus master is not accepting");
                    return Err(BusError::ConnectionRefused);
                }
            }
        };

        let client_address = self.register_client_address(&bus)?;

        let embryo = Connection::new(&self.shared, listener.credentials);
        {
            let mut e = embryo.inner.lock();
            e.state = ConnState::Established;
            e.master_side = true;
            e.peer = Some(Arc::clone(self));
            e.bus = Some(Arc::clone(&bus));
            e.local = Some(master_address);
        }
        *embryo.addresses.write() = vec![BusAddr::MASTER];

        {
            let mut inner = self.inner.lock();
            if inner.closed || inner.state != ConnState::Closed || inner.local.is_some() {
                let err = if inner.state == ConnState::Established {
                    BusError::AlreadyConnected
                } else {
                    BusError::InvalidArgument("socket changed state during connect".into())
                };
                drop(inner);
                self.shared.registry.unregister(&client_address, self);
                embryo.discard();
                return Err(err);
            }
            inner.state = ConnState::Established;
            inner.peer = Some(Arc::clone(&embryo));
            inner.bus = Some(bus);
            inner.local = Some(Arc::clone(&client_address));
            inner.master_side = false;
        }
        *self.addresses.write() = vec![client_address.addr()];

        if let Err(err) = self.enqueue_request(&listener, &embryo, nonblocking, timeout) {
            debug!(conn = self.id, bus = %name, error = %err, "Connect failed");
            self.rollback_connect(&client_address);
            embryo.discard();
            return Err(err);
        }

        info!(
            conn = self.id,
            bus = %name,
            addr = %client_address.addr(),
            "Connected to bus"
        );
        Ok(())
    }

    fn register_client_address(self: &Arc<Self>, bus: &Bus) -> BusResult<Arc<BoundAddress>> {
        for _ in 0..Bus::CLIENT_IDS {
            let addr = bus.allocate_client()?;
            let address = Arc::new(BoundAddress::client(bus.name().clone(), addr));
            match self.shared.registry.register(&address, self) {
                Ok(()) => return Ok(address),
                // Still held by a live client or an added address.
                Err(BusError::AddressInUse) => continue,
                Err(e) => return Err(e),
            }
        }
        warn!(conn = self.id, bus = %bus.name(), "No free client address");
        Err(BusError::ConnectionRefused)
    }

    fn enqueue_request(
        &self,
        listener: &Connection,
        embryo: &Arc<Connection>,
        nonblocking: bool,
        timeout: Option<Duration>,
    ) -> BusResult<()> {
        let waiter = self.waiter(timeout);
        let mut accept = listener.accept_queue.lock();
        loop {
            if !accept.open {
                return Err(BusError::ConnectionRefused);
            }
            if accept.pending.len() < accept.backlog {
                accept.pending.push_back(Arc::clone(embryo));
                drop(accept);
                listener.accept_queue.pending.notify_one();
                return Ok(());
            }
            if nonblocking {
                return Err(BusError::WouldBlock);
            }
            waiter.wait(&listener.accept_queue.space, &mut accept)?;
        }
    }

    fn rollback_connect(self: &Arc<Self>, client_address: &BoundAddress) {
        {
            let mut inner = self.inner.lock();
            inner.state = ConnState::Closed;
            inner.peer = None;
            inner.bus = None;
            inner.local = None;
        }
        self.addresses.write().clear();
        self.shared.registry.unregister(client_address, self);
        self.queue.lock().clear();
    }

    /// Throw away a master-side end that was never handed out.
    fn discard(&self) {
        {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.state = ConnState::Closed;
            inner.peer = None;
            inner.bus = None;
            inner.local = None;
        }
        self.shared.forget(self.id);
    }

    pub(crate) fn accept(&self, nonblocking: bool) -> BusResult<Arc<Connection>> {
        let (nonblocking, timeout) = {
            let inner = self.inner.lock();
            if inner.state != ConnState::Listening {
                return Err(BusError::InvalidArgument("socket is not listening".into()));
            }
            (inner.nonblocking || nonblocking, inner.recv_timeout)
        };

        let waiter = self.waiter(timeout);
        let mut accept = self.accept_queue.lock();
        loop {
            if let Some(embryo) = accept.pending.pop_front() {
                drop(accept);
                self.accept_queue.space.notify_one();
                self.shared.metrics.record_accept();
                debug!(listener = self.id, conn = embryo.id(), "Accepted connection");
                return Ok(embryo);
            }
            if !accept.open {
                return Err(BusError::InvalidArgument("socket is not listening".into()));
            }
            if nonblocking {
                return Err(BusError::WouldBlock);
            }
            waiter.wait(&self.accept_queue.pending, &mut accept)?;
        }
    }

    // ------------------------------------------------------------------
    // control operations
    // ------------------------------------------------------------------

    /// Peer and bus of an established master-side connection.
    fn controlled_peer(&self) -> BusResult<(Arc<Connection>, Arc<Bus>)> {
        let inner = self.inner.lock();
        if !inner.master_side {
            return Err(BusError::InvalidArgument(
                "control operations need a master-side connection".into(),
            ));
        }
        if inner.state != ConnState::Established || inner.shutdown != 0 {
            return Err(BusError::NotConnected);
        }
        match (&inner.peer, &inner.bus) {
            (Some(peer), Some(bus)) => Ok((Arc::clone(peer), Arc::clone(bus))),
            _ => Err(BusError::NotConnected),
        }
    }

    /// The connection buffer/backlog options act on.
    fn option_target(self: &Arc<Self>) -> Arc<Connection> {
        let inner = self.inner.lock();
        match (&inner.peer, inner.master_side) {
            (Some(peer), true) => Arc::clone(peer),
            _ => Arc::clone(self),
        }
    }

    fn join(&self) -> BusResult<()> {
        let (peer, bus) = self.controlled_peer()?;
        let peer_inner = peer.inner.lock();
        if peer_inner.state != ConnState::Established || peer_inner.shutdown != 0 || peer_inner.closed
        {
            return Err(BusError::InvalidArgument("peer is not connected".into()));
        }
        bus.join(&peer)
    }

    fn set_eavesdrop(&self, on: bool) -> BusResult<()> {
        let (peer, bus) = self.controlled_peer()?;
        bus.set_eavesdrop(&peer, on)?;
        debug!(conn = peer.id(), eavesdrop = on, "Eavesdrop flag changed");
        Ok(())
    }

    fn add_address(&self, addr: BusAddr) -> BusResult<()> {
        if addr.is_master() || addr.is_multicast() {
            return Err(BusError::InvalidArgument(format!(
                "{addr} cannot be owned by a peer"
            )));
        }
        let (peer, bus) = self.controlled_peer()?;
        let address = Arc::new(BoundAddress::client(bus.name().clone(), addr));
        self.shared.registry.register(&address, &peer)?;

        let mut peer_inner = peer.inner.lock();
        if peer_inner.closed {
            drop(peer_inner);
            self.shared.registry.unregister(&address, &peer);
            return Err(BusError::NotConnected);
        }
        peer_inner.extra.push(address);
        drop(peer_inner);

        peer.addresses.write().push(addr);
        debug!(conn = peer.id(), addr = %addr, "Address added");
        Ok(())
    }

    fn remove_address(&self, addr: BusAddr) -> BusResult<()> {
        let (peer, _bus) = self.controlled_peer()?;
        let removed = {
            let mut peer_inner = peer.inner.lock();
            let pos = peer_inner
                .extra
                .iter()
                .position(|a| a.addr() == addr)
                .ok_or_else(|| BusError::InvalidArgument(format!("{addr} is not owned")))?;
            peer_inner.extra.remove(pos)
        };
        self.shared.registry.unregister(&removed, &peer);
        peer.addresses.write().retain(|a| *a != addr);
        debug!(conn = peer.id(), addr = %addr, "Address removed");
        Ok(())
    }

    pub(crate) fn set_option(self: &Arc<Self>, option: SocketOption) -> BusResult<()> {
        match option {
            SocketOption::AddAddress(addr) => self.add_address(addr),
            SocketOption::RemoveAddress(addr) => self.remove_address(addr),
            SocketOption::JoinBus => self.join(),
            SocketOption::SetEavesdrop => self.set_eavesdrop(true),
            SocketOption::UnsetEavesdrop => self.set_eavesdrop(false),
            SocketOption::SendBuffer(size) => {
                if size == 0 {
                    return Err(BusError::InvalidArgument("send buffer must be non-zero".into()));
                }
                let size = size.min(self.shared.config.max_send_buffer);
                self.option_target().inner.lock().send_buffer = size;
                Ok(())
            }
            SocketOption::MaxBacklog(backlog) => {
                if backlog == 0 {
                    return Err(BusError::InvalidArgument("backlog must be non-zero".into()));
                }
                let target = self.option_target();
                target.queue.lock().max_backlog = backlog;
                target.queue.writable.notify_all();
                Ok(())
            }
            SocketOption::NonBlocking(on) => {
                self.inner.lock().nonblocking = on;
                Ok(())
            }
            SocketOption::SendTimeout(timeout) => {
                self.inner.lock().send_timeout = timeout.filter(|t| !t.is_zero());
                Ok(())
            }
            SocketOption::RecvTimeout(timeout) => {
                self.inner.lock().recv_timeout = timeout.filter(|t| !t.is_zero());
                Ok(())
            }
        }
    }

    pub(crate) fn get_option(self: &Arc<Self>, name: OptionName) -> BusResult<OptionValue> {
        let value = match name {
            OptionName::SendBuffer => {
                OptionValue::Size(self.option_target().inner.lock().send_buffer)
            }
            OptionName::MaxBacklog => OptionValue::Size(self.option_target().queue.lock().max_backlog),
            OptionName::QueueFull => OptionValue::Flag(self.option_target().queue.lock().is_full()),
            OptionName::NonBlocking => OptionValue::Flag(self.inner.lock().nonblocking),
            OptionName::SendTimeout => OptionValue::Timeout(self.inner.lock().send_timeout),
            OptionName::RecvTimeout => OptionValue::Timeout(self.inner.lock().recv_timeout),
            OptionName::Joined => OptionValue::Flag(self.option_target().is_authenticated()),
            OptionName::Eavesdropper => OptionValue::Flag(self.option_target().is_eavesdropper()),
        };
        Ok(value)
    }

    // ------------------------------------------------------------------
    // receive
    // ------------------------------------------------------------------

    pub(crate) fn recv_message(&self, flags: RecvFlags) -> BusResult<BusMessage> {
        let (nonblocking, timeout) = {
            let inner = self.inner.lock();
            if inner.state != ConnState::Established {
                return Err(BusError::NotConnected);
            }
            (inner.nonblocking || flags.nonblocking, inner.recv_timeout)
        };

        let waiter = self.waiter(timeout);
        let mut queue = self.queue.lock();
        loop {
            if flags.peek {
                if let Some(message) = queue.front() {
                    return Ok(message.clone());
                }
            } else if let Some(message) = queue.pop() {
                drop(queue);
                self.queue.writable.notify_all();
                self.shared.metrics.record_receive();
                return Ok(message);
            }
            if queue.shutdown || queue.peer_gone {
                return Err(BusError::PeerShutdown);
            }
            if nonblocking {
                return Err(BusError::WouldBlock);
            }
            waiter.wait(&self.queue.readable, &mut queue)?;
        }
    }

    pub(crate) fn recv(&self, buf: &mut [u8], flags: RecvFlags) -> BusResult<(usize, SocketAddress)> {
        let message = self.recv_message(flags)?;
        let copied = message.payload.len().min(buf.len());
        buf[..copied].copy_from_slice(&message.payload[..copied]);
        Ok((copied, message.source))
    }

    // ------------------------------------------------------------------
    // shutdown / close / interrupt
    // ------------------------------------------------------------------

    pub(crate) fn shutdown(&self, how: Shutdown) -> BusResult<()> {
        let peer = {
            let mut inner = self.inner.lock();
            if inner.state != ConnState::Established {
                return Err(BusError::NotConnected);
            }
            inner.shutdown |= how.bits();
            inner.peer.clone()
        };

        if how.bits() & Shutdown::RECV != 0 {
            self.queue.lock().shutdown = true;
        }
        self.queue.wake_all();

        if let Some(peer) = peer {
            peer.inner.lock().shutdown |= how.mirrored();
            if how.bits() & Shutdown::SEND != 0 {
                peer.queue.lock().peer_gone = true;
            }
            peer.queue.wake_all();
        }
        debug!(conn = self.id, how = ?how, "Shutdown");
        Ok(())
    }

    pub(crate) fn close(self: &Arc<Self>) {
        let endpoint = self.endpoint();
        let (peer, bus, local, extra, master_side) = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.state = ConnState::Closed;
            inner.shutdown = Shutdown::Both.bits();
            (
                inner.peer.take(),
                inner.bus.take(),
                inner.local.take(),
                std::mem::take(&mut inner.extra),
                inner.master_side,
            )
        };

        for address in local.iter().chain(extra.iter()) {
            self.shared.registry.unregister(address, self);
        }
        self.addresses.write().clear();

        let embryos: Vec<_> = {
            let mut accept = self.accept_queue.lock();
            accept.open = false;
            accept.pending.drain(..).collect()
        };
        self.accept_queue.wake_all();
        for embryo in &embryos {
            embryo.close();
        }

        if let Some(bus) = &bus {
            bus.leave(self);
            // The client's session ends with its master-side end.
            if let (true, Some(peer)) = (master_side, &peer) {
                bus.leave(peer);
            }
        }

        if let Some(peer) = &peer {
            peer.inner.lock().shutdown = Shutdown::Both.bits();
            peer.queue.lock().peer_gone = true;
            peer.queue.wake_all();
        }

        let dropped = {
            let mut queue = self.queue.lock();
            queue.shutdown = true;
            let mut drained = Vec::new();
            while let Some(message) = queue.pop() {
                drained.push(message);
            }
            drained
        };
        self.queue.wake_all();
        drop(dropped);

        self.shared.filter.connection_released(&endpoint);
        self.shared.forget(self.id);
        self.shared.metrics.record_close();
        debug!(conn = self.id, pending = embryos.len(), "Closed connection");
    }

    pub(crate) fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
        self.queue.wake_all();
        self.accept_queue.wake_all();
    }

    // ------------------------------------------------------------------
    // introspection
    // ------------------------------------------------------------------

    pub(crate) fn local_address(&self) -> Option<SocketAddress> {
        self.inner
            .lock()
            .local
            .as_ref()
            .map(|a| a.socket_address().clone())
    }

    pub(crate) fn peer(&self) -> Option<Arc<Connection>> {
        self.inner.lock().peer.clone()
    }

    pub(crate) fn pending_bytes(&self) -> usize {
        self.queue.lock().bytes()
    }

    pub(crate) fn poll(&self) -> Readiness {
        let (state, shutdown, peer) = {
            let inner = self.inner.lock();
            (inner.state, inner.shutdown, inner.peer.clone())
        };

        let (readable, hangup) = {
            let queue = self.queue.lock();
            let hangup = queue.shutdown || queue.peer_gone;
            (!queue.is_empty() || hangup, hangup)
        };

        let writable = state == ConnState::Established
            && shutdown & Shutdown::SEND == 0
            && peer.is_some_and(|p| {
                let queue = p.queue.lock();
                !queue.shutdown && !queue.is_full()
            });

        let acceptable = state == ConnState::Listening && !self.accept_queue.lock().pending.is_empty();

        Readiness {
            readable: readable && state != ConnState::Listening,
            writable,
            hangup,
            acceptable,
        }
    }

    pub(crate) fn snapshot(self: &Arc<Self>) -> ConnectionSnapshot {
        let inner = self.inner.lock();
        let (queued, queued_bytes) = {
            let queue = self.queue.lock();
            (queue.len(), queue.bytes())
        };
        ConnectionSnapshot {
            id: self.id,
            // Minus the reference held by the caller's upgrade.
            refcount: Arc::strong_count(self).saturating_sub(1),
            state: inner.state,
            bus_master: inner.bus_master,
            master_side: inner.master_side,
            authenticated: self.is_authenticated(),
            eavesdropper: self.is_eavesdropper(),
            name: inner.local.as_ref().map(|a| a.name().clone()),
            addr: inner.local.as_ref().map(|a| a.addr()),
            queued,
            queued_bytes,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("authenticated", &self.is_authenticated())
            .field("eavesdropper", &self.is_eavesdropper())
            .finish_non_exhaustive()
    }
}
