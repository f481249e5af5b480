//! Packets, receive queues and accept queues

use super::connection::{Connection, ConnectionId};
use afbus_types::{Credentials, MessageHeader, SocketAddress};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Fixed bound on descriptor-passing recursion.
pub const MAX_RECURSION_LEVEL: u32 = 4;

/// A descriptor passed alongside a message.
#[derive(Clone)]
pub enum Descriptor {
    /// Opaque descriptor number, carried through untouched.
    Raw(i32),
    /// A bus connection.
    Socket(Arc<Connection>),
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw(fd) => f.debug_tuple("Raw").field(fd).finish(),
            Self::Socket(conn) => f.debug_tuple("Socket").field(&conn.id()).finish(),
        }
    }
}

/// Ancillary data attached to a message.
#[derive(Debug, Clone, Default)]
pub struct Ancillary {
    pub credentials: Option<Credentials>,
    pub descriptors: Vec<Descriptor>,
}

impl Ancillary {
    /// Highest recursion level among passed sockets, if any are passed.
    pub(crate) fn passed_level(&self) -> Option<u32> {
        self.descriptors
            .iter()
            .filter_map(|d| match d {
                Descriptor::Socket(conn) => Some(conn.recursion_level()),
                Descriptor::Raw(_) => None,
            })
            .max()
    }

    pub fn passed_sockets(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.descriptors.iter().filter_map(|d| match d {
            Descriptor::Socket(conn) => Some(conn.id()),
            Descriptor::Raw(_) => None,
        })
    }
}

/// Outbound message.
#[derive(Debug, Clone)]
pub struct Packet {
    pub payload: Arc<[u8]>,
    /// Routing header; packets without one bypass rule filtering.
    pub header: Option<MessageHeader>,
    pub ancillary: Ancillary,
}

impl Packet {
    pub fn new(payload: &[u8]) -> Self {
        Self {
            payload: Arc::from(payload),
            header: None,
            ancillary: Ancillary::default(),
        }
    }

    pub fn with_header(mut self, header: MessageHeader) -> Self {
        self.header = Some(header);
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.ancillary.credentials = Some(credentials);
        self
    }

    pub fn with_descriptor(mut self, descriptor: Descriptor) -> Self {
        self.ancillary.descriptors.push(descriptor);
        self
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// A message sitting in (or taken from) a receive queue.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub payload: Arc<[u8]>,
    pub header: Option<MessageHeader>,
    pub ancillary: Ancillary,
    /// Address of the sending endpoint.
    pub source: SocketAddress,
}

pub(crate) struct QueueState {
    items: VecDeque<BusMessage>,
    bytes: usize,
    pub(crate) max_backlog: usize,
    /// Own read side shut down, or the connection closed.
    pub(crate) shutdown: bool,
    /// Peer shut its write side or closed.
    pub(crate) peer_gone: bool,
}

impl QueueState {
    pub(crate) fn is_full(&self) -> bool {
        self.items.len() >= self.max_backlog
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }

    pub(crate) fn push(&mut self, message: BusMessage) {
        self.bytes += message.payload.len();
        self.items.push_back(message);
    }

    pub(crate) fn pop(&mut self) -> Option<BusMessage> {
        let message = self.items.pop_front()?;
        self.bytes -= message.payload.len();
        Some(message)
    }

    pub(crate) fn front(&self) -> Option<&BusMessage> {
        self.items.front()
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
        self.bytes = 0;
    }
}

pub(crate) struct ReceiveQueue {
    state: Mutex<QueueState>,
    pub(crate) readable: Condvar,
    pub(crate) writable: Condvar,
}

impl ReceiveQueue {
    pub(crate) fn new(max_backlog: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                bytes: 0,
                max_backlog,
                shutdown: false,
                peer_gone: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock()
    }

    pub(crate) fn wake_all(&self) {
        self.readable.notify_all();
        self.writable.notify_all();
    }
}

pub(crate) struct AcceptState {
    pub(crate) pending: VecDeque<Arc<Connection>>,
    pub(crate) backlog: usize,
    /// Set by `listen`, cleared on close.
    pub(crate) open: bool,
}

pub(crate) struct AcceptQueue {
    state: Mutex<AcceptState>,
    /// Signalled when a connection request arrives.
    pub(crate) pending: Condvar,
    /// Signalled when a slot frees up.
    pub(crate) space: Condvar,
}

impl AcceptQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(AcceptState {
                pending: VecDeque::new(),
                backlog: 0,
                open: false,
            }),
            pending: Condvar::new(),
            space: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, AcceptState> {
        self.state.lock()
    }

    pub(crate) fn wake_all(&self) {
        self.pending.notify_all();
        self.space.notify_all();
    }
}
