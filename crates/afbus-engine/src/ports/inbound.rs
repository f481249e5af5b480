//! Inbound Ports (Driving Ports)
//!
//! The socket-level API a bus client drives, and the option/flag types it
//! speaks.

use crate::domain::{BusMessage, ConnState, ConnectionId, Packet};
use afbus_types::{BusAddr, BusName, BusResult, Credentials, SocketAddress};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which direction(s) to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shutdown {
    Read,
    Write,
    Both,
}

impl Shutdown {
    pub(crate) const RECV: u8 = 1;
    pub(crate) const SEND: u8 = 2;

    pub(crate) fn bits(self) -> u8 {
        match self {
            Self::Read => Self::RECV,
            Self::Write => Self::SEND,
            Self::Both => Self::RECV | Self::SEND,
        }
    }

    /// Bits to set on the peer: our write side is its read side.
    pub(crate) fn mirrored(self) -> u8 {
        match self {
            Self::Read => Self::SEND,
            Self::Write => Self::RECV,
            Self::Both => Self::RECV | Self::SEND,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendFlags {
    /// Fail with `WouldBlock` instead of waiting for queue space.
    pub nonblocking: bool,
}

impl SendFlags {
    pub const NONBLOCKING: Self = Self { nonblocking: true };
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecvFlags {
    pub nonblocking: bool,
    /// Return the next message without dequeuing it.
    pub peek: bool,
}

impl RecvFlags {
    pub const NONBLOCKING: Self = Self {
        nonblocking: true,
        peek: false,
    };
    pub const PEEK: Self = Self {
        nonblocking: false,
        peek: true,
    };
}

/// Settable socket options and control operations.
///
/// The control operations and the buffer/backlog sizes act on the peer when
/// issued on a master-side connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "option", content = "value", rename_all = "snake_case")]
pub enum SocketOption {
    AddAddress(BusAddr),
    RemoveAddress(BusAddr),
    JoinBus,
    SetEavesdrop,
    UnsetEavesdrop,
    SendBuffer(usize),
    MaxBacklog(usize),
    NonBlocking(bool),
    /// `None` (or zero) waits forever.
    SendTimeout(Option<Duration>),
    RecvTimeout(Option<Duration>),
}

/// Readable socket options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionName {
    SendBuffer,
    MaxBacklog,
    QueueFull,
    NonBlocking,
    SendTimeout,
    RecvTimeout,
    Joined,
    Eavesdropper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Size(usize),
    Flag(bool),
    Timeout(Option<Duration>),
}

/// Poll readiness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readiness {
    /// A message is queued, or `recv` would return an error immediately.
    pub readable: bool,
    /// `send` to the peer would not block.
    pub writable: bool,
    /// Read side shut down or peer gone.
    pub hangup: bool,
    /// A listening socket has a pending connection.
    pub acceptable: bool,
}

/// Primary bus socket API (Driving Port)
pub trait SocketApi: Send + Sync {
    type Accepted;

    fn id(&self) -> ConnectionId;

    fn state(&self) -> ConnState;

    /// Become master of bus `name`. The address is always the master slot.
    fn bind(&self, name: &BusName) -> BusResult<()>;

    fn listen(&self, backlog: usize) -> BusResult<()>;

    /// Connect to the master of bus `name`.
    fn connect(&self, name: &BusName) -> BusResult<()>;

    /// Take one pending connection; the result is the master-side end.
    fn accept(&self) -> BusResult<Self::Accepted>;

    /// Send `packet` to `destination` (the master when `None`).
    ///
    /// Returns the payload length on success.
    fn send(
        &self,
        destination: Option<BusAddr>,
        packet: Packet,
        flags: SendFlags,
    ) -> BusResult<usize>;

    /// Copy the next message into `buf`, returning the copied length and the
    /// sender's address.
    fn recv(&self, buf: &mut [u8], flags: RecvFlags) -> BusResult<(usize, SocketAddress)>;

    fn recv_message(&self, flags: RecvFlags) -> BusResult<BusMessage>;

    fn set_option(&self, option: SocketOption) -> BusResult<()>;

    fn get_option(&self, name: OptionName) -> BusResult<OptionValue>;

    fn shutdown(&self, how: Shutdown) -> BusResult<()>;

    fn close(&self);

    /// Wake any blocked operation on this socket with `Interrupted`.
    fn interrupt(&self);

    fn local_address(&self) -> Option<SocketAddress>;

    fn peer_address(&self) -> Option<SocketAddress>;

    fn peer_credentials(&self) -> Option<Credentials>;

    /// Bytes waiting in the receive queue.
    fn pending_bytes(&self) -> usize;

    fn poll(&self) -> Readiness;
}
