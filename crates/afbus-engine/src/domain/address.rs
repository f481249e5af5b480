//! Bound addresses
//!
//! A [`BoundAddress`] is shared through an `Arc`: the strong count is its
//! reference count. The master's accepted connections all hold the master
//! address, so it lives until the last of them closes.

use afbus_types::{BusAddr, BusName, SocketAddress};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressKind {
    Master,
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BoundAddress {
    kind: AddressKind,
    socket: SocketAddress,
}

impl BoundAddress {
    pub fn master(name: BusName) -> Self {
        Self {
            kind: AddressKind::Master,
            socket: SocketAddress::master(name),
        }
    }

    pub fn client(name: BusName, addr: BusAddr) -> Self {
        Self {
            kind: AddressKind::Client,
            socket: SocketAddress::new(name, addr),
        }
    }

    pub fn kind(&self) -> AddressKind {
        self.kind
    }

    pub fn name(&self) -> &BusName {
        &self.socket.name
    }

    pub fn addr(&self) -> BusAddr {
        self.socket.addr
    }

    pub fn socket_address(&self) -> &SocketAddress {
        &self.socket
    }
}

impl fmt::Display for BoundAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket)
    }
}
