//! Shared test fixtures.

use afbus_engine::{
    BrokerConfig, BusAddr, BusBroker, BusName, BusResult, BusSocket, Credentials,
    DeliveryFilter, RecvFlags, SocketAddress, SocketApi, SocketOption,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub fn bus_name(name: &str) -> BusName {
    BusName::new(name).unwrap()
}

pub fn addr(prefix: u32, client: u32) -> BusAddr {
    BusAddr::new(prefix, client).unwrap()
}

/// A broker with one bus whose master is bound and listening.
pub struct TestBus {
    pub broker: BusBroker,
    pub name: BusName,
    pub master: BusSocket,
    next_pid: AtomicU32,
}

/// Both ends of one accepted connection.
pub struct Peer {
    pub client: BusSocket,
    pub side: BusSocket,
}

impl TestBus {
    pub fn new(name: &str) -> Self {
        Self::with_config(name, BrokerConfig::default())
    }

    pub fn with_config(name: &str, config: BrokerConfig) -> Self {
        Self::from_broker(name, BusBroker::new(config).unwrap())
    }

    pub fn with_filter(name: &str, filter: Arc<dyn DeliveryFilter>) -> Self {
        Self::from_broker(
            name,
            BusBroker::with_filter(BrokerConfig::default(), filter).unwrap(),
        )
    }

    fn from_broker(name: &str, broker: BusBroker) -> Self {
        let name = bus_name(name);
        let master = broker.socket(Credentials::new(1, 0, 0));
        master.bind(&name).unwrap();
        master.listen(64).unwrap();
        Self {
            broker,
            name,
            master,
            next_pid: AtomicU32::new(100),
        }
    }

    /// Connect a new client and accept it, without joining.
    pub fn connect(&self) -> Peer {
        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        let client = self.broker.socket(Credentials::new(pid, 1000, 1000));
        client.connect(&self.name).unwrap();
        let side = self.master.accept().unwrap();
        Peer { client, side }
    }

    /// Connect, accept and join a new client.
    pub fn join(&self) -> Peer {
        let peer = self.connect();
        peer.side.set_option(SocketOption::JoinBus).unwrap();
        peer
    }

    /// Join a client that also owns `extra` for multicast purposes.
    pub fn join_with(&self, extra: BusAddr) -> Peer {
        let peer = self.connect();
        peer.side.set_option(SocketOption::AddAddress(extra)).unwrap();
        peer.side.set_option(SocketOption::JoinBus).unwrap();
        peer
    }
}

impl Peer {
    pub fn address(&self) -> SocketAddress {
        self.client.local_address().unwrap()
    }

    pub fn addr(&self) -> BusAddr {
        self.address().addr
    }
}

/// Next payload on `socket`, without waiting.
pub fn try_recv(socket: &BusSocket) -> BusResult<Vec<u8>> {
    socket
        .recv_message(RecvFlags::NONBLOCKING)
        .map(|msg| msg.payload.to_vec())
}
