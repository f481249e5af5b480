//! # AF_BUS Engine
//!
//! Hosted message bus: one bus master per bus name, any number of clients,
//! and a broker that routes datagrams between them with multicast fan-out,
//! eavesdropping and pluggable per-recipient filtering.
//!
//! ## Architecture
//!
//! - **Domain Layer** (`domain/`): connection state machine and delivery
//!   - `AddressRegistry`: `(bus name, address)` to owning connection
//!   - `Bus`: joined peers, eavesdropper count, client id allocator
//!   - `Connection`: bind / listen / connect / accept, options, queues
//!   - `Packet` / `BusMessage`: payload plus header and ancillary data
//!
//! - **Ports Layer** (`ports/`): trait definitions
//!   - `SocketApi`: driving port (inbound API)
//!   - `DeliveryFilter`: driven port, per-copy accept/drop verdict
//!
//! - **Service Layer** (`service`): `BusBroker` and `BusSocket`
//!
//! - **Adapters Layer** (`adapters/`): `MatchRuleFilter`, D-Bus style
//!   match-rule filtering built on `afbus-match`
//!
//! ## Delivery Guarantees
//!
//! - A fan-out send is queued to every accepted recipient or to none.
//! - A sender blocks (or gets `WouldBlock`) while any recipient queue is full.
//! - Peers that have not joined the bus can only talk to the master.
//! - Passed sockets nest at most `MAX_RECURSION_LEVEL` deep.
//!
//! ## Usage Example
//!
//! ```ignore
//! use afbus_engine::{BrokerConfig, BusBroker, SocketApi, SocketOption};
//!
//! let broker = BusBroker::new(BrokerConfig::default())?;
//! let master = broker.socket(Credentials::default());
//! master.bind(&BusName::new("bus0")?)?;
//! master.listen(16)?;
//!
//! let client = broker.socket(Credentials::default());
//! client.connect(&BusName::new("bus0")?)?;
//! let side = master.accept()?;
//! side.set_option(SocketOption::JoinBus)?;
//! side.send_bytes(client.local_address().map(|a| a.addr), b"hello")?;
//! ```

pub mod adapters;
pub mod config;
pub mod domain;
pub mod metrics;
pub mod ports;
pub mod service;

pub use adapters::MatchRuleFilter;
pub use config::{BrokerConfig, ConfigError};
pub use domain::{
    AddressKind, AddressRegistry, Ancillary, BoundAddress, Bus, BusMessage, ConnState, Connection,
    ConnectionId, ConnectionSnapshot, Descriptor, Packet, MAX_RECURSION_LEVEL,
};
pub use metrics::{Metrics, MetricsSnapshot};
pub use ports::{
    AcceptAll, DeliveryContext, DeliveryFilter, DeliveryKind, Endpoint, OptionName, OptionValue,
    Readiness, RecvFlags, SendFlags, Shutdown, SocketApi, SocketOption, Verdict,
};
pub use service::{BusBroker, BusSocket};

pub use afbus_types::{
    BusAddr, BusError, BusName, BusResult, Credentials, MessageHeader, MessageType, SocketAddress,
};
