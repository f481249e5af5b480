//! Domain layer: registry, bus, connections and delivery.

pub mod address;
pub mod bus;
pub mod connection;
mod delivery;
pub mod queue;
pub mod registry;
mod wait;

pub use address::{AddressKind, BoundAddress};
pub use bus::Bus;
pub use connection::{ConnState, Connection, ConnectionId, ConnectionSnapshot};
pub use queue::{Ancillary, BusMessage, Descriptor, Packet, MAX_RECURSION_LEVEL};
pub use registry::AddressRegistry;
