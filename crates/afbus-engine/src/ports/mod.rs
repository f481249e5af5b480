//! Ports (hexagonal boundaries)

pub mod inbound;
pub mod outbound;

pub use inbound::{
    OptionName, OptionValue, Readiness, RecvFlags, SendFlags, Shutdown, SocketApi, SocketOption,
};
pub use outbound::{AcceptAll, DeliveryContext, DeliveryFilter, DeliveryKind, Endpoint, Verdict};
