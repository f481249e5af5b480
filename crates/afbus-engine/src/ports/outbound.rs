//! Outbound Ports (Driven Ports)
//!
//! The pre-delivery filter hook. Every copy of a message passes through
//! [`DeliveryFilter::verdict`] immediately before it is queued.

use crate::domain::ConnectionId;
use afbus_types::{MessageHeader, SocketAddress};
use serde::{Deserialize, Serialize};

/// Why a recipient is getting a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    /// The addressed recipient.
    Unicast,
    /// A member of the destination's multicast prefix.
    Multicast,
    /// An eavesdropper receiving a copy of someone else's unicast.
    Eavesdrop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// Exclude the recipient silently.
    Drop,
    /// Exclude the recipient; a plain unicast send fails with
    /// `PermissionDenied`.
    DropWithError,
}

/// One end of a delivery, as seen by the filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: ConnectionId,
    pub address: Option<SocketAddress>,
    pub master_side: bool,
    pub eavesdropper: bool,
}

pub struct DeliveryContext<'a> {
    pub kind: DeliveryKind,
    pub sender: &'a Endpoint,
    pub recipient: &'a Endpoint,
    pub header: Option<&'a MessageHeader>,
    pub payload: &'a [u8],
}

/// Pre-delivery filter (Driven Port)
pub trait DeliveryFilter: Send + Sync {
    fn verdict(&self, ctx: &DeliveryContext<'_>) -> Verdict;

    /// Called once when a connection closes.
    fn connection_released(&self, _endpoint: &Endpoint) {}
}

/// Filter that lets everything through.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl DeliveryFilter for AcceptAll {
    fn verdict(&self, _ctx: &DeliveryContext<'_>) -> Verdict {
        Verdict::Accept
    }
}
