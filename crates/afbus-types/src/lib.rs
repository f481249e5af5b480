//! # AF_BUS Types Crate
//!
//! Value objects shared by the match-rule engine, the delivery engine and the
//! broker daemon.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every type that crosses a crate boundary is
//!   defined here.
//! - **Validated Construction**: addresses and names can only be built through
//!   checked constructors, so downstream code never re-validates them.
//! - **One Error Taxonomy**: `BusError` mirrors the errno set of the socket
//!   family so callers can tell retryable conditions from real failures.
//!
//! ## Address Layout
//!
//! ```text
//!  19            12 11                    0
//! ┌────────────────┬──────────────────────┐
//! │  prefix (8)    │     client (12)      │
//! └────────────────┴──────────────────────┘
//!   0x00 / 0x000  → bus master
//!   client 0xFFF  → multicast wildcard for the prefix
//! ```

pub mod address;
pub mod credentials;
pub mod errors;
pub mod message;

pub use address::{BusAddr, BusName, SocketAddress};
pub use credentials::Credentials;
pub use errors::{BusError, BusResult, ParseError};
pub use message::{MessageHeader, MessageType};
