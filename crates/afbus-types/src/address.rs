//! # Bus Addresses
//!
//! A bus endpoint is identified by the bus name it belongs to and a 20-bit
//! numeric address split into a multicast prefix and a client id.

use crate::errors::BusError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a bus name in bytes (same bound as `sun_path`).
pub const MAX_NAME_LEN: usize = 108;

/// 20-bit numeric bus address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct BusAddr(u32);

impl BusAddr {
    /// Total number of significant bits.
    pub const BITS: u32 = 20;
    /// Bits used by the multicast prefix.
    pub const PREFIX_BITS: u32 = 8;
    /// Bits used by the client id.
    pub const CLIENT_BITS: u32 = 12;
    /// Mask selecting the client id.
    pub const CLIENT_MASK: u32 = (1 << Self::CLIENT_BITS) - 1;
    /// Mask selecting the prefix (after shifting).
    pub const PREFIX_MASK: u32 = (1 << Self::PREFIX_BITS) - 1;
    /// Client id addressing every member of a prefix.
    pub const CLIENT_ALL: u32 = Self::CLIENT_MASK;
    /// The reserved bus-master address.
    pub const MASTER: BusAddr = BusAddr(0);

    /// Build an address from a prefix and a client id.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if either part does not fit its field.
    pub fn new(prefix: u32, client: u32) -> Result<Self, BusError> {
        if prefix > Self::PREFIX_MASK {
            return Err(BusError::InvalidArgument(format!(
                "prefix {prefix:#x} exceeds {} bits",
                Self::PREFIX_BITS
            )));
        }
        if client > Self::CLIENT_MASK {
            return Err(BusError::InvalidArgument(format!(
                "client id {client:#x} exceeds {} bits",
                Self::CLIENT_BITS
            )));
        }
        Ok(Self((prefix << Self::CLIENT_BITS) | client))
    }

    /// Build an address from its raw 20-bit value.
    pub fn from_raw(raw: u32) -> Result<Self, BusError> {
        if raw >> Self::BITS != 0 {
            return Err(BusError::InvalidArgument(format!(
                "address {raw:#x} exceeds {} bits",
                Self::BITS
            )));
        }
        Ok(Self(raw))
    }

    /// The multicast wildcard address for `prefix`.
    pub fn multicast(prefix: u32) -> Result<Self, BusError> {
        Self::new(prefix, Self::CLIENT_ALL)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn prefix(self) -> u32 {
        self.0 >> Self::CLIENT_BITS
    }

    pub fn client(self) -> u32 {
        self.0 & Self::CLIENT_MASK
    }

    pub fn is_master(self) -> bool {
        self == Self::MASTER
    }

    /// True when the client part is the all-ones wildcard.
    pub fn is_multicast(self) -> bool {
        self.client() == Self::CLIENT_ALL
    }
}

impl TryFrom<u32> for BusAddr {
    type Error = BusError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::from_raw(raw)
    }
}

impl From<BusAddr> for u32 {
    fn from(addr: BusAddr) -> Self {
        addr.0
    }
}

impl fmt::Display for BusAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:03x}", self.prefix(), self.client())
    }
}

/// Name of a bus instance, the path the master bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BusName(String);

impl BusName {
    /// Validate and wrap a bus name.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the name is empty, longer than
    /// [`MAX_NAME_LEN`] bytes, or contains a NUL byte.
    pub fn new(name: impl Into<String>) -> Result<Self, BusError> {
        let name = name.into();
        if name.is_empty() {
            return Err(BusError::InvalidArgument("empty bus name".into()));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(BusError::InvalidArgument(format!(
                "bus name is {} bytes, limit is {MAX_NAME_LEN}",
                name.len()
            )));
        }
        if name.contains('\0') {
            return Err(BusError::InvalidArgument(
                "bus name contains a NUL byte".into(),
            ));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BusName {
    type Error = BusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for BusName {
    type Error = BusError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BusName> for String {
    fn from(name: BusName) -> Self {
        name.0
    }
}

impl fmt::Display for BusName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Full socket address: which bus, and which endpoint on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SocketAddress {
    pub name: BusName,
    pub addr: BusAddr,
}

impl SocketAddress {
    pub fn new(name: BusName, addr: BusAddr) -> Self {
        Self { name, addr }
    }

    /// The master address of bus `name`.
    pub fn master(name: BusName) -> Self {
        Self {
            name,
            addr: BusAddr::MASTER,
        }
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.addr)
    }
}
