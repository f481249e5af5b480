//! # Error Types
//!
//! Error taxonomy of the bus socket family and of match-rule parsing.

use thiserror::Error;

/// Convenience alias used throughout the bus crates.
pub type BusResult<T> = Result<T, BusError>;

/// Errors returned by bus socket operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    /// The requested address is already registered.
    #[error("Address already in use")]
    AddressInUse,

    /// Malformed address, re-bind, or an operation invalid in this state.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The socket is not connected.
    #[error("Socket is not connected")]
    NotConnected,

    /// The socket is already connected.
    #[error("Socket is already connected")]
    AlreadyConnected,

    /// The target bus exists but is not accepting connections.
    #[error("Connection refused")]
    ConnectionRefused,

    /// No route to the destination.
    #[error("No route to destination")]
    HostUnreachable,

    /// A non-blocking operation could not complete now.
    #[error("Operation would block")]
    WouldBlock,

    /// A blocking operation hit its deadline.
    #[error("Operation timed out")]
    TimedOut,

    /// A blocking wait was cancelled from outside.
    #[error("Interrupted wait")]
    Interrupted,

    /// Payload exceeds the sender's send-buffer ceiling.
    #[error("Message too large: {size} bytes exceeds limit of {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// Allocation failure while building a fan-out batch.
    #[error("Out of memory")]
    OutOfMemory,

    /// Delivery vetoed or access denied.
    #[error("Permission denied")]
    PermissionDenied,

    /// Match rule text could not be parsed.
    #[error("Match rule parse error: {0}")]
    Parse(#[from] ParseError),

    /// Descriptor-passing recursion depth exceeded.
    #[error("Too many references: recursion level {level} exceeds {max}")]
    TooManyReferences { level: u32, max: u32 },

    /// The local end or the peer has been shut down.
    #[error("Peer has shut down")]
    PeerShutdown,
}

impl BusError {
    /// POSIX errno name corresponding to this error.
    pub fn errno_name(&self) -> &'static str {
        match self {
            Self::AddressInUse => "EADDRINUSE",
            Self::InvalidArgument(_) | Self::Parse(_) => "EINVAL",
            Self::NotConnected => "ENOTCONN",
            Self::AlreadyConnected => "EISCONN",
            Self::ConnectionRefused => "ECONNREFUSED",
            Self::HostUnreachable => "EHOSTUNREACH",
            Self::WouldBlock => "EAGAIN",
            Self::TimedOut => "ETIMEDOUT",
            Self::Interrupted => "EINTR",
            Self::MessageTooLarge { .. } => "EMSGSIZE",
            Self::OutOfMemory => "ENOMEM",
            Self::PermissionDenied => "EPERM",
            Self::TooManyReferences { .. } => "ETOOMANYREFS",
            Self::PeerShutdown => "EPIPE",
        }
    }

    /// True for conditions a caller may simply retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WouldBlock | Self::TimedOut | Self::Interrupted)
    }
}

/// Errors from parsing match rule text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Rule text exceeds the maximum length.
    #[error("Rule is {len} bytes, maximum is {max}")]
    TooLong { len: usize, max: usize },

    /// A quoted value was never closed.
    #[error("Unbalanced quote in rule")]
    UnbalancedQuote,

    /// The same key appears twice.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// The key is not part of the match rule grammar.
    #[error("Unknown key: {0}")]
    UnknownKey(String),

    /// A pair lacks its `=` separator.
    #[error("Missing '=' in pair: {0}")]
    MissingEquals(String),

    /// The value is not acceptable for its key.
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
