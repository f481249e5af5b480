//! # Message Routing Header
//!
//! The subset of a D-Bus message header that match rules inspect. The body
//! itself is opaque to the bus.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// D-Bus message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    MethodCall,
    MethodReturn,
    Error,
    Signal,
}

impl MessageType {
    pub const ALL: [MessageType; 4] = [
        MessageType::MethodCall,
        MessageType::MethodReturn,
        MessageType::Error,
        MessageType::Signal,
    ];

    /// Name used in match rule text.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MethodCall => "method_call",
            Self::MethodReturn => "method_return",
            Self::Error => "error",
            Self::Signal => "signal",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "method_call" => Ok(Self::MethodCall),
            "method_return" => Ok(Self::MethodReturn),
            "error" => Ok(Self::Error),
            "signal" => Ok(Self::Signal),
            _ => Err(()),
        }
    }
}

/// Routing fields of a message.
///
/// `args` holds the string value of each leading body argument; `None`
/// marks an argument that is not a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub msg_type: MessageType,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub member: Option<String>,
    #[serde(default)]
    pub error_name: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub args: Vec<Option<String>>,
}

impl MessageHeader {
    pub fn new(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            path: None,
            interface: None,
            member: None,
            error_name: None,
            destination: None,
            sender: None,
            args: Vec::new(),
        }
    }

    pub fn signal(interface: &str, member: &str) -> Self {
        Self::new(MessageType::Signal)
            .with_interface(interface)
            .with_member(member)
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    pub fn with_interface(mut self, interface: &str) -> Self {
        self.interface = Some(interface.to_string());
        self
    }

    pub fn with_member(mut self, member: &str) -> Self {
        self.member = Some(member.to_string());
        self
    }

    pub fn with_destination(mut self, destination: &str) -> Self {
        self.destination = Some(destination.to_string());
        self
    }

    pub fn with_sender(mut self, sender: &str) -> Self {
        self.sender = Some(sender.to_string());
        self
    }

    /// Append a string argument.
    pub fn with_arg(mut self, value: &str) -> Self {
        self.args.push(Some(value.to_string()));
        self
    }

    /// String value of argument `index`, if present and a string.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(|a| a.as_deref())
    }
}
