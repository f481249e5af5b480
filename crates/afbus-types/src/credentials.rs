//! Process credentials attached to sockets and messages.

use serde::{Deserialize, Serialize};

/// Credentials of the process owning a socket (the `SO_PEERCRED` triple).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
}

impl Credentials {
    pub fn new(pid: u32, uid: u32, gid: u32) -> Self {
        Self { pid, uid, gid }
    }
}
