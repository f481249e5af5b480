//! Session wire format
//!
//! One JSON object per line in each direction. Requests carry a caller
//! chosen `id` and an `op`; every request gets exactly one response with the
//! same `id` and either `ok` or `error`.
//!
//! ```text
//! → {"id":1,"op":"socket"}
//! ← {"id":1,"ok":{"kind":"handle","handle":1}}
//! → {"id":2,"op":"connect","handle":1,"name":"bus0"}
//! ← {"id":2,"error":{"code":"EHOSTUNREACH","message":"No route to destination"}}
//! ```
//!
//! Payloads are hex strings. Handles are session-local.

use afbus_engine::{
    BusAddr, BusError, BusName, ConnectionSnapshot, Credentials, MessageHeader, MetricsSnapshot,
    OptionName, OptionValue, Shutdown, SocketAddress, SocketOption,
};
use serde::{Deserialize, Serialize};

pub type Handle = u64;

fn default_backlog() -> usize {
    16
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    #[serde(flatten)]
    pub op: Op,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// Open a socket. Credentials default to the session peer's.
    Socket {
        #[serde(default)]
        credentials: Option<Credentials>,
    },
    Bind {
        handle: Handle,
        name: BusName,
    },
    Listen {
        handle: Handle,
        #[serde(default = "default_backlog")]
        backlog: usize,
    },
    Connect {
        handle: Handle,
        name: BusName,
    },
    Accept {
        handle: Handle,
        #[serde(default)]
        nonblocking: bool,
    },
    Send {
        handle: Handle,
        #[serde(default)]
        destination: Option<BusAddr>,
        payload: String,
        #[serde(default)]
        header: Option<MessageHeader>,
        /// Handles passed along with the message.
        #[serde(default)]
        pass: Vec<Handle>,
        #[serde(default)]
        nonblocking: bool,
    },
    Recv {
        handle: Handle,
        #[serde(default)]
        nonblocking: bool,
        #[serde(default)]
        peek: bool,
    },
    SetOption {
        handle: Handle,
        option: SocketOption,
    },
    GetOption {
        handle: Handle,
        name: OptionName,
    },
    Shutdown {
        handle: Handle,
        how: Shutdown,
    },
    Close {
        handle: Handle,
    },
    AddMatch {
        handle: Handle,
        rule: String,
    },
    RemoveMatch {
        handle: Handle,
        rule: String,
    },
    AddName {
        handle: Handle,
        name: String,
    },
    ListConnections,
    Metrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    Done,
    Handle {
        handle: Handle,
    },
    Accepted {
        handle: Handle,
        peer: Option<SocketAddress>,
    },
    Sent {
        bytes: usize,
    },
    Message {
        payload: String,
        source: SocketAddress,
        header: Option<MessageHeader>,
        /// Connection ids of sockets passed with the message.
        passed: Vec<u64>,
    },
    Value {
        value: OptionValue,
    },
    Rule {
        rule: String,
    },
    Connections {
        connections: Vec<ConnectionSnapshot>,
        table: String,
    },
    Metrics {
        metrics: MetricsSnapshot,
        prometheus: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// POSIX-style name, e.g. `EAGAIN`, or `EPROTO` for malformed requests.
    pub code: String,
    pub message: String,
}

impl ErrorPayload {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            code: "EPROTO".to_string(),
            message: message.into(),
        }
    }
}

impl From<BusError> for ErrorPayload {
    fn from(err: BusError) -> Self {
        Self {
            code: err.errno_name().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Absent only when the request line could not be parsed at all.
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<Reply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl Response {
    pub fn ok(id: u64, reply: Reply) -> Self {
        Self {
            id: Some(id),
            ok: Some(reply),
            error: None,
        }
    }

    pub fn err(id: Option<u64>, error: impl Into<ErrorPayload>) -> Self {
        Self {
            id,
            ok: None,
            error: Some(error.into()),
        }
    }
}

/// Parse one request line.
pub fn decode_request(line: &str) -> Result<Request, ErrorPayload> {
    serde_json::from_str(line).map_err(|e| ErrorPayload::protocol(e.to_string()))
}

/// Encode a response as one line, newline included.
pub fn encode_response(response: &Response) -> String {
    match serde_json::to_string(response) {
        Ok(mut line) => {
            line.push('\n');
            line
        }
        Err(e) => format!(
            "{{\"id\":null,\"error\":{{\"code\":\"EPROTO\",\"message\":{:?}}}}}\n",
            e.to_string()
        ),
    }
}
