//! One client session
//!
//! Requests on a session are handled strictly in order. Operations that can
//! block inside the engine (connect, accept, send, recv) run on the blocking
//! pool so the reactor stays free; the session itself waits for them, just
//! as a thread calling the socket API would.
//!
//! The stream is read by a separate task, so a hangup is noticed even while
//! a request is parked in the engine. That request and any still queued
//! behind it are abandoned, and every socket the session holds is closed.

use crate::protocol::{decode_request, encode_response, ErrorPayload, Handle, Op, Reply, Response};
use afbus_engine::{
    BusBroker, BusError, BusResult, BusSocket, Credentials, MatchRuleFilter, Packet, RecvFlags,
    SendFlags, SocketAddress, SocketApi,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Requests read ahead of the one being handled.
const READ_AHEAD: usize = 64;

pub struct Session {
    id: Uuid,
    broker: BusBroker,
    filter: Option<Arc<MatchRuleFilter>>,
    credentials: Credentials,
    handles: HashMap<Handle, Arc<BusSocket>>,
    next_handle: Handle,
}

impl Session {
    pub fn new(
        broker: BusBroker,
        filter: Option<Arc<MatchRuleFilter>>,
        credentials: Credentials,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            broker,
            filter,
            credentials,
            handles: HashMap::new(),
            next_handle: 1,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Serve requests from `stream` until it closes, then close every
    /// socket the session still holds.
    pub async fn run(mut self, stream: UnixStream) {
        let (reader, mut writer) = stream.into_split();
        info!(session = %self.id, pid = self.credentials.pid, uid = self.credentials.uid, "Session opened");

        let hangup = Arc::new(Notify::new());
        let (tx, mut requests) = mpsc::channel(READ_AHEAD);
        let reader = tokio::spawn(read_requests(self.id, reader, tx, Arc::clone(&hangup)));

        while let Some(line) = requests.recv().await {
            let outcome = tokio::select! {
                biased;
                response = self.handle_line(&line) => Some(response),
                _ = hangup.notified() => None,
            };
            let Some(response) = outcome else {
                debug!(session = %self.id, "Client hung up during a request");
                self.interrupt_all();
                break;
            };
            if let Err(e) = writer.write_all(encode_response(&response).as_bytes()).await {
                debug!(session = %self.id, error = %e, "Session write failed");
                break;
            }
        }
        reader.abort();

        let open = self.handles.len();
        self.close_all();
        info!(session = %self.id, closed = open, "Session ended");
    }

    pub async fn handle_line(&mut self, line: &str) -> Response {
        match decode_request(line) {
            Ok(request) => match self.dispatch(request.op).await {
                Ok(reply) => Response::ok(request.id, reply),
                Err(error) => {
                    debug!(session = %self.id, id = request.id, code = %error.code, "Request failed");
                    Response::err(Some(request.id), error)
                }
            },
            Err(error) => Response::err(None, error),
        }
    }

    fn socket(&self, handle: Handle) -> Result<Arc<BusSocket>, ErrorPayload> {
        self.handles
            .get(&handle)
            .cloned()
            .ok_or_else(|| BusError::InvalidArgument(format!("unknown handle {handle}")).into())
    }

    fn insert(&mut self, socket: BusSocket) -> Handle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(handle, Arc::new(socket));
        handle
    }

    fn match_filter(&self) -> Result<&MatchRuleFilter, ErrorPayload> {
        self.filter
            .as_deref()
            .ok_or_else(|| BusError::InvalidArgument("match rules are disabled".into()).into())
    }

    /// Match state belongs to the client: a master-side socket manages its
    /// peer's rules, a client socket its own.
    fn match_owner(socket: &BusSocket) -> Result<SocketAddress, ErrorPayload> {
        let owner = if socket.connection().is_master_side() {
            socket.peer_address()
        } else {
            socket.local_address()
        };
        owner.ok_or_else(|| BusError::NotConnected.into())
    }

    pub async fn dispatch(&mut self, op: Op) -> Result<Reply, ErrorPayload> {
        match op {
            Op::Socket { credentials } => {
                let socket = self.broker.socket(credentials.unwrap_or(self.credentials));
                Ok(Reply::Handle {
                    handle: self.insert(socket),
                })
            }
            Op::Bind { handle, name } => {
                self.socket(handle)?.bind(&name)?;
                Ok(Reply::Done)
            }
            Op::Listen { handle, backlog } => {
                self.socket(handle)?.listen(backlog)?;
                Ok(Reply::Done)
            }
            Op::Connect { handle, name } => {
                let socket = self.socket(handle)?;
                blocking(move || socket.connect(&name)).await?;
                Ok(Reply::Done)
            }
            Op::Accept {
                handle,
                nonblocking,
            } => {
                let socket = self.socket(handle)?;
                let accepted = blocking(move || {
                    if nonblocking {
                        socket.try_accept()
                    } else {
                        socket.accept()
                    }
                })
                .await?;
                let peer = accepted.peer_address();
                Ok(Reply::Accepted {
                    handle: self.insert(accepted),
                    peer,
                })
            }
            Op::Send {
                handle,
                destination,
                payload,
                header,
                pass,
                nonblocking,
            } => {
                let socket = self.socket(handle)?;
                let bytes = hex::decode(&payload)
                    .map_err(|e| BusError::InvalidArgument(format!("payload is not hex: {e}")))?;
                let mut packet = Packet::new(&bytes).with_credentials(socket.connection().credentials());
                if let Some(header) = header {
                    packet = packet.with_header(header);
                }
                for passed in pass {
                    packet = packet.with_descriptor(self.socket(passed)?.descriptor());
                }
                let flags = if nonblocking {
                    SendFlags::NONBLOCKING
                } else {
                    SendFlags::default()
                };
                let bytes = blocking(move || socket.send(destination, packet, flags)).await?;
                Ok(Reply::Sent { bytes })
            }
            Op::Recv {
                handle,
                nonblocking,
                peek,
            } => {
                let socket = self.socket(handle)?;
                let flags = RecvFlags { nonblocking, peek };
                let message = blocking(move || socket.recv_message(flags)).await?;
                Ok(Reply::Message {
                    payload: hex::encode(&message.payload[..]),
                    passed: message.ancillary.passed_sockets().collect(),
                    source: message.source,
                    header: message.header,
                })
            }
            Op::SetOption { handle, option } => {
                self.socket(handle)?.set_option(option)?;
                Ok(Reply::Done)
            }
            Op::GetOption { handle, name } => Ok(Reply::Value {
                value: self.socket(handle)?.get_option(name)?,
            }),
            Op::Shutdown { handle, how } => {
                self.socket(handle)?.shutdown(how)?;
                Ok(Reply::Done)
            }
            Op::Close { handle } => {
                let socket = self.handles.remove(&handle).ok_or_else(|| {
                    ErrorPayload::from(BusError::InvalidArgument(format!("unknown handle {handle}")))
                })?;
                socket.close();
                Ok(Reply::Done)
            }
            Op::AddMatch { handle, rule } => {
                let owner = Self::match_owner(&*self.socket(handle)?)?;
                let rule = self
                    .match_filter()?
                    .add_match(&owner, &rule)
                    .map_err(BusError::from)?;
                Ok(Reply::Rule {
                    rule: rule.to_string(),
                })
            }
            Op::RemoveMatch { handle, rule } => {
                let owner = Self::match_owner(&*self.socket(handle)?)?;
                self.match_filter()?
                    .remove_match(&owner, &rule)
                    .map_err(BusError::from)?;
                Ok(Reply::Done)
            }
            Op::AddName { handle, name } => {
                let owner = Self::match_owner(&*self.socket(handle)?)?;
                self.match_filter()?.add_name(&owner, &name);
                Ok(Reply::Done)
            }
            Op::ListConnections => Ok(Reply::Connections {
                connections: self.broker.connections(),
                table: self.broker.render_connections(),
            }),
            Op::Metrics => {
                let metrics = self.broker.metrics();
                afbus_telemetry::publish_snapshot(&metrics);
                let prometheus = afbus_telemetry::encode_metrics().map_err(|e| ErrorPayload {
                    code: "EIO".to_string(),
                    message: e.to_string(),
                })?;
                Ok(Reply::Metrics {
                    metrics,
                    prometheus,
                })
            }
        }
    }

    /// Kick every socket out of a blocking wait.
    fn interrupt_all(&self) {
        for socket in self.handles.values() {
            socket.interrupt();
        }
    }

    fn close_all(&mut self) {
        for (_, socket) in self.handles.drain() {
            socket.close();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Forward request lines until EOF, then raise `hangup`.
async fn read_requests(
    session: Uuid,
    reader: OwnedReadHalf,
    requests: mpsc::Sender<String>,
    hangup: Arc<Notify>,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => {
                if requests.send(line).await.is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(session = %session, error = %e, "Session read failed");
                break;
            }
        }
    }
    hangup.notify_one();
}

async fn blocking<T, F>(op: F) -> Result<T, ErrorPayload>
where
    T: Send + 'static,
    F: FnOnce() -> BusResult<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(op).await {
        Ok(result) => result.map_err(ErrorPayload::from),
        Err(e) => Err(ErrorPayload {
            code: "EIO".to_string(),
            message: format!("blocking task failed: {e}"),
        }),
    }
}
