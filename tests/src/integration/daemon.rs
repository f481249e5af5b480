//! Daemon protocol round trips
//!
//! Starts `afbusd` on a temporary socket and drives a full bus session over
//! newline-delimited JSON.

#[cfg(test)]
mod tests {
    use afbusd::{Daemon, DaemonConfig};
    use serde_json::{json, Value};
    use std::path::Path;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
    use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::UnixStream;
    use tokio::sync::oneshot;

    /// One protocol client with auto-numbered request ids.
    struct Client {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
        next_id: u64,
    }

    impl Client {
        async fn connect(path: &Path) -> Self {
            let stream = UnixStream::connect(path).await.unwrap();
            let (reader, writer) = stream.into_split();
            Self {
                lines: BufReader::new(reader).lines(),
                writer,
                next_id: 1,
            }
        }

        async fn send_line(&mut self, line: &str) -> Value {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
            let reply = self.lines.next_line().await.unwrap().unwrap();
            serde_json::from_str(&reply).unwrap()
        }

        async fn call(&mut self, mut request: Value) -> Value {
            let id = self.next_id;
            self.next_id += 1;
            request["id"] = json!(id);
            let response = self.send_line(&request.to_string()).await;
            assert_eq!(response["id"], json!(id));
            response
        }

        /// Call and unwrap the `ok` body.
        async fn ok(&mut self, request: Value) -> Value {
            let response = self.call(request).await;
            assert!(response.get("error").is_none(), "unexpected error: {response}");
            response["ok"].clone()
        }
    }

    struct Running {
        daemon: Daemon,
        stop: oneshot::Sender<()>,
        server: tokio::task::JoinHandle<()>,
        _dir: tempfile::TempDir,
        path: std::path::PathBuf,
    }

    fn start() -> Running {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("afbusd.sock");
        let config = DaemonConfig {
            socket_path: path.clone(),
            ..DaemonConfig::default()
        };
        let daemon = Daemon::new(&config).unwrap();
        let listener = Daemon::bind(&path).unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let server = {
            let daemon = daemon.clone();
            tokio::spawn(async move {
                daemon
                    .serve(listener, async {
                        let _ = stopped.await;
                    })
                    .await
            })
        };
        Running {
            daemon,
            stop,
            server,
            _dir: dir,
            path,
        }
    }

    // =========================================================================
    // Full session
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bus_session_over_socket() {
        let running = start();
        let mut client = Client::connect(&running.path).await;

        let master = client.ok(json!({"op": "socket"})).await["handle"].clone();
        client
            .ok(json!({"op": "bind", "handle": master, "name": "bus0"}))
            .await;
        client.ok(json!({"op": "listen", "handle": master})).await;

        let peer = client.ok(json!({"op": "socket"})).await["handle"].clone();
        client
            .ok(json!({"op": "connect", "handle": peer, "name": "bus0"}))
            .await;

        let accepted = client.ok(json!({"op": "accept", "handle": master})).await;
        assert_eq!(accepted["kind"], "accepted");
        assert_eq!(accepted["peer"], json!({"name": "bus0", "addr": 1}));
        let side = accepted["handle"].clone();

        client
            .ok(json!({"op": "set_option", "handle": side, "option": {"option": "join_bus"}}))
            .await;
        let joined = client
            .ok(json!({"op": "get_option", "handle": peer, "name": "joined"}))
            .await;
        assert_eq!(joined["value"], json!(true));

        let sent = client
            .ok(json!({"op": "send", "handle": side, "payload": hex::encode(b"hello")}))
            .await;
        assert_eq!(sent, json!({"kind": "sent", "bytes": 5}));

        let message = client.ok(json!({"op": "recv", "handle": peer})).await;
        assert_eq!(message["kind"], "message");
        assert_eq!(message["payload"], hex::encode(b"hello"));
        assert_eq!(message["source"], json!({"name": "bus0", "addr": 0}));

        let listed = client.ok(json!({"op": "list_connections"})).await;
        assert_eq!(listed["connections"].as_array().unwrap().len(), 3);
        assert_eq!(listed["table"].as_str().unwrap().lines().count(), 4);

        let metrics = client.ok(json!({"op": "metrics"})).await;
        assert_eq!(metrics["metrics"]["messages_sent"], json!(1));
        assert_eq!(metrics["metrics"]["connections_accepted"], json!(1));
        assert!(metrics["prometheus"]
            .as_str()
            .unwrap()
            .contains("afbus_connections_live"));

        drop(client);
        let bus0 = afbus_engine::BusName::new("bus0").unwrap();
        let mut released = false;
        for _ in 0..100 {
            if running.daemon.broker().bound_addresses(&bus0).is_empty() {
                released = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(released, "session end should close its sockets");

        let _ = running.stop.send(());
        running.server.await.unwrap();
    }

    // =========================================================================
    // Errors
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_errors_carry_errno_names() {
        let running = start();
        let mut client = Client::connect(&running.path).await;

        let sock = client.ok(json!({"op": "socket"})).await["handle"].clone();
        let refused = client
            .call(json!({"op": "connect", "handle": sock, "name": "nope"}))
            .await;
        assert_eq!(refused["error"]["code"], "EHOSTUNREACH");
        assert!(refused.get("ok").is_none());

        let unknown = client
            .call(json!({"op": "recv", "handle": 999, "nonblocking": true}))
            .await;
        assert_eq!(unknown["error"]["code"], "EINVAL");

        let bad_rule = client
            .call(json!({"op": "add_match", "handle": sock, "rule": "type='bogus'"}))
            .await;
        assert!(bad_rule.get("error").is_some());

        let garbage = client.send_line("{not json").await;
        assert_eq!(garbage["id"], Value::Null);
        assert_eq!(garbage["error"]["code"], "EPROTO");

        // The session survives malformed lines.
        let again = client.ok(json!({"op": "socket"})).await;
        assert_eq!(again["kind"], "handle");

        let _ = running.stop.send(());
        running.server.await.unwrap();
    }

    #[tokio::test]
    async fn test_second_daemon_refuses_live_socket() {
        let running = start();
        assert!(Daemon::bind(&running.path).is_err());
        let _ = running.stop.send(());
        running.server.await.unwrap();
    }
}
