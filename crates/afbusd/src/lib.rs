//! # AF_BUS Broker Daemon
//!
//! Hosts one [`afbus_engine::BusBroker`] and lets local processes drive it
//! over a Unix-domain socket.
//!
//! ## Modules
//!
//! - `config` - daemon configuration (defaults, env, JSON file)
//! - `protocol` - newline-delimited JSON request/response types
//! - `session` - per-connection request loop and handle table
//! - `server` - listening socket and session spawning
//!
//! ## Session Lifecycle
//!
//! ```text
//!  accept ──▶ peer credentials ──▶ Session::run ──▶ EOF ──▶ close all handles
//! ```

pub mod config;
pub mod protocol;
pub mod server;
pub mod session;

pub use config::DaemonConfig;
pub use protocol::{ErrorPayload, Handle, Op, Reply, Request, Response};
pub use server::Daemon;
pub use session::Session;
