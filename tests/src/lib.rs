//! # AF_BUS Test Suite
//!
//! Cross-crate tests for the broker: end-to-end scenarios, concurrency
//! properties, match-rule properties and the daemon's socket protocol.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── fixtures.rs            # Bus/peer builders shared by every module
//! ├── integration/
//! │   ├── scenarios.rs       # Unicast, multicast, eavesdrop, send-buffer flows
//! │   ├── concurrency.rs     # Races between bind, send, join and eavesdrop
//! │   └── daemon.rs          # JSON-lines round trips through afbusd
//! └── properties.rs          # Rule text round trips and the match truth table
//! ```
//!
//! ## Running
//!
//! ```bash
//! cargo test -p afbus-tests
//! cargo test -p afbus-tests concurrency
//! ```

#[cfg(test)]
pub(crate) mod fixtures;
pub mod integration;
pub mod properties;
