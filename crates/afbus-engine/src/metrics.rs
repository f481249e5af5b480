//! Delivery counters
//!
//! Lock-free counters bumped on the send and receive paths. A
//! [`MetricsSnapshot`] is what exporters (Prometheus, the daemon's `metrics`
//! op) read.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Broker-wide counters.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Successful `send` calls
    pub messages_sent: AtomicU64,
    /// Payload bytes accepted by successful sends
    pub bytes_sent: AtomicU64,
    /// Individual enqueues (one per recipient copy)
    pub deliveries: AtomicU64,
    /// Recipients excluded by the delivery filter
    pub filter_drops: AtomicU64,
    /// Sends that found a full recipient queue
    pub would_block: AtomicU64,
    /// Fan-out batches rebuilt because membership grew
    pub fanout_retries: AtomicU64,
    /// Messages dequeued by `recv`
    pub messages_received: AtomicU64,
    /// Connections accepted by a bus master
    pub connections_accepted: AtomicU64,
    /// Connections closed
    pub connections_closed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_send(&self, bytes: usize, copies: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.deliveries.fetch_add(copies as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_filter_drop(&self) {
        self.filter_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_would_block(&self) {
        self.would_block.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fanout_retry(&self) {
        self.fanout_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_receive(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_accept(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_close(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            filter_drops: self.filter_drops.load(Ordering::Relaxed),
            would_block: self.would_block.load(Ordering::Relaxed),
            fanout_retries: self.fanout_retries.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            live_connections: 0,
        }
    }
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub deliveries: u64,
    pub filter_drops: u64,
    pub would_block: u64,
    pub fanout_retries: u64,
    pub messages_received: u64,
    pub connections_accepted: u64,
    pub connections_closed: u64,
    /// Filled in by the broker, not tracked by [`Metrics`].
    pub live_connections: u64,
}
