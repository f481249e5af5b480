//! Prometheus metrics for the broker.
//!
//! All metrics follow the naming convention: `afbus_<area>_<metric>[_total]`.
//! The engine counts with atomics; [`publish_snapshot`] copies a
//! [`MetricsSnapshot`] into the gauges below before each scrape.

use afbus_engine::MetricsSnapshot;
use lazy_static::lazy_static;
use prometheus::{Encoder, IntGauge, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Broker metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // DELIVERY
    // =========================================================================

    pub static ref MESSAGES_SENT: IntGauge = IntGauge::new(
        "afbus_delivery_messages_sent_total",
        "Successful send calls"
    ).expect("metric creation failed");

    pub static ref BYTES_SENT: IntGauge = IntGauge::new(
        "afbus_delivery_bytes_sent_total",
        "Payload bytes accepted by successful sends"
    ).expect("metric creation failed");

    /// One per queued copy, so a multicast counts once per recipient.
    pub static ref DELIVERIES: IntGauge = IntGauge::new(
        "afbus_delivery_copies_total",
        "Message copies queued to recipients"
    ).expect("metric creation failed");

    pub static ref FILTER_DROPS: IntGauge = IntGauge::new(
        "afbus_delivery_filter_drops_total",
        "Copies dropped by the delivery filter"
    ).expect("metric creation failed");

    pub static ref WOULD_BLOCK: IntGauge = IntGauge::new(
        "afbus_delivery_queue_full_total",
        "Sends that found a recipient queue full"
    ).expect("metric creation failed");

    pub static ref FANOUT_RETRIES: IntGauge = IntGauge::new(
        "afbus_delivery_fanout_retries_total",
        "Fan-out batches rebuilt because membership grew"
    ).expect("metric creation failed");

    pub static ref MESSAGES_RECEIVED: IntGauge = IntGauge::new(
        "afbus_delivery_messages_received_total",
        "Messages dequeued by recv"
    ).expect("metric creation failed");

    // =========================================================================
    // CONNECTIONS
    // =========================================================================

    pub static ref CONNECTIONS_ACCEPTED: IntGauge = IntGauge::new(
        "afbus_connections_accepted_total",
        "Connections handed out by accept"
    ).expect("metric creation failed");

    pub static ref CONNECTIONS_CLOSED: IntGauge = IntGauge::new(
        "afbus_connections_closed_total",
        "Connections closed"
    ).expect("metric creation failed");

    pub static ref CONNECTIONS_LIVE: IntGauge = IntGauge::new(
        "afbus_connections_live",
        "Connections currently open"
    ).expect("metric creation failed");
}

fn all() -> [&'static IntGauge; 10] {
    [
        &*MESSAGES_SENT,
        &*BYTES_SENT,
        &*DELIVERIES,
        &*FILTER_DROPS,
        &*WOULD_BLOCK,
        &*FANOUT_RETRIES,
        &*MESSAGES_RECEIVED,
        &*CONNECTIONS_ACCEPTED,
        &*CONNECTIONS_CLOSED,
        &*CONNECTIONS_LIVE,
    ]
}

/// Register every broker metric with [`REGISTRY`]. Safe to call twice.
pub fn register_metrics() -> Result<(), TelemetryError> {
    for metric in all() {
        match REGISTRY.register(Box::new(metric.clone())) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::Metrics(e.to_string())),
        }
    }
    Ok(())
}

fn gauge_value(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Copy an engine snapshot into the exported gauges.
pub fn publish_snapshot(snapshot: &MetricsSnapshot) {
    MESSAGES_SENT.set(gauge_value(snapshot.messages_sent));
    BYTES_SENT.set(gauge_value(snapshot.bytes_sent));
    DELIVERIES.set(gauge_value(snapshot.deliveries));
    FILTER_DROPS.set(gauge_value(snapshot.filter_drops));
    WOULD_BLOCK.set(gauge_value(snapshot.would_block));
    FANOUT_RETRIES.set(gauge_value(snapshot.fanout_retries));
    MESSAGES_RECEIVED.set(gauge_value(snapshot.messages_received));
    CONNECTIONS_ACCEPTED.set(gauge_value(snapshot.connections_accepted));
    CONNECTIONS_CLOSED.set(gauge_value(snapshot.connections_closed));
    CONNECTIONS_LIVE.set(gauge_value(snapshot.live_connections));
}

/// Render [`REGISTRY`] in the Prometheus text exposition format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
}
