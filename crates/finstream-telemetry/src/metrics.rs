//! Prometheus metrics for FinStream.
//!
//! Covers:
//! - Connection state and reconnects
//! - Tick intake (accepted, rejected, parse errors)
//! - Notifications by severity
//! - Store size and throughput
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A failure means duplicate metric
//! names, which is a startup bug, and only happens during static
//! initialization.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_int_counter,
    register_int_gauge, CounterVec, Encoder, Gauge, GaugeVec, IntCounter, IntGauge, TextEncoder,
};

/// Connection states exported on `finstream_connection_state`.
pub const CONNECTION_STATES: [&str; 5] = [
    "disconnected",
    "connecting",
    "connected",
    "reconnecting",
    "error",
];

/// Connection established (1) or not (0).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "finstream_ws_connected",
        "WebSocket connection state (1=connected)"
    )
    .unwrap()
});

/// Connection state machine current state.
/// Labels: state (disconnected/connecting/connected/reconnecting/error)
pub static CONNECTION_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "finstream_connection_state",
        "Connection state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Scheduled reconnects.
/// Labels: reason (backoff/manual)
pub static RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "finstream_reconnect_total",
        "Total reconnects scheduled",
        &["reason"]
    )
    .unwrap()
});

pub static TICKS_ACCEPTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "finstream_ticks_accepted_total",
        "Price ticks that passed validation"
    )
    .unwrap()
});

pub static TICKS_REJECTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "finstream_ticks_rejected_total",
        "Price ticks dropped by validation"
    )
    .unwrap()
});

pub static PARSE_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "finstream_parse_errors_total",
        "Frames that could not be decoded"
    )
    .unwrap()
});

/// Labels: severity (info/warning/error/success)
pub static NOTIFICATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "finstream_notifications_total",
        "System notifications received",
        &["severity"]
    )
    .unwrap()
});

pub static SYMBOLS_TRACKED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "finstream_symbols_tracked",
        "Symbols with a current price record"
    )
    .unwrap()
});

pub static UPDATES_PER_SECOND: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "finstream_updates_per_second",
        "Accepted ticks per second over the throughput window"
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    pub fn ws_connected() {
        WS_CONNECTED.set(1.0);
    }

    pub fn ws_disconnected() {
        WS_CONNECTED.set(0.0);
    }

    /// Set the active connection state to 1 and all others to 0.
    pub fn connection_state_set(state: &str) {
        for s in &CONNECTION_STATES {
            CONNECTION_STATE.with_label_values(&[s]).set(0.0);
        }
        CONNECTION_STATE.with_label_values(&[state]).set(1.0);
    }

    pub fn reconnects_scheduled(reason: &str, n: u64) {
        RECONNECT_TOTAL.with_label_values(&[reason]).inc_by(n as f64);
    }

    pub fn ticks_accepted(n: u64) {
        TICKS_ACCEPTED_TOTAL.inc_by(n);
    }

    pub fn ticks_rejected(n: u64) {
        TICKS_REJECTED_TOTAL.inc_by(n);
    }

    pub fn parse_errors(n: u64) {
        PARSE_ERRORS_TOTAL.inc_by(n);
    }

    pub fn notification_received(severity: &str) {
        NOTIFICATIONS_TOTAL.with_label_values(&[severity]).inc();
    }

    pub fn symbols_tracked(count: usize) {
        SYMBOLS_TRACKED.set(count as i64);
    }

    pub fn updates_per_second(rate: f64) {
        UPDATES_PER_SECOND.set(rate);
    }

    /// Render the default registry in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
