//! STOMP heart-beat negotiation and monitoring.
//!
//! Outgoing heart-beats are EOLs written when nothing else was sent for the
//! negotiated interval. The peer is considered dead when nothing at all was
//! received for twice its negotiated interval.

use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;

/// Grace factor applied to the peer's interval before declaring a timeout.
const RECEIVE_GRACE: u32 = 2;

/// Longest gap between checks, also used when heart-beats are disabled.
const IDLE_CHECK: Duration = Duration::from_secs(60);

/// Negotiate per STOMP 1.2: each direction uses the larger of what one side
/// can do and what the other side wants, and is disabled if either is 0.
///
/// `client` and `server` are the `(cx, cy)` / `(sx, sy)` header pairs in ms.
/// Returns `(send_every_ms, expect_every_ms)` for the client.
pub fn negotiate(client: (u64, u64), server: (u64, u64)) -> (u64, u64) {
    let (cx, cy) = client;
    let (sx, sy) = server;
    let send = if cx == 0 || sy == 0 { 0 } else { cx.max(sy) };
    let expect = if cy == 0 || sx == 0 { 0 } else { cy.max(sx) };
    (send, expect)
}

/// Parse a `heart-beat` header value (`"x,y"`). Malformed values disable
/// heart-beats.
pub fn parse_header(value: Option<&str>) -> (u64, u64) {
    value
        .and_then(|v| v.split_once(','))
        .and_then(|(x, y)| Some((x.trim().parse().ok()?, y.trim().parse().ok()?)))
        .unwrap_or((0, 0))
}

/// Tracks send/receive activity for one session.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    send_interval: Option<Duration>,
    receive_timeout: Option<Duration>,
    last_sent: Instant,
    last_received: Instant,
}

impl HeartbeatMonitor {
    /// Monitor with heart-beats disabled, used until `CONNECTED` arrives.
    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    pub fn new(send_every_ms: u64, expect_every_ms: u64) -> Self {
        let now = Instant::now();
        Self {
            send_interval: (send_every_ms > 0).then(|| Duration::from_millis(send_every_ms)),
            receive_timeout: (expect_every_ms > 0)
                .then(|| Duration::from_millis(expect_every_ms).saturating_mul(RECEIVE_GRACE)),
            last_sent: now,
            last_received: now,
        }
    }

    pub fn record_sent(&mut self) {
        self.last_sent = Instant::now();
    }

    pub fn record_received(&mut self) {
        self.last_received = Instant::now();
    }

    /// Whether the outgoing side has been idle for a full interval.
    pub fn should_send_heartbeat(&self) -> bool {
        self.send_interval
            .is_some_and(|interval| self.last_sent.elapsed() >= interval)
    }

    /// Whether the peer has been silent longer than allowed.
    pub fn is_timed_out(&self) -> bool {
        let Some(timeout) = self.receive_timeout else {
            return false;
        };
        let silent = self.last_received.elapsed();
        if silent > timeout {
            debug!(silent_ms = silent.as_millis() as u64, "Heart-beat timeout");
            return true;
        }
        false
    }

    /// How often the session should run the send/timeout checks.
    pub fn check_period(&self) -> Duration {
        let period = match (self.send_interval, self.receive_timeout) {
            (Some(a), Some(b)) => a.min(b) / 2,
            (Some(a), None) | (None, Some(a)) => a / 2,
            (None, None) => IDLE_CHECK,
        };
        period.clamp(Duration::from_millis(1), IDLE_CHECK)
    }

    /// Fixed-rate ticker for this monitor's checks. It keeps its schedule
    /// across `select!` iterations, so inbound traffic does not postpone
    /// outgoing heart-beats.
    pub fn ticker(&self) -> Interval {
        let period = self.check_period();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}
