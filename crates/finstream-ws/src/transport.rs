//! Transport capability used by the connection manager.
//!
//! A transport reports everything through [`TransportEvents`], which tags
//! each event with the epoch of the connect attempt that opened it. The
//! manager bumps its epoch on every connect and disconnect, so events from a
//! transport it has already abandoned are recognised and ignored.

use crate::connection::EngineEvent;
use crate::error::WsResult;
use tokio::sync::mpsc;

/// Failure category as seen by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Upgrade or STOMP `CONNECT` rejected.
    Handshake,
    /// Server-reported protocol error.
    Protocol,
    /// Socket-level failure.
    Network,
}

/// A failure reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub message: String,
    pub kind: FailureKind,
}

impl TransportFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

/// Events a transport reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Session established; subscriptions may be issued.
    Connected,
    /// Frame on a subscribed destination.
    Message { destination: String, body: String },
    /// Failure. Usually followed by `Closed`.
    Error(TransportFailure),
    /// Session ended for any reason other than `deactivate`.
    Closed { reason: String },
}

/// Epoch-tagged sink for transport events.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    epoch: u64,
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl TransportEvents {
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns false once the manager's queue is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(EngineEvent::Transport {
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }
}

/// Parameters for opening a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub url: String,
    /// Connect headers, e.g. `Authorization: Bearer <token>`.
    pub headers: Vec<(String, String)>,
    /// Heart-beat interval offered in both directions (ms).
    pub heartbeat_ms: u64,
}

impl OpenRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// An open transport session.
pub trait Transport: Send {
    /// Request a subscription to `destination`.
    fn subscribe(&mut self, destination: &str) -> WsResult<()>;

    /// Tear the session down. No `Closed` event follows.
    fn deactivate(&mut self);
}

/// Opens transports. Opening returns immediately; the outcome arrives as
/// events.
pub trait TransportFactory: Send + Sync {
    fn open(&self, request: OpenRequest, events: TransportEvents) -> WsResult<Box<dyn Transport>>;
}
