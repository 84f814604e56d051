//! Live connection to the FinStream price service.
//!
//! Provides:
//! - `ConnectionManager`: lifecycle state machine with capped exponential
//!   backoff, driven by a single event queue
//! - `StompTransportFactory`: STOMP 1.2 over WebSocket with heart-beats
//! - `CredentialProvider`: bearer token source for connect headers

pub mod connection;
pub mod credentials;
pub mod error;
pub mod frame;
pub mod heartbeat;
pub mod stomp;
pub mod transport;

pub use connection::{
    backoff_delay, classify_failure, ConnectionCommand, ConnectionConfig, ConnectionHandle,
    ConnectionManager, ConnectionState, ConnectionStatus, EngineEvent,
};
pub use credentials::{CredentialProvider, StaticCredentials};
pub use error::{WsError, WsResult};
pub use frame::{StompCommand, StompFrame};
pub use heartbeat::HeartbeatMonitor;
pub use stomp::{StompTransport, StompTransportFactory};
pub use transport::{
    FailureKind, OpenRequest, Transport, TransportEvent, TransportEvents, TransportFactory,
    TransportFailure,
};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any `wss://` connection is opened.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
