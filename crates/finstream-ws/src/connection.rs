//! Connection manager.
//!
//! Owns the transport lifecycle: connect with the current credential,
//! subscribe once connected, route inbound frames into the store, and back
//! off and retry after disconnects up to a fixed number of attempts.
//!
//! All work happens on one event queue. Transport events, retry timers and
//! commands from [`ConnectionHandle`] are all [`EngineEvent`]s that the owner
//! feeds to [`ConnectionManager::handle_event`] one at a time, so a frame is
//! fully ingested before the next event is looked at.

use crate::credentials::CredentialProvider;
use crate::error::{WsError, WsResult};
use crate::transport::{
    FailureKind, OpenRequest, Transport, TransportEvent, TransportEvents, TransportFactory,
    TransportFailure,
};
use chrono::{DateTime, Utc};
use finstream_core::{ErrorCode, ErrorRecord};
use finstream_feed::{InboundMessage, MessageParser, SharedStore};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default broker endpoint.
pub const DEFAULT_URL: &str = "ws://localhost:8082/stock-updates/websocket";
/// First backoff delay.
pub const RECONNECT_BASE_DELAY_MS: u64 = 5000;
/// Growth factor between consecutive backoff delays.
pub const BACKOFF_MULTIPLIER: f64 = 1.5;
/// Consecutive disconnects tolerated before giving up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;
/// Heart-beat interval offered to the broker.
pub const HEARTBEAT_INTERVAL_MS: u64 = 25000;
/// Pause between the disconnect and connect halves of a manual reconnect.
pub const MANUAL_RECONNECT_DELAY_MS: u64 = 1000;

const MAX_ATTEMPTS_MESSAGE: &str = "Max reconnection attempts exceeded - please reconnect manually";

/// Connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// WebSocket URL of the STOMP broker.
    #[serde(default = "default_url")]
    pub url: String,
    /// Consecutive disconnects before the terminal error state.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Heart-beat interval.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Delay before connecting again after a manual reconnect.
    #[serde(default = "default_manual_reconnect_delay_ms")]
    pub manual_reconnect_delay_ms: u64,
}

fn default_url() -> String {
    DEFAULT_URL.to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    MAX_RECONNECT_ATTEMPTS
}

fn default_reconnect_base_delay_ms() -> u64 {
    RECONNECT_BASE_DELAY_MS
}

fn default_heartbeat_interval_ms() -> u64 {
    HEARTBEAT_INTERVAL_MS
}

fn default_manual_reconnect_delay_ms() -> u64 {
    MANUAL_RECONNECT_DELAY_MS
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay_ms: RECONNECT_BASE_DELAY_MS,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            manual_reconnect_delay_ms: MANUAL_RECONNECT_DELAY_MS,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the connection status.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub last_error: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    /// A timed connect is scheduled.
    pub retry_pending: bool,
    /// Frames received over the manager's lifetime.
    pub messages_received: u64,
    /// Frames that failed to decode.
    pub parse_errors: u64,
    /// Automatic retries scheduled over the manager's lifetime.
    pub retries_scheduled: u64,
}

impl ConnectionStatus {
    fn new(max_reconnect_attempts: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            max_reconnect_attempts,
            last_error: None,
            connected_at: None,
            retry_pending: false,
            messages_received: 0,
            parse_errors: 0,
            retries_scheduled: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.state == ConnectionState::Connecting
    }

    /// Manual reconnect is allowed below the attempt cap and while neither
    /// connected nor connecting.
    pub fn can_reconnect(&self) -> bool {
        self.reconnect_attempts < self.max_reconnect_attempts
            && !self.is_connected()
            && !self.is_connecting()
    }
}

/// Commands accepted through [`ConnectionHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionCommand {
    Connect,
    Disconnect,
    Reconnect,
}

/// Everything the manager reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Transport { epoch: u64, event: TransportEvent },
    RetryDue { epoch: u64 },
    Command(ConnectionCommand),
}

/// Backoff before retry number `attempts + 1`: `base * 1.5^attempts`.
pub fn backoff_delay(base_delay_ms: u64, attempts: u32) -> Duration {
    let ms = base_delay_ms as f64 * BACKOFF_MULTIPLIER.powi(attempts as i32);
    Duration::from_millis(ms.round() as u64)
}

/// Map a transport failure onto the error taxonomy.
pub fn classify_failure(failure: &TransportFailure) -> ErrorCode {
    let message = failure.message.to_lowercase();

    if contains_any(&message, &["401", "authentication", "jwt", "unauthorized"]) {
        ErrorCode::TransportAuthenticationFailed
    } else if contains_any(&message, &["connection", "network"]) {
        ErrorCode::TransportConnectionFailed
    } else if failure.kind == FailureKind::Network {
        ErrorCode::NetworkError
    } else {
        ErrorCode::Unknown
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Cloneable handle that enqueues commands and reads status.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<EngineEvent>,
    status: Arc<RwLock<ConnectionStatus>>,
}

impl ConnectionHandle {
    fn send(&self, command: ConnectionCommand) -> WsResult<()> {
        self.tx
            .send(EngineEvent::Command(command))
            .map_err(|_| WsError::ChannelClosed)
    }

    pub fn connect(&self) -> WsResult<()> {
        self.send(ConnectionCommand::Connect)
    }

    pub fn disconnect(&self) -> WsResult<()> {
        self.send(ConnectionCommand::Disconnect)
    }

    pub fn reconnect(&self) -> WsResult<()> {
        self.send(ConnectionCommand::Reconnect)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.read().clone()
    }
}

/// Connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    credentials: Arc<dyn CredentialProvider>,
    factory: Arc<dyn TransportFactory>,
    store: SharedStore,
    parser: MessageParser,
    status: Arc<RwLock<ConnectionStatus>>,
    transport: Option<Box<dyn Transport>>,
    /// Bumped on every connect and disconnect.
    epoch: u64,
    retry: Option<JoinHandle<()>>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
}

impl ConnectionManager {
    /// Create a manager and the receiving end of its event queue.
    pub fn new(
        config: ConnectionConfig,
        credentials: Arc<dyn CredentialProvider>,
        factory: Arc<dyn TransportFactory>,
        store: SharedStore,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let status = Arc::new(RwLock::new(ConnectionStatus::new(
            config.max_reconnect_attempts,
        )));
        let manager = Self {
            config,
            credentials,
            factory,
            store,
            parser: MessageParser::new(),
            status,
            transport: None,
            epoch: 0,
            retry: None,
            events_tx,
        };
        (manager, events_rx)
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            tx: self.events_tx.clone(),
            status: self.status.clone(),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.read().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.read().state
    }

    pub fn can_reconnect(&self) -> bool {
        self.status.read().can_reconnect()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Open a transport with the current credential.
    ///
    /// No-op while connected or connecting. Fails fast, without opening a
    /// transport, when no valid credential is available.
    pub fn connect(&mut self) {
        let state = self.state();
        if matches!(
            state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            debug!(%state, "Connect ignored");
            return;
        }

        self.cancel_retry();

        let Some(token) = self.credentials.bearer_token() else {
            self.fail_credentials(
                ErrorCode::TransportAuthenticationFailed,
                "No bearer token available - please login first",
            );
            return;
        };
        if !self.credentials.is_authenticated() {
            self.fail_credentials(
                ErrorCode::CredentialExpired,
                "Bearer token expired - please login again",
            );
            return;
        }

        self.epoch += 1;
        let attempts = {
            let mut status = self.status.write();
            status.state = ConnectionState::Connecting;
            status.reconnect_attempts
        };
        info!(
            url = %self.config.url,
            epoch = self.epoch,
            attempt = attempts,
            "Connecting"
        );

        let request = OpenRequest {
            url: self.config.url.clone(),
            headers: vec![
                ("Authorization".to_string(), format!("Bearer {token}")),
                (
                    "X-Requested-With".to_string(),
                    "XMLHttpRequest".to_string(),
                ),
            ],
            heartbeat_ms: self.config.heartbeat_interval_ms,
        };
        let events = TransportEvents::new(self.epoch, self.events_tx.clone());

        match self.factory.open(request, events) {
            Ok(transport) => self.transport = Some(transport),
            Err(e) => {
                self.on_failure(TransportFailure::new(
                    FailureKind::Handshake,
                    format!("Connection failed: {e}"),
                ));
                self.on_closed("transport could not be opened");
            }
        }
    }

    /// Tear down the transport and reset the attempt counter.
    pub fn disconnect(&mut self) {
        self.epoch += 1;
        self.cancel_retry();
        if let Some(mut transport) = self.transport.take() {
            transport.deactivate();
        }
        {
            let mut status = self.status.write();
            status.state = ConnectionState::Disconnected;
            status.reconnect_attempts = 0;
            status.last_error = None;
            status.connected_at = None;
        }
        info!(epoch = self.epoch, "Disconnected");
    }

    /// Disconnect, then connect again after the manual reconnect delay.
    ///
    /// Returns false, doing nothing, when [`ConnectionStatus::can_reconnect`]
    /// does not hold.
    pub fn reconnect(&mut self) -> bool {
        if !self.can_reconnect() {
            let status = self.status();
            warn!(
                state = %status.state,
                attempts = status.reconnect_attempts,
                "Reconnect not allowed"
            );
            return false;
        }

        info!("Manual reconnect requested");
        self.disconnect();
        self.status.write().state = ConnectionState::Reconnecting;
        self.schedule_retry(Duration::from_millis(self.config.manual_reconnect_delay_ms));
        true
    }

    /// Process one event from the queue.
    pub fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Transport { epoch, event } => {
                if epoch != self.epoch {
                    debug!(epoch, current = self.epoch, "Ignoring stale transport event");
                    return;
                }
                match event {
                    TransportEvent::Connected => self.on_connected(),
                    TransportEvent::Message { destination, body } => {
                        self.on_message(&destination, &body)
                    }
                    TransportEvent::Error(failure) => self.on_failure(failure),
                    TransportEvent::Closed { reason } => self.on_closed(&reason),
                }
            }
            EngineEvent::RetryDue { epoch } => {
                if epoch != self.epoch {
                    debug!(epoch, current = self.epoch, "Ignoring stale retry");
                    return;
                }
                self.retry = None;
                let state = {
                    let mut status = self.status.write();
                    status.retry_pending = false;
                    status.state
                };
                if matches!(
                    state,
                    ConnectionState::Disconnected | ConnectionState::Reconnecting
                ) {
                    self.connect();
                }
            }
            EngineEvent::Command(command) => match command {
                ConnectionCommand::Connect => self.connect(),
                ConnectionCommand::Disconnect => self.disconnect(),
                ConnectionCommand::Reconnect => {
                    self.reconnect();
                }
            },
        }
    }

    fn on_connected(&mut self) {
        let now = self.store.read().now();
        {
            let mut status = self.status.write();
            status.state = ConnectionState::Connected;
            status.reconnect_attempts = 0;
            status.last_error = None;
            status.connected_at = Some(now);
        }
        info!(url = %self.config.url, epoch = self.epoch, "Connected");

        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        let mut failed = Vec::new();
        for topic in self.parser.topics() {
            match transport.subscribe(topic) {
                Ok(()) => info!(topic, "Subscribed"),
                Err(e) => failed.push((topic.to_string(), e)),
            }
        }
        for (topic, e) in failed {
            error!(%topic, error = %e, "Subscribe failed");
            let record = ErrorRecord::new(
                ErrorCode::TransportConnectionFailed,
                format!("Subscribe to {topic} failed: {e}"),
                now,
            )
            .with_context("destination", topic);
            self.store.write().ingest_error(record);
        }
    }

    fn on_message(&mut self, destination: &str, body: &str) {
        self.status.write().messages_received += 1;

        match self.parser.parse(destination, body) {
            Ok(Some(InboundMessage::Price(update))) => {
                let mut store = self.store.write();
                if let Err(e) = store.ingest_tick(update) {
                    debug!(error = %e, "Tick rejected");
                }
            }
            Ok(Some(InboundMessage::Notification(payload))) => {
                let mut store = self.store.write();
                if let Err(e) = store.ingest_notification(payload) {
                    debug!(error = %e, "Notification rejected");
                }
            }
            Ok(None) => {}
            Err(e) => {
                self.status.write().parse_errors += 1;
                warn!(destination, error = %e, "Failed to parse frame");
                let mut store = self.store.write();
                let record = ErrorRecord::new(
                    ErrorCode::MessageParseError,
                    format!("Failed to parse message: {e}"),
                    store.now(),
                )
                .with_context("destination", destination)
                .with_context("messageBody", body);
                store.ingest_error(record);
            }
        }
    }

    fn on_failure(&mut self, failure: TransportFailure) {
        let code = classify_failure(&failure);
        let attempts = {
            let mut status = self.status.write();
            status.state = ConnectionState::Error;
            status.last_error = Some(failure.message.clone());
            status.reconnect_attempts
        };
        error!(
            %code,
            kind = ?failure.kind,
            message = %failure.message,
            "Transport error"
        );

        let now = self.store.read().now();
        self.record(
            ErrorRecord::new(code, failure.message, now)
                .with_context("reconnectAttempts", attempts)
                .with_context("wsUrl", self.config.url.as_str()),
        );
        if code.is_authentication() {
            self.credentials.on_authentication_failed();
        }
    }

    fn on_closed(&mut self, reason: &str) {
        self.transport = None;
        let max = self.config.max_reconnect_attempts;

        let attempts = {
            let mut status = self.status.write();
            status.state = ConnectionState::Disconnected;
            status.connected_at = None;
            if status.reconnect_attempts < max {
                status.reconnect_attempts += 1;
            }
            status.reconnect_attempts
        };

        if attempts >= max {
            error!(attempts, reason, "Max reconnection attempts exceeded");
            {
                let mut status = self.status.write();
                status.state = ConnectionState::Error;
                status.last_error = Some(MAX_ATTEMPTS_MESSAGE.to_string());
            }
            let now = self.store.read().now();
            self.record(
                ErrorRecord::new(ErrorCode::TransportConnectionFailed, MAX_ATTEMPTS_MESSAGE, now)
                    .with_context("reconnectAttempts", attempts)
                    .with_context("wsUrl", self.config.url.as_str()),
            );
            return;
        }

        let delay = backoff_delay(self.config.reconnect_base_delay_ms, attempts - 1);
        warn!(
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            reason,
            "Disconnected, scheduling reconnect"
        );
        self.status.write().retries_scheduled += 1;
        self.schedule_retry(delay);
    }

    fn fail_credentials(&mut self, code: ErrorCode, message: &str) {
        warn!(%code, "Cannot connect: {message}");
        {
            let mut status = self.status.write();
            status.state = ConnectionState::Error;
            status.last_error = Some(message.to_string());
        }
        let now = self.store.read().now();
        self.record(ErrorRecord::new(code, message, now));
        self.credentials.on_authentication_failed();
    }

    fn record(&self, record: ErrorRecord) {
        self.store.write().ingest_error(record);
    }

    fn schedule_retry(&mut self, delay: Duration) {
        self.cancel_retry();
        let tx = self.events_tx.clone();
        let epoch = self.epoch;
        self.retry = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(EngineEvent::RetryDue { epoch });
        }));
        self.status.write().retry_pending = true;
    }

    fn cancel_retry(&mut self) {
        if let Some(handle) = self.retry.take() {
            handle.abort();
        }
        self.status.write().retry_pending = false;
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.retry.take() {
            handle.abort();
        }
        if let Some(mut transport) = self.transport.take() {
            transport.deactivate();
        }
    }
}
