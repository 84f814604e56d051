//! STOMP 1.2 over WebSocket.
//!
//! `open` spawns a session task and returns at once. The task performs the
//! WebSocket upgrade, sends `CONNECT` with the request headers, and from then
//! on multiplexes inbound frames, subscribe/disconnect commands and
//! heart-beats in one `select!` loop, reporting through [`TransportEvents`].

use crate::error::{WsError, WsResult};
use crate::frame::{StompCommand, StompFrame};
use crate::heartbeat::{negotiate, parse_header, HeartbeatMonitor};
use crate::transport::{
    FailureKind, OpenRequest, Transport, TransportEvent, TransportEvents, TransportFactory,
    TransportFailure,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsSink = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Opens [`StompTransport`]s.
#[derive(Debug, Clone, Default)]
pub struct StompTransportFactory;

impl StompTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

impl TransportFactory for StompTransportFactory {
    fn open(&self, request: OpenRequest, events: TransportEvents) -> WsResult<Box<dyn Transport>> {
        if !(request.url.starts_with("ws://") || request.url.starts_with("wss://")) {
            return Err(WsError::ConnectionFailed(format!(
                "unsupported URL scheme: {}",
                request.url
            )));
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let session = Session {
            request,
            events,
            commands: commands_rx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(session.run());

        Ok(Box::new(StompTransport {
            commands: commands_tx,
            cancel,
            task: Some(task),
            next_subscription: 0,
        }))
    }
}

#[derive(Debug)]
enum SessionCommand {
    Subscribe { id: String, destination: String },
    Disconnect,
}

/// Handle to a running STOMP session.
pub struct StompTransport {
    commands: mpsc::UnboundedSender<SessionCommand>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    next_subscription: u64,
}

impl Transport for StompTransport {
    fn subscribe(&mut self, destination: &str) -> WsResult<()> {
        let id = format!("sub-{}", self.next_subscription);
        self.next_subscription += 1;
        self.commands
            .send(SessionCommand::Subscribe {
                id,
                destination: destination.to_string(),
            })
            .map_err(|_| WsError::SendFailed("session has ended".to_string()))
    }

    fn deactivate(&mut self) {
        // The session sends DISCONNECT itself if it is still up; the token
        // covers a session that is still in the handshake.
        let _ = self.commands.send(SessionCommand::Disconnect);
        self.cancel.cancel();
        self.task.take();
    }
}

impl Drop for StompTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Session {
    request: OpenRequest,
    events: TransportEvents,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    cancel: CancellationToken,
}

impl Session {
    async fn run(mut self) {
        let epoch = self.events.epoch();
        match self.session().await {
            Ok(Some(reason)) => {
                info!(epoch, %reason, "STOMP session closed");
                self.events.emit(TransportEvent::Closed { reason });
            }
            Ok(None) => {
                debug!(epoch, "STOMP session deactivated");
            }
            Err(e) => {
                error!(epoch, error = %e, "STOMP session failed");
                let reason = e.to_string();
                self.events.emit(TransportEvent::Error(failure_from(e)));
                self.events.emit(TransportEvent::Closed { reason });
            }
        }
    }

    /// Returns `Ok(None)` when deactivated and `Ok(Some(reason))` when the
    /// peer ended the session.
    async fn session(&mut self) -> WsResult<Option<String>> {
        info!(url = %self.request.url, "Opening STOMP session");

        let connect = connect_async_tls_with_config(self.request.url.as_str(), None, true, None);
        let (ws_stream, _response) = tokio::select! {
            result = connect => result?,
            () = self.cancel.cancelled() => return Ok(None),
        };
        let (mut write, mut read) = ws_stream.split();

        let hb = self.request.heartbeat_ms;
        let mut connect_frame = StompFrame::new(StompCommand::Connect)
            .header("accept-version", "1.2")
            .header("host", host_of(&self.request.url))
            .header("heart-beat", format!("{hb},{hb}"));
        for (name, value) in &self.request.headers {
            connect_frame = connect_frame.header(name.as_str(), value.as_str());
        }
        write.send(Message::Text(connect_frame.encode())).await?;

        let mut heartbeat = HeartbeatMonitor::disabled();
        let mut ticker = heartbeat.ticker();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    send_disconnect(&mut write).await;
                    return Ok(None);
                }

                command = self.commands.recv() => {
                    match command {
                        Some(SessionCommand::Subscribe { id, destination }) => {
                            let frame = StompFrame::new(StompCommand::Subscribe)
                                .header("id", id.as_str())
                                .header("destination", destination.as_str())
                                .header("ack", "auto");
                            write.send(Message::Text(frame.encode())).await?;
                            heartbeat.record_sent();
                            debug!(%id, %destination, "SUBSCRIBE sent");
                        }
                        Some(SessionCommand::Disconnect) | None => {
                            send_disconnect(&mut write).await;
                            return Ok(None);
                        }
                    }
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            heartbeat.record_received();
                            if let Some(hb) = self.handle_text(&text)? {
                                ticker = hb.ticker();
                                heartbeat = hb;
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            heartbeat.record_received();
                            if let Some(hb) = self.handle_text(&String::from_utf8_lossy(&data))? {
                                ticker = hb.ticker();
                                heartbeat = hb;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            heartbeat.record_received();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, "WebSocket closed by server");
                            return Ok(Some(format!("closed by server: code={code}, reason={reason}")));
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(Some("stream ended".to_string())),
                        _ => {}
                    }
                }

                _ = ticker.tick() => {
                    if heartbeat.is_timed_out() {
                        return Err(WsError::HeartbeatTimeout);
                    }
                    if heartbeat.should_send_heartbeat() {
                        write.send(Message::Text("\n".to_string())).await?;
                        heartbeat.record_sent();
                    }
                }
            }
        }
    }

    /// Dispatch frames in one WebSocket message. Returns a new heart-beat
    /// monitor when `CONNECTED` negotiated one.
    fn handle_text(&self, text: &str) -> WsResult<Option<HeartbeatMonitor>> {
        let mut negotiated = None;
        for frame in StompFrame::decode_all(text)? {
            match frame.command {
                StompCommand::Connected => {
                    let hb = self.request.heartbeat_ms;
                    let server = parse_header(frame.get("heart-beat"));
                    let (send_ms, expect_ms) = negotiate((hb, hb), server);
                    info!(
                        version = frame.get("version").unwrap_or("1.0"),
                        send_ms,
                        expect_ms,
                        "STOMP connected"
                    );
                    negotiated = Some(HeartbeatMonitor::new(send_ms, expect_ms));
                    self.events.emit(TransportEvent::Connected);
                }
                StompCommand::Message => {
                    let destination = frame.get("destination").unwrap_or_default().to_string();
                    self.events.emit(TransportEvent::Message {
                        destination,
                        body: frame.body,
                    });
                }
                StompCommand::Error => {
                    let message = frame
                        .get("message")
                        .map(str::to_string)
                        .unwrap_or_else(|| frame.body.clone());
                    warn!(%message, "STOMP ERROR frame");
                    self.events.emit(TransportEvent::Error(TransportFailure::new(
                        FailureKind::Protocol,
                        message,
                    )));
                }
                StompCommand::Receipt => {
                    debug!(receipt = frame.get("receipt-id"), "STOMP receipt");
                }
                other => {
                    debug!(command = other.as_str(), "Ignoring client-side frame");
                }
            }
        }
        Ok(negotiated)
    }
}

async fn send_disconnect(write: &mut WsSink) {
    let frame = StompFrame::new(StompCommand::Disconnect);
    if let Err(e) = write.send(Message::Text(frame.encode())).await {
        debug!(error = %e, "Failed to send DISCONNECT");
    }
    if let Err(e) = write.send(Message::Close(None)).await {
        debug!(error = %e, "Failed to send Close frame");
    }
}

fn failure_from(error: WsError) -> TransportFailure {
    let kind = match &error {
        WsError::Tungstenite(tungstenite::Error::Http(_))
        | WsError::Tungstenite(tungstenite::Error::Url(_)) => FailureKind::Handshake,
        WsError::Tungstenite(tungstenite::Error::Io(_))
        | WsError::Tungstenite(tungstenite::Error::ConnectionClosed)
        | WsError::Tungstenite(tungstenite::Error::AlreadyClosed)
        | WsError::HeartbeatTimeout => FailureKind::Network,
        _ => FailureKind::Protocol,
    };
    let message = match error {
        WsError::Tungstenite(tungstenite::Error::Http(response)) => {
            format!("HTTP error: {}", response.status())
        }
        other => other.to_string(),
    };
    TransportFailure::new(kind, message)
}

/// `host[:port]` part of a WebSocket URL.
fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, r)| r);
    rest.split(['/', '?']).next().unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_of() {
        assert_eq!(
            host_of("ws://localhost:8082/stock-updates/websocket"),
            "localhost:8082"
        );
        assert_eq!(host_of("wss://example.com?x=1"), "example.com");
        assert_eq!(host_of("ws://example.com"), "example.com");
    }

    #[test]
    fn test_failure_kind_mapping() {
        let f = failure_from(WsError::HeartbeatTimeout);
        assert_eq!(f.kind, FailureKind::Network);

        let f = failure_from(WsError::Frame("unknown command: X".to_string()));
        assert_eq!(f.kind, FailureKind::Protocol);
    }

    #[tokio::test]
    async fn test_rejects_non_websocket_url() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let request = OpenRequest {
            url: "http://localhost:8082".to_string(),
            headers: Vec::new(),
            heartbeat_ms: 0,
        };
        let result = StompTransportFactory::new().open(request, TransportEvents::new(1, tx));
        assert!(matches!(result, Err(WsError::ConnectionFailed(_))));
    }
}
