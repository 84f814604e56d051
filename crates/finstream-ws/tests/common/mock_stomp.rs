//! Mock STOMP broker for integration tests.
//!
//! Accepts WebSocket connections, answers `CONNECT` (or rejects it with an
//! `ERROR` frame), records every client frame and heart-beat and lets the
//! test push frames to all connected clients. The broker never sends
//! heart-beats of its own.

use finstream_ws::{StompCommand, StompFrame};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// How the broker answers `CONNECT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReply {
    /// `CONNECTED` with `heart-beat:0,0`.
    Accept,
    /// `CONNECTED` advertising `heart-beat:<send>,<expect>`.
    AcceptWithHeartbeat(u64, u64),
    /// `ERROR` with `message:Invalid JWT token`, then close.
    RejectAuth,
}

pub struct MockStompServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    frames: Arc<Mutex<Vec<StompFrame>>>,
    connections: Arc<Mutex<u32>>,
    heartbeats: Arc<Mutex<u32>>,
    push_tx: broadcast::Sender<String>,
}

impl MockStompServer {
    pub async fn start() -> Self {
        Self::start_with(ConnectReply::Accept).await
    }

    pub async fn start_with(reply: ConnectReply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let frames: Arc<Mutex<Vec<StompFrame>>> = Arc::new(Mutex::new(Vec::new()));
        let connections: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let heartbeats: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (push_tx, _) = broadcast::channel::<String>(64);

        let frames_clone = frames.clone();
        let connections_clone = connections.clone();
        let heartbeats_clone = heartbeats.clone();
        let push_clone = push_tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(
                            stream,
                            reply,
                            frames_clone.clone(),
                            connections_clone.clone(),
                            heartbeats_clone.clone(),
                            push_clone.subscribe(),
                        ));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            frames,
            connections,
            heartbeats,
            push_tx,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/stock-updates/websocket", self.addr)
    }

    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    /// EOL heart-beats received from clients.
    pub async fn heartbeat_count(&self) -> u32 {
        *self.heartbeats.lock().await
    }

    /// Every frame received from clients, in order.
    pub async fn received_frames(&self) -> Vec<StompFrame> {
        self.frames.lock().await.clone()
    }

    pub async fn frames_with(&self, command: StompCommand) -> Vec<StompFrame> {
        self.frames
            .lock()
            .await
            .iter()
            .filter(|f| f.command == command)
            .cloned()
            .collect()
    }

    /// Send a `MESSAGE` frame to every connected client.
    pub fn push_message(&self, destination: &str, body: &str) {
        let frame = StompFrame::new(StompCommand::Message)
            .header("destination", destination)
            .header("subscription", "sub-0")
            .header("message-id", "1")
            .body(body);
        let _ = self.push_tx.send(frame.encode());
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    reply: ConnectReply,
    frames: Arc<Mutex<Vec<StompFrame>>>,
    connections: Arc<Mutex<u32>>,
    heartbeats: Arc<Mutex<u32>>,
    mut push_rx: broadcast::Receiver<String>,
) {
    {
        let mut count = connections.lock().await;
        *count += 1;
    }

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => continue,
                };

                if text.trim().is_empty() {
                    *heartbeats.lock().await += 1;
                    continue;
                }

                let decoded = StompFrame::decode_all(&text).unwrap_or_default();
                for frame in decoded {
                    let command = frame.command;
                    frames.lock().await.push(frame);

                    if command == StompCommand::Connect {
                        let heart_beat = match reply {
                            ConnectReply::Accept => Some((0, 0)),
                            ConnectReply::AcceptWithHeartbeat(sx, sy) => Some((sx, sy)),
                            ConnectReply::RejectAuth => None,
                        };
                        match heart_beat {
                            Some((sx, sy)) => {
                                let connected = StompFrame::new(StompCommand::Connected)
                                    .header("version", "1.2")
                                    .header("heart-beat", format!("{sx},{sy}"));
                                let _ = write.send(Message::Text(connected.encode())).await;
                            }
                            None => {
                                let error = StompFrame::new(StompCommand::Error)
                                    .header("message", "Invalid JWT token")
                                    .body("Authentication failed");
                                let _ = write.send(Message::Text(error.encode())).await;
                                let _ = write.send(Message::Close(None)).await;
                                return;
                            }
                        }
                    }
                }
            }
            Ok(text) = push_rx.recv() => {
                let _ = write.send(Message::Text(text)).await;
            }
        }
    }
}
