//! Realtime channel client.
//!
//! One background task owns the WebSocket. It registers the user on every
//! (re)connect and re-joins every room still wanted, so open surfaces keep
//! receiving pushes across drops. Until that handshake is acknowledged the
//! status is [`ConnectionStatus::Degraded`] and live delivery must not be
//! assumed; HTTP operations are unaffected.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use reqwest::Url;
use wanderchat_shared::{ChatError, ClientEvent, ConversationId, ServerEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// First connection attempt in progress.
    Connecting,
    /// Registered; pushes for joined rooms are flowing.
    Connected,
    /// Disconnected, retrying.
    Degraded,
    /// The server refused the credentials (close code 4001-4003). No retry.
    Rejected,
    Closed,
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Server base URL (`http://` or `https://`); the socket lives at `/ws`.
    pub base_url: String,
    pub token: String,
    pub user_id: String,
    pub reconnect_delay: Duration,
}

impl RealtimeConfig {
    pub fn new(base_url: &str, token: &str, user_id: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            user_id: user_id.to_string(),
            reconnect_delay: Duration::from_secs(2),
        }
    }

    fn socket_url(&self) -> Result<String, ChatError> {
        let invalid = || ChatError::Validation(format!("invalid server URL {}", self.base_url));
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => other,
        }
        .to_string();
        url.set_scheme(&scheme).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .push("ws");
        url.query_pairs_mut()
            .clear()
            .append_pair("token", &self.token)
            .append_pair("user_id", &self.user_id);
        Ok(url.into())
    }
}

enum Command {
    Join(ConversationId),
    Leave(ConversationId),
    Shutdown,
}

enum SessionEnd {
    Dropped,
    Rejected(u16),
    Shutdown,
}

/// Handle to the realtime connection task.
pub struct RealtimeClient {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    task: JoinHandle<()>,
}

impl RealtimeClient {
    /// Start the connection task. Server events are delivered on the returned receiver.
    pub fn connect(config: RealtimeConfig) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run(config, cmd_rx, status_tx, event_tx));

        (
            Self {
                commands: cmd_tx,
                status: status_rx,
                task,
            },
            event_rx,
        )
    }

    /// Join a room now if connected, and after every reconnect until left.
    pub fn join_room(&self, conversation_id: &ConversationId) {
        let _ = self.commands.send(Command::Join(conversation_id.clone()));
    }

    /// Fire-and-forget; the server never acknowledges a leave.
    pub fn leave_room(&self, conversation_id: &ConversationId) {
        let _ = self.commands.send(Command::Leave(conversation_id.clone()));
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Wait until the status equals `wanted`. Returns false on timeout.
    pub async fn wait_for(&self, wanted: ConnectionStatus, within: Duration) -> bool {
        let mut status = self.status.clone();
        let reached = matches!(
            tokio::time::timeout(within, status.wait_for(|s| *s == wanted)).await,
            Ok(Ok(_))
        );
        reached
    }

    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        let _ = self.task.await;
    }
}

async fn run(
    config: RealtimeConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<ConnectionStatus>,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    let socket_url = match config.socket_url() {
        Ok(url) => url,
        Err(e) => {
            tracing::error!(error = %e, "Realtime channel not started");
            status.send_replace(ConnectionStatus::Closed);
            return;
        }
    };
    let mut rooms: HashSet<ConversationId> = HashSet::new();

    loop {
        match connect_async(socket_url.as_str()).await {
            Ok((ws, _)) => {
                tracing::debug!(user_id = %config.user_id, "Realtime socket connected");
                match drive(ws, &config, &mut rooms, &mut commands, &status, &events).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Rejected(code) => {
                        tracing::warn!(user_id = %config.user_id, close_code = code, "Realtime credentials rejected");
                        status.send_replace(ConnectionStatus::Rejected);
                        return;
                    }
                    SessionEnd::Dropped => {
                        tracing::warn!(user_id = %config.user_id, "Realtime socket dropped, reconnecting");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(user_id = %config.user_id, error = %e, "Realtime connect failed");
            }
        }
        status.send_replace(ConnectionStatus::Degraded);

        // Keep tracking room changes while waiting to reconnect
        let delay = tokio::time::sleep(config.reconnect_delay);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = &mut delay => break,
                cmd = commands.recv() => match cmd {
                    Some(Command::Join(room)) => {
                        rooms.insert(room);
                    }
                    Some(Command::Leave(room)) => {
                        rooms.remove(&room);
                    }
                    Some(Command::Shutdown) | None => {
                        status.send_replace(ConnectionStatus::Closed);
                        return;
                    }
                },
            }
        }
    }

    status.send_replace(ConnectionStatus::Closed);
}

/// Run one connected session until it drops, is rejected, or is shut down.
async fn drive(
    ws: WsStream,
    config: &RealtimeConfig,
    rooms: &mut HashSet<ConversationId>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    status: &watch::Sender<ConnectionStatus>,
    events: &mpsc::UnboundedSender<ServerEvent>,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();

    if emit(&mut sink, &ClientEvent::RegisterUser(config.user_id.clone())).await.is_err() {
        return SessionEnd::Dropped;
    }
    for room in rooms.iter() {
        if emit(&mut sink, &ClientEvent::JoinRoom(room.to_string())).await.is_err() {
            return SessionEnd::Dropped;
        }
    }

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match ServerEvent::from_frame(text.as_str()) {
                    Ok(event) => {
                        match &event {
                            ServerEvent::Registered(_) => {
                                status.send_replace(ConnectionStatus::Connected);
                            }
                            ServerEvent::Error(body) => {
                                tracing::warn!(kind = ?body.kind, message = %body.message, "Realtime error event");
                            }
                            _ => {}
                        }
                        let _ = events.send(event);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to decode server event");
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    if let Some(frame) = frame {
                        let code = u16::from(frame.code);
                        if (4001..=4003).contains(&code) {
                            return SessionEnd::Rejected(code);
                        }
                    }
                    return SessionEnd::Dropped;
                }
                // Ping replies are queued by tungstenite and flushed on the next read
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "Realtime receive error");
                    return SessionEnd::Dropped;
                }
                None => return SessionEnd::Dropped,
            },
            cmd = commands.recv() => {
                let sent = match cmd {
                    Some(Command::Join(room)) => {
                        let event = ClientEvent::JoinRoom(room.to_string());
                        rooms.insert(room);
                        emit(&mut sink, &event).await
                    }
                    Some(Command::Leave(room)) => {
                        let event = ClientEvent::LeaveRoom(room.to_string());
                        rooms.remove(&room);
                        emit(&mut sink, &event).await
                    }
                    Some(Command::Shutdown) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                };
                if sent.is_err() {
                    return SessionEnd::Dropped;
                }
            }
        }
    }
}

async fn emit(sink: &mut WsSink, event: &ClientEvent) -> Result<(), ()> {
    let frame = event.to_frame().map_err(|e| {
        tracing::warn!(error = %e, "Failed to encode client event");
    })?;
    sink.send(Message::Text(frame.into())).await.map_err(|e| {
        tracing::debug!(error = %e, "Realtime send failed");
    })
}
