use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use wanderchat_shared::UserIdentity;

use crate::state::AppState;
use crate::ws::protocol;
use crate::ws::ConnectionHandle;

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader loop: decodes client events and hands them to the protocol layer
///
/// The connection only receives pushes once the client sends `registerUser`
/// and `joinRoom`. On exit it is removed from every room and from the
/// registry, whatever the cause of the disconnect.
pub async fn run_connection(socket: WebSocket, state: AppState, identity: UserIdentity) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let handle = ConnectionHandle::new(&identity.id, tx.clone());

    tracing::info!(
        connection = %handle.id,
        user_id = %identity.id,
        role = %identity.role,
        "WebSocket actor started"
    );

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_handle = tokio::spawn(ping_task(
        tx.clone(),
        pong_rx,
        Duration::from_secs(state.chat_config.ping_interval_secs),
        Duration::from_secs(state.chat_config.pong_timeout_secs),
    ));

    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_frame(text.as_str(), &handle, &state);
                }
                Message::Binary(_) => {
                    tracing::debug!(
                        connection = %handle.id,
                        "Ignoring binary frame"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        connection = %handle.id,
                        user_id = %identity.id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    connection = %handle.id,
                    user_id = %identity.id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(connection = %handle.id, "WebSocket stream ended");
                break;
            }
        }
    }

    writer_handle.abort();
    ping_handle.abort();

    let left = state.rooms.leave_all(handle.id);
    let unregistered = state.connections.unregister(handle.id);

    tracing::info!(
        connection = %handle.id,
        user_id = %identity.id,
        rooms_left = left.len(),
        open_rooms = state.rooms.room_count(),
        still_online = state.connections.is_online(&identity.id),
        online_users = state.connections.user_count(),
        unregistered = !unregistered.is_empty(),
        "WebSocket actor stopped"
    );
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            break;
        }
    }
}

/// Sends periodic pings and closes the socket when a pong misses its deadline.
async fn ping_task(
    tx: mpsc::UnboundedSender<Message>,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    every: Duration,
    deadline: Duration,
) {
    let mut ping_timer = interval(every);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        if tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
            break;
        }

        match timeout(deadline, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!("Pong timeout, closing connection");
                let _ = tx.send(Message::Close(Some(CloseFrame {
                    code: 1001,
                    reason: "Pong timeout".into(),
                })));
                break;
            }
        }
    }
}
