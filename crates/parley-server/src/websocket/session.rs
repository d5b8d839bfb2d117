//! WebSocket session lifecycle. Handles a single connected client from
//! upgrade through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use parley_core::messages::{Connected, ErrorMessage, ServerMessage};
use parley_core::{ChatError, UserId};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::handler::handle_message;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::server::AppState;

/// What to do with one inbound frame.
#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    /// A text payload to dispatch.
    Text(String),
    /// A binary payload that is not UTF-8.
    Invalid,
    /// The client closed the socket.
    Close,
    /// Ping or pong.
    Control,
}

fn classify(message: Message) -> Inbound {
    match message {
        Message::Text(text) => Inbound::Text(text.to_string()),
        Message::Binary(data) => match String::from_utf8(data.to_vec()) {
            Ok(text) => Inbound::Text(text),
            Err(_) => Inbound::Invalid,
        },
        Message::Close(_) => Inbound::Close,
        Message::Ping(_) | Message::Pong(_) => Inbound::Control,
    }
}

/// Run a WebSocket session for an authenticated user.
///
/// 1. Queues the `CONNECTED` greeting and registers the connection
/// 2. Subscribes this process to the user's rooms
/// 3. Dispatches inbound frames; only error replies are sent back directly
/// 4. Forwards queued messages and sends periodic Pings from a writer task
/// 5. Removes the connection exactly once on close, timeout or shutdown
#[instrument(skip_all, fields(user_id = %user_id, connection_id))]
pub async fn run_ws_session(ws: WebSocket, user_id: UserId, state: AppState) {
    let (ws_tx, mut ws_rx) = ws.split();

    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(state.config.send_queue_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(user_id, send_tx));
    let _ = tracing::Span::current().record("connection_id", connection.id.as_str());

    let connection_start = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    // Greeting goes first in the queue, ahead of any fan-out.
    let greeting = ServerMessage::Connected(Connected {
        user_id,
        process_id: state.process_id.clone(),
        timestamp: Utc::now(),
    });
    let _ = connection.send_server_message(&greeting);
    state.registry.add_session(connection.clone());
    join_memberships(&state, user_id).await;

    let outbound = tokio::spawn(forward_outbound(
        ws_tx,
        send_rx,
        connection.clone(),
        state.config.ping_interval,
        state.config.pong_timeout,
    ));

    let shutdown = state.shutdown.token();
    loop {
        tokio::select! {
            () = connection.closed() => break,
            () = shutdown.cancelled() => break,
            frame = ws_rx.next() => {
                let Some(Ok(frame)) = frame else { break };
                connection.mark_alive();
                let text = match classify(frame) {
                    Inbound::Text(text) => text,
                    Inbound::Control => continue,
                    Inbound::Close => {
                        info!("client sent close frame");
                        break;
                    }
                    Inbound::Invalid => {
                        let err = ChatError::InvalidFormat("binary frame is not UTF-8".into());
                        let _ = connection
                            .send_server_message(&ServerMessage::Error(ErrorMessage::from_error(&err, None)));
                        continue;
                    }
                };
                let Some(reply) = handle_message(&state.service, user_id, &text).await else {
                    continue;
                };
                if !connection.send_server_message(&reply) {
                    debug!("failed to enqueue error reply (channel full or closed)");
                }
            }
        }
    }

    // Clean up
    connection.close();
    let _ = state.registry.remove_session(user_id, &connection.id);
    if outbound.await.is_err() {
        warn!("outbound writer task failed");
    }
    info!(dropped = connection.drop_count(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
}

/// Subscribe this process to every room `user` belongs to, up to the
/// configured load limit.
async fn join_memberships(state: &AppState, user: UserId) {
    let rooms = match state
        .service
        .rooms_for_user(user, state.config.membership_load_limit)
        .await
    {
        Ok(rooms) => rooms,
        Err(err) => {
            warn!(error = %err, "failed to load memberships");
            return;
        }
    };
    let tracker = state.registry.tracker();
    for room in &rooms {
        if let Err(err) = tracker.join_room(user, room.id).await {
            warn!(room_id = %room.id, error = %err, "failed to join room channel");
        }
    }
    debug!(rooms = rooms.len(), "memberships joined");
}

/// Write queued messages to the socket and keep it alive with Pings.
///
/// Ends when the queue closes, a write fails, the client has been silent
/// longer than `pong_timeout`, or the connection is closed. Always leaves
/// the connection closed so the reader side stops too.
async fn forward_outbound(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    connection: Arc<ClientConnection>,
    ping_interval: Duration,
    pong_timeout: Duration,
) {
    let mut ping = tokio::time::interval(ping_interval);
    // Skip the immediate first tick
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            msg = send_rx.recv() => {
                let Some(text) = msg else { break };
                if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if connection.last_pong_elapsed() > pong_timeout {
                    warn!(?pong_timeout, "client unresponsive, disconnecting");
                    break;
                }
                if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            () = connection.closed() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }
    connection.close();
}
