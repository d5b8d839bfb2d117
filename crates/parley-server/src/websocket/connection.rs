//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use parley_core::messages::ServerMessage;
use parley_core::{ConnectionId, UserId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One accepted WebSocket connection.
///
/// The session task owns the socket. The registry and fan-out only hold this
/// handle, which queues outbound text and can ask the session to close.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Authenticated user.
    pub user_id: UserId,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// Fired when the connection must close.
    close: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
    /// When the last Pong (or any activity) was received.
    last_pong: Mutex<Instant>,
    /// Count of messages dropped due to full or closed channel.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection for `user_id`.
    pub fn new(user_id: UserId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            user_id,
            tx,
            close: CancellationToken::new(),
            connected_at: now,
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a text frame for the client.
    ///
    /// Returns `false` if the channel is full or closed, and increments
    /// the dropped message counter.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize and queue a server message.
    pub fn send_server_message(&self, message: &ServerMessage) -> bool {
        match message.to_json() {
            Ok(json) => self.send(Arc::new(json)),
            Err(_) => false,
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Whether the connection can still take messages.
    pub fn is_open(&self) -> bool {
        !self.close.is_cancelled() && !self.tx.is_closed()
    }

    /// Ask the session task to close the socket.
    pub fn close(&self) {
        self.close.cancel();
    }

    /// Resolves once [`Self::close`] has been called.
    pub async fn closed(&self) {
        self.close.cancelled().await;
    }

    /// Mark the connection as alive (pong received).
    pub fn mark_alive(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
