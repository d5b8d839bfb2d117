//! Per-process registry of open connections, keyed by user.
//!
//! The registry does not own connections; the session task does. It learns
//! about a close only through [`SessionRegistry::remove_session`] or by
//! finding a closed connection while pruning.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parley_core::{ConnectionId, UserId};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::connection::ClientConnection;
use super::subscriptions::RoomSubscriptionTracker;

type Sessions = DashMap<UserId, Vec<Arc<ClientConnection>>>;

fn total_connections(sessions: &Sessions) -> usize {
    sessions.iter().map(|entry| entry.value().len()).sum()
}

/// Open connections on this process.
pub struct SessionRegistry {
    sessions: Arc<Sessions>,
    tracker: Arc<RoomSubscriptionTracker>,
}

impl SessionRegistry {
    /// Create an empty registry. `tracker` is torn down when the last
    /// connection goes away.
    pub fn new(tracker: Arc<RoomSubscriptionTracker>) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            tracker,
        }
    }

    /// Register a connection under its user. Registering the same connection
    /// twice is a no-op.
    pub fn add_session(&self, conn: Arc<ClientConnection>) {
        let mut entry = self.sessions.entry(conn.user_id).or_default();
        if entry.iter().any(|existing| existing.id == conn.id) {
            return;
        }
        debug!(user_id = %conn.user_id, connection_id = %conn.id, "session added");
        entry.push(conn);
    }

    /// Remove a connection. Drops the user entry when it empties.
    ///
    /// When this leaves the process with no connections at all, every room
    /// subscription is released in the background; the returned handle
    /// tracks that teardown. The teardown is skipped if a connection has been
    /// registered again by the time it runs.
    pub fn remove_session(&self, user: UserId, conn_id: &ConnectionId) -> Option<JoinHandle<()>> {
        if let Entry::Occupied(mut entry) = self.sessions.entry(user) {
            let before = entry.get().len();
            entry.get_mut().retain(|conn| &conn.id != conn_id);
            if entry.get().len() < before {
                debug!(user_id = %user, connection_id = %conn_id, "session removed");
            }
            if entry.get().is_empty() {
                let _ = entry.remove();
            }
        }

        if self.connection_count() == 0 {
            Some(self.spawn_teardown())
        } else {
            None
        }
    }

    fn spawn_teardown(&self) -> JoinHandle<()> {
        info!("no local connections left, releasing room subscriptions");
        let tracker = Arc::clone(&self.tracker);
        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            let still_idle = move || total_connections(&sessions) == 0;
            if let Err(err) = tracker.teardown_if_idle(still_idle).await {
                error!(error = %err, "room subscription teardown failed");
            }
        })
    }

    /// Whether `user` has at least one open connection here.
    ///
    /// Closed connections found along the way are pruned.
    pub fn is_user_online_locally(&self, user: UserId) -> bool {
        match self.sessions.entry(user) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().retain(|conn| conn.is_open());
                if entry.get().is_empty() {
                    let _ = entry.remove();
                    false
                } else {
                    true
                }
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Open connections of `user`.
    pub fn connections_for(&self, user: UserId) -> Vec<Arc<ClientConnection>> {
        self.sessions
            .get(&user)
            .map(|conns| conns.clone())
            .unwrap_or_default()
    }

    /// Copy of every user and their connections, for iteration without
    /// holding map locks.
    pub fn snapshot(&self) -> Vec<(UserId, Vec<Arc<ClientConnection>>)> {
        self.sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Total connections across all users.
    pub fn connection_count(&self) -> usize {
        total_connections(&self.sessions)
    }

    /// Users with at least one registered connection.
    pub fn user_count(&self) -> usize {
        self.sessions.len()
    }

    /// The subscription tracker torn down by this registry.
    pub fn tracker(&self) -> &Arc<RoomSubscriptionTracker> {
        &self.tracker
    }
}
