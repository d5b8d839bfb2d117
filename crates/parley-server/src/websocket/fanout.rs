//! Best-effort delivery of one message to every local connection of a
//! room's members.

use std::collections::HashSet;
use std::sync::Arc;

use metrics::counter;
use parley_core::messages::{ChatMessage, ServerMessage};
use parley_core::{RoomId, UserId};
use parley_store::ChatStore;
use tracing::{debug, error, warn};

use super::registry::SessionRegistry;
use crate::blocking::with_store;
use crate::metrics::{FANOUT_DELIVERIES_TOTAL, FANOUT_SEND_FAILURES_TOTAL};

/// Delivers chat messages to connections on this process.
pub struct LocalFanout {
    store: Arc<dyn ChatStore>,
    registry: Arc<SessionRegistry>,
}

impl LocalFanout {
    /// Create a fan-out over `registry`, checking membership in `store`.
    pub fn new(store: Arc<dyn ChatStore>, registry: Arc<SessionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Send `message` to every open local connection of an active member of
    /// `room`, skipping `exclude_user`.
    ///
    /// Membership is checked per user on every call, on the blocking pool. A
    /// connection whose send fails is closed and removed; delivery to the
    /// others continues. Returns the number of connections the message was
    /// queued on.
    pub async fn send_message_to_local_room(
        &self,
        room: RoomId,
        message: &ChatMessage,
        exclude_user: Option<UserId>,
    ) -> usize {
        let json = match ServerMessage::ChatMessage(message.clone()).to_json() {
            Ok(json) => Arc::new(json),
            Err(err) => {
                error!(%room, error = %err, "failed to serialize chat message");
                return 0;
            }
        };

        let mut targets = self.registry.snapshot();
        targets.retain(|(user, _)| exclude_user != Some(*user));
        if targets.is_empty() {
            debug!(%room, "no local connections to deliver to");
            return 0;
        }

        let users: Vec<UserId> = targets.iter().map(|(user, _)| *user).collect();
        let members = match with_store(&self.store, move |store| {
            Ok(active_members_among(store, room, users))
        })
        .await
        {
            Ok(members) => members,
            Err(err) => {
                error!(%room, error = %err, "membership lookup failed, nothing delivered");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut failed = 0;
        for (user, connections) in targets {
            if !members.contains(&user) {
                continue;
            }
            for conn in connections {
                if conn.is_open() && conn.send(Arc::clone(&json)) {
                    delivered += 1;
                    continue;
                }
                failed += 1;
                debug!(%room, user_id = %user, connection_id = %conn.id, "send failed, pruning connection");
                conn.close();
                let _ = self.registry.remove_session(user, &conn.id);
            }
        }

        counter!(FANOUT_DELIVERIES_TOTAL).increment(delivered as u64);
        if failed > 0 {
            counter!(FANOUT_SEND_FAILURES_TOTAL).increment(failed);
        }
        debug!(%room, delivered, failed, "local fan-out complete");
        delivered
    }
}

/// The subset of `users` that are active members of `room`. A failed check
/// skips that user.
fn active_members_among(store: &dyn ChatStore, room: RoomId, users: Vec<UserId>) -> HashSet<UserId> {
    users
        .into_iter()
        .filter(|user| match store.is_active_member(room, *user) {
            Ok(active) => active,
            Err(err) => {
                warn!(%room, user_id = %user, error = %err, "membership check failed, skipping user");
                false
            }
        })
        .collect()
}
