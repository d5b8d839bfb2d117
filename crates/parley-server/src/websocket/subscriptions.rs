//! Which room channels this process listens to.
//!
//! The set of subscribed rooms is recorded in shared state under this
//! process's key, so a redundant join is a no-op and teardown knows what
//! to release.
//!
//! Teardown is coarse: subscriptions are released only when the process has
//! no connections at all, not when a single room loses its last local
//! member.
//!
//! Joins and teardown are serialized by a read/write lock. A teardown
//! scheduled by the last disconnect re-checks that the process is still idle
//! once it holds the write lock, so a client that reconnects in between keeps
//! its subscriptions. A teardown that wins the lock first runs to completion,
//! and the reconnecting client's join then finds the room released and
//! subscribes again.

use std::sync::Arc;

use parley_core::keys::server_rooms_key;
use parley_core::{ProcessId, RoomId, UserId};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::bus::RoomChannels;
use crate::shared::{SharedState, SharedStateError};

/// Tracks and releases this process's room subscriptions.
pub struct RoomSubscriptionTracker {
    process_id: ProcessId,
    state: Arc<dyn SharedState>,
    channels: Arc<dyn RoomChannels>,
    teardown_lock: RwLock<()>,
}

impl RoomSubscriptionTracker {
    /// Create a tracker for `process_id`.
    pub fn new(
        process_id: ProcessId,
        state: Arc<dyn SharedState>,
        channels: Arc<dyn RoomChannels>,
    ) -> Self {
        Self {
            process_id,
            state,
            channels,
            teardown_lock: RwLock::new(()),
        }
    }

    /// Make sure this process receives `room`'s channel on behalf of `user`.
    ///
    /// Returns `true` if a new subscription was made.
    #[instrument(skip(self), fields(process_id = %self.process_id))]
    pub async fn join_room(&self, user: UserId, room: RoomId) -> Result<bool, SharedStateError> {
        let _guard = self.teardown_lock.read().await;
        let key = server_rooms_key(&self.process_id);
        let member = room.to_string();
        if self.state.set_contains(&key, &member).await? {
            debug!("room already subscribed");
            return Ok(false);
        }
        let _ = self.channels.subscribe(room);
        let _ = self.state.set_add(&key, &member).await?;
        info!("room subscription recorded");
        Ok(true)
    }

    /// Unsubscribe from every recorded room and clear the shared entry.
    ///
    /// Returns how many rooms were released.
    #[instrument(skip(self), fields(process_id = %self.process_id))]
    pub async fn teardown(&self) -> Result<usize, SharedStateError> {
        let _guard = self.teardown_lock.write().await;
        self.release_all().await
    }

    /// Tear down only if `is_idle` still holds once no join is in flight.
    ///
    /// Returns `None` when the process turned out not to be idle.
    #[instrument(skip_all, fields(process_id = %self.process_id))]
    pub async fn teardown_if_idle(
        &self,
        is_idle: impl FnOnce() -> bool + Send,
    ) -> Result<Option<usize>, SharedStateError> {
        let _guard = self.teardown_lock.write().await;
        if !is_idle() {
            debug!("connections came back, keeping room subscriptions");
            return Ok(None);
        }
        self.release_all().await.map(Some)
    }

    async fn release_all(&self) -> Result<usize, SharedStateError> {
        let key = server_rooms_key(&self.process_id);
        let members = self.state.set_members(&key).await?;
        let mut released = 0;
        for raw in &members {
            match raw.parse::<RoomId>() {
                Ok(room) => {
                    let _ = self.channels.unsubscribe(room);
                    released += 1;
                }
                Err(err) => warn!(member = %raw, error = %err, "skipping unparseable room id"),
            }
        }
        let _ = self.state.delete(&key).await?;
        info!(rooms = released, "room subscriptions torn down");
        Ok(released)
    }
}
