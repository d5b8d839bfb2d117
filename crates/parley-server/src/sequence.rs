//! Per-room sequence numbers.
//!
//! The counter lives in shared state so every process draws from the same
//! sequence. One increment is taken per send, before the message is stored.

use std::sync::Arc;

use parley_core::keys::sequence_key;
use parley_core::{ChatError, RoomId};
use tracing::{debug, error};

use crate::shared::SharedState;

/// Issues strictly increasing sequence numbers per room, starting at 1.
#[derive(Clone)]
pub struct SequenceGenerator {
    state: Arc<dyn SharedState>,
}

impl SequenceGenerator {
    /// Create a generator over `state`.
    pub fn new(state: Arc<dyn SharedState>) -> Self {
        Self { state }
    }

    /// Take the next sequence number for `room`.
    ///
    /// Fails with [`ChatError::Sequence`] when the counter cannot be advanced;
    /// callers must not persist or publish without a number.
    pub async fn next(&self, room: RoomId) -> Result<i64, ChatError> {
        match self.state.incr(&sequence_key(room)).await {
            Ok(value) => {
                debug!(%room, sequence = value, "sequence advanced");
                Ok(value)
            }
            Err(err) => {
                error!(%room, error = %err, "failed to advance sequence");
                Err(ChatError::Sequence {
                    room,
                    message: err.to_string(),
                })
            }
        }
    }
}
