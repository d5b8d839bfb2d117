//! The unit carried between processes on the distributed bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EnvelopeId, ProcessId, RoomId};
use crate::messages::ChatMessage;

/// A chat message wrapped with routing metadata.
///
/// `id` identifies exactly one publish and is only ever used for
/// de-duplication, never for ordering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributedEnvelope {
    /// Unique per publish.
    pub id: EnvelopeId,
    /// Process that published the envelope.
    pub publisher_id: ProcessId,
    /// Target room.
    pub room_id: RoomId,
    /// Process that must not deliver this envelope locally.
    pub excluded_process_id: Option<ProcessId>,
    /// Publish time.
    pub timestamp: DateTime<Utc>,
    /// The chat message.
    pub payload: ChatMessage,
}

impl DistributedEnvelope {
    /// Wrap a message with a fresh envelope ID.
    pub fn wrap(
        publisher: ProcessId,
        room: RoomId,
        payload: ChatMessage,
        exclude: Option<ProcessId>,
    ) -> Self {
        Self {
            id: EnvelopeId::new(),
            publisher_id: publisher,
            room_id: room,
            excluded_process_id: exclude,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Whether `process` is the excluded receiver.
    pub fn excludes(&self, process: &ProcessId) -> bool {
        self.excluded_process_id.as_ref() == Some(process)
    }
}
