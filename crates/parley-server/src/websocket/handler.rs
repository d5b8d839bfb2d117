//! Inbound frame dispatch: parses client text and routes it to the chat
//! service.

use parley_core::UserId;
use parley_core::messages::{ClientMessage, ErrorMessage, ServerMessage};
use tracing::{debug, instrument, warn};

use crate::service::ChatService;

/// Handle one inbound text frame from `sender`.
///
/// Returns the error reply for the sending connection, if any. Successful
/// sends reply through fan-out, not here.
#[instrument(skip_all, fields(user_id = %sender, room_id))]
pub async fn handle_message(
    service: &ChatService,
    sender: UserId,
    text: &str,
) -> Option<ServerMessage> {
    let request = match ClientMessage::parse(text) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code(), error = %err, "rejected inbound frame");
            return Some(ServerMessage::Error(ErrorMessage::from_error(&err, None)));
        }
    };

    let room = request.room();
    let _ = tracing::Span::current().record("room_id", room.get());
    let result = match request {
        ClientMessage::SendMessage(send) => service.send_message(sender, send).await.map(|_| ()),
    };

    match result {
        Ok(()) => None,
        Err(err) => {
            debug!(code = %err.code(), error = %err, "request failed");
            Some(ServerMessage::Error(ErrorMessage::from_error(&err, Some(room))))
        }
    }
}
