//! Room and message operations that feed the fan-out.
//!
//! The send path is: validate, take a sequence number, persist, deliver to
//! local members, then publish to other processes in the background. A
//! sequence failure aborts before anything is stored; a publish failure is
//! logged and never reaches the sender.

use std::sync::Arc;

use metrics::counter;
use parley_core::messages::{ChatMessage, SendMessageRequest};
use parley_core::paging::{MessagePage, MessagePageRequest};
use parley_core::rooms::{ChatRoomType, MemberRole};
use parley_core::{ChatError, RoomId, UserId};
use parley_store::{ChatRoom, ChatRoomMember, ChatStore, NewMessage, NewRoom, StoredMessage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::blocking::with_store;
use crate::bus::BroadcastBus;
use crate::history::{self, HistoryLimits};
use crate::metrics::MESSAGES_SENT_TOTAL;
use crate::sequence::SequenceGenerator;
use crate::websocket::{LocalFanout, SessionRegistry};

/// Fields for creating a room.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    /// Room name.
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Room kind (defaults to `GROUP`).
    #[serde(default, rename = "type")]
    pub room_type: ChatRoomType,
    /// Member cap; the server default when absent.
    #[serde(default)]
    pub max_members: Option<u32>,
}

/// A room with its active member count.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDetails {
    /// The room.
    #[serde(flatten)]
    pub room: ChatRoom,
    /// Active members right now.
    pub member_count: u32,
}

/// Chat operations for one process.
pub struct ChatService {
    store: Arc<dyn ChatStore>,
    sequence: SequenceGenerator,
    bus: Arc<BroadcastBus>,
    registry: Arc<SessionRegistry>,
    fanout: Arc<LocalFanout>,
    history: HistoryLimits,
    default_max_members: u32,
}

impl ChatService {
    /// Create a service with default limits.
    pub fn new(
        store: Arc<dyn ChatStore>,
        sequence: SequenceGenerator,
        bus: Arc<BroadcastBus>,
        registry: Arc<SessionRegistry>,
        fanout: Arc<LocalFanout>,
    ) -> Self {
        Self {
            store,
            sequence,
            bus,
            registry,
            fanout,
            history: HistoryLimits::default(),
            default_max_members: 100,
        }
    }

    /// Override history limits and the default member cap.
    #[must_use]
    pub fn with_limits(mut self, history: HistoryLimits, default_max_members: u32) -> Self {
        self.history = history;
        self.default_max_members = default_max_members;
        self
    }

    /// Subscribe this process to `room` if `user` is connected here.
    async fn join_if_online(&self, user: UserId, room: RoomId) {
        if !self.registry.is_user_online_locally(user) {
            return;
        }
        if let Err(err) = self.registry.tracker().join_room(user, room).await {
            warn!(%room, user_id = %user, error = %err, "failed to record room subscription");
        }
    }

    /// Create a room with `creator` as its owner.
    #[instrument(skip_all, fields(user_id = %creator))]
    pub async fn create_room(
        &self,
        creator: UserId,
        request: CreateRoomRequest,
    ) -> Result<ChatRoom, ChatError> {
        let max_members = request.max_members.unwrap_or(self.default_max_members);
        let room = with_store(&self.store, move |store| {
            require_user(store, creator)?;
            let room = store.create_room(&NewRoom {
                name: request.name,
                description: request.description,
                room_type: request.room_type,
                max_members,
                created_by: creator,
            })?;
            let _ = store.add_member(room.id, creator, MemberRole::Owner)?;
            Ok(room)
        })
        .await?;
        info!(room_id = %room.id, "room created");
        self.join_if_online(creator, room.id).await;
        Ok(room)
    }

    /// Add `user` to `room` as a member.
    #[instrument(skip(self))]
    pub async fn join_room(&self, room: RoomId, user: UserId) -> Result<ChatRoomMember, ChatError> {
        let member = with_store(&self.store, move |store| {
            let target = require_room(store, room)?;
            require_user(store, user)?;
            if store.is_active_member(room, user)? {
                return Err(ChatError::AlreadyMember { room, user });
            }
            if store.count_active_members(room)? >= target.max_members {
                return Err(ChatError::RoomFull {
                    room,
                    max_members: target.max_members,
                });
            }
            Ok(store.add_member(room, user, MemberRole::Member)?)
        })
        .await?;
        info!("user joined room");
        self.join_if_online(user, room).await;
        Ok(member)
    }

    /// Deactivate `user`'s membership. Subscriptions are left as they are.
    #[instrument(skip(self))]
    pub async fn leave_room(&self, room: RoomId, user: UserId) -> Result<(), ChatError> {
        with_store(&self.store, move |store| {
            let _ = require_room(store, room)?;
            if !store.deactivate_member(room, user)? {
                return Err(ChatError::NotMember { room, user });
            }
            Ok(())
        })
        .await?;
        info!("user left room");
        Ok(())
    }

    /// A room with its member count.
    pub async fn room(&self, room: RoomId) -> Result<RoomDetails, ChatError> {
        with_store(&self.store, move |store| {
            let found = require_room(store, room)?;
            let member_count = store.count_active_members(room)?;
            Ok(RoomDetails {
                room: found,
                member_count,
            })
        })
        .await
    }

    /// Active members of `room`.
    pub async fn room_members(&self, room: RoomId) -> Result<Vec<ChatRoomMember>, ChatError> {
        with_store(&self.store, move |store| {
            let _ = require_room(store, room)?;
            Ok(store.active_members(room)?)
        })
        .await
    }

    /// Rooms `user` is an active member of.
    pub async fn rooms_for_user(
        &self,
        user: UserId,
        limit: usize,
    ) -> Result<Vec<ChatRoom>, ChatError> {
        with_store(&self.store, move |store| Ok(store.rooms_for_user(user, limit)?)).await
    }

    /// Active rooms whose name contains `query`. A blank query lists all.
    pub async fn search_rooms(&self, query: &str, limit: usize) -> Result<Vec<ChatRoom>, ChatError> {
        let query = query.trim().to_owned();
        with_store(&self.store, move |store| Ok(store.search_rooms(&query, limit)?)).await
    }

    /// Persist a message and fan it out.
    ///
    /// Returns once the message is stored and queued on local connections.
    /// Cross-process delivery happens afterwards and its failures are only
    /// logged.
    #[instrument(skip_all, fields(user_id = %sender, room_id = %request.chat_room_id))]
    pub async fn send_message(
        &self,
        sender: UserId,
        request: SendMessageRequest,
    ) -> Result<StoredMessage, ChatError> {
        let room = request.chat_room_id;
        let message_type = request.message_type;
        with_store(&self.store, move |store| {
            let _ = require_room(store, room)?;
            require_user(store, sender)?;
            if !store.is_active_member(room, sender)? {
                return Err(ChatError::NotMember { room, user: sender });
            }
            Ok(())
        })
        .await?;

        let sequence_number = self.sequence.next(room).await?;
        let new_message = NewMessage {
            room_id: room,
            sender_id: sender,
            message_type,
            content: request.content.unwrap_or_default(),
            sequence_number,
        };
        let stored = with_store(&self.store, move |store| {
            Ok(store.insert_message(&new_message)?)
        })
        .await?;
        let message = stored.to_chat_message();

        let delivered = self
            .fanout
            .send_message_to_local_room(room, &message, None)
            .await;
        debug!(message_id = %stored.id, sequence_number, delivered, "message stored and delivered locally");
        self.publish_in_background(room, message);

        counter!(MESSAGES_SENT_TOTAL, "type" => message_type.as_str()).increment(1);
        Ok(stored)
    }

    fn publish_in_background(&self, room: RoomId, message: ChatMessage) {
        let bus = Arc::clone(&self.bus);
        let _ = tokio::spawn(async move {
            let exclude = Some(bus.process_id().clone());
            if let Err(err) = bus.publish(room, &message, exclude).await {
                warn!(%room, message_id = %message.id, error = %err, "broadcast failed, remote members miss this message");
            }
        });
    }

    /// One page of history for `caller`.
    pub async fn messages_by_cursor(
        &self,
        request: &MessagePageRequest,
        caller: UserId,
    ) -> Result<MessagePage<ChatMessage>, ChatError> {
        let request = request.clone();
        let limits = self.history;
        with_store(&self.store, move |store| {
            history::fetch_page(store, &request, caller, limits)
        })
        .await
    }
}

fn require_room(store: &dyn ChatStore, room: RoomId) -> Result<ChatRoom, ChatError> {
    store.find_room(room)?.ok_or(ChatError::RoomNotFound(room))
}

fn require_user(store: &dyn ChatStore, user: UserId) -> Result<(), ChatError> {
    match store.find_user(user)? {
        Some(_) => Ok(()),
        None => Err(ChatError::UserNotFound(user)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use futures::StreamExt;
    use parley_core::envelope::DistributedEnvelope;
    use parley_core::keys::room_channel;
    use parley_core::messages::MessageType;
    use parley_core::{ErrorCode, ProcessId};

    use super::*;
    use crate::bus::{BusTransport, MemoryBusHub, RoomChannels};
    use crate::shared::{MockSharedState, SharedStateError};
    use crate::test_support::{connect, process_stack, room_with, service, store, user};

    fn text(room: RoomId, content: &str) -> SendMessageRequest {
        SendMessageRequest {
            chat_room_id: room,
            message_type: MessageType::Text,
            content: Some(content.into()),
        }
    }

    #[tokio::test]
    async fn sequence_numbers_follow_send_order() {
        let store = store();
        let stack = process_stack(&MemoryBusHub::default(), "node-a");
        let service = service(store.clone(), &stack);
        let a = user(&*store, "a");
        let room = room_with(&*store, a, &[]);

        for expected in 1..=3 {
            let stored = service.send_message(a, text(room, "x")).await.unwrap();
            assert_eq!(stored.sequence_number, expected);
        }
    }

    #[tokio::test]
    async fn send_requires_membership() {
        let store = store();
        let stack = process_stack(&MemoryBusHub::default(), "node-a");
        let service = service(store.clone(), &stack);
        let (a, b) = (user(&*store, "a"), user(&*store, "b"));
        let room = room_with(&*store, a, &[]);

        let err = service.send_message(b, text(room, "x")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotAMember);
        let err = service.send_message(a, text(RoomId(999), "x")).await.unwrap_err();
        assert_matches!(err, ChatError::RoomNotFound(RoomId(999)));
    }

    #[tokio::test]
    async fn missing_content_is_stored_empty() {
        let store = store();
        let stack = process_stack(&MemoryBusHub::default(), "node-a");
        let service = service(store.clone(), &stack);
        let a = user(&*store, "a");
        let room = room_with(&*store, a, &[]);

        let stored = service
            .send_message(
                a,
                SendMessageRequest {
                    chat_room_id: room,
                    message_type: MessageType::System,
                    content: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(stored.content, "");
        assert_eq!(stored.message_type, MessageType::System);
    }

    #[tokio::test]
    async fn sequence_failure_aborts_before_persisting() {
        let store = store();
        let stack = process_stack(&MemoryBusHub::default(), "node-a");
        let mut state = MockSharedState::new();
        let _ = state.expect_incr().returning(|_| {
            Err(SharedStateError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "down",
            ))))
        });
        let fanout = Arc::new(LocalFanout::new(store.clone(), stack.registry.clone()));
        let service = ChatService::new(
            store.clone(),
            SequenceGenerator::new(Arc::new(state)),
            stack.bus.clone(),
            stack.registry.clone(),
            fanout,
        );
        let a = user(&*store, "a");
        let room = room_with(&*store, a, &[]);

        let err = service.send_message(a, text(room, "x")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::SequenceUnavailable);
        assert!(store.latest_messages(room, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_publishes_envelope_excluding_self() {
        let hub = MemoryBusHub::default();
        let observer = hub.transport();
        let mut wire = observer.frames().await.unwrap();
        let store = store();
        let stack = process_stack(&hub, "node-a");
        let service = service(store.clone(), &stack);
        let a = user(&*store, "a");
        let room = room_with(&*store, a, &[]);
        observer.subscribe(&room_channel(room));

        let stored = service.send_message(a, text(room, "hello")).await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(2), wire.next())
            .await
            .unwrap()
            .unwrap();
        let envelope: DistributedEnvelope = serde_json::from_str(&frame.payload).unwrap();
        assert_eq!(frame.channel, format!("chat.room.{room}"));
        assert_eq!(envelope.publisher_id, ProcessId::from("node-a"));
        assert_eq!(envelope.excluded_process_id, Some(ProcessId::from("node-a")));
        assert_eq!(envelope.payload.id, stored.id);
    }

    #[tokio::test]
    async fn join_room_checks_in_order() {
        let store = store();
        let stack = process_stack(&MemoryBusHub::default(), "node-a");
        let service = service(store.clone(), &stack);
        let (a, b) = (user(&*store, "a"), user(&*store, "b"));
        let room = service
            .create_room(
                a,
                CreateRoomRequest {
                    name: "duo".into(),
                    description: None,
                    room_type: ChatRoomType::Group,
                    max_members: Some(2),
                },
            )
            .await
            .unwrap();

        assert_matches!(
            service.join_room(RoomId(404), b).await,
            Err(ChatError::RoomNotFound(_))
        );
        assert_matches!(
            service.join_room(room.id, UserId(404)).await,
            Err(ChatError::UserNotFound(_))
        );
        assert_matches!(
            service.join_room(room.id, a).await,
            Err(ChatError::AlreadyMember { .. })
        );
        let _ = service.join_room(room.id, b).await.unwrap();

        let c = user(&*store, "c");
        assert_matches!(
            service.join_room(room.id, c).await,
            Err(ChatError::RoomFull { max_members: 2, .. })
        );
        assert_eq!(service.room(room.id).await.unwrap().member_count, 2);
    }

    #[tokio::test]
    async fn joining_while_connected_subscribes_the_room() {
        let store = store();
        let stack = process_stack(&MemoryBusHub::default(), "node-a");
        let service = service(store.clone(), &stack);
        let (a, b) = (user(&*store, "a"), user(&*store, "b"));
        let room = room_with(&*store, a, &[]);
        let (_conn, _rx) = connect(&stack.registry, b);

        let _ = service.join_room(room, b).await.unwrap();
        assert!(stack.bus.is_subscribed(room));
    }

    #[tokio::test]
    async fn creating_while_offline_does_not_subscribe() {
        let store = store();
        let stack = process_stack(&MemoryBusHub::default(), "node-a");
        let service = service(store.clone(), &stack);
        let a = user(&*store, "a");

        let room = service
            .create_room(
                a,
                CreateRoomRequest {
                    name: "quiet".into(),
                    description: None,
                    room_type: ChatRoomType::Channel,
                    max_members: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(room.max_members, 100);
        assert!(!stack.bus.is_subscribed(room.id));
        assert_eq!(service.room_members(room.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn leave_keeps_subscription_but_stops_delivery() {
        let store = store();
        let stack = process_stack(&MemoryBusHub::default(), "node-a");
        let service = service(store.clone(), &stack);
        let (a, b) = (user(&*store, "a"), user(&*store, "b"));
        let room = room_with(&*store, a, &[b]);
        let (_conn, mut rx) = connect(&stack.registry, b);
        let _ = stack.bus.subscribe(room);

        service.leave_room(room, b).await.unwrap();
        assert!(stack.bus.is_subscribed(room));
        let _ = service.send_message(a, text(room, "after")).await.unwrap();
        assert!(rx.try_recv().is_err());
        assert_matches!(service.leave_room(room, b).await, Err(ChatError::NotMember { .. }));
    }

    #[tokio::test]
    async fn search_with_blank_query_lists_rooms() {
        let store = store();
        let stack = process_stack(&MemoryBusHub::default(), "node-a");
        let service = service(store.clone(), &stack);
        let a = user(&*store, "a");
        let _ = room_with(&*store, a, &[]);

        assert_eq!(service.search_rooms("  ", 10).await.unwrap().len(), 1);
        assert_eq!(service.search_rooms("GEN", 10).await.unwrap().len(), 1);
        assert!(service.search_rooms("nope", 10).await.unwrap().is_empty());
        assert_eq!(service.rooms_for_user(a, 10).await.unwrap().len(), 1);
    }

    #[test]
    fn create_room_request_defaults() {
        let request: CreateRoomRequest = serde_json::from_str(r#"{"name":"x"}"#).unwrap();
        assert_eq!(request.room_type, ChatRoomType::Group);
        assert!(request.max_members.is_none());
    }
}
