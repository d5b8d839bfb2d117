//! Fixtures shared by unit tests.

use std::sync::Arc;

use parley_core::rooms::{ChatRoomType, MemberRole};
use parley_core::{ProcessId, RoomId, UserId};
use parley_store::{ChatStore, NewRoom, SqliteChatStore};
use tokio::sync::mpsc;

use crate::bus::dedup::DedupConfig;
use crate::bus::{BroadcastBus, MemoryBusHub};
use crate::sequence::SequenceGenerator;
use crate::service::ChatService;
use crate::shared::MemorySharedState;
use crate::websocket::{ClientConnection, LocalFanout, RoomSubscriptionTracker, SessionRegistry};

/// Fresh migrated in-memory store.
pub fn store() -> Arc<SqliteChatStore> {
    Arc::new(SqliteChatStore::open_in_memory().unwrap())
}

/// Create a user and return its ID.
pub fn user(store: &dyn ChatStore, name: &str) -> UserId {
    store.create_user(name, &name.to_uppercase()).unwrap().id
}

/// Create a group room owned by `owner` with `members` added.
pub fn room_with(store: &dyn ChatStore, owner: UserId, members: &[UserId]) -> RoomId {
    let room = store
        .create_room(&NewRoom {
            name: "general".into(),
            description: None,
            room_type: ChatRoomType::Group,
            max_members: 100,
            created_by: owner,
        })
        .unwrap();
    let _ = store.add_member(room.id, owner, MemberRole::Owner).unwrap();
    for member in members {
        let _ = store.add_member(room.id, *member, MemberRole::Member).unwrap();
    }
    room.id
}

/// Bus and registry (with its tracker) for one process on `hub`.
pub struct ProcessStack {
    pub bus: Arc<BroadcastBus>,
    pub registry: Arc<SessionRegistry>,
}

pub fn process_stack(hub: &MemoryBusHub, process: &str) -> ProcessStack {
    let process = ProcessId::from(process);
    let bus = Arc::new(BroadcastBus::new(
        process.clone(),
        Arc::new(hub.transport()),
        &DedupConfig::default(),
    ));
    let tracker = Arc::new(RoomSubscriptionTracker::new(
        process,
        Arc::new(MemorySharedState::new()),
        bus.clone(),
    ));
    let registry = Arc::new(SessionRegistry::new(tracker));
    ProcessStack { bus, registry }
}

/// Register a new connection for `user` and return its receiving end.
pub fn connect(
    registry: &SessionRegistry,
    user: UserId,
) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
    let (tx, rx) = mpsc::channel(16);
    let conn = Arc::new(ClientConnection::new(user, tx));
    registry.add_session(conn.clone());
    (conn, rx)
}

/// Chat service over `store` and `stack`, with its own sequence counters.
pub fn service(store: Arc<SqliteChatStore>, stack: &ProcessStack) -> ChatService {
    let fanout = Arc::new(LocalFanout::new(store.clone(), stack.registry.clone()));
    ChatService::new(
        store,
        SequenceGenerator::new(Arc::new(MemorySharedState::new())),
        stack.bus.clone(),
        stack.registry.clone(),
        fanout,
    )
}
