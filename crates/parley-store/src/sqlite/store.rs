use parley_core::rooms::MemberRole;
use parley_core::{MessageId, RoomId, UserId};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::instrument;

use crate::connection::{self, ConnectionConfig, ConnectionPool};
use crate::errors::Result;
use crate::migrations::run_migrations;
use crate::sqlite::repositories::{MemberRepo, MessageRepo, RoomRepo, UserRepo};
use crate::store::ChatStore;
use crate::types::{ChatRoom, ChatRoomMember, NewMessage, NewRoom, StoredMessage, User};

type PooledConn = PooledConnection<SqliteConnectionManager>;

/// [`ChatStore`] backed by a pooled `SQLite` database.
pub struct SqliteChatStore {
    pool: ConnectionPool,
}

impl SqliteChatStore {
    /// Wrap an existing pool. Migrations must already have run.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Open a migrated in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let pool = connection::new_in_memory()?;
        let conn = pool.get()?;
        let _ = run_migrations(&conn)?;
        Ok(Self::new(pool))
    }

    /// Open a file-backed store, creating parent directories and applying
    /// pending migrations.
    #[instrument(skip(config))]
    pub fn open_file(path: &str, config: &ConnectionConfig) -> Result<Self> {
        let parent = std::path::Path::new(path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            std::fs::create_dir_all(parent)?;
        }
        let pool = connection::new_file(path, config)?;
        let conn = pool.get()?;
        let applied = run_migrations(&conn)?;
        tracing::info!(path, applied, "chat store opened");
        Ok(Self::new(pool))
    }

    /// The underlying pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    fn conn(&self) -> Result<PooledConn> {
        Ok(self.pool.get()?)
    }
}

impl ChatStore for SqliteChatStore {
    fn create_user(&self, username: &str, display_name: &str) -> Result<User> {
        let conn = self.conn()?;
        UserRepo::create(&conn, username, display_name)
    }

    fn find_user(&self, id: UserId) -> Result<Option<User>> {
        let conn = self.conn()?;
        UserRepo::get(&conn, id)
    }

    fn create_room(&self, room: &NewRoom) -> Result<ChatRoom> {
        let conn = self.conn()?;
        RoomRepo::create(&conn, room)
    }

    fn find_room(&self, id: RoomId) -> Result<Option<ChatRoom>> {
        let conn = self.conn()?;
        RoomRepo::get(&conn, id)
    }

    fn search_rooms(&self, query: &str, limit: usize) -> Result<Vec<ChatRoom>> {
        let conn = self.conn()?;
        RoomRepo::search(&conn, query, limit)
    }

    fn rooms_for_user(&self, user: UserId, limit: usize) -> Result<Vec<ChatRoom>> {
        let conn = self.conn()?;
        RoomRepo::for_user(&conn, user, limit)
    }

    fn add_member(&self, room: RoomId, user: UserId, role: MemberRole) -> Result<ChatRoomMember> {
        let conn = self.conn()?;
        MemberRepo::upsert_active(&conn, room, user, role)
    }

    fn deactivate_member(&self, room: RoomId, user: UserId) -> Result<bool> {
        let conn = self.conn()?;
        MemberRepo::deactivate(&conn, room, user)
    }

    fn is_active_member(&self, room: RoomId, user: UserId) -> Result<bool> {
        let conn = self.conn()?;
        MemberRepo::is_active(&conn, room, user)
    }

    fn count_active_members(&self, room: RoomId) -> Result<u32> {
        let conn = self.conn()?;
        MemberRepo::count_active(&conn, room)
    }

    fn active_members(&self, room: RoomId) -> Result<Vec<ChatRoomMember>> {
        let conn = self.conn()?;
        MemberRepo::active_for_room(&conn, room)
    }

    fn insert_message(&self, message: &NewMessage) -> Result<StoredMessage> {
        let conn = self.conn()?;
        MessageRepo::insert(&conn, message)
    }

    fn latest_messages(&self, room: RoomId, limit: u32) -> Result<Vec<StoredMessage>> {
        let conn = self.conn()?;
        MessageRepo::latest(&conn, room, limit)
    }

    fn messages_before(
        &self,
        room: RoomId,
        cursor: MessageId,
        limit: u32,
    ) -> Result<Vec<StoredMessage>> {
        let conn = self.conn()?;
        MessageRepo::before(&conn, room, cursor, limit)
    }

    fn messages_after(
        &self,
        room: RoomId,
        cursor: MessageId,
        limit: u32,
    ) -> Result<Vec<StoredMessage>> {
        let conn = self.conn()?;
        MessageRepo::after(&conn, room, cursor, limit)
    }

    fn mark_message_deleted(&self, id: MessageId) -> Result<bool> {
        let conn = self.conn()?;
        MessageRepo::mark_deleted(&conn, id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use parley_core::messages::MessageType;
    use parley_core::rooms::ChatRoomType;

    fn store_with_room() -> (SqliteChatStore, User, ChatRoom) {
        let store = SqliteChatStore::open_in_memory().unwrap();
        let owner = store.create_user("ada", "Ada").unwrap();
        let room = store
            .create_room(&NewRoom {
                name: "general".into(),
                description: Some("everything".into()),
                room_type: ChatRoomType::Group,
                max_members: 3,
                created_by: owner.id,
            })
            .unwrap();
        (store, owner, room)
    }

    fn send(store: &SqliteChatStore, room: RoomId, sender: UserId, seq: i64) -> StoredMessage {
        store
            .insert_message(&NewMessage {
                room_id: room,
                sender_id: sender,
                message_type: MessageType::Text,
                content: format!("m{seq}"),
                sequence_number: seq,
            })
            .unwrap()
    }

    #[test]
    fn user_roundtrip() {
        let store = SqliteChatStore::open_in_memory().unwrap();
        let user = store.create_user("grace", "Grace").unwrap();
        assert!(user.is_active);
        assert_eq!(store.find_user(user.id).unwrap(), Some(user));
        assert_eq!(store.find_user(UserId(999)).unwrap(), None);
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let store = SqliteChatStore::open_in_memory().unwrap();
        let _ = store.create_user("grace", "Grace").unwrap();
        assert_matches!(
            store.create_user("grace", "Other"),
            Err(crate::StoreError::Sqlite(_))
        );
    }

    #[test]
    fn room_roundtrip() {
        let (store, owner, room) = store_with_room();
        let found = store.find_room(room.id).unwrap().unwrap();
        assert_eq!(found.name, "general");
        assert_eq!(found.max_members, 3);
        assert_eq!(found.created_by, owner.id);
        assert_eq!(found.room_type, ChatRoomType::Group);
    }

    #[test]
    fn membership_lifecycle() {
        let (store, owner, room) = store_with_room();
        let bob = store.create_user("bob", "Bob").unwrap();

        let _ = store.add_member(room.id, owner.id, MemberRole::Owner).unwrap();
        let member = store.add_member(room.id, bob.id, MemberRole::Member).unwrap();
        assert!(member.is_active);
        assert_eq!(store.count_active_members(room.id).unwrap(), 2);
        assert!(store.is_active_member(room.id, bob.id).unwrap());

        assert!(store.deactivate_member(room.id, bob.id).unwrap());
        assert!(!store.deactivate_member(room.id, bob.id).unwrap());
        assert!(!store.is_active_member(room.id, bob.id).unwrap());
        assert_eq!(store.count_active_members(room.id).unwrap(), 1);

        let rejoined = store.add_member(room.id, bob.id, MemberRole::Member).unwrap();
        assert_eq!(rejoined.id, member.id);
        assert!(rejoined.is_active);
        assert!(rejoined.left_at.is_none());

        let active: Vec<_> = store
            .active_members(room.id)
            .unwrap()
            .into_iter()
            .map(|m| m.user_id)
            .collect();
        assert_eq!(active, vec![owner.id, bob.id]);
    }

    #[test]
    fn rooms_for_user_skips_left_rooms() {
        let (store, owner, room) = store_with_room();
        let other = store
            .create_room(&NewRoom {
                name: "random".into(),
                description: None,
                room_type: ChatRoomType::Channel,
                max_members: 10,
                created_by: owner.id,
            })
            .unwrap();
        let _ = store.add_member(room.id, owner.id, MemberRole::Owner).unwrap();
        let _ = store.add_member(other.id, owner.id, MemberRole::Owner).unwrap();
        let _ = store.deactivate_member(other.id, owner.id).unwrap();

        let rooms = store.rooms_for_user(owner.id, 100).unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].id, room.id);
        assert!(store.rooms_for_user(owner.id, 0).unwrap().is_empty());
    }

    #[test]
    fn search_matches_substring_literally() {
        let (store, owner, _) = store_with_room();
        let _ = store
            .create_room(&NewRoom {
                name: "100%_real".into(),
                description: None,
                room_type: ChatRoomType::Group,
                max_members: 10,
                created_by: owner.id,
            })
            .unwrap();
        let hits = store.search_rooms("ner", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "general");
        assert_eq!(store.search_rooms("%_", 10).unwrap().len(), 1);
    }

    #[test]
    fn history_shapes() {
        let (store, owner, room) = store_with_room();
        let ids: Vec<MessageId> = (1..=5)
            .map(|seq| send(&store, room.id, owner.id, seq).id)
            .collect();

        let latest = store.latest_messages(room.id, 3).unwrap();
        let seqs: Vec<i64> = latest.iter().map(|m| m.sequence_number).collect();
        assert_eq!(seqs, vec![5, 4, 3]);
        assert_eq!(latest[0].sender_name, "Ada");

        let before = store.messages_before(room.id, ids[2], 10).unwrap();
        let seqs: Vec<i64> = before.iter().map(|m| m.sequence_number).collect();
        assert_eq!(seqs, vec![2, 1]);

        let after = store.messages_after(room.id, ids[1], 2).unwrap();
        let seqs: Vec<i64> = after.iter().map(|m| m.sequence_number).collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[test]
    fn deleted_messages_are_hidden() {
        let (store, owner, room) = store_with_room();
        let first = send(&store, room.id, owner.id, 1);
        let second = send(&store, room.id, owner.id, 2);
        let third = send(&store, room.id, owner.id, 3);

        assert!(store.mark_message_deleted(second.id).unwrap());
        assert!(!store.mark_message_deleted(second.id).unwrap());

        let latest: Vec<_> = store
            .latest_messages(room.id, 10)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(latest, vec![third.id, first.id]);
        assert_eq!(store.messages_before(room.id, third.id, 10).unwrap().len(), 1);
        assert_eq!(store.messages_after(room.id, first.id, 10).unwrap().len(), 1);
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("parley.db");
        let path = path.to_str().unwrap();
        let user_id = {
            let store = SqliteChatStore::open_file(path, &ConnectionConfig::default()).unwrap();
            store.create_user("ada", "Ada").unwrap().id
        };
        let store = SqliteChatStore::open_file(path, &ConnectionConfig::default()).unwrap();
        assert!(store.find_user(user_id).unwrap().is_some());
    }
}
