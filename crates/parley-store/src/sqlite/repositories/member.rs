//! Membership repository: the `chat_room_members` table.
//!
//! One row per `(room, user)` pair. Leaving deactivates the row and a later
//! join re-activates it.

use parley_core::rooms::MemberRole;
use parley_core::{RoomId, UserId};
use rusqlite::{Connection, params};

use crate::errors::Result;
use crate::sqlite::row::{MEMBER_COLUMNS, member_from_row, now_text};
use crate::types::ChatRoomMember;

/// Membership repository.
pub struct MemberRepo;

impl MemberRepo {
    /// Insert or re-activate a membership.
    pub fn upsert_active(
        conn: &Connection,
        room: RoomId,
        user: UserId,
        role: MemberRole,
    ) -> Result<ChatRoomMember> {
        let _ = conn.execute(
            "INSERT INTO chat_room_members (room_id, user_id, role, is_active, joined_at)
             VALUES (?1, ?2, ?3, 1, ?4)
             ON CONFLICT (room_id, user_id) DO UPDATE SET
               role = excluded.role,
               is_active = 1,
               joined_at = excluded.joined_at,
               left_at = NULL",
            params![room.get(), user.get(), role.as_str(), now_text()],
        )?;
        let member = conn.query_row(
            &format!(
                "SELECT {MEMBER_COLUMNS} FROM chat_room_members WHERE room_id = ?1 AND user_id = ?2"
            ),
            params![room.get(), user.get()],
            member_from_row,
        )?;
        Ok(member)
    }

    /// Mark an active membership as left. Returns whether one was active.
    pub fn deactivate(conn: &Connection, room: RoomId, user: UserId) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE chat_room_members SET is_active = 0, left_at = ?3
             WHERE room_id = ?1 AND user_id = ?2 AND is_active = 1",
            params![room.get(), user.get(), now_text()],
        )?;
        Ok(changed > 0)
    }

    /// Whether `user` is an active member of `room`.
    pub fn is_active(conn: &Connection, room: RoomId, user: UserId) -> Result<bool> {
        let exists: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM chat_room_members
                            WHERE room_id = ?1 AND user_id = ?2 AND is_active = 1)",
            params![room.get(), user.get()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Number of active members in `room`.
    pub fn count_active(conn: &Connection, room: RoomId) -> Result<u32> {
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM chat_room_members WHERE room_id = ?1 AND is_active = 1",
            params![room.get()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Active memberships of `room`, oldest join first.
    pub fn active_for_room(conn: &Connection, room: RoomId) -> Result<Vec<ChatRoomMember>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMBER_COLUMNS} FROM chat_room_members
             WHERE room_id = ?1 AND is_active = 1
             ORDER BY joined_at ASC, id ASC"
        ))?;
        let members = stmt
            .query_map(params![room.get()], member_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(members)
    }
}
