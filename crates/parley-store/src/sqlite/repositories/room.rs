//! Room repository: the `chat_rooms` table.

use parley_core::{RoomId, UserId};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::sqlite::row::{ROOM_COLUMNS, now_text, room_from_row};
use crate::types::{ChatRoom, NewRoom};

/// Room repository.
pub struct RoomRepo;

impl RoomRepo {
    /// Insert a new active room.
    pub fn create(conn: &Connection, room: &NewRoom) -> Result<ChatRoom> {
        let _ = conn.execute(
            "INSERT INTO chat_rooms (name, description, room_type, max_members, is_active, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)",
            params![
                room.name,
                room.description,
                room.room_type.as_str(),
                room.max_members,
                room.created_by.get(),
                now_text(),
            ],
        )?;
        let id = RoomId(conn.last_insert_rowid());
        let created = conn.query_row(
            &format!("SELECT {ROOM_COLUMNS} FROM chat_rooms r WHERE r.id = ?1"),
            params![id.get()],
            room_from_row,
        )?;
        Ok(created)
    }

    /// Look up a room by ID, active or not.
    pub fn get(conn: &Connection, id: RoomId) -> Result<Option<ChatRoom>> {
        let room = conn
            .query_row(
                &format!("SELECT {ROOM_COLUMNS} FROM chat_rooms r WHERE r.id = ?1"),
                params![id.get()],
                room_from_row,
            )
            .optional()?;
        Ok(room)
    }

    /// Active rooms whose name contains `query`, newest first.
    pub fn search(conn: &Connection, query: &str, limit: usize) -> Result<Vec<ChatRoom>> {
        let pattern = format!("%{}%", escape_like(query));
        let mut stmt = conn.prepare(&format!(
            "SELECT {ROOM_COLUMNS} FROM chat_rooms r
             WHERE r.is_active = 1 AND r.name LIKE ?1 ESCAPE '\\'
             ORDER BY r.created_at DESC, r.id DESC
             LIMIT ?2"
        ))?;
        let rooms = stmt
            .query_map(params![pattern, limit_param(limit)], room_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rooms)
    }

    /// Active rooms where `user` holds an active membership, newest first.
    pub fn for_user(conn: &Connection, user: UserId, limit: usize) -> Result<Vec<ChatRoom>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {ROOM_COLUMNS} FROM chat_rooms r
             JOIN chat_room_members m ON m.room_id = r.id
             WHERE m.user_id = ?1 AND m.is_active = 1 AND r.is_active = 1
             ORDER BY r.created_at DESC, r.id DESC
             LIMIT ?2"
        ))?;
        let rooms = stmt
            .query_map(params![user.get(), limit_param(limit)], room_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rooms)
    }
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
