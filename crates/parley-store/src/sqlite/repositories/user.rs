//! User repository: the `users` table.

use parley_core::UserId;
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::sqlite::row::{USER_COLUMNS, now_text, user_from_row};
use crate::types::User;

/// User repository.
pub struct UserRepo;

impl UserRepo {
    /// Insert a new active user.
    pub fn create(conn: &Connection, username: &str, display_name: &str) -> Result<User> {
        let _ = conn.execute(
            "INSERT INTO users (username, display_name, is_active, created_at)
             VALUES (?1, ?2, 1, ?3)",
            params![username, display_name, now_text()],
        )?;
        let id = UserId(conn.last_insert_rowid());
        let user = conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id.get()],
            user_from_row,
        )?;
        Ok(user)
    }

    /// Look up a user by ID.
    pub fn get(conn: &Connection, id: UserId) -> Result<Option<User>> {
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.get()],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }
}
