//! # parley-store
//!
//! Persistence for users, rooms, memberships and messages.
//!
//! The chat core depends only on the [`ChatStore`] trait. [`SqliteChatStore`]
//! implements it over an r2d2 pool of `SQLite` connections (WAL mode, foreign
//! keys on), with schema managed by embedded, versioned migrations.

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod migrations;
pub mod sqlite;
pub mod store;
pub mod types;

pub use connection::{ConnectionConfig, ConnectionPool};
pub use errors::{Result, StoreError};
pub use sqlite::SqliteChatStore;
pub use store::ChatStore;
pub use types::{ChatRoom, ChatRoomMember, NewMessage, NewRoom, StoredMessage, User};
