//! `SQLite` backend: connection pool, migrations, per-table repositories and
//! the [`SqliteChatStore`] facade implementing [`ChatStore`](crate::ChatStore).

pub mod repositories;
pub(crate) mod row;
mod store;

pub use store::SqliteChatStore;
