//! Error types for the store.

use parley_core::ChatError;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Which migration failed and why.
        message: String,
    },

    /// Filesystem error preparing the database location.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        ChatError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::ErrorCode;

    #[test]
    fn converts_to_internal_chat_error() {
        let err: ChatError = StoreError::Migration {
            message: "bad schema".into(),
        }
        .into();
        assert_eq!(err.code(), ErrorCode::InternalError);
        assert!(err.to_string().contains("bad schema"));
    }

    #[test]
    fn migration_display() {
        let err = StoreError::Migration {
            message: "v1 failed".into(),
        };
        assert_eq!(err.to_string(), "migration error: v1 failed");
    }
}
