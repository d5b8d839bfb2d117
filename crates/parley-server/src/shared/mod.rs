//! Cross-process shared state: atomic counters and string sets.
//!
//! Only two facts live here: per-room sequence counters and each process's
//! set of subscribed rooms. Everything else is process-local.

mod memory;
mod redis;

pub use self::memory::MemorySharedState;
pub use self::redis::RedisSharedState;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from the shared-state backend.
#[derive(Debug, Error)]
pub enum SharedStateError {
    /// Redis command or connection failure.
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Result type for shared-state operations.
pub type Result<T> = std::result::Result<T, SharedStateError>;

/// Key/value operations every process must observe consistently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SharedState: Send + Sync {
    /// Atomically increment the integer at `key` and return the new value.
    /// A missing key counts from zero.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Whether `member` is in the set at `key`.
    async fn set_contains(&self, key: &str, member: &str) -> Result<bool>;

    /// Add `member` to the set at `key`. Returns whether it was newly added.
    async fn set_add(&self, key: &str, member: &str) -> Result<bool>;

    /// All members of the set at `key`.
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    /// Remove `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;
}
