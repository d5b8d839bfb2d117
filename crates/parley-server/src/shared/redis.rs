use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::info;

use super::{Result, SharedState};

/// [`SharedState`] on Redis (`INCR`, `SISMEMBER`, `SADD`, `SMEMBERS`, `DEL`).
///
/// Commands go over one multiplexed connection, cloned per call.
#[derive(Clone)]
pub struct RedisSharedState {
    conn: MultiplexedConnection,
}

impl RedisSharedState {
    /// Connect to `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        info!("connected to redis shared state");
        Ok(Self { conn })
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SharedState for RedisSharedState {
    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let found: bool = conn.sismember(key, member).await?;
        Ok(found)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let added: i64 = conn.sadd(key, member).await?;
        Ok(added > 0)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }
}
