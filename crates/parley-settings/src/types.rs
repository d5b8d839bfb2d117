//! Settings schema.
//!
//! Every struct uses `#[serde(default)]` so a partial settings file only
//! needs the keys it overrides.

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParleySettings {
    /// HTTP / WebSocket listener.
    pub server: ServerSettings,
    /// Process identity.
    pub node: NodeSettings,
    /// Shared state and pub/sub backend.
    pub redis: RedisSettings,
    /// Distributed bus de-duplication.
    pub bus: BusSettings,
    /// History paging.
    pub history: HistorySettings,
    /// Room defaults.
    pub rooms: RoomSettings,
    /// Message store.
    pub store: StoreSettings,
    /// Logging.
    pub logging: LoggingSettings,
}

/// Listener and per-connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Largest accepted inbound frame in bytes.
    pub max_message_size: usize,
    /// Seconds between server pings.
    pub ping_interval_secs: u64,
    /// Seconds of silence after which a client is dropped.
    pub pong_timeout_secs: u64,
    /// Outbound queue depth per connection.
    pub send_queue_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_message_size: 64 * 1024,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
            send_queue_capacity: 1024,
        }
    }
}

/// Process identity.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeSettings {
    /// Explicit process ID; falls back to `HOSTNAME`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,
}

/// Redis connection.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedisSettings {
    /// `redis://` URL. Absent runs single-node with in-process state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// De-duplication window for received envelopes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusSettings {
    /// How long an envelope ID is remembered.
    pub dedup_retention_ms: u64,
    /// Period of the background sweep.
    pub dedup_sweep_interval_ms: u64,
    /// Hard cap on remembered IDs.
    pub dedup_capacity: usize,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            dedup_retention_ms: 60_000,
            dedup_sweep_interval_ms: 30_000,
            dedup_capacity: 10_000,
        }
    }
}

/// History paging limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistorySettings {
    /// Page size when the request leaves it out.
    pub default_limit: u32,
    /// Server-side ceiling on page size.
    pub max_limit: u32,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 100,
        }
    }
}

/// Room defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomSettings {
    /// Member limit for new rooms that do not set one.
    pub default_max_members: u32,
    /// How many memberships are loaded when a user connects.
    pub membership_load_limit: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            default_max_members: 100,
            membership_load_limit: 100,
        }
    }
}

/// `SQLite` store.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Database file path (`~` is expanded).
    pub path: String,
    /// Connection pool size.
    pub pool_size: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: "~/.parley/parley.db".to_string(),
            pool_size: 8,
        }
    }
}

/// Logging.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
