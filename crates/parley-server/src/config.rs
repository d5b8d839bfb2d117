//! Server configuration.

use std::time::Duration;

use parley_settings::ParleySettings;

use crate::bus::dedup::DedupConfig;
use crate::history::HistoryLimits;

/// Runtime configuration for a Parley server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Interval between server-initiated Ping frames.
    pub ping_interval: Duration,
    /// Silence after which a client is dropped.
    pub pong_timeout: Duration,
    /// Outbound queue depth per connection.
    pub send_queue_capacity: usize,
    /// Memberships loaded and joined when a user connects.
    pub membership_load_limit: usize,
    /// Member cap for rooms created without one.
    pub default_max_members: u32,
    /// History page size limits.
    pub history: HistoryLimits,
    /// De-duplication window tuning.
    pub dedup: DedupConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_message_size: 64 * 1024,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
            send_queue_capacity: 1024,
            membership_load_limit: 100,
            default_max_members: 100,
            history: HistoryLimits::default(),
            dedup: DedupConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &ParleySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_message_size: settings.server.max_message_size,
            ping_interval: Duration::from_secs(settings.server.ping_interval_secs),
            pong_timeout: Duration::from_secs(settings.server.pong_timeout_secs),
            send_queue_capacity: settings.server.send_queue_capacity,
            membership_load_limit: settings.rooms.membership_load_limit,
            default_max_members: settings.rooms.default_max_members,
            history: HistoryLimits {
                default_limit: settings.history.default_limit,
                max_limit: settings.history.max_limit,
            },
            dedup: DedupConfig {
                retention: Duration::from_millis(settings.bus.dedup_retention_ms),
                sweep_interval: Duration::from_millis(settings.bus.dedup_sweep_interval_ms),
                capacity: settings.bus.dedup_capacity,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_on_ephemeral_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
    }

    #[test]
    fn from_settings_maps_every_section() {
        let mut settings = ParleySettings::default();
        settings.server.port = 9000;
        settings.server.ping_interval_secs = 5;
        settings.bus.dedup_retention_ms = 1_500;
        settings.bus.dedup_capacity = 7;
        settings.history.max_limit = 20;
        settings.rooms.membership_load_limit = 3;

        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.ping_interval, Duration::from_secs(5));
        assert_eq!(cfg.dedup.retention, Duration::from_millis(1_500));
        assert_eq!(cfg.dedup.capacity, 7);
        assert_eq!(cfg.history.max_limit, 20);
        assert_eq!(cfg.membership_load_limit, 3);
    }
}
