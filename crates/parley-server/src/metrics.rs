//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle that renders `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// A handle backed by a recorder that is not installed globally.
///
/// Metrics recorded through the `metrics` macros do not reach it. Used by
/// tests and by embedders that manage their own recorder.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connections closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Messages queued to local connections (counter).
pub const FANOUT_DELIVERIES_TOTAL: &str = "fanout_deliveries_total";
/// Local sends that failed and pruned a connection (counter).
pub const FANOUT_SEND_FAILURES_TOTAL: &str = "fanout_send_failures_total";
/// Envelopes published (counter).
pub const BUS_PUBLISHED_TOTAL: &str = "bus_published_total";
/// Publish attempts that failed (counter).
pub const BUS_PUBLISH_ERRORS_TOTAL: &str = "bus_publish_errors_total";
/// Envelopes received for subscribed rooms (counter).
pub const BUS_RECEIVED_TOTAL: &str = "bus_received_total";
/// Envelopes dropped as duplicates (counter).
pub const BUS_DUPLICATES_TOTAL: &str = "bus_duplicates_total";
/// Envelopes dropped because this process was excluded (counter).
pub const BUS_SELF_EXCLUDED_TOTAL: &str = "bus_self_excluded_total";
/// Times the pub/sub connection was lost or failed to reopen (counter).
pub const BUS_RECONNECTS_TOTAL: &str = "bus_reconnects_total";
/// 1 while the pub/sub connection is up, 0 while reconnecting (gauge).
pub const BUS_CONNECTED: &str = "bus_connected";
/// Entries in the de-duplication window (gauge).
pub const DEDUP_WINDOW_SIZE: &str = "dedup_window_size";
/// Rooms this process is subscribed to (gauge).
pub const ROOM_SUBSCRIPTIONS_ACTIVE: &str = "room_subscriptions_active";
/// Messages accepted by the send path (counter, labels: type).
pub const MESSAGES_SENT_TOTAL: &str = "messages_sent_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_handle_renders() {
        let handle = detached_handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTION_DURATION_SECONDS,
            FANOUT_DELIVERIES_TOTAL,
            FANOUT_SEND_FAILURES_TOTAL,
            BUS_PUBLISHED_TOTAL,
            BUS_PUBLISH_ERRORS_TOTAL,
            BUS_RECEIVED_TOTAL,
            BUS_DUPLICATES_TOTAL,
            BUS_SELF_EXCLUDED_TOTAL,
            BUS_RECONNECTS_TOTAL,
            BUS_CONNECTED,
            DEDUP_WINDOW_SIZE,
            ROOM_SUBSCRIPTIONS_ACTIVE,
            MESSAGES_SENT_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
