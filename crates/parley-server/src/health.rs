//! `/health` endpoint body.

use std::time::Instant;

use parley_core::ProcessId;
use serde::Serialize;

/// Health check response.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` while the server is serving.
    pub status: &'static str,
    /// Seconds since start.
    pub uptime_secs: u64,
    /// This process's identity on the bus.
    pub process_id: ProcessId,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Distinct users with at least one registered connection.
    pub users: usize,
    /// Rooms this process listens to.
    pub subscribed_rooms: usize,
    /// Entries in the de-duplication window.
    pub dedup_entries: usize,
}

/// Live counters sampled for a health response.
#[derive(Clone, Copy, Debug, Default)]
pub struct HealthCounters {
    /// Open connections.
    pub connections: usize,
    /// Connected users.
    pub users: usize,
    /// Subscribed rooms.
    pub subscribed_rooms: usize,
    /// De-duplication entries.
    pub dedup_entries: usize,
}

/// Build a health response.
pub fn health_check(start: Instant, process_id: ProcessId, counters: HealthCounters) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start.elapsed().as_secs(),
        process_id,
        connections: counters.connections,
        users: counters.users,
        subscribed_rooms: counters.subscribed_rooms,
        dedup_entries: counters.dedup_entries,
    }
}
