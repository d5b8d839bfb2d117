//! # parley-logging
//!
//! `tracing` subscriber setup for Parley binaries, plus an in-memory capture
//! layer ([`capture_logs`]) for asserting on log output in tests.

#![deny(unsafe_code)]

pub mod capture;

pub use capture::{CapturedEvent, CapturedLogs, capture_logs};

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over `level`. With `json` set, each event is
/// written as one JSON object per line; otherwise a compact human format is
/// used. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init fails only when a global subscriber is already set
    let _ = if json {
        builder.json().flatten_event(true).try_init()
    } else {
        builder.compact().try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        init_subscriber("warn", false);
        init_subscriber("debug", true);
        tracing::warn!("still logging");
    }
}
