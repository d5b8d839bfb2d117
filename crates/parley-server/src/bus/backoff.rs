//! Jittered exponential backoff for reconnecting to the bus.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

const INITIAL_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(30);
const MULTIPLIER: f64 = 1.5;

/// Delay sequence growing by 1.5x per attempt up to a cap, with ±20% jitter.
#[derive(Clone, Debug)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Self::with_limits(INITIAL_DELAY, MAX_DELAY)
    }

    pub(crate) fn with_limits(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay before the next attempt.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let base = self.current.as_secs_f64();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        let jitter = 0.8 + 0.4 * f64::from(nanos % 1000) / 1000.0;
        let cap = self.max.as_secs_f64();
        self.current = Duration::from_secs_f64((base * MULTIPLIER).min(cap));
        Duration::from_secs_f64((base * jitter).min(cap))
    }

    /// Start over after a connection has been established.
    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
    }
}
