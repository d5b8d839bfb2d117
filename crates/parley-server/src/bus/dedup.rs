//! Bounded, time-limited record of envelope IDs already delivered.
//!
//! Entries expire after `retention` via a periodic sweep. Independently, each
//! insert evicts the oldest entries once the window holds more than
//! `capacity`, so memory stays bounded even when the sweep falls behind.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parley_core::EnvelopeId;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// De-duplication window tuning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DedupConfig {
    /// How long a delivered envelope ID is remembered.
    pub retention: Duration,
    /// Period of the background sweep.
    pub sweep_interval: Duration,
    /// Hard cap on remembered IDs.
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
            capacity: 10_000,
        }
    }
}

/// Envelope IDs seen by this process, with first-seen time.
#[derive(Debug)]
pub struct DedupWindow {
    seen: DashMap<EnvelopeId, Instant>,
    retention: Duration,
    capacity: usize,
}

impl DedupWindow {
    /// Create an empty window.
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            seen: DashMap::new(),
            retention: config.retention,
            capacity: config.capacity.max(1),
        }
    }

    /// Whether `id` has already been recorded.
    pub fn contains(&self, id: &EnvelopeId) -> bool {
        self.seen.contains_key(id)
    }

    /// Record `id` as delivered now. Returns `false` if it was already present.
    pub fn record(&self, id: EnvelopeId) -> bool {
        let inserted = self.seen.insert(id, Instant::now()).is_none();
        if inserted && self.seen.len() > self.capacity {
            self.evict_oldest();
        }
        inserted
    }

    fn evict_oldest(&self) {
        let mut entries: Vec<(EnvelopeId, Instant)> = self
            .seen
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        let excess = entries.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }
        entries.sort_by_key(|(_, seen_at)| *seen_at);
        for (id, _) in entries.into_iter().take(excess) {
            let _ = self.seen.remove(&id);
        }
        debug!(evicted = excess, "dedup window over capacity");
    }

    /// Drop entries older than the retention window. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let before = self.seen.len();
        let retention = self.retention;
        self.seen.retain(|_, seen_at| seen_at.elapsed() < retention);
        before.saturating_sub(self.seen.len())
    }

    /// Number of remembered IDs.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Spawn the periodic sweep. Runs until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let window = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately.
            let _ = ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = window.sweep();
                        if removed > 0 {
                            debug!(removed, remaining = window.len(), "dedup sweep");
                        }
                        #[allow(clippy::cast_precision_loss)]
                        metrics::gauge!(crate::metrics::DEDUP_WINDOW_SIZE).set(window.len() as f64);
                    }
                    () = cancel.cancelled() => break,
                }
            }
        })
    }
}
