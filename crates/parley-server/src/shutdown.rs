//! Process shutdown: one `CancellationToken` observed by every background task
//! and WebSocket session.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the process-wide cancellation token.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator with a fresh token.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the token, for tasks that should stop on shutdown.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal every holder of the token.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal shutdown, then wait up to `timeout` for `handles` to finish.
    ///
    /// Tasks still running after the timeout are aborted.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        self.shutdown();
        info!(tasks = handles.len(), ?timeout, "draining background tasks");

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!(?timeout, "shutdown drain timed out, aborting remaining tasks");
            for handle in aborts {
                handle.abort();
            }
        }
    }
}
