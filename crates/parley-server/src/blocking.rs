//! Store calls off the async worker threads.

use std::sync::Arc;

use parley_core::ChatError;
use parley_store::ChatStore;
use tokio::task;

/// Run `op` against `store` on the blocking pool. A panic in `op` comes back
/// as [`ChatError::Store`].
pub(crate) async fn with_store<T, F>(store: &Arc<dyn ChatStore>, op: F) -> Result<T, ChatError>
where
    F: FnOnce(&dyn ChatStore) -> Result<T, ChatError> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|e| ChatError::Store(format!("store task failed: {e}")))?
}
