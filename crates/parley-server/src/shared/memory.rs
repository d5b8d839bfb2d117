use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Result, SharedState};

/// In-process [`SharedState`] for single-node deployments and tests.
///
/// Counters and sets live in separate maps; a key is only ever used as one
/// or the other.
#[derive(Debug, Default)]
pub struct MemorySharedState {
    counters: DashMap<String, i64>,
    sets: DashMap<String, HashSet<String>>,
}

impl MemorySharedState {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedState for MemorySharedState {
    async fn incr(&self, key: &str) -> Result<i64> {
        let mut counter = self.counters.entry(key.to_owned()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self.sets.get(key).is_some_and(|set| set.contains(member)))
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self
            .sets
            .entry(key.to_owned())
            .or_default()
            .insert(member.to_owned()))
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let counter = self.counters.remove(key).is_some();
        let set = self.sets.remove(key).is_some();
        Ok(counter || set)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn incr_starts_at_one() {
        let state = MemorySharedState::new();
        assert_eq!(state.incr("c").await.unwrap(), 1);
        assert_eq!(state.incr("c").await.unwrap(), 2);
        assert_eq!(state.incr("other").await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_incr_has_no_gaps() {
        let state = Arc::new(MemorySharedState::new());
        let handles: Vec<_> = (0..64)
            .map(|_| {
                let state = Arc::clone(&state);
                tokio::spawn(async move { state.incr("seq").await.unwrap() })
            })
            .collect();
        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap());
        }
        values.sort_unstable();
        assert_eq!(values, (1..=64).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn set_operations() {
        let state = MemorySharedState::new();
        assert!(!state.set_contains("s", "1").await.unwrap());
        assert!(state.set_add("s", "1").await.unwrap());
        assert!(!state.set_add("s", "1").await.unwrap());
        assert!(state.set_add("s", "2").await.unwrap());
        assert!(state.set_contains("s", "1").await.unwrap());

        let mut members = state.set_members("s").await.unwrap();
        members.sort();
        assert_eq!(members, ["1", "2"]);

        assert!(state.delete("s").await.unwrap());
        assert!(!state.delete("s").await.unwrap());
        assert!(state.set_members("s").await.unwrap().is_empty());
    }
}
