//! In-memory state store for tests and dry runs

use super::{RemoteState, StateLock, StateStore, TransactFn};
use crate::error::{CloudError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct MemoryStateStore {
    docs: tokio::sync::Mutex<HashMap<String, RemoteState>>,
    locks: Arc<Mutex<HashSet<String>>>,
    writes: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed writes across all keys
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, key: &str) -> Result<RemoteState> {
        let docs = self.docs.lock().await;
        Ok(docs
            .get(key)
            .cloned()
            .unwrap_or_else(|| RemoteState::new(key)))
    }

    async fn transact(&self, key: &str, f: TransactFn) -> Result<RemoteState> {
        let mut docs = self.docs.lock().await;
        let state = docs
            .entry(key.to_string())
            .or_insert_with(|| RemoteState::new(key));
        f(state);
        state.touch();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(state.clone())
    }

    async fn acquire_lock(&self, key: &str) -> Result<StateLock> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if !locks.insert(key.to_string()) {
            return Err(CloudError::LockError(format!(
                "State of {key} is locked by another run"
            )));
        }

        let locks = self.locks.clone();
        let owned = key.to_string();
        Ok(StateLock::new(key, move || {
            locks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&owned);
        }))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let docs = self.docs.lock().await;
        let mut keys: Vec<_> = docs.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ResourceState;

    #[tokio::test]
    async fn test_writes_are_counted() {
        let store = MemoryStateStore::new();
        store
            .put("doublee-prod", "vpc", ResourceState::new("vpc-1", "aws:ec2/vpc"))
            .await
            .unwrap();
        store.remove("doublee-prod", "vpc").await.unwrap();

        assert_eq!(store.writes(), 2);
        assert_eq!(store.load("doublee-prod").await.unwrap().serial, 2);
    }

    #[tokio::test]
    async fn test_lock_released_on_drop() {
        let store = MemoryStateStore::new();
        {
            let _lock = store.acquire_lock("doublee-prod").await.unwrap();
            assert!(store.is_locked("doublee-prod"));
            assert!(store.acquire_lock("doublee-prod").await.is_err());
        }
        assert!(!store.is_locked("doublee-prod"));
    }
}
