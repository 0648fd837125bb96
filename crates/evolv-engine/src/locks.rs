//! # Per-Entity Locks
//!
//! Single writer per order inside one process. A carrier webhook and the
//! customer's "I received it" click on the same order queue up here instead of
//! both reading version N. The version check in `commit` still catches writers
//! in other processes.
//!
//! Locks are held only across read → apply → commit, never across a call to
//! the gateway or the carrier.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Entries beyond this count trigger a sweep of idle locks.
const PRUNE_THRESHOLD: usize = 1024;

/// Registry of keyed async mutexes.
#[derive(Debug, Default, Clone)]
pub struct EntityLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

/// Held while a transition is computed and committed.
pub type EntityGuard = OwnedMutexGuard<()>;

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> EntityGuard {
        let entry = {
            let mut map = self.inner.lock().await;
            if map.len() > PRUNE_THRESHOLD {
                map.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }

    /// Number of keys currently tracked.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = EntityLocks::new();
        let guard = locks.lock("order:o-1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock("order:o-1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = EntityLocks::new();
        let _a = locks.lock("order:o-1").await;
        let _b = locks.lock("order:o-2").await;
        assert_eq!(locks.len().await, 2);
    }
}
