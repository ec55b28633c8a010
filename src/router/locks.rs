//! Keyed mutual exclusion for conversation state.
//!
//! Every read-then-write sequence on a contact or session for the same
//! (tenant, handle) pair must run under the pair's lock. Different pairs
//! proceed in parallel. Entries are reclaimed once no worker holds or
//! waits on them, so the map tracks live conversations, not every handle
//! ever seen.

use crate::model::TenantId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct KeyedLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Held lock for one (tenant, handle) pair. Dropping it releases the
/// mutex and removes the map entry when nobody else is waiting on it.
pub struct ConversationGuard {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    key: String,
    inner: Option<OwnedMutexGuard<()>>,
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        // Release the mutex first; the guard owns its own Arc to it.
        self.inner = None;
        // A waiter holds another Arc clone, so strong_count == 1 means
        // the map's reference is the only one left. The predicate runs
        // under the shard lock, so a concurrent `lock` cannot clone the
        // Arc between the check and the removal.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a (tenant, handle) pair.
    pub async fn lock(&self, tenant_id: TenantId, handle: &str) -> ConversationGuard {
        let key = format!("{}:{}", tenant_id, handle);
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let inner = lock.lock_owned().await;
        ConversationGuard {
            locks: self.locks.clone(),
            key,
            inner: Some(inner),
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
