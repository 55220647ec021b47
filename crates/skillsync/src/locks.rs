//! Per-repo mutual exclusion for the shared history store.
//!
//! Checkouts of different repos proceed in parallel; two tasks touching the
//! same `repo_id` (clone, fetch, worktree add/remove) are serialized.

use skills_core::RepoId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
pub struct RepoLocks {
    locks: Arc<Mutex<HashMap<RepoId, Arc<AsyncMutex<()>>>>>,
}

impl RepoLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the lock for `id`.
    fn lock_for(&self, id: &RepoId) -> Arc<AsyncMutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            map.entry(id.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Wait for exclusive ownership of `id`'s store subtree.
    pub async fn acquire(&self, id: &RepoId) -> OwnedMutexGuard<()> {
        self.lock_for(id).lock_owned().await
    }
}
