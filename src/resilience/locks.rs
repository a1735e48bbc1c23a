//! Per-parent critical sections.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Key under which root-level writes (`add_root`, siblings of a root) lock.
pub const ROOT_KEY: &str = "";

/// One async mutex per parent key, created on first use.
///
/// Hold the guard across the whole tree call so the read-max and the write
/// happen with no other writer under the same parent:
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), mptree::TreeError> {
/// use mptree::{InMemoryNodeStore, ParentLocks, TreeManager};
/// use serde_json::json;
///
/// let tree = TreeManager::new(InMemoryNodeStore::new());
/// let locks = ParentLocks::new();
///
/// let root = {
///     let _guard = locks.lock(mptree::resilience::locks::ROOT_KEY).await;
///     tree.add_root(json!({})).await?
/// };
/// let _guard = locks.lock(&root.id).await;
/// tree.add_child(&root, json!({})).await?;
/// # Ok(()) }
/// ```
#[derive(Debug, Default)]
pub struct ParentLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ParentLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Drop mutexes nobody is holding or waiting on.
    pub fn prune(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
