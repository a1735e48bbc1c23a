use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use super::traits::{NodeFilter, NodeStore, PathOrder, StorageError};
use crate::node::{NodeUpdate, PlacementChange, TreeNode};

/// `DashMap`-backed store. Ids are sequential integers rendered as strings.
///
/// With unique paths enforced (the default) a second row claiming an
/// existing path fails with [`StorageError::Conflict`], the same way a
/// `UNIQUE` index would.
pub struct InMemoryNodeStore {
    data: DashMap<String, TreeNode>,
    /// path -> id, maintained only when unique paths are enforced
    paths: DashMap<String, String>,
    next_id: AtomicU64,
    unique_paths: bool,
}

impl InMemoryNodeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_unique_paths(true)
    }

    /// A store that accepts duplicate paths, for reproducing corrupted trees.
    #[must_use]
    pub fn without_unique_paths() -> Self {
        Self::with_unique_paths(false)
    }

    #[must_use]
    pub fn with_unique_paths(unique_paths: bool) -> Self {
        Self {
            data: DashMap::new(),
            paths: DashMap::new(),
            next_id: AtomicU64::new(1),
            unique_paths,
        }
    }

    /// Insert a row with no path/depth, e.g. parent-pointer data awaiting a
    /// rebuild.
    pub fn insert_unplaced(&self, payload: Value) -> TreeNode {
        let node = TreeNode::unplaced(self.allocate_id(), payload);
        self.data.insert(node.id.clone(), node.clone());
        node
    }

    /// Every row, ordered by path (unplaced rows first).
    #[must_use]
    pub fn snapshot(&self) -> Vec<TreeNode> {
        let mut rows: Vec<TreeNode> = self.data.iter().map(|r| r.value().clone()).collect();
        rows.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.id.cmp(&b.id)));
        rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&self) {
        self.data.clear();
        self.paths.clear();
    }

    fn allocate_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// Claim `path` for `id`. Re-claiming a path the row already owns is fine.
    fn reserve_path(&self, path: &str, id: &str) -> Result<(), StorageError> {
        if !self.unique_paths {
            return Ok(());
        }
        match self.paths.entry(path.to_string()) {
            Entry::Occupied(owner) if owner.get() != id => Err(StorageError::Conflict {
                path: path.to_string(),
            }),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(id.to_string());
                Ok(())
            }
        }
    }

    fn release_path(&self, path: &str, id: &str) {
        if self.unique_paths {
            self.paths.remove_if(path, |_, owner| owner == id);
        }
    }
}

impl Default for InMemoryNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeStore for InMemoryNodeStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<TreeNode>, StorageError> {
        Ok(self.data.get(id).map(|r| r.value().clone()))
    }

    async fn find_many(&self, filter: &NodeFilter) -> Result<Vec<TreeNode>, StorageError> {
        let mut rows: Vec<TreeNode> = self
            .data
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();

        match filter.order {
            Some(PathOrder::Asc) => rows.sort_by(|a, b| a.path.cmp(&b.path)),
            Some(PathOrder::Desc) => rows.sort_by(|a, b| b.path.cmp(&a.path)),
            None => {}
        }
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn create(&self, payload: Value, path: &str, depth: u32) -> Result<TreeNode, StorageError> {
        let id = self.allocate_id();
        self.reserve_path(path, &id)?;
        let node = TreeNode::new(id.clone(), path, depth, payload);
        self.data.insert(id, node.clone());
        Ok(node)
    }

    async fn update(&self, id: &str, update: NodeUpdate) -> Result<TreeNode, StorageError> {
        let mut entry = self.data.get_mut(id).ok_or(StorageError::NotFound)?;
        let old_path = entry.path.clone();

        if let Some(PlacementChange::Set { path, .. }) = &update.placement {
            self.reserve_path(path, id)?;
        }
        update.apply_to(entry.value_mut());

        if let Some(old) = old_path {
            if entry.path.as_deref() != Some(old.as_str()) {
                self.release_path(&old, id);
            }
        }
        Ok(entry.value().clone())
    }

    async fn delete_many(&self, filter: &NodeFilter) -> Result<u64, StorageError> {
        let mut removed = Vec::new();
        self.data.retain(|_, node| {
            if filter.matches(node) {
                removed.push((node.id.clone(), node.path.clone()));
                false
            } else {
                true
            }
        });
        for (id, path) in &removed {
            if let Some(path) = path {
                self.release_path(path, id);
            }
        }
        Ok(removed.len() as u64)
    }

    async fn count(&self, filter: &NodeFilter) -> Result<u64, StorageError> {
        Ok(self.data.iter().filter(|r| filter.matches(r.value())).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = InMemoryNodeStore::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = InMemoryNodeStore::new();
        let node = store.create(json!({"name": "root"}), "0001", 1).await.unwrap();

        let found = store.find_by_id(&node.id).await.unwrap().unwrap();
        assert_eq!(found.path.as_deref(), Some("0001"));
        assert_eq!(found.depth, Some(1));
        assert_eq!(found.payload["name"], "root");
    }

    #[tokio::test]
    async fn test_find_nonexistent_returns_none() {
        let store = InMemoryNodeStore::new();
        assert!(store.find_by_id("404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_path_conflicts() {
        let store = InMemoryNodeStore::new();
        store.create(json!({}), "0001", 1).await.unwrap();

        let err = store.create(json!({}), "0001", 1).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict { ref path } if path == "0001"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicates_allowed_without_unique_paths() {
        let store = InMemoryNodeStore::without_unique_paths();
        store.create(json!({}), "0001", 1).await.unwrap();
        store.create(json!({}), "0001", 1).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_update_moves_path_reservation() {
        let store = InMemoryNodeStore::new();
        let a = store.create(json!({}), "0001", 1).await.unwrap();
        store.update(&a.id, NodeUpdate::placement("0002", 1)).await.unwrap();

        // old path is free again, new one is taken
        store.create(json!({}), "0001", 1).await.unwrap();
        assert!(store.create(json!({}), "0002", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_update_to_own_path_is_ok() {
        let store = InMemoryNodeStore::new();
        let a = store.create(json!({}), "0001", 1).await.unwrap();
        let same = store.update(&a.id, NodeUpdate::placement("0001", 1)).await.unwrap();
        assert_eq!(same.path.as_deref(), Some("0001"));
    }

    #[tokio::test]
    async fn test_update_conflict_leaves_row_untouched() {
        let store = InMemoryNodeStore::new();
        store.create(json!({}), "0001", 1).await.unwrap();
        let b = store.create(json!({}), "0002", 1).await.unwrap();

        assert!(store.update(&b.id, NodeUpdate::placement("0001", 1)).await.is_err());
        let b = store.find_by_id(&b.id).await.unwrap().unwrap();
        assert_eq!(b.path.as_deref(), Some("0002"));
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = InMemoryNodeStore::new();
        let err = store.update("nope", NodeUpdate::placement("0001", 1)).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
    }

    #[tokio::test]
    async fn test_find_many_orders_and_limits() {
        let store = InMemoryNodeStore::new();
        for path in ["0002", "0001", "00010001", "0003"] {
            store.create(json!({}), path, (path.len() / 4) as u32).await.unwrap();
        }

        let asc = store
            .find_many(&NodeFilter::all().order_by_path(PathOrder::Asc))
            .await
            .unwrap();
        let paths: Vec<_> = asc.iter().map(|n| n.path.clone().unwrap()).collect();
        assert_eq!(paths, vec!["0001", "00010001", "0002", "0003"]);

        let last_root = store
            .find_first(&NodeFilter::all().depth(1).order_by_path(PathOrder::Desc))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last_root.path.as_deref(), Some("0003"));
    }

    #[tokio::test]
    async fn test_delete_many_by_prefix() {
        let store = InMemoryNodeStore::new();
        for path in ["0001", "00010001", "000100010001", "0002"] {
            store.create(json!({}), path, (path.len() / 4) as u32).await.unwrap();
        }

        let removed = store
            .delete_many(&NodeFilter::all().path_starts_with("0001"))
            .await
            .unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.len(), 1);

        // freed paths can be reused
        store.create(json!({}), "0001", 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_unplaced_rows() {
        let store = InMemoryNodeStore::new();
        let row = store.insert_unplaced(json!({"legacy": true}));
        assert!(row.path.is_none());

        let placed = store
            .find_many(&NodeFilter::all().path_starts_with(""))
            .await
            .unwrap();
        assert!(placed.is_empty());
        assert_eq!(store.count(&NodeFilter::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = InMemoryNodeStore::new();
        for i in 1..=10u32 {
            store.create(json!({}), &format!("{i:04}"), 1).await.unwrap();
        }
        assert_eq!(store.len(), 10);

        store.clear();

        assert!(store.is_empty());
        store.create(json!({}), "0001", 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_creates_never_share_a_path() {
        let store = Arc::new(InMemoryNodeStore::new());
        let mut handles = vec![];

        // every task races for the same ten paths
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut won = 0;
                for i in 1..=10u32 {
                    if store.create(json!({}), &format!("{i:04}"), 1).await.is_ok() {
                        won += 1;
                    }
                }
                won
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 10);
        assert_eq!(store.len(), 10);
    }
}
