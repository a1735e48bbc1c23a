//! Chaos testing for the tree engine.
//!
//! Wraps a real store in [`FailingNodeStore`] to inject backend errors at
//! precise call counts, then checks what the engine reports and what state
//! it leaves behind.
//!
//! # Running Chaos Tests
//! ```bash
//! cargo test --test chaos -- --nocapture
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};

use mptree::{
    InMemoryNodeStore, NodeFilter, NodeRelation, NodeStore, NodeUpdate, Position, StorageError,
    TreeError, TreeManager, TreeNode, Violation,
};

// =============================================================================
// Failing Store Wrapper - Precise Error Injection
// =============================================================================

/// Passes calls through to `inner` until armed, then fails writes after a
/// given number of successful ones. Reads fail only when `fail_reads` is set.
pub struct FailingNodeStore<S: NodeStore> {
    inner: S,
    writes: AtomicU64,
    /// Writes allowed before failing (u64::MAX = never fail)
    fail_after_writes: AtomicU64,
    fail_reads: AtomicBool,
}

impl<S: NodeStore> FailingNodeStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            writes: AtomicU64::new(0),
            fail_after_writes: AtomicU64::new(u64::MAX),
            fail_reads: AtomicBool::new(false),
        }
    }

    /// Let `n` more writes through, then fail every write.
    pub fn fail_writes_after(&self, n: u64) {
        self.writes.store(0, Ordering::SeqCst);
        self.fail_after_writes.store(n, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.fail_after_writes.store(u64::MAX, Ordering::SeqCst);
        self.fail_reads.store(false, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn check_write(&self) -> Result<(), StorageError> {
        let n = self.writes.fetch_add(1, Ordering::SeqCst);
        if n >= self.fail_after_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected write failure".into()));
        }
        Ok(())
    }

    fn check_read(&self) -> Result<(), StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected read failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: NodeStore> NodeStore for FailingNodeStore<S> {
    async fn find_by_id(&self, id: &str) -> Result<Option<TreeNode>, StorageError> {
        self.check_read()?;
        self.inner.find_by_id(id).await
    }

    async fn find_many(&self, filter: &NodeFilter) -> Result<Vec<TreeNode>, StorageError> {
        self.check_read()?;
        self.inner.find_many(filter).await
    }

    async fn create(&self, payload: Value, path: &str, depth: u32) -> Result<TreeNode, StorageError> {
        self.check_write()?;
        self.inner.create(payload, path, depth).await
    }

    async fn update(&self, id: &str, update: NodeUpdate) -> Result<TreeNode, StorageError> {
        self.check_write()?;
        self.inner.update(id, update).await
    }

    async fn delete_many(&self, filter: &NodeFilter) -> Result<u64, StorageError> {
        self.check_write()?;
        self.inner.delete_many(filter).await
    }
}

fn failing_tree() -> TreeManager<FailingNodeStore<InMemoryNodeStore>> {
    TreeManager::new(FailingNodeStore::new(InMemoryNodeStore::new()))
}

async fn seed_subtree(
    tree: &TreeManager<FailingNodeStore<InMemoryNodeStore>>,
) -> (TreeNode, TreeNode, TreeNode) {
    let a = tree.add_root(json!({"name": "a"})).await.unwrap();
    let b = tree.add_root(json!({"name": "b"})).await.unwrap();
    let a1 = tree.add_child(&a, json!({"name": "a1"})).await.unwrap();
    tree.add_child(&a1, json!({"name": "a11"})).await.unwrap();
    tree.add_child(&a1, json!({"name": "a12"})).await.unwrap();
    (a, b, a1)
}

// =============================================================================
// Error propagation
// =============================================================================

#[tokio::test]
async fn chaos_read_failure_creates_nothing() {
    let tree = failing_tree();
    let root = tree.add_root(json!({})).await.unwrap();

    tree.store().fail_reads(true);
    let err = tree.add_child(&root, json!({})).await.unwrap_err();
    assert!(matches!(err, TreeError::Store(StorageError::Backend(_))));
    assert!(!err.is_validation());
    assert!(!err.is_conflict());

    tree.store().heal();
    assert!(tree.get_children(&root).await.unwrap().is_empty());
}

#[tokio::test]
async fn chaos_create_failure_propagates() {
    let tree = failing_tree();
    tree.store().fail_writes_after(0);
    let err = tree.add_root(json!({})).await.unwrap_err();
    assert!(err.to_string().contains("injected write failure"));
    assert!(tree.store().inner().is_empty());
}

#[tokio::test]
async fn chaos_validation_runs_before_any_store_call() {
    let tree = failing_tree();
    let (a, _, a1) = seed_subtree(&tree).await;

    tree.store().fail_reads(true);
    tree.store().fail_writes_after(0);

    let err = tree.move_node(&a, &a1, Position::LastChild).await.unwrap_err();
    assert!(matches!(err, TreeError::InvalidOperation(_)));

    let err = tree
        .add_sibling(&a, json!({}), Position::LastChild)
        .await
        .unwrap_err();
    assert!(matches!(err, TreeError::InvalidOperation(_)));
}

// =============================================================================
// Partial writes
// =============================================================================

#[tokio::test]
async fn chaos_move_interrupted_leaves_torn_subtree() {
    let tree = failing_tree();
    let (_, b, a1) = seed_subtree(&tree).await;

    // the node itself moves, then the first descendant update fails
    tree.store().fail_writes_after(1);
    let err = tree.move_node(&a1, &b, Position::LastChild).await.unwrap_err();
    assert!(matches!(err, TreeError::Store(StorageError::Backend(_))));
    tree.store().heal();

    let moved = tree.store().find_by_id(&a1.id).await.unwrap().unwrap();
    assert_eq!(moved.path.as_deref(), Some("00020001"));

    let report = tree.check().await.unwrap();
    let orphans = report
        .violations
        .iter()
        .filter(|v| matches!(v, Violation::Orphan { parent_path, .. } if parent_path == "00010001"))
        .count();
    assert_eq!(orphans, 2);
}

#[tokio::test]
async fn chaos_rebuild_repairs_torn_move() {
    let tree = failing_tree();
    let (a, b, a1) = seed_subtree(&tree).await;
    let rows = tree.store().inner().snapshot();
    let id_of = |name: &str| {
        rows.iter()
            .find(|n| n.payload["name"] == name)
            .map(|n| n.id.clone())
            .unwrap()
    };

    tree.store().fail_writes_after(2);
    assert!(tree.move_node(&a1, &b, Position::FirstChild).await.is_err());
    tree.store().heal();
    assert!(!tree.check().await.unwrap().is_consistent());

    let placed = tree
        .rebuild_tree_from_relationships(&[
            NodeRelation::root(a.id.clone()),
            NodeRelation::root(b.id.clone()),
            NodeRelation::child(a1.id.clone(), b.id.clone()),
            NodeRelation::child(id_of("a11"), a1.id.clone()),
            NodeRelation::child(id_of("a12"), a1.id.clone()),
        ])
        .await
        .unwrap();
    assert_eq!(placed, 5);

    let report = tree.check().await.unwrap();
    assert!(report.is_consistent(), "{:?}", report.violations);
    let a12 = tree.store().find_by_id(&id_of("a12")).await.unwrap().unwrap();
    assert_eq!(a12.path.as_deref(), Some("000200010002"));
}

#[tokio::test]
async fn chaos_rebuild_failure_leaves_rows_unplaced() {
    let tree = failing_tree();
    let (a, b, _) = seed_subtree(&tree).await;

    // both clears succeed, then the first placement fails
    tree.store().fail_writes_after(2);
    let err = tree
        .rebuild_tree_from_relationships(&[
            NodeRelation::root(a.id.clone()),
            NodeRelation::root(b.id.clone()),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, TreeError::Store(_)));
    tree.store().heal();

    let report = tree.check().await.unwrap();
    assert_eq!(report.unplaced, 2);
}

#[tokio::test]
async fn chaos_delete_failure_keeps_subtree() {
    let tree = failing_tree();
    let (a, _, _) = seed_subtree(&tree).await;

    tree.store().fail_writes_after(0);
    assert!(tree.delete(&a).await.is_err());
    tree.store().heal();
    assert_eq!(tree.count_descendants(&a).await.unwrap(), 3);
}
