use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::node::{NodeUpdate, TreeNode};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Node not found")]
    NotFound,
    #[error("Path already taken: {path}")]
    Conflict { path: String },
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Predicate on the `path` column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PathMatch {
    #[default]
    Any,
    Exact(String),
    In(Vec<String>),
    /// Prefix match, the prefix itself included
    StartsWith(String),
    /// Prefix match, the prefix itself excluded
    DescendantsOf(String),
}

impl PathMatch {
    pub fn matches(&self, path: Option<&str>) -> bool {
        match (self, path) {
            (PathMatch::Any, _) => true,
            (_, None) => false,
            (PathMatch::Exact(p), Some(path)) => path == p,
            (PathMatch::In(set), Some(path)) => set.iter().any(|p| p == path),
            (PathMatch::StartsWith(prefix), Some(path)) => path.starts_with(prefix.as_str()),
            (PathMatch::DescendantsOf(prefix), Some(path)) => {
                path.len() > prefix.len() && path.starts_with(prefix.as_str())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathOrder {
    Asc,
    Desc,
}

/// Everything the tree engine ever asks a store to select.
///
/// ```
/// use mptree::{NodeFilter, PathOrder};
///
/// let children = NodeFilter::all()
///     .descendants_of("0001")
///     .depth(2)
///     .order_by_path(PathOrder::Asc);
/// assert_eq!(children.depth, Some(2));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeFilter {
    pub path: PathMatch,
    pub depth: Option<u32>,
    /// Equality on top-level payload fields
    pub fields: BTreeMap<String, Value>,
    pub order: Option<PathOrder>,
    pub limit: Option<usize>,
}

impl NodeFilter {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn path_eq(mut self, path: impl Into<String>) -> Self {
        self.path = PathMatch::Exact(path.into());
        self
    }

    #[must_use]
    pub fn path_in(mut self, paths: Vec<String>) -> Self {
        self.path = PathMatch::In(paths);
        self
    }

    #[must_use]
    pub fn path_starts_with(mut self, prefix: impl Into<String>) -> Self {
        self.path = PathMatch::StartsWith(prefix.into());
        self
    }

    #[must_use]
    pub fn descendants_of(mut self, prefix: impl Into<String>) -> Self {
        self.path = PathMatch::DescendantsOf(prefix.into());
        self
    }

    #[must_use]
    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }

    #[must_use]
    pub fn field_eq(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn order_by_path(mut self, order: PathOrder) -> Self {
        self.order = Some(order);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Row predicate, ignoring ordering and limit.
    pub fn matches(&self, node: &TreeNode) -> bool {
        if !self.path.matches(node.path.as_deref()) {
            return false;
        }
        if let Some(depth) = self.depth {
            if node.depth != Some(depth) {
                return false;
            }
        }
        self.fields
            .iter()
            .all(|(name, expected)| node.payload.get(name) == Some(expected))
    }
}

/// The persistence capability the tree engine is written against.
///
/// Implementations own ids and payloads; the engine only reads rows through
/// [`NodeFilter`] and writes `path`/`depth` through [`NodeUpdate`]. None of
/// the methods are expected to be atomic with each other.
#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<TreeNode>, StorageError>;

    /// Matching rows, honouring `order` and `limit`.
    async fn find_many(&self, filter: &NodeFilter) -> Result<Vec<TreeNode>, StorageError>;

    async fn create(&self, payload: Value, path: &str, depth: u32) -> Result<TreeNode, StorageError>;

    /// Returns the row as stored after the update, `NotFound` if absent.
    async fn update(&self, id: &str, update: NodeUpdate) -> Result<TreeNode, StorageError>;

    /// Returns the number of rows removed.
    async fn delete_many(&self, filter: &NodeFilter) -> Result<u64, StorageError>;

    /// First row of `find_many`. Default implementation forces `limit(1)`.
    async fn find_first(&self, filter: &NodeFilter) -> Result<Option<TreeNode>, StorageError> {
        let rows = self.find_many(&filter.clone().limit(1)).await?;
        Ok(rows.into_iter().next())
    }

    /// Default implementation counts `find_many` results.
    async fn count(&self, filter: &NodeFilter) -> Result<u64, StorageError> {
        Ok(self.find_many(filter).await?.len() as u64)
    }
}

#[async_trait]
impl<S: NodeStore + ?Sized> NodeStore for Arc<S> {
    async fn find_by_id(&self, id: &str) -> Result<Option<TreeNode>, StorageError> {
        (**self).find_by_id(id).await
    }

    async fn find_many(&self, filter: &NodeFilter) -> Result<Vec<TreeNode>, StorageError> {
        (**self).find_many(filter).await
    }

    async fn create(&self, payload: Value, path: &str, depth: u32) -> Result<TreeNode, StorageError> {
        (**self).create(payload, path, depth).await
    }

    async fn update(&self, id: &str, update: NodeUpdate) -> Result<TreeNode, StorageError> {
        (**self).update(id, update).await
    }

    async fn delete_many(&self, filter: &NodeFilter) -> Result<u64, StorageError> {
        (**self).delete_many(filter).await
    }

    async fn find_first(&self, filter: &NodeFilter) -> Result<Option<TreeNode>, StorageError> {
        (**self).find_first(filter).await
    }

    async fn count(&self, filter: &NodeFilter) -> Result<u64, StorageError> {
        (**self).count(filter).await
    }
}
