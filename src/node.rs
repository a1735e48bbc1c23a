//! Tree node data structures.
//!
//! A [`TreeNode`] is one row of the caller's table. The engine reads and
//! writes only `path` and `depth`; `id` belongs to the store and `payload`
//! belongs to the caller.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TreeError;

/// One persisted row.
///
/// # Example
///
/// ```
/// use mptree::TreeNode;
/// use serde_json::json;
///
/// let node = TreeNode::unplaced("42", json!({"name": "Books"}));
/// assert!(node.path.is_none());
/// assert!(node.placement().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Opaque store-owned identifier
    pub id: String,
    /// Concatenated segments, root first. `None` until placed.
    #[serde(default)]
    pub path: Option<String>,
    /// 1-based level, `len(path) / step_len`. `None` until placed.
    #[serde(default)]
    pub depth: Option<u32>,
    /// Caller-defined fields, carried untouched
    #[serde(default)]
    pub payload: Value,
}

impl TreeNode {
    pub fn new(id: impl Into<String>, path: impl Into<String>, depth: u32, payload: Value) -> Self {
        Self {
            id: id.into(),
            path: Some(path.into()),
            depth: Some(depth),
            payload,
        }
    }

    /// A row that exists in the store but has not been given a position yet.
    pub fn unplaced(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            path: None,
            depth: None,
            payload,
        }
    }

    /// The node's path, or `InvalidNode` if it has none.
    pub fn placed_path(&self) -> Result<&str, TreeError> {
        match self.path.as_deref() {
            Some(p) if !p.is_empty() => Ok(p),
            _ => Err(TreeError::InvalidNode(format!("node '{}' has no path", self.id))),
        }
    }

    /// Path and depth together, or `InvalidNode` if either is missing.
    pub fn placement(&self) -> Result<(&str, u32), TreeError> {
        let path = self.placed_path()?;
        let depth = self
            .depth
            .ok_or_else(|| TreeError::InvalidNode(format!("node '{}' has no depth", self.id)))?;
        Ok((path, depth))
    }

    /// Payload field lookup (object payloads only).
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }
}

/// How an update touches the node's position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementChange {
    Set { path: String, depth: u32 },
    /// Back to `path = NULL, depth = NULL`
    Clear,
}

/// Partial update. `None` fields are left alone; a payload object is merged
/// into the stored one key by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeUpdate {
    pub placement: Option<PlacementChange>,
    pub payload: Option<Value>,
}

impl NodeUpdate {
    pub fn placement(path: impl Into<String>, depth: u32) -> Self {
        Self {
            placement: Some(PlacementChange::Set { path: path.into(), depth }),
            payload: None,
        }
    }

    pub fn clear_placement() -> Self {
        Self {
            placement: Some(PlacementChange::Clear),
            payload: None,
        }
    }

    pub fn payload(payload: Value) -> Self {
        Self {
            placement: None,
            payload: Some(payload),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.placement.is_none() && self.payload.is_none()
    }

    /// Apply this update to an in-memory copy of a row.
    pub fn apply_to(&self, node: &mut TreeNode) {
        match &self.placement {
            Some(PlacementChange::Set { path, depth }) => {
                node.path = Some(path.clone());
                node.depth = Some(*depth);
            }
            Some(PlacementChange::Clear) => {
                node.path = None;
                node.depth = None;
            }
            None => {}
        }
        if let Some(payload) = &self.payload {
            merge_payload(&mut node.payload, payload);
        }
    }
}

/// Shallow merge: object keys overwrite, anything else replaces wholesale.
pub(crate) fn merge_payload(target: &mut Value, patch: &Value) {
    match (target.as_object_mut(), patch.as_object()) {
        (Some(existing), Some(changes)) => {
            for (k, v) in changes {
                existing.insert(k.clone(), v.clone());
            }
        }
        _ => *target = patch.clone(),
    }
}

/// Parent-pointer input for [`TreeManager::rebuild_tree_from_relationships`].
///
/// [`TreeManager::rebuild_tree_from_relationships`]: crate::TreeManager::rebuild_tree_from_relationships
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRelation {
    pub id: String,
    pub parent_id: Option<String>,
}

impl NodeRelation {
    pub fn root(id: impl Into<String>) -> Self {
        Self { id: id.into(), parent_id: None }
    }

    pub fn child(id: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: Some(parent_id.into()),
        }
    }
}
