//! Form-level helpers for admin screens.
//!
//! An admin form edits a node by picking a "relative to" object and a
//! [`RelativePlacement`]; these helpers map that onto tree operations.

use serde_json::Value;
use tracing::instrument;

use crate::error::TreeError;
use crate::node::{NodeUpdate, TreeNode};
use crate::storage::traits::{NodeStore, StorageError};
use crate::tree::manager::TreeManager;
use crate::tree::position::{Position, RelativePlacement};

/// Fields the engine owns. Forms must not expose them for editing.
pub const TREE_MANAGED_FIELDS: [&str; 2] = ["path", "depth"];

/// Listing order that renders a tree top to bottom.
pub const ORDERING_FIELD: &str = "path";

/// Label padded with one space per level, for flat select lists.
pub fn indented_label(node: &TreeNode, label: &str) -> String {
    let depth = node.depth.unwrap_or(0) as usize;
    format!("{}{label}", " ".repeat(depth))
}

impl<S: NodeStore> TreeManager<S> {
    /// Create a node from an admin form.
    ///
    /// No relative object makes a new root. `FirstChild` appends under the
    /// relative object (it becomes the last child, not the first).
    pub async fn create_relative(
        &self,
        relative: Option<&TreeNode>,
        payload: Value,
        placement: RelativePlacement,
    ) -> Result<TreeNode, TreeError> {
        match relative {
            None => self.add_root(payload).await,
            Some(rel) => match placement {
                RelativePlacement::FirstChild => self.add_child(rel, payload).await,
                RelativePlacement::After => self.add_sibling(rel, payload, Position::Right).await,
                RelativePlacement::Before => self.add_sibling(rel, payload, Position::Left).await,
            },
        }
    }

    /// Move an existing node from an admin form, then save its other fields.
    ///
    /// Without a relative object only the payload changes.
    #[instrument(skip(self, payload), err)]
    pub async fn relocate(
        &self,
        node_id: &str,
        relative_id: Option<&str>,
        placement: RelativePlacement,
        payload: Option<Value>,
    ) -> Result<TreeNode, TreeError> {
        let node = self.load(node_id).await?;
        let mut current = match relative_id {
            Some(rel_id) => {
                let target = self.load(rel_id).await?;
                let position = match placement {
                    RelativePlacement::FirstChild => Position::FirstChild,
                    RelativePlacement::After => Position::Right,
                    RelativePlacement::Before => Position::Left,
                };
                self.move_node(&node, &target, position).await?
            }
            None => node,
        };

        if let Some(payload) = payload {
            current = self
                .store()
                .update(&current.id, NodeUpdate::payload(payload))
                .await?;
        }
        Ok(current)
    }

    /// Delete a node and its subtree by id.
    pub async fn delete_by_id(&self, node_id: &str) -> Result<u64, TreeError> {
        let node = self.load(node_id).await?;
        self.delete(&node).await
    }

    async fn load(&self, id: &str) -> Result<TreeNode, TreeError> {
        Ok(self
            .store()
            .find_by_id(id)
            .await?
            .ok_or(StorageError::NotFound)?)
    }
}
