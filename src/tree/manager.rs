// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tree-shape operations over a [`NodeStore`].
//!
//! The manager holds no node state. Every call reads what it needs from the
//! store, computes new `path`/`depth` values, and writes them back.
//!
//! # Concurrency
//!
//! Nothing here is atomic across store calls:
//! - inserts read the current maximum segment, then create `max + 1`; two
//!   writers under one parent can pick the same path
//! - `move_node` rewrites the node, then each descendant, one update at a time;
//!   readers in between see a half-moved subtree, and a failed update leaves
//!   it that way
//!
//! Serialize writers per parent ([`ParentLocks`](crate::ParentLocks)), or
//! enforce unique paths in the store and retry conflicts
//! ([`retry_on_conflict`](crate::retry_on_conflict)). Wrap calls in a store
//! transaction if torn moves are unacceptable.

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use std::collections::{HashMap, HashSet};

use crate::config::TreeConfig;
use crate::error::TreeError;
use crate::metrics::{self, LatencyTimer};
use crate::node::{NodeRelation, NodeUpdate, TreeNode};
use crate::path::PathCodec;
use crate::storage::traits::{NodeFilter, NodeStore, PathOrder, StorageError};
use crate::tree::position::{Position, SiblingInsert};

/// Materialized-path tree engine.
///
/// # Example
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), mptree::TreeError> {
/// use mptree::{InMemoryNodeStore, Position, TreeManager};
/// use serde_json::json;
///
/// let tree = TreeManager::new(InMemoryNodeStore::new());
///
/// let books = tree.add_root(json!({"name": "Books"})).await?;
/// let fiction = tree.add_child(&books, json!({"name": "Fiction"})).await?;
/// tree.add_sibling(&fiction, json!({"name": "Poetry"}), Position::Right).await?;
///
/// assert_eq!(fiction.path.as_deref(), Some("00010001"));
/// assert_eq!(tree.get_children(&books).await?.len(), 2);
/// # Ok(()) }
/// ```
pub struct TreeManager<S> {
    store: S,
    codec: PathCodec,
    sibling_insert: SiblingInsert,
}

impl<S: NodeStore> TreeManager<S> {
    /// Default segment width and direct sibling inserts.
    pub fn new(store: S) -> Self {
        Self {
            store,
            codec: PathCodec::default(),
            sibling_insert: SiblingInsert::Direct,
        }
    }

    pub fn with_config(store: S, config: &TreeConfig) -> Result<Self, TreeError> {
        config.validate()?;
        Ok(Self {
            store,
            codec: PathCodec::new(config.step_len)?,
            sibling_insert: config.sibling_insert,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn codec(&self) -> &PathCodec {
        &self.codec
    }

    pub fn step_len(&self) -> usize {
        self.codec.step_len()
    }

    pub fn sibling_insert(&self) -> SiblingInsert {
        self.sibling_insert
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Inserts
    // ═══════════════════════════════════════════════════════════════════════

    /// Append a new root after the current last root.
    #[instrument(skip(self, payload), err)]
    pub async fn add_root(&self, payload: Value) -> Result<TreeNode, TreeError> {
        let mut timer = LatencyTimer::new("add_root");
        let path = self.trailing_slot(None, 1).await?;
        debug!(%path, "placing root");
        let node = self.store.create(payload, &path, 1).await?;
        Ok(timer.succeed(node))
    }

    /// Append a new last child under `parent`.
    #[instrument(skip(self, parent, payload), fields(parent = %parent.id), err)]
    pub async fn add_child(&self, parent: &TreeNode, payload: Value) -> Result<TreeNode, TreeError> {
        let mut timer = LatencyTimer::new("add_child");
        let (parent_path, parent_depth) = parent.placement()?;
        let depth = parent_depth + 1;
        let path = self.trailing_slot(Some(parent_path), depth).await?;
        debug!(%path, depth, "placing child");
        let node = self.store.create(payload, &path, depth).await?;
        Ok(timer.succeed(node))
    }

    /// Insert a sibling of `reference`. Child positions are rejected.
    ///
    /// With [`SiblingInsert::Direct`], `Left` takes `reference - 1` and
    /// `FirstSibling` takes `first - 1` (never below 1): on densely numbered
    /// siblings that slot is already taken, and so is `reference + 1` for a
    /// second `Right` on the same reference. A unique-path store reports
    /// that as [`StorageError::Conflict`].
    #[instrument(skip(self, reference, payload), fields(reference = %reference.id), err)]
    pub async fn add_sibling(
        &self,
        reference: &TreeNode,
        payload: Value,
        position: Position,
    ) -> Result<TreeNode, TreeError> {
        let mut timer = LatencyTimer::new("add_sibling");
        let (ref_path, depth) = reference.placement()?;
        if position.is_child() {
            return Err(TreeError::InvalidOperation(format!(
                "'{position}' is not a sibling position"
            )));
        }
        let path = self.sibling_slot(ref_path, depth, position).await?;
        debug!(%path, depth, "placing sibling");
        let node = self.store.create(payload, &path, depth).await?;
        Ok(timer.succeed(node))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Move / delete
    // ═══════════════════════════════════════════════════════════════════════

    /// Relocate `node` and its whole subtree relative to `target`.
    ///
    /// Costs one update per row in the subtree. Returns the node as stored
    /// at its new position.
    #[instrument(skip(self, node, target), fields(node = %node.id, target = %target.id), err)]
    pub async fn move_node(
        &self,
        node: &TreeNode,
        target: &TreeNode,
        position: Position,
    ) -> Result<TreeNode, TreeError> {
        let mut timer = LatencyTimer::new("move");
        let (node_path, _) = node.placement()?;
        let (target_path, target_depth) = target.placement()?;

        if target_path.starts_with(node_path) {
            return Err(TreeError::InvalidOperation(format!(
                "cannot move node '{}' into its own subtree",
                node.id
            )));
        }

        let (new_path, new_depth) = match position {
            Position::FirstChild => (
                self.leading_slot(Some(target_path), target_depth + 1).await?,
                target_depth + 1,
            ),
            Position::LastChild => (
                self.trailing_slot(Some(target_path), target_depth + 1).await?,
                target_depth + 1,
            ),
            _ => (
                self.sibling_slot(target_path, target_depth, position).await?,
                target_depth,
            ),
        };

        // making room may have renumbered the node being moved
        let current = match self.sibling_insert {
            SiblingInsert::Direct => node.clone(),
            SiblingInsert::Shift => self
                .store
                .find_by_id(&node.id)
                .await?
                .ok_or(StorageError::NotFound)?,
        };

        let moved = self.relocate_subtree(&current, &new_path, new_depth).await?;
        Ok(timer.succeed(moved))
    }

    /// Remove `node` and every row under it. Returns the number of rows removed.
    #[instrument(skip(self, node), fields(node = %node.id), err)]
    pub async fn delete(&self, node: &TreeNode) -> Result<u64, TreeError> {
        let mut timer = LatencyTimer::new("delete");
        let path = node.placed_path()?;
        let removed = self
            .store
            .delete_many(&NodeFilter::all().path_starts_with(path))
            .await?;
        debug!(path, removed, "deleted subtree");
        Ok(timer.succeed(removed))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════════

    /// Direct children, in sibling order.
    pub async fn get_children(&self, node: &TreeNode) -> Result<Vec<TreeNode>, TreeError> {
        let (path, depth) = node.placement()?;
        let filter = NodeFilter::all()
            .descendants_of(path)
            .depth(depth + 1)
            .order_by_path(PathOrder::Asc);
        Ok(self.store.find_many(&filter).await?)
    }

    /// Whole subtree in pre-order, optionally starting with `node` itself.
    pub async fn get_descendants(
        &self,
        node: &TreeNode,
        include_self: bool,
    ) -> Result<Vec<TreeNode>, TreeError> {
        let path = node.placed_path()?;
        let filter = if include_self {
            NodeFilter::all().path_starts_with(path)
        } else {
            NodeFilter::all().descendants_of(path)
        };
        Ok(self.store.find_many(&filter.order_by_path(PathOrder::Asc)).await?)
    }

    /// Size of the subtree below `node`.
    pub async fn count_descendants(&self, node: &TreeNode) -> Result<u64, TreeError> {
        let path = node.placed_path()?;
        Ok(self.store.count(&NodeFilter::all().descendants_of(path)).await?)
    }

    /// Ancestors root first, fetched with a single path-in-set lookup.
    pub async fn get_ancestors(
        &self,
        node: &TreeNode,
        include_self: bool,
    ) -> Result<Vec<TreeNode>, TreeError> {
        let path = node.placed_path()?;
        let candidates = self.codec.ancestor_paths(path, include_self);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let filter = NodeFilter::all()
            .path_in(candidates)
            .order_by_path(PathOrder::Asc);
        Ok(self.store.find_many(&filter).await?)
    }

    /// `None` for roots and for nodes whose parent row is missing.
    pub async fn get_parent(&self, node: &TreeNode) -> Result<Option<TreeNode>, TreeError> {
        let path = node.placed_path()?;
        match self.codec.parent_path(path) {
            Some(parent) => Ok(self.store.find_first(&NodeFilter::all().path_eq(parent)).await?),
            None => Ok(None),
        }
    }

    /// Nodes sharing `node`'s parent (other roots, for a root).
    pub async fn get_siblings(
        &self,
        node: &TreeNode,
        include_self: bool,
    ) -> Result<Vec<TreeNode>, TreeError> {
        let (path, depth) = node.placement()?;
        let filter = self
            .sibling_filter(self.codec.parent_path(path), depth)
            .order_by_path(PathOrder::Asc);
        let mut siblings = self.store.find_many(&filter).await?;
        if !include_self {
            siblings.retain(|s| s.id != node.id);
        }
        Ok(siblings)
    }

    pub async fn get_roots(&self) -> Result<Vec<TreeNode>, TreeError> {
        let filter = self.sibling_filter(None, 1).order_by_path(PathOrder::Asc);
        Ok(self.store.find_many(&filter).await?)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Bulk rebuild
    // ═══════════════════════════════════════════════════════════════════════

    /// Renumber the listed rows from parent pointers.
    ///
    /// Placements of every listed row are cleared first, then roots (items
    /// with no parent) and each sibling group are numbered from 1 in input
    /// order, depth-first. The result is dense and collision-free even over a
    /// unique path index. A repeated id keeps its first entry; later entries
    /// are ignored and take no sibling number. Items that cannot be reached
    /// from a root (dangling parent, cycle) stay unplaced. Returns the number
    /// placed.
    ///
    /// Not atomic: a store failure part-way leaves the remaining rows
    /// unplaced.
    #[instrument(skip(self, items), fields(items = items.len()), err)]
    pub async fn rebuild_tree_from_relationships(
        &self,
        items: &[NodeRelation],
    ) -> Result<u64, TreeError> {
        let mut timer = LatencyTimer::new("rebuild");

        let mut seen = HashSet::with_capacity(items.len());
        let mut unique = Vec::with_capacity(items.len());
        for item in items {
            if seen.insert(item.id.as_str()) {
                unique.push(item);
            } else {
                warn!(id = %item.id, "repeated id in rebuild input, keeping first entry");
            }
        }

        let mut roots = Vec::new();
        let mut children: HashMap<&str, Vec<&NodeRelation>> = HashMap::new();
        for item in &unique {
            match item.parent_id.as_deref() {
                None => roots.push(*item),
                Some(parent) => children.entry(parent).or_default().push(*item),
            }
        }

        for item in &unique {
            self.store.update(&item.id, NodeUpdate::clear_placement()).await?;
        }

        // explicit stack keeps pre-order without async recursion
        let mut stack: Vec<(&NodeRelation, String, u32)> = Vec::with_capacity(roots.len());
        for (i, root) in roots.iter().enumerate().rev() {
            stack.push((*root, self.codec.child_path(None, i as u64 + 1)?, 1));
        }

        let mut placed = HashSet::new();
        while let Some((item, path, depth)) = stack.pop() {
            // each unique id sits in exactly one sibling list, so it is reached once
            placed.insert(item.id.as_str());
            self.store
                .update(&item.id, NodeUpdate::placement(path.as_str(), depth))
                .await?;

            if let Some(kids) = children.get(item.id.as_str()) {
                for (i, kid) in kids.iter().enumerate().rev() {
                    let kid_path = self.codec.child_path(Some(&path), i as u64 + 1)?;
                    stack.push((*kid, kid_path, depth + 1));
                }
            }
        }

        let skipped = unique
            .iter()
            .filter(|item| !placed.contains(item.id.as_str()))
            .count();
        if skipped > 0 {
            warn!(skipped, "rebuild left items unreachable from any root unplaced");
        }
        metrics::record_rebuild(placed.len() as u64, skipped);
        info!(placed = placed.len(), skipped, "tree rebuilt from relationships");

        Ok(timer.succeed(placed.len() as u64))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Placement helpers
    // ═══════════════════════════════════════════════════════════════════════

    /// Rows at `depth` directly under `parent` (roots when `None`).
    fn sibling_filter(&self, parent: Option<&str>, depth: u32) -> NodeFilter {
        match parent {
            Some(p) => NodeFilter::all().descendants_of(p).depth(depth),
            // empty prefix keeps unplaced rows out
            None => NodeFilter::all().path_starts_with("").depth(depth),
        }
    }

    /// Lowest or highest occupied segment under `parent`.
    async fn edge_segment(
        &self,
        parent: Option<&str>,
        depth: u32,
        order: PathOrder,
    ) -> Result<Option<u64>, TreeError> {
        let filter = self.sibling_filter(parent, depth).order_by_path(order);
        match self.store.find_first(&filter).await? {
            Some(row) => Ok(Some(self.codec.segment_at(row.placed_path()?, parent)?)),
            None => Ok(None),
        }
    }

    /// Path after the last sibling, or slot 1 when there are none.
    async fn trailing_slot(&self, parent: Option<&str>, depth: u32) -> Result<String, TreeError> {
        let next = match self.edge_segment(parent, depth, PathOrder::Desc).await? {
            Some(last) => last + 1,
            None => 1,
        };
        self.codec.child_path(parent, next)
    }

    /// Path before the first sibling, or slot 1 when there are none.
    async fn leading_slot(&self, parent: Option<&str>, depth: u32) -> Result<String, TreeError> {
        let slot = match self.edge_segment(parent, depth, PathOrder::Asc).await? {
            None => 1,
            Some(first) if first > 1 => first - 1,
            Some(first) => match self.sibling_insert {
                SiblingInsert::Direct => 1,
                SiblingInsert::Shift => {
                    self.make_room(parent, depth, first).await?;
                    first
                }
            },
        };
        self.codec.child_path(parent, slot)
    }

    /// Path for a sibling-set position relative to `ref_path`.
    async fn sibling_slot(
        &self,
        ref_path: &str,
        depth: u32,
        position: Position,
    ) -> Result<String, TreeError> {
        let parent = self.codec.parent_path(ref_path);
        match position {
            Position::FirstSibling => self.leading_slot(parent, depth).await,
            Position::LastSibling => self.trailing_slot(parent, depth).await,
            Position::Left => {
                let own = self.codec.own_segment(ref_path)?;
                let slot = match self.sibling_insert {
                    SiblingInsert::Direct => own.saturating_sub(1).max(1),
                    SiblingInsert::Shift => {
                        self.make_room(parent, depth, own).await?;
                        own
                    }
                };
                self.codec.child_path(parent, slot)
            }
            Position::Right => {
                let slot = self.codec.own_segment(ref_path)? + 1;
                if self.sibling_insert == SiblingInsert::Shift {
                    self.make_room(parent, depth, slot).await?;
                }
                self.codec.child_path(parent, slot)
            }
            Position::FirstChild | Position::LastChild => Err(TreeError::InvalidOperation(
                format!("'{position}' is not a sibling position"),
            )),
        }
    }

    /// Free `slot` under `parent` by shifting it and every higher sibling one
    /// segment right, highest first so no write lands on an occupied path.
    async fn make_room(&self, parent: Option<&str>, depth: u32, slot: u64) -> Result<(), TreeError> {
        let filter = self.sibling_filter(parent, depth).order_by_path(PathOrder::Desc);
        let siblings = self.store.find_many(&filter).await?;

        let mut to_shift = Vec::new();
        for sibling in siblings {
            let segment = self.codec.segment_at(sibling.placed_path()?, parent)?;
            if segment < slot {
                break;
            }
            to_shift.push((sibling, segment));
        }
        if to_shift.last().map(|(_, segment)| *segment) != Some(slot) {
            return Ok(());
        }

        // the highest sibling goes first, so capacity fails before any write
        for (sibling, segment) in &to_shift {
            let new_path = self.codec.child_path(parent, segment + 1)?;
            self.relocate_subtree(sibling, &new_path, depth).await?;
        }
        debug!(slot, shifted = to_shift.len(), "made room among siblings");
        Ok(())
    }

    /// Rewrite `node` to `(new_path, new_depth)` and every descendant by
    /// prefix substitution.
    async fn relocate_subtree(
        &self,
        node: &TreeNode,
        new_path: &str,
        new_depth: u32,
    ) -> Result<TreeNode, TreeError> {
        let (old_path, old_depth) = node.placement()?;
        let descendants = self
            .store
            .find_many(
                &NodeFilter::all()
                    .descendants_of(old_path)
                    .order_by_path(PathOrder::Asc),
            )
            .await?;
        let depth_delta = i64::from(new_depth) - i64::from(old_depth);

        let moved = self
            .store
            .update(&node.id, NodeUpdate::placement(new_path, new_depth))
            .await?;

        for descendant in &descendants {
            let (path, depth) = descendant.placement()?;
            let path = self.codec.rebase(path, old_path, new_path)?;
            let depth = u32::try_from(i64::from(depth) + depth_delta).map_err(|_| {
                TreeError::InvalidNode(format!("node '{}' would get a negative depth", descendant.id))
            })?;
            self.store
                .update(&descendant.id, NodeUpdate::placement(path, depth))
                .await?;
        }

        metrics::record_subtree_rewrite(descendants.len() + 1);
        debug!(from = old_path, to = new_path, rows = descendants.len() + 1, "relocated subtree");
        Ok(moved)
    }
}
