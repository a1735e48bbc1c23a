//! # mptree
//!
//! A materialized-path tree engine: hierarchical rows stored flat, each
//! carrying its full position as a fixed-width path string.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TreeManager                          │
//! │  • add_root / add_child / add_sibling                      │
//! │  • move_node (subtree rewrite) / delete (prefix delete)    │
//! │  • children, descendants, ancestors, roots, siblings       │
//! │  • rebuild_tree_from_relationships / check                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                   (NodeFilter / NodeUpdate)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     NodeStore (trait)                       │
//! │  • InMemoryNodeStore: DashMap rows + path reservations     │
//! │  • SqlNodeStore: SQLite/MySQL via sqlx, unique path index  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Paths are concatenated base-36 segments, [`DEFAULT_STEP_LEN`] characters
//! each:
//!
//! ```text
//! 0001            depth 1   first root
//! 00010001        depth 2   its first child
//! 000100010003    depth 3   third child of that
//! ```
//!
//! Sorting rows by path gives a depth-first pre-order listing, and the
//! subtree of a node is every row whose path starts with the node's path.
//!
//! ## Quick Start
//!
//! ```rust
//! use mptree::{InMemoryNodeStore, Position, TreeManager};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mptree::TreeError> {
//!     let tree = TreeManager::new(InMemoryNodeStore::new());
//!
//!     let music = tree.add_root(json!({"name": "Music"})).await?;
//!     let jazz = tree.add_child(&music, json!({"name": "Jazz"})).await?;
//!     let rock = tree.add_child(&music, json!({"name": "Rock"})).await?;
//!     tree.add_child(&jazz, json!({"name": "Bebop"})).await?;
//!
//!     // Bebop follows Jazz to its new position
//!     tree.move_node(&jazz, &rock, Position::Right).await?;
//!
//!     for node in tree.get_descendants(&music, true).await? {
//!         println!("{:?} {}", node.path, node.payload["name"]);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`tree`]: the [`TreeManager`] and its admin/check helpers
//! - [`path`]: segment encoding and path arithmetic
//! - [`storage`]: the [`NodeStore`] contract and its backends
//! - [`resilience`]: conflict retries and per-parent locks for callers
//! - [`metrics`]: counters and latency histograms

pub mod config;
pub mod error;
pub mod metrics;
pub mod node;
pub mod path;
pub mod resilience;
pub mod storage;
pub mod tree;

pub use config::TreeConfig;
pub use error::TreeError;
pub use metrics::LatencyTimer;
pub use node::{NodeRelation, NodeUpdate, PlacementChange, TreeNode};
pub use path::{PathCodec, DEFAULT_STEP_LEN, MAX_STEP_LEN};
pub use resilience::locks::ParentLocks;
pub use resilience::retry::{retry_on_conflict, RetryConfig};
pub use storage::memory::InMemoryNodeStore;
pub use storage::sql::SqlNodeStore;
pub use storage::traits::{NodeFilter, NodeStore, PathMatch, PathOrder, StorageError};
pub use tree::admin::{indented_label, ORDERING_FIELD, TREE_MANAGED_FIELDS};
pub use tree::check::{TreeReport, Violation};
pub use tree::manager::TreeManager;
pub use tree::position::{Position, RelativePlacement, SiblingInsert};
