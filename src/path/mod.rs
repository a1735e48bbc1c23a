//! Materialized path encoding.
//!
//! # Layout
//!
//! ```text
//! 0001                 root #1            depth 1
//! 0001 0001            first child        depth 2
//! 0001 0002            second child       depth 2
//! 0001 0002 0001       grandchild         depth 3
//! 0002                 root #2            depth 1
//! ```
//!
//! Sorting the concatenated strings yields the rows above in exactly this
//! order, which is why subtree reads need nothing more than a prefix filter
//! ordered by path.

mod codec;

pub use codec::{PathCodec, DEFAULT_STEP_LEN, MAX_STEP_LEN};
