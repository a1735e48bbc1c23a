//! Caller-side coordination for concurrent writers.
//!
//! The tree engine never retries and never locks. Path allocation is
//! read-max-then-write, so two writers under the same parent can race. Pick
//! one of the helpers here around mutating calls:
//!
//! - [`locks::ParentLocks`]: serialize writers per parent key
//! - [`retry::retry_on_conflict`]: let a unique path index reject the loser,
//!   then recompute and try again

pub mod locks;
pub mod retry;
