//! Node storage backends.
//!
//! - [`traits`]: the [`NodeStore`](traits::NodeStore) capability and its filter types
//! - [`memory`]: `DashMap` store, used by tests and single-process callers
//! - [`sql`]: SQLite/MySQL via the sqlx `Any` driver

pub mod memory;
pub mod sql;
pub mod sql_filter;
pub mod traits;
