//! Tree operations: inserts, moves, deletes, queries and rebuilds.

pub mod admin;
pub mod check;
pub mod manager;
pub mod position;
