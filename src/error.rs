// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy for tree operations.
//!
//! Store failures travel unchanged inside [`TreeError::Store`]; everything
//! else is a caller error the engine detected before (or instead of) writing.

use crate::storage::traits::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeError {
    /// The node lacks `path`/`depth`, or carries a malformed path.
    #[error("Invalid node: {0}")]
    InvalidNode(String),

    /// Structurally illegal request (cycle, unknown position, ...).
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A segment value does not fit in `step_len` base-36 digits.
    #[error("Path capacity exceeded: segment {value} does not fit in {step_len} base-36 characters")]
    CapacityExceeded { value: u64, step_len: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StorageError),
}

impl TreeError {
    /// True for errors a UI would show as a validation message rather than
    /// a generic failure.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidNode(_) | Self::InvalidOperation(_) | Self::CapacityExceeded { .. }
        )
    }

    /// True when the backing store rejected a write because the path is taken.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(StorageError::Conflict { .. }))
    }
}
