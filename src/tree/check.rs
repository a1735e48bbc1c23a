// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Full-scan consistency check of stored paths.

use std::collections::{HashMap, HashSet};

use tracing::{info, instrument, warn};

use crate::error::TreeError;
use crate::storage::traits::{NodeFilter, NodeStore, PathOrder};
use crate::tree::manager::TreeManager;

/// A broken tree-shape invariant on one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Stored depth disagrees with `len(path) / step_len`
    DepthMismatch {
        id: String,
        expected: u32,
        actual: Option<u32>,
    },
    /// Ragged length or a segment that isn't base-36
    MalformedPath { id: String, path: String },
    /// Second row seen with an already used path
    DuplicatePath { id: String, other_id: String, path: String },
    /// No row holds the parent path
    Orphan { id: String, parent_path: String },
}

#[derive(Debug, Clone, Default)]
pub struct TreeReport {
    /// Rows scanned
    pub nodes: usize,
    /// Rows without a path
    pub unplaced: usize,
    pub violations: Vec<Violation>,
}

impl TreeReport {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

impl<S: NodeStore> TreeManager<S> {
    /// Scan every row and report tree-shape violations.
    ///
    /// Reads the whole table; meant for tests, repairs and after a rebuild.
    #[instrument(skip(self), err)]
    pub async fn check(&self) -> Result<TreeReport, TreeError> {
        let rows = self
            .store()
            .find_many(&NodeFilter::all().order_by_path(PathOrder::Asc))
            .await?;
        let codec = self.codec();

        let mut report = TreeReport {
            nodes: rows.len(),
            ..Default::default()
        };
        let mut owners: HashMap<&str, &str> = HashMap::new();
        let mut well_formed = Vec::new();

        for node in &rows {
            let Some(path) = node.path.as_deref().filter(|p| !p.is_empty()) else {
                report.unplaced += 1;
                continue;
            };
            if !codec.is_well_formed(path) {
                report.violations.push(Violation::MalformedPath {
                    id: node.id.clone(),
                    path: path.to_string(),
                });
                continue;
            }
            if let Some(other) = owners.insert(path, node.id.as_str()) {
                report.violations.push(Violation::DuplicatePath {
                    id: node.id.clone(),
                    other_id: other.to_string(),
                    path: path.to_string(),
                });
            }
            let expected = codec.depth_of(path)?;
            if node.depth != Some(expected) {
                report.violations.push(Violation::DepthMismatch {
                    id: node.id.clone(),
                    expected,
                    actual: node.depth,
                });
            }
            well_formed.push((node.id.as_str(), path));
        }

        let present: HashSet<&str> = owners.keys().copied().collect();
        for (id, path) in well_formed {
            if let Some(parent) = codec.parent_path(path) {
                if !present.contains(parent) {
                    report.violations.push(Violation::Orphan {
                        id: id.to_string(),
                        parent_path: parent.to_string(),
                    });
                }
            }
        }

        if report.is_consistent() {
            info!(nodes = report.nodes, unplaced = report.unplaced, "tree is consistent");
        } else {
            warn!(violations = report.violations.len(), "tree has violations");
        }
        Ok(report)
    }
}
