// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fixed-width base-36 path segments.
//!
//! A path is the concatenation of one segment per level, root first:
//! `0001` is the first root, `00010002` its second child.
//!
//! Every segment is exactly `step_len` characters wide, so ancestry is a
//! string prefix test and lexicographic order is pre-order traversal.

use crate::error::TreeError;

/// Segment width used when none is configured.
pub const DEFAULT_STEP_LEN: usize = 4;

/// Widest segment whose capacity (`36^step_len`) still fits in a `u64`.
pub const MAX_STEP_LEN: usize = 12;

const ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Encodes and decodes path segments for a fixed segment width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathCodec {
    step_len: usize,
    capacity: u64,
}

impl Default for PathCodec {
    fn default() -> Self {
        Self {
            step_len: DEFAULT_STEP_LEN,
            capacity: 36u64.pow(DEFAULT_STEP_LEN as u32),
        }
    }
}

impl PathCodec {
    pub fn new(step_len: usize) -> Result<Self, TreeError> {
        if step_len == 0 || step_len > MAX_STEP_LEN {
            return Err(TreeError::Config(format!(
                "step_len must be between 1 and {MAX_STEP_LEN}, got {step_len}"
            )));
        }
        Ok(Self {
            step_len,
            capacity: 36u64.pow(step_len as u32),
        })
    }

    #[inline]
    pub fn step_len(&self) -> usize {
        self.step_len
    }

    /// Number of distinct segment values, i.e. the sibling ceiling per parent.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Encode `n` as upper-case base-36, left-padded with `'0'`.
    ///
    /// ```
    /// use mptree::PathCodec;
    ///
    /// let codec = PathCodec::default();
    /// assert_eq!(codec.encode(1).unwrap(), "0001");
    /// assert_eq!(codec.encode(36).unwrap(), "0010");
    /// assert!(codec.encode(36u64.pow(4)).is_err());
    /// ```
    pub fn encode(&self, n: u64) -> Result<String, TreeError> {
        if n >= self.capacity {
            return Err(TreeError::CapacityExceeded {
                value: n,
                step_len: self.step_len,
            });
        }
        let mut digits = vec![b'0'; self.step_len];
        let mut rest = n;
        for slot in digits.iter_mut().rev() {
            *slot = ALPHABET[(rest % 36) as usize];
            rest /= 36;
            if rest == 0 {
                break;
            }
        }
        // ALPHABET is ASCII
        Ok(digits.into_iter().map(char::from).collect())
    }

    /// Parse one segment. Accepts either letter case; the width must match.
    pub fn decode(&self, segment: &str) -> Result<u64, TreeError> {
        if segment.len() != self.step_len || !segment.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(TreeError::InvalidNode(format!(
                "malformed path segment '{segment}'"
            )));
        }
        u64::from_str_radix(segment, 36)
            .map_err(|e| TreeError::InvalidNode(format!("malformed path segment '{segment}': {e}")))
    }

    /// `path` minus its last segment, or `None` for a root (single segment).
    pub fn parent_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        if path.len() <= self.step_len {
            return None;
        }
        path.get(..path.len() - self.step_len)
    }

    /// Decode the segment right after `parent_path` inside `path`.
    /// A `None` parent addresses the root segment.
    pub fn segment_at(&self, path: &str, parent_path: Option<&str>) -> Result<u64, TreeError> {
        let start = parent_path.map_or(0, str::len);
        let segment = path
            .get(start..start + self.step_len)
            .ok_or_else(|| TreeError::InvalidNode(format!("path '{path}' has no segment at offset {start}")))?;
        self.decode(segment)
    }

    /// Decode the trailing segment of `path`.
    pub fn own_segment(&self, path: &str) -> Result<u64, TreeError> {
        self.segment_at(path, self.parent_path(path))
    }

    /// Path of the `n`th slot under `parent` (or the `n`th root).
    pub fn child_path(&self, parent: Option<&str>, n: u64) -> Result<String, TreeError> {
        let segment = self.encode(n)?;
        Ok(match parent {
            Some(p) => format!("{p}{segment}"),
            None => segment,
        })
    }

    /// Depth implied by the path length. Errors on empty or ragged paths.
    pub fn depth_of(&self, path: &str) -> Result<u32, TreeError> {
        if path.is_empty() || path.len() % self.step_len != 0 {
            return Err(TreeError::InvalidNode(format!(
                "path '{path}' is not a whole number of {}-character segments",
                self.step_len
            )));
        }
        Ok((path.len() / self.step_len) as u32)
    }

    /// Every segment of `path` decodes cleanly and the length is whole.
    pub fn is_well_formed(&self, path: &str) -> bool {
        self.depth_of(path).is_ok()
            && (0..path.len())
                .step_by(self.step_len)
                .all(|i| path.get(i..i + self.step_len).is_some_and(|s| self.decode(s).is_ok()))
    }

    /// Ancestor paths root first: `00010002` -> `["0001"]`, plus itself when
    /// `include_self`.
    pub fn ancestor_paths(&self, path: &str, include_self: bool) -> Vec<String> {
        let end = if include_self {
            path.len()
        } else {
            path.len().saturating_sub(self.step_len)
        };
        (self.step_len..=end)
            .step_by(self.step_len)
            .filter_map(|i| path.get(..i).map(str::to_string))
            .collect()
    }

    /// Replace the `old_prefix` of `path` with `new_prefix`.
    pub fn rebase(&self, path: &str, old_prefix: &str, new_prefix: &str) -> Result<String, TreeError> {
        let rest = path.strip_prefix(old_prefix).ok_or_else(|| {
            TreeError::InvalidNode(format!("path '{path}' is not under '{old_prefix}'"))
        })?;
        Ok(format!("{new_prefix}{rest}"))
    }
}
