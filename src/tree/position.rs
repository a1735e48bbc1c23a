//! Placement vocabulary.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::TreeError;

/// Where a node goes relative to a reference/target node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Position {
    FirstChild,
    LastChild,
    FirstSibling,
    /// Immediately before the reference
    Left,
    /// Immediately after the reference
    Right,
    LastSibling,
}

impl Position {
    pub fn as_str(&self) -> &'static str {
        match self {
            Position::FirstChild => "first-child",
            Position::LastChild => "last-child",
            Position::FirstSibling => "first-sibling",
            Position::Left => "left",
            Position::Right => "right",
            Position::LastSibling => "last-sibling",
        }
    }

    pub fn is_child(&self) -> bool {
        matches!(self, Position::FirstChild | Position::LastChild)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Position {
    type Err = TreeError;

    /// Accepts kebab or snake case: `first-child`, `last_sibling`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('_', "-").as_str() {
            "first-child" => Ok(Position::FirstChild),
            "last-child" => Ok(Position::LastChild),
            "first-sibling" => Ok(Position::FirstSibling),
            "left" => Ok(Position::Left),
            "right" => Ok(Position::Right),
            "last-sibling" => Ok(Position::LastSibling),
            _ => Err(TreeError::InvalidOperation(format!("Invalid position: {s}"))),
        }
    }
}

/// How sibling inserts find a free segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiblingInsert {
    /// Take `reference ± 1` (or `min - 1` / `max + 1`) as-is. Densely numbered
    /// siblings make `left`, `first-*`, and a repeated `right` land on an
    /// occupied segment.
    #[default]
    Direct,
    /// Before claiming an occupied segment, shift it and every higher sibling
    /// one place right, subtrees included.
    Shift,
}

/// The admin form's "position" choice relative to a picked object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativePlacement {
    FirstChild,
    After,
    Before,
}

impl FromStr for RelativePlacement {
    type Err = TreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first_child" => Ok(RelativePlacement::FirstChild),
            "after" => Ok(RelativePlacement::After),
            "before" => Ok(RelativePlacement::Before),
            _ => Err(TreeError::InvalidOperation(format!(
                "Invalid position value '{s}': must be one of first_child, after, before"
            ))),
        }
    }
}
