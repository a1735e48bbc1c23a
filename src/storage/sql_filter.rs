// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! NodeFilter -> SQL WHERE translation.
//!
//! # SQL Generated
//!
//! ```sql
//! path = ?                                         -- Exact
//! path IN (?, ?, ?)                                -- In
//! path LIKE ? ESCAPE '!'                           -- StartsWith ('0001%')
//! path LIKE ? ESCAPE '!' AND path <> ?             -- DescendantsOf
//! depth = ?
//! json_extract(payload, '$.name') = ?              -- SQLite field equality
//! JSON_UNQUOTE(JSON_EXTRACT(payload, '$.name')) = ? -- MySQL field equality
//! ```

use serde_json::Value;

use super::traits::{NodeFilter, PathMatch, PathOrder, StorageError};

/// SQL dialects reachable through the sqlx `Any` driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    MySql,
}

impl Dialect {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("sqlite:") {
            Dialect::Sqlite
        } else {
            Dialect::MySql
        }
    }
}

/// SQL parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Integer(i64),
    Numeric(f64),
}

/// Parameterized WHERE clause plus trailing ORDER BY / LIMIT.
#[derive(Debug, Clone, Default)]
pub struct SqlFilter {
    /// Conditions joined with AND, `1=1` when empty (without "WHERE")
    pub clause: String,
    /// ORDER BY / LIMIT suffix, possibly empty
    pub tail: String,
    pub params: Vec<SqlParam>,
}

pub struct FilterTranslator;

impl FilterTranslator {
    /// Translate with `?` placeholders.
    pub fn translate(filter: &NodeFilter, dialect: Dialect) -> Result<SqlFilter, StorageError> {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        match &filter.path {
            PathMatch::Any => {}
            PathMatch::Exact(path) => {
                conditions.push("path = ?".to_string());
                params.push(SqlParam::Text(path.clone()));
            }
            PathMatch::In(paths) if paths.is_empty() => conditions.push("1 = 0".to_string()),
            PathMatch::In(paths) => {
                let placeholders: Vec<&str> = paths.iter().map(|_| "?").collect();
                conditions.push(format!("path IN ({})", placeholders.join(", ")));
                params.extend(paths.iter().cloned().map(SqlParam::Text));
            }
            PathMatch::StartsWith(prefix) => {
                conditions.push("path LIKE ? ESCAPE '!'".to_string());
                params.push(SqlParam::Text(like_prefix(prefix)));
            }
            PathMatch::DescendantsOf(prefix) => {
                conditions.push("path LIKE ? ESCAPE '!' AND path <> ?".to_string());
                params.push(SqlParam::Text(like_prefix(prefix)));
                params.push(SqlParam::Text(prefix.clone()));
            }
        }

        if let Some(depth) = filter.depth {
            conditions.push("depth = ?".to_string());
            params.push(SqlParam::Integer(i64::from(depth)));
        }

        for (name, value) in &filter.fields {
            conditions.push(Self::field_condition(name, value, dialect, &mut params)?);
        }

        let clause = if conditions.is_empty() {
            "1=1".to_string()
        } else {
            conditions.join(" AND ")
        };

        let mut tail = String::new();
        match filter.order {
            Some(PathOrder::Asc) => tail.push_str(" ORDER BY path ASC"),
            Some(PathOrder::Desc) => tail.push_str(" ORDER BY path DESC"),
            None => {}
        }
        if let Some(limit) = filter.limit {
            tail.push_str(" LIMIT ?");
            params.push(SqlParam::Integer(limit as i64));
        }

        Ok(SqlFilter { clause, tail, params })
    }

    fn field_condition(
        name: &str,
        value: &Value,
        dialect: Dialect,
        params: &mut Vec<SqlParam>,
    ) -> Result<String, StorageError> {
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Err(StorageError::Backend(format!("Invalid filter field name '{name}'")));
        }
        let extract = format!("JSON_EXTRACT(payload, '$.{name}')");

        let condition = match value {
            Value::Null => format!("{extract} IS NULL"),
            Value::String(s) => {
                params.push(SqlParam::Text(s.clone()));
                match dialect {
                    Dialect::Sqlite => format!("{extract} = ?"),
                    Dialect::MySql => format!("JSON_UNQUOTE({extract}) = ?"),
                }
            }
            Value::Bool(b) => {
                params.push(SqlParam::Integer(i64::from(*b)));
                match dialect {
                    Dialect::Sqlite => format!("{extract} = ?"),
                    Dialect::MySql => format!("({extract} = TRUE) = ?"),
                }
            }
            Value::Number(n) => {
                match n.as_i64() {
                    Some(i) => params.push(SqlParam::Integer(i)),
                    None => params.push(SqlParam::Numeric(n.as_f64().unwrap_or_default())),
                }
                format!("{extract} = ?")
            }
            Value::Array(_) | Value::Object(_) => {
                return Err(StorageError::Backend(format!(
                    "Filter on field '{name}' must compare a scalar value"
                )));
            }
        };
        Ok(condition)
    }
}

/// `LIKE` pattern for a literal prefix, escaping with `!`.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '!') {
            pattern.push('!');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
