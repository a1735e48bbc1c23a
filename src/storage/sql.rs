// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL storage backend for tree nodes.
//!
//! One row per node, payload kept as JSON text:
//! ```sql
//! CREATE TABLE tree_nodes (
//!   id VARCHAR(64) PRIMARY KEY,   -- UUID v4
//!   path VARCHAR(255) NULL,       -- concatenated segments, NULL until placed
//!   depth INT NULL,
//!   payload LONGTEXT NOT NULL,    -- caller fields as JSON
//!   UNIQUE INDEX idx_tree_nodes_path (path)
//! )
//! ```
//!
//! The unique index is what turns a path-allocation race into a
//! [`StorageError::Conflict`] instead of two rows sharing a path. Both SQLite
//! and MySQL allow any number of NULL paths under it.
//!
//! ## sqlx Any Driver Quirks
//!
//! Same as elsewhere in this crate: TEXT instead of native JSON, and
//! LONGTEXT may come back as bytes on MySQL, so reads fall back to `Vec<u8>`.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyPool, Row};
use std::sync::Once;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::sql_filter::{Dialect, FilterTranslator, SqlParam};
use super::traits::{NodeFilter, NodeStore, StorageError};
use crate::config::TreeConfig;
use crate::metrics;
use crate::node::{NodeUpdate, PlacementChange, TreeNode};
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// Unique-index violations become `Conflict`, everything else `Backend`.
fn write_error(e: sqlx::Error, path: Option<&str>) -> StorageError {
    let is_unique = e
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation());
    match (is_unique, path) {
        (true, Some(path)) => StorageError::Conflict { path: path.to_string() },
        _ => backend(e),
    }
}

/// SET fragments for a placement change, and the path it claims.
fn placement_assignments(
    placement: Option<&PlacementChange>,
) -> (Vec<&'static str>, Vec<SqlParam>, Option<&str>) {
    match placement {
        Some(PlacementChange::Set { path, depth }) => (
            vec!["path = ?", "depth = ?"],
            vec![SqlParam::Text(path.clone()), SqlParam::Integer(i64::from(*depth))],
            Some(path.as_str()),
        ),
        Some(PlacementChange::Clear) => (vec!["path = NULL", "depth = NULL"], Vec::new(), None),
        None => (Vec::new(), Vec::new(), None),
    }
}

pub struct SqlNodeStore {
    pool: AnyPool,
    dialect: Dialect,
    table: String,
    unique_paths: bool,
}

impl SqlNodeStore {
    /// Connect with startup-mode retry and create the table if missing.
    pub async fn new(config: &TreeConfig) -> Result<Self, StorageError> {
        let url = config
            .sql_url
            .as_deref()
            .ok_or_else(|| StorageError::Backend("sql_url is not configured".into()))?;
        install_drivers();

        let dialect = Dialect::from_url(url);
        let max_connections = config.sql_max_connections;

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(url)
                .await
                .map_err(backend)
        })
        .await?;

        let store = Self::from_pool(pool, dialect, config)?;
        if dialect == Dialect::Sqlite {
            store.enable_wal_mode().await?;
        }
        store.init_schema().await?;

        info!(table = %store.table, ?dialect, "SQL node store initialized");
        Ok(store)
    }

    /// Wrap an existing pool. Call [`init_schema`](Self::init_schema) yourself.
    pub fn from_pool(pool: AnyPool, dialect: Dialect, config: &TreeConfig) -> Result<Self, StorageError> {
        let table = config.table_name.clone();
        if table.is_empty() || !table.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Err(StorageError::Backend(format!("Invalid table name '{table}'")));
        }
        Ok(Self {
            pool,
            dialect,
            table,
            unique_paths: config.enforce_unique_paths,
        })
    }

    /// Get a clone of the connection pool for sharing.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;
        Ok(())
    }

    /// Create the node table and its path index if they don't exist.
    pub async fn init_schema(&self) -> Result<(), StorageError> {
        let table = &self.table;
        let unique = if self.unique_paths { "UNIQUE " } else { "" };

        let statements = match self.dialect {
            Dialect::Sqlite => vec![
                format!(
                    "CREATE TABLE IF NOT EXISTS {table} (
                        id TEXT PRIMARY KEY,
                        path TEXT,
                        depth INTEGER,
                        payload TEXT NOT NULL DEFAULT '{{}}'
                    )"
                ),
                format!("CREATE {unique}INDEX IF NOT EXISTS idx_{table}_path ON {table}(path)"),
                format!("CREATE INDEX IF NOT EXISTS idx_{table}_depth ON {table}(depth)"),
            ],
            Dialect::MySql => vec![format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id VARCHAR(64) PRIMARY KEY,
                    path VARCHAR(255) CHARACTER SET ascii COLLATE ascii_bin NULL,
                    depth INT NULL,
                    payload LONGTEXT NOT NULL,
                    {unique}INDEX idx_{table}_path (path),
                    INDEX idx_{table}_depth (depth)
                ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"
            )],
        };

        for stmt in statements {
            sqlx::query(&stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("Failed to init node schema: {}", e)))?;
        }
        Ok(())
    }

    /// Insert a row with no path/depth (parent-pointer data awaiting a rebuild).
    pub async fn insert_unplaced(&self, payload: Value) -> Result<TreeNode, StorageError> {
        let node = TreeNode::unplaced(uuid::Uuid::new_v4().to_string(), payload);
        let sql = format!("INSERT INTO {} (id, path, depth, payload) VALUES (?, NULL, NULL, ?)", self.table);
        sqlx::query(&sql)
            .bind(node.id.clone())
            .bind(node.payload.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(node)
    }

    fn bind_params<'q>(
        mut query: Query<'q, Any, AnyArguments<'q>>,
        params: &[SqlParam],
    ) -> Query<'q, Any, AnyArguments<'q>> {
        for param in params {
            query = match param {
                SqlParam::Text(s) => query.bind(s.clone()),
                SqlParam::Integer(i) => query.bind(*i),
                SqlParam::Numeric(n) => query.bind(*n),
            };
        }
        query
    }

    async fn write_placement(
        &self,
        id: &str,
        placement: &PlacementChange,
    ) -> Result<TreeNode, StorageError> {
        let (sets, mut params, claimed_path) = placement_assignments(Some(placement));
        params.push(SqlParam::Text(id.to_string()));
        let sql = format!("UPDATE {} SET {} WHERE id = ?", self.table, sets.join(", "));
        let failed = |e| {
            metrics::record_store_operation("sql", "update", "error");
            write_error(e, claimed_path)
        };

        let node = match self.dialect {
            Dialect::Sqlite => {
                let sql = format!("{sql} RETURNING id, path, depth, payload");
                let row = Self::bind_params(sqlx::query(&sql), &params)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(failed)?;
                row.as_ref().map(Self::row_to_node).transpose()?
            }
            Dialect::MySql => {
                Self::bind_params(sqlx::query(&sql), &params)
                    .execute(&self.pool)
                    .await
                    .map_err(failed)?;
                // rows_affected is 0 for no-op updates too; the read decides
                self.find_by_id(id).await?
            }
        };
        let node = node.ok_or(StorageError::NotFound)?;
        metrics::record_store_operation("sql", "update", "success");
        Ok(node)
    }

    async fn merge_and_write(
        &self,
        id: &str,
        placement: Option<PlacementChange>,
        patch: &Value,
    ) -> Result<TreeNode, StorageError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let lock = match self.dialect {
            Dialect::MySql => " FOR UPDATE",
            Dialect::Sqlite => "",
        };
        let sql = format!("SELECT id, path, depth, payload FROM {} WHERE id = ?{lock}", self.table);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;
        let mut node = row
            .as_ref()
            .map(Self::row_to_node)
            .transpose()?
            .ok_or(StorageError::NotFound)?;

        let update = NodeUpdate { placement, payload: Some(patch.clone()) };
        update.apply_to(&mut node);

        let (mut sets, mut params, claimed_path) = placement_assignments(update.placement.as_ref());
        sets.push("payload = ?");
        params.push(SqlParam::Text(node.payload.to_string()));
        params.push(SqlParam::Text(id.to_string()));

        let sql = format!("UPDATE {} SET {} WHERE id = ?", self.table, sets.join(", "));
        Self::bind_params(sqlx::query(&sql), &params)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                metrics::record_store_operation("sql", "update", "error");
                write_error(e, claimed_path)
            })?;
        tx.commit().await.map_err(backend)?;

        metrics::record_store_operation("sql", "update", "success");
        Ok(node)
    }

    fn row_to_node(row: &AnyRow) -> Result<TreeNode, StorageError> {
        let id: String = row.try_get("id").map_err(backend)?;
        let path: Option<String> = row.try_get::<Option<String>, _>("path").ok().flatten();
        let depth: Option<i64> = row.try_get::<Option<i64>, _>("depth").ok().flatten();

        let payload_text: Option<String> = row
            .try_get::<String, _>("payload")
            .ok()
            .or_else(|| {
                row.try_get::<Vec<u8>, _>("payload")
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
            });
        let payload = match payload_text {
            Some(text) if !text.is_empty() => serde_json::from_str(&text)
                .map_err(|e| StorageError::Backend(format!("Corrupt payload for node '{id}': {e}")))?,
            _ => Value::Null,
        };

        let depth = depth
            .map(u32::try_from)
            .transpose()
            .map_err(|_| StorageError::Backend(format!("Negative depth for node '{id}'")))?;

        Ok(TreeNode { id, path, depth, payload })
    }
}

#[async_trait]
impl NodeStore for SqlNodeStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<TreeNode>, StorageError> {
        let sql = format!("SELECT id, path, depth, payload FROM {} WHERE id = ?", self.table);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(Self::row_to_node).transpose()
    }

    #[instrument(skip(self), fields(table = %self.table))]
    async fn find_many(&self, filter: &NodeFilter) -> Result<Vec<TreeNode>, StorageError> {
        let translated = FilterTranslator::translate(filter, self.dialect)?;
        let sql = format!(
            "SELECT id, path, depth, payload FROM {} WHERE {}{}",
            self.table, translated.clause, translated.tail
        );
        let rows = Self::bind_params(sqlx::query(&sql), &translated.params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                metrics::record_store_operation("sql", "find_many", "error");
                backend(e)
            })?;
        debug!(rows = rows.len(), "find_many");
        rows.iter().map(Self::row_to_node).collect()
    }

    async fn create(&self, payload: Value, path: &str, depth: u32) -> Result<TreeNode, StorageError> {
        let node = TreeNode::new(uuid::Uuid::new_v4().to_string(), path, depth, payload);
        let sql = format!("INSERT INTO {} (id, path, depth, payload) VALUES (?, ?, ?, ?)", self.table);
        sqlx::query(&sql)
            .bind(node.id.clone())
            .bind(path.to_string())
            .bind(i64::from(depth))
            .bind(node.payload.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                metrics::record_store_operation("sql", "create", "error");
                write_error(e, Some(path))
            })?;
        metrics::record_store_operation("sql", "create", "success");
        Ok(node)
    }

    /// Placement-only updates skip the read: SQLite returns the row from the
    /// UPDATE itself, MySQL reads it back afterwards. Payload merges read and
    /// write in one transaction (row locked with `FOR UPDATE` on MySQL), so
    /// two concurrent merges cannot drop each other's keys. On SQLite the
    /// loser of such a race fails with a busy error instead.
    async fn update(&self, id: &str, update: NodeUpdate) -> Result<TreeNode, StorageError> {
        match (update.placement, update.payload) {
            (None, None) => self.find_by_id(id).await?.ok_or(StorageError::NotFound),
            (Some(placement), None) => self.write_placement(id, &placement).await,
            (placement, Some(patch)) => self.merge_and_write(id, placement, &patch).await,
        }
    }

    async fn delete_many(&self, filter: &NodeFilter) -> Result<u64, StorageError> {
        // ORDER BY / LIMIT are not portable on DELETE
        let unordered = NodeFilter {
            order: None,
            limit: None,
            ..filter.clone()
        };
        let translated = FilterTranslator::translate(&unordered, self.dialect)?;
        let sql = format!("DELETE FROM {} WHERE {}", self.table, translated.clause);
        let result = Self::bind_params(sqlx::query(&sql), &translated.params)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        metrics::record_store_operation("sql", "delete_many", "success");
        Ok(result.rows_affected())
    }

    async fn count(&self, filter: &NodeFilter) -> Result<u64, StorageError> {
        let unordered = NodeFilter {
            order: None,
            limit: None,
            ..filter.clone()
        };
        let translated = FilterTranslator::translate(&unordered, self.dialect)?;
        let sql = format!("SELECT COUNT(*) as cnt FROM {} WHERE {}", self.table, translated.clause);
        let row = Self::bind_params(sqlx::query(&sql), &translated.params)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        let count: i64 = row.try_get("cnt").map_err(backend)?;
        Ok(count as u64)
    }
}
