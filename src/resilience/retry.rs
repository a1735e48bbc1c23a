// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! Two uses in this crate:
//! - connecting to the SQL backend ([`RetryConfig::startup`])
//! - the unique-constraint-plus-retry pattern for concurrent tree writers
//!   ([`retry_on_conflict`] with [`RetryConfig::conflict`])
//!
//! # Example
//!
//! ```
//! use mptree::RetryConfig;
//!
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, Some(5));
//!
//! let conflict = RetryConfig::conflict();
//! assert_eq!(conflict.max_retries, Some(8));
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::TreeError;
use crate::metrics;

/// Configuration for connection/operation retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts; `None` retries forever
    pub max_retries: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::conflict()
    }
}

impl RetryConfig {
    /// Fast-fail retry for initial startup connection.
    /// Attempts 5 times with exponential backoff, failing after ~5 seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Short backoff for lost path-allocation races. Contention is local to
    /// one parent, so the next attempt usually wins quickly.
    #[must_use]
    pub fn conflict() -> Self {
        Self {
            max_retries: Some(8),
            initial_delay: Duration::from_millis(2),
            max_delay: Duration::from_millis(100),
            factor: 2.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.factor).min(self.max_delay)
    }
}

/// Retry `operation` on any error until it succeeds or attempts run out.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_when(operation_name, config, |_| true, operation).await
}

/// Retry a tree write while it fails with a path conflict.
///
/// The operation must recompute its placement on every attempt (call the
/// [`TreeManager`](crate::TreeManager) method inside the closure); any
/// other error is returned immediately.
///
/// ```no_run
/// # async fn demo(tree: &mptree::TreeManager<mptree::InMemoryNodeStore>, parent: &mptree::TreeNode)
/// #     -> Result<(), mptree::TreeError> {
/// use mptree::{retry_on_conflict, RetryConfig};
/// use serde_json::json;
///
/// let child = retry_on_conflict("add_child", &RetryConfig::conflict(), || {
///     tree.add_child(parent, json!({"name": "leaf"}))
/// })
/// .await?;
/// # Ok(()) }
/// ```
pub async fn retry_on_conflict<F, Fut, T>(
    operation_name: &str,
    config: &RetryConfig,
    operation: F,
) -> Result<T, TreeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TreeError>>,
{
    retry_when(operation_name, config, TreeError::is_conflict, operation).await
}

async fn retry_when<F, Fut, T, E, P>(
    operation_name: &str,
    config: &RetryConfig,
    retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempts);
                }
                return Ok(val);
            }
            Err(err) if !retryable(&err) => return Err(err),
            Err(err) => {
                attempts += 1;
                metrics::record_retry(operation_name);

                match config.max_retries {
                    Some(max) if attempts >= max => return Err(err),
                    Some(max) => warn!(
                        "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name, attempts, max, err, delay
                    ),
                    None => warn!(
                        "Operation '{}' failed (attempt {}, will retry forever): {}. Next retry in {:?}...",
                        operation_name, attempts, err, delay
                    ),
                }

                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}
