//! Table, column and row operations over the blob store.
//!
//! Tables and rows have no metadata records: a table exists while at least
//! one object lives under its prefix and it is not listed in the table
//! tombstone list. Every multi-object operation fans out through a
//! [`JobPool`] owned by that single invocation.

mod columns;
mod rows;
mod tables;

pub use rows::{Row, RowQuery, RowSelector, Rows};

use common::config::PoolConfig;
use common::storage::{BlobError, BlobStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use crate::error::{Result, StoreError};
use crate::keyspace::{KeySpace, RESERVED_CHARS, is_valid_name};
use crate::pool::{JobPool, PoolSize};
use crate::tombstone::TombstoneStore;

#[derive(Debug)]
pub struct Store {
    bucket: Arc<dyn BlobStore>,
    keys: KeySpace,
    tombstones: TombstoneStore,
    pool: PoolConfig,
}

impl Store {
    pub fn new(bucket: Arc<dyn BlobStore>, root: &str, pool: PoolConfig) -> Self {
        Self {
            tombstones: TombstoneStore::new(bucket.clone()),
            keys: KeySpace::new(root),
            bucket,
            pool,
        }
    }

    pub fn bucket(&self) -> &Arc<dyn BlobStore> {
        &self.bucket
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub fn tombstones(&self) -> &TombstoneStore {
        &self.tombstones
    }

    /// True when at least one object lives under `prefix`
    pub async fn prefix_exists(&self, prefix: &str) -> Result<bool> {
        let objects = self.bucket.list(prefix, false, Some(1)).await?;
        Ok(!objects.is_empty())
    }

    /// Tables currently marked for deletion, in marking order
    pub async fn tombstoned_tables(&self) -> Vec<String> {
        self.tombstones
            .get_state(&self.keys.tables_tombstone())
            .await
    }

    /// Columns of `table` currently marked for deletion, in marking order
    pub async fn tombstoned_columns(&self, table: &str) -> Vec<String> {
        self.tombstones
            .get_state(&self.keys.columns_tombstone(table))
            .await
    }

    /// Fails with NotFound unless `table` has objects and is not tombstoned
    async fn ensure_live_table(&self, table: &str) -> Result<()> {
        let tombstoned = self.tombstoned_tables().await;
        if tombstoned.iter().any(|t| t == table)
            || !self.prefix_exists(&self.keys.table_prefix(table)).await?
        {
            return Err(StoreError::not_found(format!(
                "Table '{table}' not found or marked for deletion"
            )));
        }
        Ok(())
    }

    fn pool(&self, name: &'static str, items: usize) -> JobPool {
        JobPool::new(
            name,
            PoolSize::for_items(items, self.pool.max_workers, self.pool.queue_factor),
        )
    }
}

pub(crate) fn require_valid(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StoreError::validation(format!("{kind} cannot be empty")));
    }
    if !is_valid_name(name) {
        let reserved: Vec<String> = RESERVED_CHARS
            .iter()
            .map(|c| c.escape_default().to_string())
            .collect();
        return Err(StoreError::validation(format!(
            "{kind} '{}' cannot start with '.' nor contain the following characters: [{}]",
            name.escape_default(),
            reserved.join(" ")
        )));
    }
    Ok(())
}

/// Turn per-unit failures of a fan-out into a single PartialFailure
pub(crate) fn aggregate_failures(
    operation: &'static str,
    failures: BTreeMap<String, BlobError>,
) -> Result<()> {
    if failures.is_empty() {
        return Ok(());
    }

    let mut rate_limited = false;
    for (name, err) in &failures {
        warn!(name = %name, error = %err, "Failed to {operation}");
        rate_limited |= err.is_rate_limited();
    }

    Err(StoreError::PartialFailure {
        operation,
        failed: failures.into_keys().collect(),
        rate_limited,
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_require_valid() {
        assert!(require_valid("table", "t1").is_ok());
        assert!(matches!(
            require_valid("table", ""),
            Err(StoreError::Validation(_))
        ));
        let err = require_valid("column", "col/1").unwrap_err();
        assert!(err.to_string().contains("column 'col/1' cannot start with '.'"));
    }

    #[test]
    fn test_aggregate_failures() {
        assert!(aggregate_failures("persist", BTreeMap::new()).is_ok());

        let mut failures = BTreeMap::new();
        failures.insert("col2".to_string(), BlobError::Backend("500".to_string()));
        failures.insert(
            "col1".to_string(),
            BlobError::RateLimited {
                path: "p".to_string(),
                message: "slow down".to_string(),
            },
        );

        match aggregate_failures("persist", failures) {
            Err(StoreError::PartialFailure {
                failed,
                rate_limited,
                ..
            }) => {
                assert_eq!(failed, vec!["col1", "col2"]);
                assert!(rate_limited);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_prefix_exists() {
        let store = seeded_store("t1", 1).await;
        assert!(store.prefix_exists("bigbucket/t1/").await.unwrap());
        assert!(!store.prefix_exists("bigbucket/t2/").await.unwrap());
    }
}
