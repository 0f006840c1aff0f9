use bytes::Bytes;
use common::storage::BlobError;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::{Store, aggregate_failures, require_valid};
use crate::error::{Result, StoreError};
use crate::keyspace::CellPath;

/// Column name to value
pub type Row = BTreeMap<String, Bytes>;
/// Row key to row
pub type Rows = BTreeMap<String, Row>;

type Failures = Arc<Mutex<BTreeMap<String, BlobError>>>;

/// Which rows of a table an operation addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSelector<'a> {
    All,
    Key(&'a str),
    Prefix(&'a str),
}

impl<'a> RowSelector<'a> {
    /// `key` and `prefix` are mutually exclusive
    pub fn new(key: Option<&'a str>, prefix: Option<&'a str>) -> Result<Self> {
        match (key, prefix) {
            (Some(_), Some(_)) => Err(StoreError::validation(
                "Please provide only one of 'key' or 'prefix' as a querystring parameter",
            )),
            (Some(key), None) => {
                require_valid("key", key)?;
                Ok(Self::Key(key))
            }
            (None, Some(prefix)) => {
                require_valid("prefix", prefix)?;
                Ok(Self::Prefix(prefix))
            }
            (None, None) => Ok(Self::All),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RowQuery {
    pub key: Option<String>,
    pub prefix: Option<String>,
    /// Restrict the result to these columns; empty means all
    pub columns: Option<Vec<String>>,
    /// Maximum number of distinct rows; zero means unlimited
    pub limit: Option<usize>,
}

impl RowQuery {
    pub fn selector(&self) -> Result<RowSelector<'_>> {
        RowSelector::new(self.key.as_deref(), self.prefix.as_deref())
    }

    fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref().filter(|columns| !columns.is_empty())
    }

    fn limit(&self) -> Option<usize> {
        self.limit.filter(|limit| *limit > 0)
    }
}

impl Store {
    /// Rows of `table` in key order. Cells that fail to read are omitted;
    /// tombstoned columns are never returned.
    pub async fn get_rows(&self, table: &str, query: &RowQuery) -> Result<Rows> {
        require_valid("table", table)?;
        let selector = query.selector()?;
        let wanted = query.columns();
        for column in wanted.unwrap_or_default() {
            require_valid("column", column)?;
        }

        if let (RowSelector::Key(key), Some(columns)) = (selector, wanted) {
            let row = self.get_row_columns(table, key, columns).await?;
            return Ok(Rows::from([(key.to_string(), row)]));
        }

        self.ensure_live_table(table).await?;
        let prefix = match selector {
            RowSelector::All => self.keys.table_prefix(table),
            RowSelector::Key(key) => self.keys.row_prefix(table, key),
            RowSelector::Prefix(prefix) => self.keys.row_key_prefix(table, prefix),
        };

        let objects = self.bucket.list(&prefix, false, None).await?;
        if objects.is_empty() {
            return Err(StoreError::not_found(match selector {
                RowSelector::All => format!("Table '{table}' has no rows"),
                RowSelector::Key(key) => format!("Row '{key}' not found in table '{table}'"),
                RowSelector::Prefix(prefix) => {
                    format!("No rows with prefix '{prefix}' in table '{table}'")
                }
            }));
        }

        let hidden = self.tombstoned_columns(table).await;
        let mut cells: Vec<(CellPath, String)> = objects
            .into_iter()
            .filter_map(|path| self.keys.decode(&path).map(|cell| (cell, path)))
            .filter(|(cell, _)| cell.table == table && !hidden.contains(&cell.column))
            .filter(|(cell, _)| wanted.is_none_or(|columns| columns.contains(&cell.column)))
            .collect();
        cells.sort_by(|(a, _), (b, _)| {
            (a.row_key.as_str(), a.column.as_str()).cmp(&(b.row_key.as_str(), b.column.as_str()))
        });

        let results = Arc::new(Mutex::new(Rows::new()));
        let mut pool = self.pool("get_rows", cells.len());
        let mut current_row: Option<String> = None;
        let mut selected = 0;

        for (cell, path) in cells {
            if current_row.as_deref() != Some(cell.row_key.as_str()) {
                if query.limit().is_some_and(|limit| selected == limit) {
                    break;
                }
                selected += 1;
                lock(&results).insert(cell.row_key.clone(), Row::new());
                current_row = Some(cell.row_key.clone());
            }

            let bucket = self.bucket.clone();
            let results = results.clone();
            pool.submit(async move {
                match bucket.read(&path).await {
                    Ok(value) => {
                        lock(&results)
                            .entry(cell.row_key)
                            .or_default()
                            .insert(cell.column, value);
                    }
                    Err(e) => warn!(path = %path, error = %e, "Failed to read cell, omitting it"),
                }
                Ok(())
            })
            .await;
        }

        pool.wait().await?;
        let rows = std::mem::take(&mut *lock(&results));
        debug!(table, rows = rows.len(), "Rows fetched");
        Ok(rows)
    }

    /// Fetch named columns of a single row directly, without listing.
    /// Missing or unreadable columns are absent from the result.
    pub async fn get_row_columns(&self, table: &str, key: &str, columns: &[String]) -> Result<Row> {
        require_valid("table", table)?;
        require_valid("key", key)?;
        for column in columns {
            require_valid("column", column)?;
        }
        self.ensure_live_table(table).await?;

        let hidden = self.tombstoned_columns(table).await;
        let mut wanted: Vec<&String> = columns.iter().filter(|c| !hidden.contains(c)).collect();
        wanted.sort();
        wanted.dedup();

        let row = Arc::new(Mutex::new(Row::new()));
        let mut pool = self.pool("get_row_columns", wanted.len());
        for column in wanted {
            let path = self.keys.encode(table, key, column);
            let column = column.clone();
            let bucket = self.bucket.clone();
            let row = row.clone();
            pool.submit(async move {
                match bucket.read(&path).await {
                    Ok(value) => {
                        lock(&row).insert(column, value);
                    }
                    Err(e) if e.is_not_found() => debug!(path = %path, "Column not present"),
                    Err(e) => warn!(path = %path, error = %e, "Failed to read cell, omitting it"),
                }
                Ok(())
            })
            .await;
        }

        pool.wait().await?;
        let row = std::mem::take(&mut *lock(&row));
        Ok(row)
    }

    /// Number of distinct row keys, optionally restricted to a key prefix
    pub async fn rows_count(&self, table: &str, prefix: Option<&str>) -> Result<usize> {
        Ok(self.list_row_keys(table, prefix).await?.len())
    }

    /// Distinct row keys in lexicographic order
    pub async fn list_row_keys(&self, table: &str, prefix: Option<&str>) -> Result<Vec<String>> {
        require_valid("table", table)?;
        if let Some(prefix) = prefix {
            require_valid("prefix", prefix)?;
        }
        self.ensure_live_table(table).await?;

        let listing_prefix = match prefix {
            Some(prefix) => self.keys.row_key_prefix(table, prefix),
            None => self.keys.table_prefix(table),
        };
        let prefixes = self.bucket.list(&listing_prefix, true, None).await?;

        let mut keys: Vec<String> = prefixes
            .iter()
            .filter_map(|p| self.keys.row_key_from_prefix(table, p))
            .map(str::to_string)
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Write every column of `values` under row `key`, creating the table
    /// implicitly. Column names are trimmed. Columns that fail to persist
    /// are reported together once all writes have finished.
    pub async fn set_row(&self, table: &str, key: &str, values: BTreeMap<String, Bytes>) -> Result<()> {
        require_valid("table", table)?;
        require_valid("key", key)?;
        if values.is_empty() {
            return Err(StoreError::validation(
                "Nothing to set, JSON payload is empty. Please provide at least one column",
            ));
        }

        let mut cells = BTreeMap::new();
        for (column, value) in values {
            let column = column.trim().to_string();
            require_valid("column", &column)?;
            cells.insert(column, value);
        }

        let failures: Failures = Arc::default();
        let mut pool = self.pool("set_row", cells.len());
        for (column, value) in cells {
            let path = self.keys.encode(table, key, &column);
            let bucket = self.bucket.clone();
            let failures = failures.clone();
            pool.submit(async move {
                if let Err(e) = bucket.write(&path, value).await {
                    lock(&failures).insert(column, e);
                }
                Ok(())
            })
            .await;
        }

        pool.wait().await?;
        let failures = std::mem::take(&mut *lock(&failures));
        aggregate_failures("persist", failures)?;
        debug!(table, key, "Row persisted");
        Ok(())
    }

    /// Delete every object of the addressed rows. Exactly one of key or
    /// prefix must be given; deleting a whole table goes through
    /// [`Store::delete_table`].
    pub async fn delete_rows(&self, table: &str, selector: RowSelector<'_>) -> Result<()> {
        require_valid("table", table)?;
        let prefix = match selector {
            RowSelector::Key(key) => self.keys.row_prefix(table, key),
            RowSelector::Prefix(prefix) => self.keys.row_key_prefix(table, prefix),
            RowSelector::All => {
                return Err(StoreError::validation(
                    "Please provide one of 'key' or 'prefix' as a querystring parameter. \
                     To delete a whole table use /table",
                ));
            }
        };
        self.ensure_live_table(table).await?;

        let objects = self.bucket.list(&prefix, false, None).await?;
        if objects.is_empty() {
            return Err(StoreError::not_found(match selector {
                RowSelector::Key(key) => format!("Row '{key}' not found in table '{table}'"),
                _ => format!("No rows matching the prefix in table '{table}'"),
            }));
        }

        let failures: Failures = Arc::default();
        let mut pool = self.pool("delete_rows", objects.len());
        for path in objects {
            let name = match self.keys.decode(&path) {
                Some(cell) => format!("{}/{}", cell.row_key, cell.column),
                None => path.clone(),
            };
            let bucket = self.bucket.clone();
            let failures = failures.clone();
            pool.submit(async move {
                match bucket.delete(&path).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        lock(&failures).insert(name, e);
                    }
                }
                Ok(())
            })
            .await;
        }

        pool.wait().await?;
        let failures = std::mem::take(&mut *lock(&failures));
        aggregate_failures("be deleted", failures)?;
        debug!(table, "Rows deleted");
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::test_support::*;

    fn query() -> RowQuery {
        RowQuery::default()
    }

    #[test]
    fn test_selector_is_exclusive() {
        assert_eq!(RowSelector::new(None, None).unwrap(), RowSelector::All);
        assert_eq!(
            RowSelector::new(Some("k"), None).unwrap(),
            RowSelector::Key("k")
        );
        assert!(matches!(
            RowSelector::new(Some("k"), Some("p")),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            RowSelector::new(None, Some("a#b")),
            Err(StoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_get_all_rows() {
        let store = seeded_store("t1", 3).await;
        let rows = store.get_rows("t1", &query()).await.unwrap();

        assert_eq!(
            rows.keys().collect::<Vec<_>>(),
            vec!["key0", "key1", "key2"]
        );
        assert_eq!(rows["key1"].len(), 4);
        assert_eq!(rows["key1"]["col3"], Bytes::from("qwerty3"));
    }

    #[tokio::test]
    async fn test_limit_counts_distinct_rows() {
        let store = seeded_store("t1", 10).await;
        let rows = store
            .get_rows(
                "t1",
                &RowQuery {
                    limit: Some(2),
                    ..query()
                },
            )
            .await
            .unwrap();

        assert_eq!(rows.keys().collect::<Vec<_>>(), vec!["key0", "key1"]);
        assert!(rows.values().all(|row| row.len() == 4));

        let unlimited = store
            .get_rows(
                "t1",
                &RowQuery {
                    limit: Some(0),
                    ..query()
                },
            )
            .await
            .unwrap();
        assert_eq!(unlimited.len(), 10);
    }

    #[tokio::test]
    async fn test_get_rows_by_key_does_not_match_longer_keys() {
        let store = seeded_store("t1", 12).await;
        let rows = store
            .get_rows(
                "t1",
                &RowQuery {
                    key: Some("key1".to_string()),
                    ..query()
                },
            )
            .await
            .unwrap();

        assert_eq!(rows.keys().collect::<Vec<_>>(), vec!["key1"]);
    }

    #[tokio::test]
    async fn test_get_rows_by_prefix_with_columns() {
        let store = seeded_store("t1", 12).await;
        let rows = store
            .get_rows(
                "t1",
                &RowQuery {
                    prefix: Some("key1".to_string()),
                    columns: Some(vec!["col2".to_string()]),
                    ..query()
                },
            )
            .await
            .unwrap();

        assert_eq!(
            rows.keys().collect::<Vec<_>>(),
            vec!["key1", "key10", "key11"]
        );
        assert!(rows
            .values()
            .all(|row| row.keys().collect::<Vec<_>>() == vec!["col2"]));
    }

    #[tokio::test]
    async fn test_get_rows_by_key_and_columns_fetches_directly() {
        let store = seeded_store("t1", 2).await;
        let rows = store
            .get_rows(
                "t1",
                &RowQuery {
                    key: Some("key0".to_string()),
                    columns: Some(vec!["col1".to_string(), "missing".to_string()]),
                    ..query()
                },
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows["key0"].keys().collect::<Vec<_>>(), vec!["col1"]);
    }

    #[tokio::test]
    async fn test_get_rows_errors() {
        let store = seeded_store("t1", 1).await;

        assert!(matches!(
            store
                .get_rows(
                    "t1",
                    &RowQuery {
                        key: Some("a".to_string()),
                        prefix: Some("b".to_string()),
                        ..query()
                    }
                )
                .await,
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            store.get_rows("missing", &query()).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store
                .get_rows(
                    "t1",
                    &RowQuery {
                        key: Some("nope".to_string()),
                        ..query()
                    }
                )
                .await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_rows_hides_tombstoned_columns() {
        let store = seeded_store("t1", 2).await;
        store.delete_column("t1", "col2").await.unwrap();

        let rows = store.get_rows("t1", &query()).await.unwrap();
        assert!(rows.values().all(|row| !row.contains_key("col2")));
        assert!(rows.values().all(|row| row.len() == 3));
    }

    #[tokio::test]
    async fn test_get_rows_of_tombstoned_table() {
        let store = seeded_store("t1", 2).await;
        store.delete_table("t1").await.unwrap();

        assert!(matches!(
            store.get_rows("t1", &query()).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.rows_count("t1", None).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_count_and_list_keys() {
        let store = seeded_store("t1", 12).await;

        assert_eq!(store.rows_count("t1", None).await.unwrap(), 12);
        assert_eq!(store.rows_count("t1", Some("key1")).await.unwrap(), 3);
        assert_eq!(
            store.list_row_keys("t1", Some("key1")).await.unwrap(),
            vec!["key1", "key10", "key11"]
        );
        assert_eq!(store.rows_count("t1", Some("zzz")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_row_trims_and_overwrites() {
        let store = empty_store();
        store
            .set_row("t1", "k", payload(&[(" a ", "1"), ("b", "2")]))
            .await
            .unwrap();
        store.set_row("t1", "k", payload(&[("a", "3")])).await.unwrap();

        let rows = store.get_rows("t1", &query()).await.unwrap();
        assert_eq!(rows["k"]["a"], Bytes::from("3"));
        assert_eq!(rows["k"]["b"], Bytes::from("2"));
    }

    #[tokio::test]
    async fn test_set_row_rejects_bad_input() {
        let store = empty_store();
        assert!(matches!(
            store.set_row("t1", "k", BTreeMap::new()).await,
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            store.set_row("t1", "k", payload(&[("  ", "1")])).await,
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            store.set_row("t1", "k", payload(&[(".hidden", "1")])).await,
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            store.set_row("t1", "a/b", payload(&[("c", "1")])).await,
            Err(StoreError::Validation(_))
        ));
        assert!(store.list_tables().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_rows_by_key_and_prefix() {
        let store = seeded_store("t1", 12).await;

        store.delete_rows("t1", RowSelector::Key("key1")).await.unwrap();
        assert_eq!(store.rows_count("t1", None).await.unwrap(), 11);
        assert_eq!(
            store.list_row_keys("t1", Some("key1")).await.unwrap(),
            vec!["key10", "key11"]
        );

        store.delete_rows("t1", RowSelector::Prefix("key1")).await.unwrap();
        assert_eq!(store.rows_count("t1", None).await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_names_with_punctuation_round_trip() {
        let store = empty_store();
        store
            .set_row("t1", "user~1", payload(&[("a*b", "v1"), ("c%d", "v2")]))
            .await
            .unwrap();
        store
            .set_row("t1", "100%", payload(&[("a*b", "v3"), ("c%d", "v4")]))
            .await
            .unwrap();

        assert_eq!(
            store.list_row_keys("t1", None).await.unwrap(),
            vec!["100%", "user~1"]
        );
        assert_eq!(store.list_columns("t1").await.unwrap(), vec!["a*b", "c%d"]);

        let all = store.get_rows("t1", &query()).await.unwrap();
        assert_eq!(all["user~1"]["a*b"], Bytes::from("v1"));
        assert_eq!(all["100%"]["c%d"], Bytes::from("v4"));

        let by_key = store
            .get_rows(
                "t1",
                &RowQuery {
                    key: Some("user~1".to_string()),
                    ..query()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_key.keys().collect::<Vec<_>>(), vec!["user~1"]);
        assert_eq!(by_key["user~1"].len(), 2);

        let by_prefix = store
            .get_rows(
                "t1",
                &RowQuery {
                    prefix: Some("user~".to_string()),
                    ..query()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_prefix.keys().collect::<Vec<_>>(), vec!["user~1"]);

        store.delete_column("t1", "a*b").await.unwrap();
        assert_eq!(store.list_columns("t1").await.unwrap(), vec!["c%d"]);

        store.delete_rows("t1", RowSelector::Key("100%")).await.unwrap();
        assert_eq!(store.list_row_keys("t1", None).await.unwrap(), vec!["user~1"]);
    }

    #[tokio::test]
    async fn test_delete_rows_errors() {
        let store = seeded_store("t1", 2).await;

        assert!(matches!(
            store.delete_rows("t1", RowSelector::All).await,
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            store.delete_rows("t1", RowSelector::Key("nope")).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.delete_rows("t1", RowSelector::Prefix("zz")).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
