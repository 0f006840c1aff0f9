use tracing::info;

use super::{Store, require_valid};
use crate::error::{Result, StoreError};

impl Store {
    /// Columns of `table`, sampled from the first row key in listing order.
    /// Rows are assumed to share one column set; a table without rows has
    /// no columns.
    pub async fn list_columns(&self, table: &str) -> Result<Vec<String>> {
        require_valid("table", table)?;
        self.ensure_live_table(table).await?;
        self.sample_columns(table).await
    }

    /// Mark `column` of `table` for deletion
    pub async fn delete_column(&self, table: &str, column: &str) -> Result<()> {
        require_valid("table", table)?;
        require_valid("column", column)?;
        self.ensure_live_table(table).await?;

        let not_found = || {
            StoreError::not_found(format!(
                "Column '{column}' not found or marked for deletion in table '{table}'"
            ))
        };

        let columns = self.sample_columns(table).await?;
        if !columns.iter().any(|c| c == column) {
            return Err(not_found());
        }

        let inserted = self
            .tombstones
            .insert(&self.keys.columns_tombstone(table), column)
            .await?;
        if !inserted {
            return Err(not_found());
        }

        info!(table, column, "Column marked for deletion");
        Ok(())
    }

    async fn sample_columns(&self, table: &str) -> Result<Vec<String>> {
        let first_row = self
            .bucket
            .list(&self.keys.table_prefix(table), true, Some(1))
            .await?;
        let Some(row_key) = first_row
            .first()
            .and_then(|prefix| self.keys.row_key_from_prefix(table, prefix))
        else {
            return Ok(Vec::new());
        };

        let objects = self
            .bucket
            .list(&self.keys.row_prefix(table, row_key), false, None)
            .await?;
        let tombstoned = self.tombstoned_columns(table).await;

        let mut columns: Vec<String> = objects
            .iter()
            .filter_map(|path| self.keys.decode(path))
            .map(|cell| cell.column)
            .filter(|column| !tombstoned.contains(column))
            .collect();
        columns.sort();
        columns.dedup();
        Ok(columns)
    }
}
