use tracing::info;

use super::{Store, require_valid};
use crate::error::{Result, StoreError};
use crate::keyspace::is_valid_name;

impl Store {
    /// Live tables in lexicographic order
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let prefixes = self
            .bucket
            .list(&self.keys.root_prefix(), true, None)
            .await?;
        let tombstoned = self.tombstoned_tables().await;

        let mut tables: Vec<String> = prefixes
            .iter()
            .filter_map(|prefix| self.keys.table_from_prefix(prefix))
            .filter(|table| is_valid_name(table))
            .filter(|table| !tombstoned.iter().any(|t| t == table))
            .map(str::to_string)
            .collect();
        tables.sort();
        tables.dedup();
        Ok(tables)
    }

    /// Mark `table` for deletion; its objects are erased later by the cleaner
    pub async fn delete_table(&self, table: &str) -> Result<()> {
        require_valid("table", table)?;
        self.ensure_live_table(table).await?;

        let inserted = self
            .tombstones
            .insert(&self.keys.tables_tombstone(), table)
            .await?;
        if !inserted {
            return Err(StoreError::not_found(format!(
                "Table '{table}' not found or marked for deletion"
            )));
        }

        info!(table, "Table marked for deletion");
        Ok(())
    }
}
