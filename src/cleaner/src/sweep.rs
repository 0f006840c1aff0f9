use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::config::{CleanerConfig, PoolConfig};
use store::Store;
use store::pool::{JobPool, PoolSize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Tables fully erased and removed from the table tombstone list
    pub tables_cleared: usize,
    /// Columns fully erased and removed from their table's tombstone list
    pub columns_cleared: usize,
    pub objects_deleted: usize,
    pub table_passes: usize,
    pub column_passes: usize,
    /// Both phases ended with a pass that found no tombstoned work
    pub converged: bool,
}

/// Mark-and-sweep collector for tombstoned tables and columns
#[derive(Debug)]
pub struct Cleaner {
    store: Arc<Store>,
    workers: usize,
    queue_factor: usize,
    max_passes: usize,
    cancel: CancellationToken,
    running: Mutex<()>,
}

impl Cleaner {
    pub fn new(store: Arc<Store>, config: &CleanerConfig, pool: &PoolConfig) -> Self {
        Self {
            store,
            workers: config.workers.max(1),
            queue_factor: pool.queue_factor.max(1),
            max_passes: config.max_passes.max(1),
            cancel: CancellationToken::new(),
            running: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Token cancelled by [`Cleaner::shutdown`]; queued deletions check it
    /// right before they run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run both phases. Concurrent callers are serialized.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let _running = self.running.lock().await;
        let mut report = SweepReport::default();

        let tables_converged = self.sweep_tables(&mut report).await?;
        let columns_converged = self.sweep_columns(&mut report).await?;
        report.converged = tables_converged && columns_converged;

        info!(
            tables_cleared = report.tables_cleared,
            columns_cleared = report.columns_cleared,
            objects_deleted = report.objects_deleted,
            converged = report.converged,
            "Sweep finished"
        );
        Ok(report)
    }

    /// Erase every object of each tombstoned table, dropping a table from the
    /// list once a pass lists nothing under it.
    async fn sweep_tables(&self, report: &mut SweepReport) -> Result<bool> {
        let keys = self.store.keys();
        let tombstone = keys.tables_tombstone();

        for _ in 0..self.max_passes {
            if self.is_shutting_down() {
                return Ok(false);
            }

            let tables = self.store.tombstoned_tables().await;
            if tables.is_empty() {
                return Ok(true);
            }
            report.table_passes += 1;

            let mut objects = Vec::new();
            for table in &tables {
                let listed = match self
                    .store
                    .bucket()
                    .list(&keys.table_prefix(table), false, None)
                    .await
                {
                    Ok(listed) => listed,
                    Err(e) => {
                        warn!(table = %table, error = %e, "Failed to list objects of tombstoned table");
                        continue;
                    }
                };

                if listed.is_empty() {
                    match self.store.tombstones().remove(&tombstone, table).await {
                        Ok(true) => {
                            report.tables_cleared += 1;
                            info!(table = %table, "Table cleaned up");
                        }
                        Ok(false) => {}
                        Err(e) => warn!(table = %table, error = %e, "Failed to update table tombstones"),
                    }
                    continue;
                }
                objects.extend(listed);
            }

            report.objects_deleted += self.delete_all(objects).await?;
        }

        warn!(
            passes = self.max_passes,
            "Table sweep did not converge, leaving the rest for the next sweep"
        );
        Ok(false)
    }

    /// Erase the objects of tombstoned columns in every live table. A column
    /// leaves its table's list once a pass finds no object for it.
    async fn sweep_columns(&self, report: &mut SweepReport) -> Result<bool> {
        let keys = self.store.keys();

        for _ in 0..self.max_passes {
            if self.is_shutting_down() {
                return Ok(false);
            }

            let mut outstanding = false;
            for table in self.store.list_tables().await? {
                let columns = self.store.tombstoned_columns(&table).await;
                if columns.is_empty() {
                    continue;
                }
                outstanding = true;

                let listed = match self
                    .store
                    .bucket()
                    .list(&keys.table_prefix(&table), false, None)
                    .await
                {
                    Ok(listed) => listed,
                    Err(e) => {
                        warn!(table = %table, error = %e, "Failed to list objects of table");
                        continue;
                    }
                };
                let cells: Vec<(String, String)> = listed
                    .into_iter()
                    .filter_map(|path| keys.decode(&path).map(|cell| (cell.column, path)))
                    .collect();

                let tombstone = keys.columns_tombstone(&table);
                for column in columns {
                    let matched: Vec<String> = cells
                        .iter()
                        .filter(|(name, _)| *name == column)
                        .map(|(_, path)| path.clone())
                        .collect();

                    if !matched.is_empty() {
                        report.objects_deleted += self.delete_all(matched).await?;
                        continue;
                    }

                    match self.store.tombstones().remove(&tombstone, &column).await {
                        Ok(true) => {
                            report.columns_cleared += 1;
                            info!(table = %table, column = %column, "Column cleaned up");
                        }
                        Ok(false) => {}
                        Err(e) => warn!(table = %table, column = %column, error = %e, "Failed to update column tombstones"),
                    }
                }
            }

            if !outstanding {
                return Ok(true);
            }
            report.column_passes += 1;
        }

        warn!(
            passes = self.max_passes,
            "Column sweep did not converge, leaving the rest for the next sweep"
        );
        Ok(false)
    }

    /// Delete `paths` through a cancellable pool and return how many were removed
    async fn delete_all(&self, paths: Vec<String>) -> Result<usize> {
        if paths.is_empty() {
            return Ok(0);
        }

        let deleted = Arc::new(AtomicUsize::new(0));
        let mut pool = JobPool::with_cancellation(
            "cleaner",
            PoolSize::for_items(paths.len(), self.workers, self.queue_factor),
            self.cancel.clone(),
        );

        for path in paths {
            let bucket = self.store.bucket().clone();
            let deleted = deleted.clone();
            pool.submit(async move {
                match bucket.delete(&path).await {
                    Ok(()) => {
                        deleted.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => warn!(path = %path, error = %e, "Failed to delete object"),
                }
                Ok(())
            })
            .await;
        }

        pool.wait().await?;
        let deleted = deleted.load(Ordering::Relaxed);
        debug!(deleted, skipped = pool.skipped(), "Deletion pass finished");
        Ok(deleted)
    }
}
