use std::time::Duration;

use store::StoreError;
use store::pool::PoolError;

#[derive(Debug, thiserror::Error)]
pub enum CleanerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("Deletion pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("Could not drain outstanding deletions within {0:?}")]
    ShutdownTimeout(Duration),
    #[error("Cleaner server error: {0}")]
    Server(String),
}

pub type Result<T> = std::result::Result<T, CleanerError>;
