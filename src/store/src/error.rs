use common::storage::BlobError;

use crate::pool::PoolError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Missing, conflicting or malformed caller input
    #[error("{0}")]
    Validation(String),
    /// Table, row or column is absent or marked for deletion
    #[error("{0}")]
    NotFound(String),
    /// Some units of a fan-out failed, siblings still completed
    #[error("{}", partial_failure_message(.operation, .failed, .rate_limited))]
    PartialFailure {
        operation: &'static str,
        failed: Vec<String>,
        rate_limited: bool,
    },
    #[error("Storage error: {0}")]
    Storage(#[from] BlobError),
    #[error("Job pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

fn partial_failure_message(operation: &str, failed: &[String], rate_limited: &bool) -> String {
    let names = failed.join(", ");
    if *rate_limited {
        format!("Bucket is rate limiting, some columns failed to {operation}: [{names}]")
    } else {
        format!("Check server logs, some columns failed to {operation}: [{names}]")
    }
}

impl StoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
