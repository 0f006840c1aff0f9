use bytes::Bytes;
use common::storage::BlobStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::error::Result;

/// Ordered lists of names pending deletion, one blob per scope.
///
/// Reads never fail: an absent or undecodable list is empty. Mutations go
/// through [`TombstoneStore::update`], which holds a per-scope lock across the
/// read-modify-write so concurrent markers in this process never clobber each
/// other.
#[derive(Debug)]
pub struct TombstoneStore {
    bucket: Arc<dyn BlobStore>,
    scopes: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TombstoneStore {
    pub fn new(bucket: Arc<dyn BlobStore>) -> Self {
        Self {
            bucket,
            scopes: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_state(&self, key: &str) -> Vec<String> {
        let data = match self.bucket.read(key).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => return Vec::new(),
            Err(e) => {
                warn!(key, error = %e, "Failed to read tombstone list, treating as empty");
                return Vec::new();
            }
        };

        match serde_json::from_slice(&data) {
            Ok(state) => state,
            Err(e) => {
                warn!(key, error = %e, "Undecodable tombstone list, treating as empty");
                Vec::new()
            }
        }
    }

    /// Overwrite the whole list
    pub async fn write_state(&self, key: &str, state: &[String]) -> Result<()> {
        let data = serde_json::to_vec(state)?;
        self.bucket.write(key, Bytes::from(data)).await?;
        Ok(())
    }

    /// Read-modify-write a list under the scope lock. `f` returns whether it
    /// changed the list; unchanged lists are not written back.
    pub async fn update<F>(&self, key: &str, f: F) -> Result<Vec<String>>
    where
        F: FnOnce(&mut Vec<String>) -> bool,
    {
        let lock = self.scope_lock(key);
        let _guard = lock.lock().await;

        let mut state = self.get_state(key).await;
        if f(&mut state) {
            self.write_state(key, &state).await?;
            debug!(key, entries = state.len(), "Tombstone list updated");
        }
        Ok(state)
    }

    /// Append `name` unless already present
    pub async fn insert(&self, key: &str, name: &str) -> Result<bool> {
        let mut inserted = false;
        self.update(key, |state| {
            if state.iter().any(|entry| entry == name) {
                return false;
            }
            state.push(name.to_string());
            inserted = true;
            true
        })
        .await?;
        Ok(inserted)
    }

    /// Drop every occurrence of `name`
    pub async fn remove(&self, key: &str, name: &str) -> Result<bool> {
        let mut removed = false;
        self.update(key, |state| {
            let before = state.len();
            state.retain(|entry| entry != name);
            removed = state.len() != before;
            removed
        })
        .await?;
        Ok(removed)
    }

    fn scope_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut scopes = self
            .scopes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        scopes.entry(key.to_string()).or_default().clone()
    }
}
