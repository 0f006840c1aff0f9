use async_trait::async_trait;
use bytes::Bytes;
use common::storage::{BlobError, BlobResult, BlobStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Delete,
}

/// Blob store wrapper that fails selected operations on paths ending with a
/// configured suffix, and otherwise delegates to the wrapped store.
///
/// ```rust,ignore
/// let bucket = FaultyBucket::new(Arc::new(ObjectBucket::in_memory()))
///     .fail(Operation::Delete, "/col1")
///     .with_delay(Duration::from_millis(10));
/// ```
#[derive(Debug)]
pub struct FaultyBucket {
    inner: Arc<dyn BlobStore>,
    faults: Vec<(Operation, String)>,
    rate_limited: bool,
    delay: Option<Duration>,
    injected: AtomicUsize,
}

impl FaultyBucket {
    pub fn new(inner: Arc<dyn BlobStore>) -> Self {
        Self {
            inner,
            faults: Vec::new(),
            rate_limited: false,
            delay: None,
            injected: AtomicUsize::new(0),
        }
    }

    /// Fail `operation` on every path ending with `suffix`
    pub fn fail(mut self, operation: Operation, suffix: impl Into<String>) -> Self {
        self.faults.push((operation, suffix.into()));
        self
    }

    /// Report injected failures as HTTP 429 rate limiting
    pub fn rate_limited(mut self) -> Self {
        self.rate_limited = true;
        self
    }

    /// Sleep before every call, including listings
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of failures injected so far
    pub fn injected(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &Arc<dyn BlobStore> {
        &self.inner
    }

    async fn check(&self, operation: Operation, path: &str) -> BlobResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let faulty = self
            .faults
            .iter()
            .any(|(op, suffix)| *op == operation && path.ends_with(suffix.as_str()));
        if !faulty {
            return Ok(());
        }

        self.injected.fetch_add(1, Ordering::SeqCst);
        if self.rate_limited {
            Err(BlobError::RateLimited {
                path: path.to_string(),
                message: "429 Too Many Requests".to_string(),
            })
        } else {
            Err(BlobError::Backend(format!("injected {operation:?} failure for {path}")))
        }
    }
}

#[async_trait]
impl BlobStore for FaultyBucket {
    async fn list(
        &self,
        prefix: &str,
        delimited: bool,
        limit: Option<usize>,
    ) -> BlobResult<Vec<String>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.list(prefix, delimited, limit).await
    }

    async fn read(&self, path: &str) -> BlobResult<Bytes> {
        self.check(Operation::Read, path).await?;
        self.inner.read(path).await
    }

    async fn write(&self, path: &str, data: Bytes) -> BlobResult<()> {
        self.check(Operation::Write, path).await?;
        self.inner.write(path, data).await
    }

    async fn delete(&self, path: &str) -> BlobResult<()> {
        self.check(Operation::Delete, path).await?;
        self.inner.delete(path).await
    }
}
