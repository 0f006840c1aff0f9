use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::{
    ObjectStore, aws::AmazonS3Builder, gcp::GoogleCloudStorageBuilder, local::LocalFileSystem,
    memory::InMemory, path::Path as ObjectPath,
};
use percent_encoding::percent_decode_str;
use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::config::StorageConfig;

/// zstd level used for transparent object compression
const COMPRESSION_LEVEL: i32 = 3;

/// Errors surfaced by the blob-store collaborator
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("Object '{path}' not found")]
    NotFound { path: String },
    #[error("Rate limited (429) on '{path}': {message}")]
    RateLimited { path: String, message: String },
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Invalid object path: {0}")]
    InvalidPath(String),
}

impl BlobError {
    /// True when the backend asked us to slow down
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            other => mentions_rate_limit(&other.to_string()),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

fn mentions_rate_limit(message: &str) -> bool {
    message.contains("429") || message.contains("Too Many Requests")
}

pub type BlobResult<T> = std::result::Result<T, BlobError>;

/// Hierarchical object storage, addressed by `/`-separated string paths.
///
/// Paths handed in and returned are plain strings. Values are opaque; any
/// compression applied by an implementation must round-trip transparently.
#[async_trait]
pub trait BlobStore: Send + Sync + fmt::Debug {
    /// List paths starting with `prefix`.
    ///
    /// With `delimited` set, only the distinct child prefixes one level below
    /// the last `/` of `prefix` are returned, each ending in `/`. A `limit`
    /// stops the listing after that many entries.
    async fn list(
        &self,
        prefix: &str,
        delimited: bool,
        limit: Option<usize>,
    ) -> BlobResult<Vec<String>>;

    async fn read(&self, path: &str) -> BlobResult<Bytes>;

    async fn write(&self, path: &str, data: Bytes) -> BlobResult<()>;

    async fn delete(&self, path: &str) -> BlobResult<()>;
}

/// [`BlobStore`] backed by any `object_store` implementation
pub struct ObjectBucket {
    store: Arc<dyn ObjectStore>,
    compression: bool,
}

impl fmt::Debug for ObjectBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBucket")
            .field("store", &self.store.to_string())
            .field("compression", &self.compression)
            .finish()
    }
}

impl ObjectBucket {
    pub fn new(store: Arc<dyn ObjectStore>, compression: bool) -> Self {
        Self { store, compression }
    }

    /// Uncompressed in-memory bucket
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), false)
    }

    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn object_path(path: &str) -> BlobResult<ObjectPath> {
        if path.is_empty() {
            return Err(BlobError::InvalidPath(
                "object cannot be empty string".to_string(),
            ));
        }
        Ok(ObjectPath::from(path))
    }

    /// Plain string form of a listed location. `ObjectPath::from` percent-encodes
    /// characters such as `~`, `*` or `%` in each segment; listings are decoded
    /// back so they match the names they were written with.
    fn plain_path(location: &ObjectPath) -> String {
        location
            .parts()
            .map(|part| {
                percent_decode_str(part.as_ref())
                    .decode_utf8_lossy()
                    .into_owned()
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    fn map_error(path: &str, err: object_store::Error) -> BlobError {
        match err {
            object_store::Error::NotFound { .. } => BlobError::NotFound {
                path: path.to_string(),
            },
            other => {
                let message = other.to_string();
                if mentions_rate_limit(&message) {
                    BlobError::RateLimited {
                        path: path.to_string(),
                        message,
                    }
                } else {
                    BlobError::Backend(message)
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for ObjectBucket {
    async fn list(
        &self,
        prefix: &str,
        delimited: bool,
        limit: Option<usize>,
    ) -> BlobResult<Vec<String>> {
        // object_store matches prefixes on whole segments, so list the parent
        // directory and filter decoded paths on the raw string prefix.
        let dir = prefix.rfind('/').map(|i| &prefix[..i]).unwrap_or("");
        let dir_path = (!dir.is_empty()).then(|| ObjectPath::from(dir));
        let limit = limit.unwrap_or(usize::MAX);

        if delimited {
            let listing = self
                .store
                .list_with_delimiter(dir_path.as_ref())
                .await
                .map_err(|e| Self::map_error(prefix, e))?;

            return Ok(listing
                .common_prefixes
                .into_iter()
                .map(|p| format!("{}/", Self::plain_path(&p)))
                .filter(|p| p.starts_with(prefix))
                .take(limit)
                .collect());
        }

        let mut paths = Vec::new();
        let mut stream = self.store.list(dir_path.as_ref());
        while let Some(meta) = stream.next().await {
            if paths.len() >= limit {
                break;
            }
            let meta = meta.map_err(|e| Self::map_error(prefix, e))?;
            let location = Self::plain_path(&meta.location);
            if location.starts_with(prefix) {
                paths.push(location);
            }
        }

        Ok(paths)
    }

    async fn read(&self, path: &str) -> BlobResult<Bytes> {
        let location = Self::object_path(path)?;
        let data = self
            .store
            .get(&location)
            .await
            .map_err(|e| Self::map_error(path, e))?
            .bytes()
            .await
            .map_err(|e| Self::map_error(path, e))?;

        if !self.compression {
            return Ok(data);
        }

        zstd::decode_all(data.as_ref())
            .map(Bytes::from)
            .map_err(|e| BlobError::Compression(format!("{path}: {e}")))
    }

    async fn write(&self, path: &str, data: Bytes) -> BlobResult<()> {
        let location = Self::object_path(path)?;
        let payload = if self.compression {
            zstd::encode_all(data.as_ref(), COMPRESSION_LEVEL)
                .map(Bytes::from)
                .map_err(|e| BlobError::Compression(format!("{path}: {e}")))?
        } else {
            data
        };

        self.store
            .put(&location, payload.into())
            .await
            .map_err(|e| Self::map_error(path, e))?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> BlobResult<()> {
        let location = Self::object_path(path)?;
        self.store
            .delete(&location)
            .await
            .map_err(|e| Self::map_error(path, e))
    }
}

/// Create the blob-store collaborator from storage configuration
pub fn create_bucket(storage_config: &StorageConfig) -> Result<Arc<dyn BlobStore>> {
    let object_store = create_object_store(storage_config)?;
    Ok(Arc::new(ObjectBucket::new(
        object_store,
        storage_config.compression,
    )))
}

/// Create an object store from storage configuration
pub fn create_object_store(storage_config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    create_object_store_from_dsn(&storage_config.dsn)
}

/// Create an object store from a DSN string
pub fn create_object_store_from_dsn(dsn: &str) -> Result<Arc<dyn ObjectStore>> {
    let url =
        Url::parse(dsn).map_err(|e| anyhow::anyhow!("Invalid storage DSN '{}': {}", dsn, e))?;

    match url.scheme() {
        "file" => {
            let path = url.path();
            if path.is_empty() || path == "/" {
                return Err(anyhow::anyhow!(
                    "File DSN must specify a path: file:///path/to/storage"
                ));
            }
            Ok(Arc::new(LocalFileSystem::new_with_prefix(path)?))
        }
        "memory" => Ok(Arc::new(InMemory::new())),
        "s3" => {
            let builder = create_s3_builder_from_dsn(&url)?;
            Ok(Arc::new(builder.build()?))
        }
        "gs" => {
            let builder = create_gcs_builder_from_dsn(&url)?;
            Ok(Arc::new(builder.build()?))
        }
        scheme => Err(anyhow::anyhow!(
            "Unsupported storage scheme: {}. Supported: gs, s3, file, memory",
            scheme
        )),
    }
}

/// Create a Google Cloud Storage builder from a DSN
/// DSN format: gs://bucket, credentials come from the environment
pub fn create_gcs_builder_from_dsn(dsn: &Url) -> Result<GoogleCloudStorageBuilder> {
    let bucket = dsn
        .host_str()
        .filter(|bucket| !bucket.is_empty())
        .ok_or_else(|| anyhow::anyhow!("GCS DSN must specify a bucket: gs://<bucket-name>"))?;

    Ok(GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket))
}

/// Create an S3 builder from a DSN
/// DSN format: s3://[access_key:secret_key@]host[:port]/bucket
pub fn create_s3_builder_from_dsn(dsn: &Url) -> Result<AmazonS3Builder> {
    let host = dsn
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("Missing S3 host in DSN"))?;
    let port = dsn.port();
    let bucket = dsn.path().trim_start_matches('/');

    if bucket.is_empty() {
        return Err(anyhow::anyhow!(
            "S3 DSN must specify a bucket: s3://host/bucket"
        ));
    }

    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_region("us-east-1");

    let access_key = dsn.username();
    let secret_key = dsn.password().unwrap_or("");

    if !access_key.is_empty() {
        builder = builder
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key);
    }

    // S3-compatible backends (MinIO etc) need an explicit endpoint
    if !host.contains("amazonaws.com") {
        let scheme = if port == Some(443) { "https" } else { "http" };
        let endpoint = match port {
            Some(p) => format!("{scheme}://{host}:{p}"),
            None => format!("{scheme}://{host}"),
        };
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(true)
            .with_virtual_hosted_style_request(false);
    }

    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_bucket(compression: bool) -> ObjectBucket {
        let bucket = ObjectBucket::new(Arc::new(InMemory::new()), compression);
        for path in [
            "bigbucket/t1/key1/col1",
            "bigbucket/t1/key1/col2",
            "bigbucket/t1/key2/col1",
            "bigbucket/t1/other/col1",
            "bigbucket/t1/.delete_columns",
            "bigbucket/t2/key1/col1",
            "bigbucket/.delete_tables",
        ] {
            bucket.write(path, Bytes::from_static(b"v")).await.unwrap();
        }
        bucket
    }

    #[tokio::test]
    async fn test_write_read_with_compression() {
        let bucket = ObjectBucket::new(Arc::new(InMemory::new()), true);
        let value = Bytes::from("qwerty".repeat(100));
        bucket.write("bigbucket/t/k/c", value.clone()).await.unwrap();

        assert_eq!(bucket.read("bigbucket/t/k/c").await.unwrap(), value);

        let raw = bucket
            .object_store()
            .get(&ObjectPath::from("bigbucket/t/k/c"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_ne!(raw, value);
        assert!(raw.len() < value.len());
    }

    #[tokio::test]
    async fn test_list_by_string_prefix() {
        let bucket = seeded_bucket(false).await;

        let mut paths = bucket.list("bigbucket/t1/key", false, None).await.unwrap();
        paths.sort();
        assert_eq!(
            paths,
            vec![
                "bigbucket/t1/key1/col1",
                "bigbucket/t1/key1/col2",
                "bigbucket/t1/key2/col1",
            ]
        );

        let all = bucket.list("bigbucket/t1/", false, None).await.unwrap();
        assert_eq!(all.len(), 5);

        let limited = bucket.list("bigbucket/t1/", false, Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);

        assert!(bucket.list("bigbucket/t3/", false, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_delimited() {
        let bucket = seeded_bucket(false).await;

        let mut tables = bucket.list("bigbucket/", true, None).await.unwrap();
        tables.sort();
        assert_eq!(tables, vec!["bigbucket/t1/", "bigbucket/t2/"]);

        let mut keys = bucket.list("bigbucket/t1/k", true, None).await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["bigbucket/t1/key1/", "bigbucket/t1/key2/"]);
    }

    #[tokio::test]
    async fn test_list_returns_names_as_written() {
        let bucket = ObjectBucket::in_memory();
        let paths = [
            "bigbucket/t1/user~1/a*b",
            "bigbucket/t1/user~2/100%",
            "bigbucket/t1/{x}|y/c^d",
        ];
        for path in paths {
            bucket.write(path, Bytes::from_static(b"v")).await.unwrap();
        }

        let mut listed = bucket.list("bigbucket/t1/user~", false, None).await.unwrap();
        listed.sort();
        assert_eq!(listed, vec!["bigbucket/t1/user~1/a*b", "bigbucket/t1/user~2/100%"]);

        let mut rows = bucket.list("bigbucket/t1/", true, None).await.unwrap();
        rows.sort();
        assert_eq!(
            rows,
            vec![
                "bigbucket/t1/user~1/",
                "bigbucket/t1/user~2/",
                "bigbucket/t1/{x}|y/",
            ]
        );

        // Listed paths address the same objects again
        for path in bucket.list("bigbucket/", false, None).await.unwrap() {
            assert_eq!(bucket.read(&path).await.unwrap(), Bytes::from_static(b"v"));
            bucket.delete(&path).await.unwrap();
        }
        assert!(bucket.list("bigbucket/", false, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let bucket = ObjectBucket::in_memory();
        let err = bucket.read("bigbucket/missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_rate_limited());
    }

    #[tokio::test]
    async fn test_empty_path_rejected() {
        let bucket = ObjectBucket::in_memory();
        assert!(matches!(
            bucket.write("", Bytes::new()).await,
            Err(BlobError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_rate_limit_detection() {
        let err = BlobError::RateLimited {
            path: "p".to_string(),
            message: "slow down".to_string(),
        };
        assert!(err.is_rate_limited());
        assert!(BlobError::Backend("HTTP status 429 Too Many Requests".to_string()).is_rate_limited());
        assert!(!BlobError::Backend("HTTP status 500".to_string()).is_rate_limited());
    }

    #[test]
    fn test_create_memory_object_store() {
        let object_store = create_object_store_from_dsn("memory://").unwrap();
        assert!(Arc::strong_count(&object_store) == 1);
    }

    #[test]
    fn test_create_filesystem_object_store() {
        use tempfile::TempDir;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().to_string_lossy();
        let dsn = format!("file://{path}");

        let object_store = create_object_store_from_dsn(&dsn).unwrap();
        assert!(Arc::strong_count(&object_store) == 1);
    }

    #[test]
    fn test_create_bucket_from_config() {
        let storage_config = StorageConfig {
            dsn: "memory://".to_string(),
            ..StorageConfig::default()
        };

        assert!(create_bucket(&storage_config).is_ok());
    }

    #[test]
    fn test_invalid_dsn() {
        let result = create_object_store_from_dsn("not-a-url");
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid storage DSN")
        );
    }

    #[test]
    fn test_unsupported_scheme() {
        let result = create_object_store_from_dsn("ftp://bucket/prefix");
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Unsupported storage scheme")
        );
    }

    #[test]
    fn test_gcs_dsn_parsing() {
        assert!(create_gcs_builder_from_dsn(&Url::parse("gs://my-bucket").unwrap()).is_ok());
        assert!(create_gcs_builder_from_dsn(&Url::parse("gs:///").unwrap()).is_err());
    }

    #[test]
    fn test_s3_dsn_parsing() {
        let result = create_s3_builder_from_dsn(
            &Url::parse("s3://access:secret@localhost:9000/bucket").unwrap(),
        );
        assert!(result.is_ok());

        let result = create_s3_builder_from_dsn(&Url::parse("s3://localhost:9000/").unwrap());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("must specify a bucket")
        );
    }

    #[test]
    fn test_file_dsn_without_path() {
        let result = create_object_store_from_dsn("file://");
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("File DSN must specify a path")
        );
    }
}
