//! Object storage fetcher built on the `object_store` crate

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::{ObjectMeta, ObjectStore, path::Path as StoragePath};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, warn};

use super::{FetchError, FetchReport, Fetcher, Result};
use crate::config::S3Config;
use crate::humanize::ByteSize;

/// Bucket and key parsed from an `s3://bucket/key` URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub key: String,
}

impl S3Location {
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("s3://")
            .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?;

        match rest.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok(Self {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            _ => Err(FetchError::InvalidUrl(format!(
                "{url}: expected s3://<bucket>/<key>"
            ))),
        }
    }

    /// Keys ending in `/` name a prefix rather than an object
    pub fn is_prefix(&self) -> bool {
        self.key.ends_with('/')
    }
}

/// Maps a bucket name to a store handle
pub trait BucketResolver: Send + Sync {
    fn store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>>;
}

/// AWS S3 (or S3-compatible) buckets, built lazily and cached per bucket
pub struct AwsBuckets {
    config: S3Config,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl AwsBuckets {
    pub fn new(config: S3Config) -> Self {
        Self {
            config,
            stores: Mutex::new(HashMap::new()),
        }
    }

    fn build(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(&self.config.region)
            .with_bucket_name(bucket)
            .with_allow_http(self.config.allow_http);

        if let Some(endpoint) = &self.config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if let (Some(key), Some(secret)) = (&self.config.access_key, &self.config.secret_key) {
            builder = builder
                .with_access_key_id(key)
                .with_secret_access_key(secret);
        }

        info!(bucket, region = %self.config.region, "Created S3 client");
        Ok(Arc::new(builder.build()?))
    }
}

impl BucketResolver for AwsBuckets {
    fn store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        let mut stores = self
            .stores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(store) = stores.get(bucket) {
            return Ok(store.clone());
        }

        let store = self.build(bucket)?;
        stores.insert(bucket.to_string(), store.clone());
        Ok(store)
    }
}

/// Fixed bucket-to-store mapping, e.g. in-memory stores for tests
#[derive(Default)]
pub struct StaticBuckets {
    stores: HashMap<String, Arc<dyn ObjectStore>>,
}

impl StaticBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.stores.insert(bucket.into(), store);
        self
    }
}

impl BucketResolver for StaticBuckets {
    fn store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        self.stores
            .get(bucket)
            .cloned()
            .ok_or_else(|| FetchError::InvalidUrl(format!("unknown bucket: {bucket}")))
    }
}

/// Downloads single objects or whole prefixes
pub struct S3Fetcher {
    buckets: Arc<dyn BucketResolver>,
    copy_buffer: usize,
    fail_on_partial_prefix: bool,
}

impl S3Fetcher {
    pub fn new(
        buckets: Arc<dyn BucketResolver>,
        copy_buffer: ByteSize,
        fail_on_partial_prefix: bool,
    ) -> Self {
        Self {
            buckets,
            copy_buffer: copy_buffer.as_usize(),
            fail_on_partial_prefix,
        }
    }

    async fn fetch_object(
        &self,
        store: &dyn ObjectStore,
        location: &StoragePath,
        target: &Path,
    ) -> Result<u64> {
        let mut stream = store.get(location).await?.into_stream();

        let file = File::create(target).await?;
        let mut writer = BufWriter::with_capacity(self.copy_buffer, file);
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        writer.flush().await?;
        Ok(written)
    }

    /// Download every object under `prefix` into `target` as a directory
    ///
    /// Individual object failures are logged and collected in the report;
    /// they only fail the whole download when `fail_on_partial_prefix` is set.
    async fn fetch_prefix(
        &self,
        store: &dyn ObjectStore,
        prefix: &StoragePath,
        target: &Path,
    ) -> Result<FetchReport> {
        tokio::fs::create_dir_all(target).await?;

        let listed: Vec<_> = store.list(Some(prefix)).try_collect().await?;
        let objects = without_folder_markers(prefix, listed);
        let total = objects.len();
        let mut report = FetchReport::default();

        for meta in objects {
            let key = meta.location.to_string();

            let result = match local_path(target, prefix, &meta.location) {
                Some(path) => self.fetch_nested(store, &meta.location, &path).await,
                None => Err(FetchError::InvalidTarget(key.clone())),
            };

            match result {
                Ok(bytes) => {
                    report.bytes += bytes;
                    report.objects += 1;
                }
                Err(e) => {
                    error!(key, error = %e, "Failed to download object under prefix");
                    report.failed_objects.push(key);
                }
            }
        }

        if !report.failed_objects.is_empty() {
            warn!(
                prefix = %prefix,
                failed = report.failed_objects.len(),
                total,
                "Prefix download finished with failed objects"
            );
            if self.fail_on_partial_prefix {
                return Err(FetchError::PartialPrefix {
                    failed: report.failed_objects.len(),
                    total,
                });
            }
        }

        Ok(report)
    }

    async fn fetch_nested(
        &self,
        store: &dyn ObjectStore,
        location: &StoragePath,
        path: &Path,
    ) -> Result<u64> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.fetch_object(store, location, path).await
    }
}

#[async_trait]
impl Fetcher for S3Fetcher {
    async fn fetch(&self, url: &str, target: &Path) -> Result<FetchReport> {
        let location = S3Location::parse(url)?;
        let store = self.buckets.store(&location.bucket)?;
        // Keys are sent as-is; `Path::from` would percent-encode reserved characters
        let key = StoragePath::parse(&location.key)
            .map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;

        if location.is_prefix() {
            debug!(bucket = %location.bucket, prefix = %key, "Downloading prefix");
            return self.fetch_prefix(store.as_ref(), &key, target).await;
        }

        let bytes = self.fetch_object(store.as_ref(), &key, target).await?;
        Ok(FetchReport {
            bytes,
            objects: 1,
            failed_objects: Vec::new(),
        })
    }
}

/// Drop zero-byte "folder" objects (`archive/`, `archive/sub/`)
///
/// Listed keys lose their trailing `/`, so a marker would otherwise collide
/// with the prefix itself or be written as an empty file where a directory
/// has to go.
fn without_folder_markers(prefix: &StoragePath, objects: Vec<ObjectMeta>) -> Vec<ObjectMeta> {
    let mut ancestors = HashSet::new();
    for meta in &objects {
        let key: &str = meta.location.as_ref();
        for (index, _) in key.match_indices('/') {
            ancestors.insert(key[..index].to_string());
        }
    }

    objects
        .into_iter()
        .filter(|meta| {
            let key: &str = meta.location.as_ref();
            let marker = meta.size == 0 && (meta.location == *prefix || ancestors.contains(key));
            if marker {
                debug!(key, "Skipping folder marker");
            }
            !marker
        })
        .collect()
}

/// Local path for an object listed under `prefix`, mirroring the key layout
fn local_path(target: &Path, prefix: &StoragePath, location: &StoragePath) -> Option<PathBuf> {
    let mut path = target.to_path_buf();
    let mut depth = 0;

    for part in location.prefix_match(prefix)? {
        let part = part.as_ref();
        if part == "." || part == ".." {
            return None;
        }
        path.push(part);
        depth += 1;
    }

    (depth > 0).then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use object_store::memory::InMemory;
    use tempfile::TempDir;

    async fn put(store: &InMemory, key: &str, body: &'static [u8]) {
        store
            .put(&StoragePath::parse(key).unwrap(), Bytes::from_static(body).into())
            .await
            .unwrap();
    }

    fn fetcher(store: Arc<InMemory>, strict: bool) -> S3Fetcher {
        let buckets = StaticBuckets::new().with_bucket("bucket", store);
        S3Fetcher::new(Arc::new(buckets), ByteSize(8), strict)
    }

    #[test]
    fn test_parse_location() {
        let location = S3Location::parse("s3://bucket/reports/2024/report.csv").unwrap();
        assert_eq!(location.bucket, "bucket");
        assert_eq!(location.key, "reports/2024/report.csv");
        assert!(!location.is_prefix());

        assert!(S3Location::parse("s3://bucket/archive/").unwrap().is_prefix());
        assert!(S3Location::parse("s3://bucket").is_err());
        assert!(S3Location::parse("s3://bucket/").is_err());
        assert!(S3Location::parse("s3:bucket/key").is_err());
    }

    #[tokio::test]
    async fn test_single_object_becomes_file() {
        let store = Arc::new(InMemory::new());
        put(&store, "report.csv", b"a,b,c\n1,2,3\n").await;
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("report.csv");

        let report = fetcher(store, false)
            .fetch("s3://bucket/report.csv", &target)
            .await
            .unwrap();

        assert_eq!(report.objects, 1);
        assert_eq!(std::fs::read(&target).unwrap(), b"a,b,c\n1,2,3\n");
    }

    #[tokio::test]
    async fn test_missing_object_is_an_error() {
        let store = Arc::new(InMemory::new());
        let temp_dir = TempDir::new().unwrap();

        let result = fetcher(store, false)
            .fetch("s3://bucket/absent.bin", &temp_dir.path().join("absent.bin"))
            .await;

        assert!(matches!(result, Err(FetchError::ObjectStore(_))));
    }

    #[tokio::test]
    async fn test_prefix_becomes_directory_tree() {
        let store = Arc::new(InMemory::new());
        put(&store, "archive/a.txt", b"alpha").await;
        put(&store, "archive/nested/b.txt", b"beta").await;
        put(&store, "other/c.txt", b"gamma").await;
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("archive");

        let report = fetcher(store, false)
            .fetch("s3://bucket/archive/", &target)
            .await
            .unwrap();

        assert_eq!(report.objects, 2);
        assert_eq!(report.bytes, 9);
        assert_eq!(std::fs::read(target.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(std::fs::read(target.join("nested/b.txt")).unwrap(), b"beta");
        assert!(!temp_dir.path().join("archive/c.txt").exists());
    }

    #[tokio::test]
    async fn test_partial_prefix_is_reported_not_failed() {
        let store = Arc::new(InMemory::new());
        put(&store, "archive/a.bin", b"one").await;
        put(&store, "archive/b.bin", b"two").await;
        put(&store, "archive/c.bin", b"three").await;
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("archive");
        // A directory squatting on the file name makes that transfer fail
        std::fs::create_dir_all(target.join("b.bin")).unwrap();

        let report = fetcher(store, false)
            .fetch("s3://bucket/archive/", &target)
            .await
            .unwrap();

        assert_eq!(report.objects, 2);
        assert_eq!(report.failed_objects, vec!["archive/b.bin".to_string()]);
        assert!(target.join("a.bin").is_file());
        assert!(target.join("c.bin").is_file());
    }

    #[tokio::test]
    async fn test_partial_prefix_fails_when_strict() {
        let store = Arc::new(InMemory::new());
        put(&store, "archive/a.bin", b"one").await;
        put(&store, "archive/b.bin", b"two").await;
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("archive");
        std::fs::create_dir_all(target.join("a.bin")).unwrap();

        let result = fetcher(store, true)
            .fetch("s3://bucket/archive/", &target)
            .await;

        assert!(matches!(
            result,
            Err(FetchError::PartialPrefix { failed: 1, total: 2 })
        ));
    }

    #[tokio::test]
    async fn test_folder_markers_are_not_downloaded_as_files() {
        let store = Arc::new(InMemory::new());
        put(&store, "archive/", b"").await;
        put(&store, "archive/a.txt", b"alpha").await;
        put(&store, "archive/sub/", b"").await;
        put(&store, "archive/sub/x.txt", b"x").await;
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("archive");

        let report = fetcher(store, true)
            .fetch("s3://bucket/archive/", &target)
            .await
            .unwrap();

        assert!(report.failed_objects.is_empty());
        assert_eq!(report.objects, 2);
        assert!(target.join("sub").is_dir());
        assert_eq!(std::fs::read(target.join("sub/x.txt")).unwrap(), b"x");
        assert_eq!(std::fs::read(target.join("a.txt")).unwrap(), b"alpha");
    }

    #[tokio::test]
    async fn test_reserved_characters_in_key_are_sent_verbatim() {
        let store = Arc::new(InMemory::new());
        put(&store, "reports/[q1]#2.csv", b"q1").await;
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("q1.csv");

        let report = fetcher(store, false)
            .fetch("s3://bucket/reports/[q1]#2.csv", &target)
            .await
            .unwrap();

        assert_eq!(report.bytes, 2);
        assert_eq!(std::fs::read(&target).unwrap(), b"q1");
    }

    #[tokio::test]
    async fn test_empty_key_segment_is_invalid() {
        let temp_dir = TempDir::new().unwrap();

        let result = fetcher(Arc::new(InMemory::new()), false)
            .fetch("s3://bucket/a//b", &temp_dir.path().join("b"))
            .await;

        assert!(matches!(result, Err(FetchError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_unknown_bucket() {
        let temp_dir = TempDir::new().unwrap();

        let result = fetcher(Arc::new(InMemory::new()), false)
            .fetch("s3://elsewhere/key", &temp_dir.path().join("key"))
            .await;

        assert!(matches!(result, Err(FetchError::InvalidUrl(_))));
    }
}
