//! Storage backends: one per configured bucket.
//!
//! A backend owns its bucket credentials and policy knobs and shares the
//! process-wide object cache. `open` consults the cache first, enforcing the
//! backend's freshness window, and otherwise fetches, buffers, and admits
//! the object. Oversized objects are streamed straight through uncached.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use super::fetcher::{FetchedObject, ObjectFetcher, S3Fetcher};
use super::file::BackendFile;
use super::ObjectFs;
use crate::cache::{CachedObject, ObjectCache};
use crate::config::S3BackendConfig;
use crate::context::RequestContext;
use crate::error::{DienerError, Result};

pub struct StorageBackend {
    config: S3BackendConfig,
    max_age: Duration,
    fetcher: Arc<dyn ObjectFetcher>,
    cache: Arc<ObjectCache>,
}

impl StorageBackend {
    pub fn new(config: S3BackendConfig, cache: Arc<ObjectCache>) -> Self {
        let fetcher = Arc::new(S3Fetcher::new(&config));
        Self::with_fetcher(config, cache, fetcher)
    }

    /// Construct with a caller-supplied fetcher.
    pub fn with_fetcher(
        config: S3BackendConfig,
        cache: Arc<ObjectCache>,
        fetcher: Arc<dyn ObjectFetcher>,
    ) -> Self {
        let max_age = config.effective_max_age();
        Self {
            config,
            max_age,
            fetcher,
            cache,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket_name
    }

    async fn fetch(&self, name: &str, ctx: &RequestContext) -> Result<FetchedObject> {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(DienerError::Cancelled),
            result = self.fetcher.get(&self.config.bucket_name, name) => result,
        }
    }

    /// Drain the body into memory in `transfer_buf_size` chunks.
    async fn buffer_body(&self, fetched: FetchedObject, ctx: &RequestContext) -> Result<Bytes> {
        let mut reader = fetched.reader;
        let mut body = BytesMut::with_capacity(fetched.declared_len.max(0) as usize);
        let mut chunk = vec![0u8; self.config.transfer_buf_size.max(1)];
        loop {
            let n = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(DienerError::Cancelled),
                read = reader.read(&mut chunk) => read?,
            };
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        Ok(body.freeze())
    }
}

#[async_trait]
impl ObjectFs for StorageBackend {
    async fn open(&self, name: &str, ctx: &RequestContext) -> Result<BackendFile> {
        let name = name.strip_prefix('/').unwrap_or(name);
        let bucket = self.bucket();

        if let Some(entry) = self.cache.get(name).await {
            let age = entry.fetched.elapsed();
            if age > self.max_age {
                info!(component = "s3-backend", bucket, name, age_secs = age.as_secs(), "cache hit but expired");
                self.cache.delete(name).await;
            } else {
                debug!(component = "s3-backend", bucket, name, size = entry.data.len(), "cache hit");
                return Ok(BackendFile::cached(name, entry));
            }
        }

        let fetched = match self.fetch(name, ctx).await {
            Ok(fetched) => fetched,
            Err(err) => {
                // Upstream failures are not distinguished toward the client.
                warn!(component = "s3-backend", bucket, name, error = %err, "get object failed");
                return Err(DienerError::NotFound(name.to_string()));
            }
        };

        if fetched.declared_len > self.config.max_object_size {
            warn!(
                component = "s3-backend",
                bucket,
                name,
                size = fetched.declared_len,
                limit = self.config.max_object_size,
                "object exceeds size limit, streaming uncached"
            );
            let FetchedObject {
                reader,
                declared_len,
            } = fetched;
            return Ok(BackendFile::direct(
                name,
                reader,
                declared_len,
                SystemTime::now(),
            ));
        }

        let data = self.buffer_body(fetched, ctx).await?;
        let entry = Arc::new(CachedObject::new(name, data));
        let cost = entry.cost();
        if !self.cache.put(name.to_string(), Arc::clone(&entry), cost).await {
            warn!(component = "s3-backend", bucket, name, cost, "cache refused admission");
        }
        info!(component = "s3-backend", bucket, name, size = entry.declared_len, "cache miss");
        Ok(BackendFile::cached(name, entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io::SeekFrom;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory fetcher standing in for the S3 SDK.
    struct MemoryFetcher {
        objects: HashMap<String, Vec<u8>>,
        declared: HashMap<String, i64>,
        calls: AtomicUsize,
        last_key: Mutex<Option<String>>,
        fail: bool,
    }

    impl MemoryFetcher {
        fn new(objects: &[(&str, &[u8])]) -> Self {
            Self {
                objects: objects
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_vec()))
                    .collect(),
                declared: HashMap::new(),
                calls: AtomicUsize::new(0),
                last_key: Mutex::new(None),
                fail: false,
            }
        }

        fn failing() -> Self {
            let mut fetcher = Self::new(&[]);
            fetcher.fail = true;
            fetcher
        }

        fn declare(mut self, key: &str, len: i64) -> Self {
            self.declared.insert(key.to_string(), len);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ObjectFetcher for MemoryFetcher {
        async fn get(&self, _bucket: &str, key: &str) -> Result<FetchedObject> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_key.lock() = Some(key.to_string());
            if self.fail {
                return Err(DienerError::Transport("connection refused".to_string()));
            }
            let data = self
                .objects
                .get(key)
                .ok_or_else(|| DienerError::NotFound(key.to_string()))?
                .clone();
            let declared_len = self
                .declared
                .get(key)
                .copied()
                .unwrap_or(data.len() as i64);
            Ok(FetchedObject {
                reader: Box::new(std::io::Cursor::new(data)),
                declared_len,
            })
        }
    }

    fn backend_with(
        fetcher: Arc<MemoryFetcher>,
        max_object_size: i64,
        max_age: Duration,
    ) -> (StorageBackend, Arc<ObjectCache>) {
        let cache = Arc::new(ObjectCache::new(CacheConfig {
            max_size_bytes: 1 << 20,
            max_entries: 64,
        }));
        let config = S3BackendConfig {
            bucket_name: "assets".to_string(),
            endpoint: None,
            region: None,
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            max_object_size,
            transfer_buf_size: 8,
            max_age,
        };
        let backend = StorageBackend::with_fetcher(config, Arc::clone(&cache), fetcher);
        (backend, cache)
    }

    async fn read_all(file: &mut BackendFile) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 16];
        loop {
            let n = file.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[tokio::test]
    async fn test_cache_hit_after_miss() {
        let fetcher = Arc::new(MemoryFetcher::new(&[("a/b", b"x".repeat(100).as_slice())]));
        let (backend, _cache) = backend_with(Arc::clone(&fetcher), 1 << 16, Duration::from_secs(60));
        let ctx = RequestContext::new();

        let mut first = backend.open("/a/b", &ctx).await.unwrap();
        assert_eq!(read_all(&mut first).await.len(), 100);
        assert_eq!(fetcher.calls(), 1);

        let mut second = backend.open("/a/b", &ctx).await.unwrap();
        assert_eq!(read_all(&mut second).await, b"x".repeat(100));
        assert_eq!(fetcher.calls(), 1, "second open must be served from cache");
    }

    #[tokio::test]
    async fn test_leading_slash_stripped_once() {
        let fetcher = Arc::new(MemoryFetcher::new(&[("k", b"v")]));
        let (backend, cache) = backend_with(Arc::clone(&fetcher), 1 << 16, Duration::from_secs(60));
        let ctx = RequestContext::new();

        backend.open("/k", &ctx).await.unwrap();
        assert_eq!(fetcher.last_key.lock().as_deref(), Some("k"));
        assert!(cache.get("k").await.is_some(), "cache keyed by stripped name");
    }

    #[tokio::test]
    async fn test_ttl_expiry_refetches() {
        let fetcher = Arc::new(MemoryFetcher::new(&[("k", b"0123456789")]));
        let (backend, cache) = backend_with(Arc::clone(&fetcher), 1 << 16, Duration::from_millis(40));
        let ctx = RequestContext::new();

        backend.open("/k", &ctx).await.unwrap();
        assert_eq!(fetcher.calls(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        backend.open("/k", &ctx).await.unwrap();
        assert_eq!(fetcher.calls(), 2, "expired entry must be refetched");
        assert!(cache.get("k").await.is_some(), "replacement entry admitted");
    }

    #[tokio::test]
    async fn test_oversize_passthrough() {
        let body = vec![7u8; 4096];
        let fetcher = Arc::new(MemoryFetcher::new(&[("big", body.as_slice())]));
        let (backend, cache) = backend_with(Arc::clone(&fetcher), 1024, Duration::from_secs(60));
        let ctx = RequestContext::new();

        let mut file = backend.open("/big", &ctx).await.unwrap();
        assert!(matches!(file, BackendFile::Direct(_)));
        assert!(cache.get("big").await.is_none(), "oversized objects are never cached");
        assert!(matches!(
            file.seek(SeekFrom::Start(10)),
            Err(DienerError::Invalid(_))
        ));
        assert_eq!(read_all(&mut file).await, body);
    }

    #[tokio::test]
    async fn test_transport_error_collapses_to_not_found() {
        let fetcher = Arc::new(MemoryFetcher::failing());
        let (backend, _cache) = backend_with(fetcher, 1 << 16, Duration::from_secs(60));
        let ctx = RequestContext::new();

        let err = backend.open("/k", &ctx).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_empty_object_is_cacheable() {
        let fetcher = Arc::new(MemoryFetcher::new(&[("empty", b"")]));
        let (backend, cache) = backend_with(Arc::clone(&fetcher), 1 << 16, Duration::from_secs(60));
        let ctx = RequestContext::new();

        let file = backend.open("/empty", &ctx).await.unwrap();
        assert_eq!(file.stat().size, 0);
        assert!(cache.get("empty").await.is_some());

        backend.open("/empty", &ctx).await.unwrap();
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_declared_length_mismatch_uses_received_bytes() {
        // Store declares 100 bytes but delivers 4; the entry answers for
        // what was actually buffered.
        let fetcher = Arc::new(MemoryFetcher::new(&[("k", b"abcd")]).declare("k", 100));
        let (backend, cache) = backend_with(fetcher, 1 << 16, Duration::from_secs(60));
        let ctx = RequestContext::new();

        let file = backend.open("/k", &ctx).await.unwrap();
        assert_eq!(file.stat().size, 4);
        assert_eq!(cache.get("k").await.unwrap().declared_len, 4);
    }

    #[tokio::test]
    async fn test_cancelled_context_aborts_fetch() {
        let fetcher = Arc::new(MemoryFetcher::new(&[("k", b"v")]));
        let (backend, _cache) = backend_with(Arc::clone(&fetcher), 1 << 16, Duration::from_secs(60));
        let ctx = RequestContext::new();
        ctx.cancel();

        let err = backend.open("/k", &ctx).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(fetcher.calls(), 0, "cancelled request must not hit the store");
    }
}
