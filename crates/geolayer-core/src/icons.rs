//! Marker icon cache.
//!
//! Resolves icon URLs to local blob references with bounded download
//! concurrency. Durable store hits return immediately without taking a
//! download slot; concurrent requests for one URL share a single download.
//! An icon that cannot be fetched degrades to its original remote URL, so
//! one broken icon never fails a layer.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use geolayer_api::{FetchOptions, ResponseStore, RetryPolicy, RetryingFetcher, TransportConfig};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::IconConfig;
use crate::dedup::Deduplicator;
use crate::error::CoreError;

const BLOB_SCHEME: &str = "blob:geolayer/";

/// Where a renderer should load an icon from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IconRef {
    /// Bytes held in this cache; look them up with [`ImageBlobCache::blob`].
    Blob { id: Uuid },
    /// Fallback to the original URL.
    Remote(String),
}

impl IconRef {
    pub fn is_blob(&self) -> bool {
        matches!(self, Self::Blob { .. })
    }

    /// Parse a reference previously rendered with `to_string()`.
    pub fn parse(s: &str) -> Self {
        s.strip_prefix(BLOB_SCHEME)
            .and_then(|id| Uuid::parse_str(id).ok())
            .map_or_else(|| Self::Remote(s.to_owned()), |id| Self::Blob { id })
    }
}

impl fmt::Display for IconRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blob { id } => write!(f, "{BLOB_SCHEME}{id}"),
            Self::Remote(url) => f.write_str(url),
        }
    }
}

/// A downloaded icon.
#[derive(Debug, Clone)]
pub struct IconBlob {
    pub id: Uuid,
    pub url: String,
    pub bytes: Bytes,
    pub content_type: Option<&'static str>,
}

/// Counters for monitoring the icon cache.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IconStats {
    pub store_hits: u64,
    pub downloads: u64,
    pub fallbacks: u64,
    /// Highest number of simultaneous downloads observed.
    pub peak_in_flight: usize,
}

struct Inner {
    fetcher: RetryingFetcher,
    options: FetchOptions,
    slots: Semaphore,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    blobs: DashMap<Uuid, Arc<IconBlob>>,
    store_hits: AtomicU64,
    downloads: AtomicU64,
    fallbacks: AtomicU64,
}

/// Concurrency-bounded icon fetch-and-cache. Cheap to clone.
#[derive(Clone)]
pub struct ImageBlobCache {
    inner: Arc<Inner>,
    dedup: Arc<Deduplicator<String, IconRef>>,
}

impl fmt::Debug for ImageBlobCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBlobCache")
            .field("blobs", &self.inner.blobs.len())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl ImageBlobCache {
    /// Build an icon cache with its own HTTP client.
    pub fn new(
        config: &IconConfig,
        transport: &TransportConfig,
        timeout: Duration,
        store: Option<Arc<dyn ResponseStore>>,
    ) -> Result<Self, CoreError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("image/*"));
        let http = transport
            .build_client_with_headers(headers)
            .map_err(|e| CoreError::Config {
                message: format!("cannot build icon HTTP client: {e}"),
            })?;
        Ok(Self::with_client(http, config, timeout, store))
    }

    pub fn with_client(
        http: reqwest::Client,
        config: &IconConfig,
        timeout: Duration,
        store: Option<Arc<dyn ResponseStore>>,
    ) -> Self {
        let policy = RetryPolicy {
            base: config.retry_base,
            first_exponent: 1,
            jitter: config.jitter,
            fail_fast_not_found: true,
            rate_limit_cooldown: Some(config.rate_limit_cooldown),
        };
        let mut fetcher = RetryingFetcher::with_client(http, policy);
        if let Some(store) = store {
            fetcher = fetcher.with_store(store);
        }
        let options = FetchOptions {
            timeout,
            max_retries: config.max_attempts.saturating_sub(1),
            cancel: None,
        };

        Self {
            inner: Arc::new(Inner {
                fetcher,
                options,
                slots: Semaphore::new(config.concurrency.max(1)),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
                blobs: DashMap::new(),
                store_hits: AtomicU64::new(0),
                downloads: AtomicU64::new(0),
                fallbacks: AtomicU64::new(0),
            }),
            dedup: Arc::new(Deduplicator::new()),
        }
    }

    /// Resolve `url` to a renderer-usable reference. Never fails.
    pub async fn resolve(&self, url: &str) -> IconRef {
        let id = blob_id(url);
        if self.inner.blobs.contains_key(&id) {
            return IconRef::Blob { id };
        }

        let inner = Arc::clone(&self.inner);
        let owned = url.to_owned();
        self.dedup
            .acquire(url.to_owned(), move || async move { Ok(inner.load(owned).await) })
            .await
            .unwrap_or_else(|_| IconRef::Remote(url.to_owned()))
    }

    /// [`resolve`](Self::resolve), giving up after `deadline` or when
    /// `cancel` fires. Giving up yields the remote URL; the download itself
    /// keeps running and fills the cache for later calls.
    pub async fn resolve_within(&self, url: &str, deadline: Duration, cancel: Option<&CancellationToken>) -> IconRef {
        let bounded = tokio::time::timeout(deadline, self.resolve(url));
        let resolved = match cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => None,
                r = bounded => r.ok(),
            },
            None => bounded.await.ok(),
        };
        resolved.unwrap_or_else(|| {
            debug!(
                url,
                deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                "icon not ready, using remote URL"
            );
            IconRef::Remote(url.to_owned())
        })
    }

    /// Bytes for a previously returned [`IconRef::Blob`].
    pub fn blob(&self, id: &Uuid) -> Option<Arc<IconBlob>> {
        self.inner.blobs.get(id).map(|r| Arc::clone(r.value()))
    }

    pub fn len(&self) -> usize {
        self.inner.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.blobs.is_empty()
    }

    pub fn stats(&self) -> IconStats {
        IconStats {
            store_hits: self.inner.store_hits.load(Ordering::Relaxed),
            downloads: self.inner.downloads.load(Ordering::Relaxed),
            fallbacks: self.inner.fallbacks.load(Ordering::Relaxed),
            peak_in_flight: self.inner.peak_in_flight.load(Ordering::Relaxed),
        }
    }
}

impl Inner {
    async fn load(&self, url: String) -> IconRef {
        // Durable hits skip the download queue entirely.
        if let Some(store) = self.fetcher.store() {
            if let Ok(Some(bytes)) = store.get(&url).await {
                self.store_hits.fetch_add(1, Ordering::Relaxed);
                return self.register(url, bytes);
            }
        }

        let Ok(_permit) = self.slots.acquire().await else {
            return IconRef::Remote(url);
        };
        let current = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::Relaxed);

        let result = self.fetcher.fetch(&url, &self.options).await;
        self.in_flight.fetch_sub(1, Ordering::Relaxed);

        match result {
            Ok(bytes) => {
                self.downloads.fetch_add(1, Ordering::Relaxed);
                self.register(url, bytes)
            }
            Err(e) => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!(url = %url, error = %e, "icon unavailable, using remote URL");
                IconRef::Remote(url)
            }
        }
    }

    fn register(&self, url: String, bytes: Bytes) -> IconRef {
        let id = blob_id(&url);
        debug!(url = %url, %id, bytes = bytes.len(), "icon cached");
        let blob = IconBlob {
            id,
            content_type: sniff_content_type(&bytes),
            url,
            bytes,
        };
        self.blobs.insert(id, Arc::new(blob));
        IconRef::Blob { id }
    }
}

fn blob_id(url: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes())
}

/// Best-effort image type detection from magic bytes.
pub fn sniff_content_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WEBP".as_slice()) {
        Some("image/webp")
    } else if bytes.trim_ascii_start().starts_with(b"<svg") || bytes.trim_ascii_start().starts_with(b"<?xml") {
        Some("image/svg+xml")
    } else {
        None
    }
}
