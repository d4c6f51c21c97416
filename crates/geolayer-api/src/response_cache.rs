//! Durable response cache.
//!
//! A named key-value store of response bodies addressed by URL, checked
//! before any network activity. The disk store survives process restarts;
//! the memory store backs tests and `--no-cache`-style runs that still want
//! in-process reuse.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::Error;

/// A named byte-blob store addressed by URL string.
///
/// Implementations must be safe to share across tasks. Reads that fail are
/// reported as errors; the fetch layer treats them as misses.
pub trait ResponseStore: Send + Sync {
    /// Store name (e.g. `"geojson-v1"`).
    fn name(&self) -> &str;

    /// Look up a previously stored body.
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Option<Bytes>, Error>>;

    /// Store a copy of a successful response body.
    fn put<'a>(&'a self, url: &'a str, body: Bytes) -> BoxFuture<'a, Result<(), Error>>;

    /// Remove one entry. Returns `true` if it existed.
    fn delete<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<bool, Error>>;

    /// Remove every entry in this store.
    fn clear(&self) -> BoxFuture<'_, Result<(), Error>>;
}

// ── Disk store ───────────────────────────────────────────────────────

/// File-per-URL store under `<root>/<name>/`.
///
/// File names are UUIDv5 digests of the URL so arbitrary URLs map to safe,
/// fixed-length names. Writes go to a temporary file first and are renamed
/// into place, so a crashed write never leaves a truncated entry.
#[derive(Debug, Clone)]
pub struct DiskResponseStore {
    name: String,
    dir: PathBuf,
}

impl DiskResponseStore {
    pub fn new(root: impl AsRef<Path>, name: impl Into<String>) -> Self {
        let name = name.into();
        let dir = root.as_ref().join(&name);
        Self { name, dir }
    }

    /// Directory holding this store's entries.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, url: &str) -> PathBuf {
        let id = Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes());
        self.dir.join(format!("{id}.body"))
    }

    /// Total bytes currently stored.
    pub async fn size_on_disk(&self) -> Result<u64, Error> {
        let mut total = 0;
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            total += entry.metadata().await?.len();
        }
        Ok(total)
    }
}

impl ResponseStore for DiskResponseStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Option<Bytes>, Error>> {
        Box::pin(async move {
            let path = self.entry_path(url);
            match tokio::fs::read(&path).await {
                Ok(body) => {
                    trace!(url, path = %path.display(), "disk cache hit");
                    Ok(Some(Bytes::from(body)))
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(Error::Cache {
                    message: format!("read {}: {e}", path.display()),
                }),
            }
        })
    }

    fn put<'a>(&'a self, url: &'a str, body: Bytes) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.dir).await?;
            let path = self.entry_path(url);
            let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
            tokio::fs::write(&tmp, &body).await?;
            if let Err(e) = tokio::fs::rename(&tmp, &path).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e.into());
            }
            debug!(url, bytes = body.len(), store = %self.name, "stored response");
            Ok(())
        })
    }

    fn delete<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<bool, Error>> {
        Box::pin(async move {
            match tokio::fs::remove_file(self.entry_path(url)).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn clear(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            match tokio::fs::remove_dir_all(&self.dir).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}

// ── Memory store ─────────────────────────────────────────────────────

/// Process-local store. Lost on exit.
#[derive(Debug, Default)]
pub struct MemoryResponseStore {
    name: String,
    entries: DashMap<String, Bytes>,
}

impl MemoryResponseStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResponseStore for MemoryResponseStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Option<Bytes>, Error>> {
        let hit = self.entries.get(url).map(|r| r.value().clone());
        Box::pin(async move { Ok(hit) })
    }

    fn put<'a>(&'a self, url: &'a str, body: Bytes) -> BoxFuture<'a, Result<(), Error>> {
        self.entries.insert(url.to_owned(), body);
        Box::pin(async { Ok(()) })
    }

    fn delete<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<bool, Error>> {
        let existed = self.entries.remove(url).is_some();
        Box::pin(async move { Ok(existed) })
    }

    fn clear(&self) -> BoxFuture<'_, Result<(), Error>> {
        self.entries.clear();
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const URL: &str = "https://tiles.example.com/layer/42/geojson?v=3";

    #[tokio::test]
    async fn disk_store_roundtrip_and_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DiskResponseStore::new(tmp.path(), "geojson-v1");

        assert!(store.get(URL).await.unwrap().is_none());
        store.put(URL, Bytes::from_static(b"{}")).await.unwrap();
        assert_eq!(store.get(URL).await.unwrap().unwrap(), Bytes::from_static(b"{}"));
        assert!(store.dir().ends_with("geojson-v1"));
        assert_eq!(store.size_on_disk().await.unwrap(), 2);

        assert!(store.delete(URL).await.unwrap());
        assert!(!store.delete(URL).await.unwrap());
        assert!(store.get(URL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn disk_store_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        DiskResponseStore::new(tmp.path(), "icons-v1")
            .put(URL, Bytes::from_static(b"png"))
            .await
            .unwrap();

        let reopened = DiskResponseStore::new(tmp.path(), "icons-v1");
        assert_eq!(reopened.get(URL).await.unwrap().unwrap(), Bytes::from_static(b"png"));

        let other = DiskResponseStore::new(tmp.path(), "geojson-v1");
        assert!(other.get(URL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn disk_store_clear_on_missing_dir_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DiskResponseStore::new(tmp.path(), "never-written");
        store.clear().await.unwrap();
        assert_eq!(store.size_on_disk().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryResponseStore::new("mem");
        store.put(URL, Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get(URL).await.unwrap().is_some());
        store.clear().await.unwrap();
        assert!(store.is_empty());
    }
}
