// ── Permanent per-layer result cache ──
//
// Concurrent storage of processed layers with push-based change
// notification via `watch` channels. Entries are never evicted: the cache
// is the authority for "does this layer need network work".

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::model::CacheEntry;

/// Snapshot of every cached entry, in no particular order.
pub type LayerSnapshot = Arc<Vec<Arc<CacheEntry>>>;

/// Lock-free map of layer key to processed result.
///
/// Every mutation bumps a version counter and rebuilds the snapshot that
/// subscribers receive.
pub struct LayerResultCache {
    by_key: DashMap<String, Arc<CacheEntry>>,
    version: watch::Sender<u64>,
    snapshot: watch::Sender<LayerSnapshot>,
}

impl Default for LayerResultCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LayerResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerResultCache")
            .field("len", &self.by_key.len())
            .field("version", &*self.version.borrow())
            .finish()
    }
}

impl LayerResultCache {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_key: DashMap::new(),
            version,
            snapshot,
        }
    }

    /// Look up a layer by key (cheap `Arc` clone).
    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.by_key.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Store an entry. Returns `true` if the key was new.
    ///
    /// A later put for the same key overwrites; the deduplicator upstream
    /// guarantees puts for one key never race.
    pub fn put(&self, key: impl Into<String>, entry: Arc<CacheEntry>) -> bool {
        let is_new = self.by_key.insert(key.into(), entry).is_none();
        self.rebuild_snapshot();
        self.bump_version();
        is_new
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// All cached layer keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.by_key.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Current snapshot (cheap `Arc` clone).
    pub fn snapshot(&self) -> LayerSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<LayerSnapshot> {
        self.snapshot.subscribe()
    }

    /// Number of mutations so far.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Reads the map under the watch write lock, so concurrent puts publish
    /// in the order they read and the last snapshot sees every insert.
    fn rebuild_snapshot(&self) {
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| {
            *snap = Arc::new(self.by_key.iter().map(|r| Arc::clone(r.value())).collect());
        });
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{EnhancedFeatureCollection, LayerDescriptor};

    fn entry(key: &str) -> Arc<CacheEntry> {
        Arc::new(CacheEntry::new(
            EnhancedFeatureCollection::default(),
            LayerDescriptor::new(key, format!("https://example.com/{key}")),
        ))
    }

    #[test]
    fn put_returns_true_for_new_key() {
        let cache = LayerResultCache::new();
        assert!(cache.put("roads", entry("roads")));
        assert!(!cache.put("roads", entry("roads")));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.version(), 2);
    }

    #[test]
    fn get_returns_same_object() {
        let cache = LayerResultCache::new();
        let e = entry("rivers");
        cache.put("rivers", Arc::clone(&e));

        let a = cache.get("rivers").unwrap();
        let b = cache.get("rivers").unwrap();
        assert!(Arc::ptr_eq(&a, &e));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn keys_are_sorted() {
        let cache = LayerResultCache::new();
        for key in ["c", "a", "b"] {
            cache.put(key, entry(key));
        }
        assert_eq!(cache.keys(), vec!["a", "b", "c"]);
        assert!(cache.contains("b"));
    }

    #[test]
    fn concurrent_puts_leave_a_complete_snapshot() {
        const THREADS: usize = 16;
        for round in 0..200 {
            let cache = LayerResultCache::new();
            let barrier = std::sync::Barrier::new(THREADS);
            std::thread::scope(|scope| {
                for t in 0..THREADS {
                    let (cache, barrier) = (&cache, &barrier);
                    scope.spawn(move || {
                        let key = format!("layer-{t}");
                        barrier.wait();
                        cache.put(key.clone(), entry(&key));
                    });
                }
            });
            assert_eq!(cache.snapshot().len(), THREADS, "round {round}");
            assert_eq!(cache.version(), u64::try_from(THREADS).unwrap());
        }
    }

    #[tokio::test]
    async fn subscribers_see_new_snapshots() {
        let cache = LayerResultCache::new();
        let mut rx = cache.subscribe();
        assert!(rx.borrow().is_empty());

        cache.put("a", entry("a"));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);
        assert_eq!(cache.snapshot().len(), 1);
    }
}
