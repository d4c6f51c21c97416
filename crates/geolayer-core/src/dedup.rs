//! Request deduplication.
//!
//! At most one underlying operation runs per key at a time. Concurrent
//! callers for a key that is already in flight receive a clone of the same
//! shared future and therefore observe the same success or failure. Values
//! are cloned out to each waiter, so `V` is typically an `Arc`.
//!
//! The operation is spawned onto the runtime, so it settles (and its entry
//! is removed) even if every caller stops polling. Entries carry a
//! generation number so a settling operation never removes a newer entry
//! registered for the same key.

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{debug, info};

use crate::error::CoreError;

/// Shared outcome handed to every caller of one in-flight key.
pub type SharedResult<V> = Shared<BoxFuture<'static, Result<V, CoreError>>>;

struct Pending<V> {
    generation: u64,
    future: SharedResult<V>,
}

/// Statistics for monitoring deduplication effectiveness.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DedupStats {
    pub total_requests: u64,
    /// Requests that joined an in-flight operation.
    pub coalesced_requests: u64,
    /// Requests that started a new operation.
    pub new_requests: u64,
}

impl DedupStats {
    /// Fraction of requests that were coalesced (0.0 to 1.0).
    #[allow(clippy::cast_precision_loss)]
    pub fn coalescing_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.coalesced_requests as f64 / self.total_requests as f64
        }
    }
}

/// Keyed single-flight table.
pub struct Deduplicator<K, V> {
    pending: Arc<DashMap<K, Pending<V>>>,
    next_generation: AtomicU64,
    total_requests: AtomicU64,
    coalesced_requests: AtomicU64,
    new_requests: AtomicU64,
}

impl<K, V> Default for Deduplicator<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Deduplicator<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            coalesced_requests: AtomicU64::new(0),
            new_requests: AtomicU64::new(0),
        }
    }

    /// Join the in-flight operation for `key`, or start one with `op`.
    ///
    /// `op` is only invoked when no operation for `key` is in flight. The
    /// check and the insert happen under one map-entry lock, so two
    /// simultaneous callers can never both start work.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn acquire<F, Fut>(&self, key: K, op: F) -> SharedResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, CoreError>> + Send + 'static,
    {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        match self.pending.entry(key.clone()) {
            Entry::Occupied(entry) => {
                self.coalesced_requests.fetch_add(1, Ordering::Relaxed);
                debug!(key = ?key, "joining in-flight request");
                entry.get().future.clone()
            }
            Entry::Vacant(entry) => {
                self.new_requests.fetch_add(1, Ordering::Relaxed);
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let pending = Arc::clone(&self.pending);
                let work = op();

                let handle = tokio::spawn(async move {
                    let result = work.await;
                    pending.remove_if(&key, |_, p| p.generation == generation);
                    result
                });

                let future = async move {
                    handle
                        .await
                        .unwrap_or_else(|e| Err(CoreError::Internal(format!("load task failed: {e}"))))
                }
                .boxed()
                .shared();

                entry.insert(Pending {
                    generation,
                    future: future.clone(),
                });
                debug!(in_flight = self.pending.len(), "started new request");
                future
            }
        }
    }

    /// Number of keys currently in flight.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            coalesced_requests: self.coalesced_requests.load(Ordering::Relaxed),
            new_requests: self.new_requests.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            total = stats.total_requests,
            coalesced = stats.coalesced_requests,
            new = stats.new_requests,
            ratio = %format!("{:.1}%", stats.coalescing_ratio() * 100.0),
            "request dedup statistics"
        );
    }
}

impl<K: Eq + Hash, V> fmt::Debug for Deduplicator<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deduplicator")
            .field("in_flight", &self.pending.len())
            .finish_non_exhaustive()
    }
}
