// ── Layer pipeline ──
//
// Process-scoped service tying the stages together:
// result cache -> dedup -> (durable cache -> retrying fetch -> streaming
// parse) -> off-thread processing -> result cache.
// Constructed once, handed to consumers, and shut down explicitly.

use std::sync::Arc;
use std::time::Instant;

use geolayer_api::{
    DiskResponseStore, Feature, FeatureCollection, FetchOptions, FetchStats, MemoryResponseStore,
    ResponseStore, RetryPolicy, RetryingFetcher, TransportConfig, parse_stream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batch::{BatchOrchestrator, BatchReport};
use crate::config::PipelineConfig;
use crate::dedup::{DedupStats, Deduplicator};
use crate::error::CoreError;
use crate::icons::{IconRef, ImageBlobCache};
use crate::model::{BatchProgress, CacheEntry, KeyedCollection, LayerDescriptor};
use crate::processor::{BatchItem, OffThreadProcessor, ProcessOptions};
use crate::store::{ActiveLayers, ActiveSnapshot, LayerResultCache, LayerSnapshot};
use crate::stream::SnapshotStream;
use crate::style::ResolvedStyle;

/// Per-feature callback for streaming single-layer loads.
pub type FeatureCallback = Box<dyn FnMut(&Feature, usize) + Send>;

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<PipelineInner>`.
#[derive(Clone)]
pub struct LayerPipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    config: PipelineConfig,
    fetcher: RetryingFetcher,
    icons: ImageBlobCache,
    processor: OffThreadProcessor,
    cache: LayerResultCache,
    active: ActiveLayers,
    dedup: Deduplicator<String, Arc<CacheEntry>>,
    batches: BatchOrchestrator,
    cancel: CancellationToken,
}

impl std::fmt::Debug for LayerPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerPipeline")
            .field("cached", &self.inner.cache.len())
            .field("active", &self.inner.active.snapshot().len())
            .field("in_flight", &self.inner.dedup.in_flight())
            .finish_non_exhaustive()
    }
}

impl LayerPipeline {
    /// Build a pipeline, opening durable stores as configured.
    ///
    /// With `cache.persistent` and a directory, responses are stored on
    /// disk under `<directory>/<name>`; without a directory they are kept
    /// in memory for the life of the process.
    pub fn new(config: PipelineConfig) -> Result<Self, CoreError> {
        let (layers, icons) = if config.cache.persistent {
            match &config.cache.directory {
                Some(dir) => (
                    Some(Arc::new(DiskResponseStore::new(dir, &config.cache.name)) as Arc<dyn ResponseStore>),
                    Some(Arc::new(DiskResponseStore::new(dir, &config.cache.icon_name)) as Arc<dyn ResponseStore>),
                ),
                None => (
                    Some(Arc::new(MemoryResponseStore::new(&config.cache.name)) as Arc<dyn ResponseStore>),
                    Some(Arc::new(MemoryResponseStore::new(&config.cache.icon_name)) as Arc<dyn ResponseStore>),
                ),
            }
        } else {
            (None, None)
        };
        Self::with_stores(config, layers, icons)
    }

    /// Build a pipeline over caller-supplied durable stores.
    pub fn with_stores(
        config: PipelineConfig,
        layer_store: Option<Arc<dyn ResponseStore>>,
        icon_store: Option<Arc<dyn ResponseStore>>,
    ) -> Result<Self, CoreError> {
        let mut transport = TransportConfig::default();
        if let Some(ua) = &config.fetch.user_agent {
            transport.user_agent.clone_from(ua);
        }

        let policy = RetryPolicy {
            base: config.fetch.retry_base,
            first_exponent: 0,
            jitter: config.fetch.jitter,
            fail_fast_not_found: false,
            rate_limit_cooldown: Some(config.fetch.rate_limit_cooldown),
        };
        let mut fetcher = RetryingFetcher::new(&transport, policy).map_err(|e| CoreError::Config {
            message: format!("cannot build HTTP client: {e}"),
        })?;
        if let Some(store) = layer_store {
            fetcher = fetcher.with_store(store);
        }

        let icons = ImageBlobCache::new(&config.icons, &transport, config.fetch.timeout, icon_store)?;
        let cancel = CancellationToken::new();

        info!(
            persistent = fetcher.store().is_some(),
            batch_concurrency = config.batch.concurrency,
            icon_concurrency = config.icons.concurrency,
            "layer pipeline ready"
        );

        Ok(Self {
            inner: Arc::new(PipelineInner {
                batches: BatchOrchestrator::new(cancel.child_token()),
                config,
                fetcher,
                icons,
                processor: OffThreadProcessor::new(),
                cache: LayerResultCache::new(),
                active: ActiveLayers::new(),
                dedup: Deduplicator::new(),
                cancel,
            }),
        })
    }

    /// Start the processing worker now instead of on first use.
    pub fn init(&self) -> Result<(), CoreError> {
        self.inner.processor.init()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    // ── Single layer ─────────────────────────────────────────────────

    /// Enable one layer.
    ///
    /// A cached layer is returned as the same `Arc` with no network or
    /// processing work. Otherwise the layer is fetched (streamed when
    /// configured), processed off-thread, cached, and marked active.
    /// `on_feature` fires for each streamed feature; callers that join an
    /// already in-flight load for the same key do not receive callbacks.
    pub async fn toggle_on<F>(&self, descriptor: LayerDescriptor, on_feature: F) -> Result<Arc<CacheEntry>, CoreError>
    where
        F: FnMut(&Feature, usize) + Send + 'static,
    {
        self.toggle_on_with_cancel(descriptor, None, on_feature).await
    }

    /// [`toggle_on`](Self::toggle_on) with a cancellation token, which also
    /// turns the per-attempt timeout into a hard limit.
    pub async fn toggle_on_with_cancel<F>(
        &self,
        descriptor: LayerDescriptor,
        cancel: Option<CancellationToken>,
        on_feature: F,
    ) -> Result<Arc<CacheEntry>, CoreError>
    where
        F: FnMut(&Feature, usize) + Send + 'static,
    {
        let key = descriptor.key.clone();
        let streaming = self.inner.config.processing.streaming;
        let entry = self
            .enable(descriptor, cancel, streaming, Some(Box::new(on_feature) as FeatureCallback))
            .await?;
        self.inner.active.activate(&key);
        Ok(entry)
    }

    /// Disable one layer. Its result stays cached.
    pub fn toggle_off(&self, key: &str) -> bool {
        let was_active = self.inner.active.deactivate(key);
        if was_active {
            debug!(key, "layer disabled");
        }
        was_active
    }

    // ── Batches ──────────────────────────────────────────────────────

    /// Enable many layers with bounded parallelism.
    ///
    /// Starting a batch cancels any batch still running. Responses are
    /// buffered rather than streamed. Progress fires once per settled
    /// layer in completion order; failures are reported per key.
    pub async fn load_batch<P>(&self, descriptors: Vec<LayerDescriptor>, on_progress: P) -> BatchReport<Arc<CacheEntry>>
    where
        P: FnMut(BatchProgress),
    {
        let concurrency = self.inner.config.batch.concurrency;
        self.inner
            .batches
            .run(
                descriptors,
                concurrency,
                |d| d.key.clone(),
                |descriptor, token| {
                    let this = self.clone();
                    async move {
                        let key = descriptor.key.clone();
                        let entry = this.enable(descriptor, Some(token), false, None).await?;
                        this.inner.active.activate(&key);
                        Ok(entry)
                    }
                },
                on_progress,
            )
            .await
    }

    /// Disable many layers at once. Results stay cached. Returns how many
    /// were active.
    pub fn disable_batch<S: AsRef<str>>(&self, keys: &[S]) -> usize {
        self.inner.active.deactivate_all(keys.iter().map(AsRef::as_ref))
    }

    /// Cancel the running batch, if any.
    pub fn cancel_batch(&self) -> bool {
        self.inner.batches.cancel_active()
    }

    /// Process caller-supplied collections in one worker round trip.
    pub async fn process_local(&self, items: Vec<BatchItem>) -> Result<Vec<KeyedCollection>, CoreError> {
        self.inner.processor.process_batch(items).await
    }

    /// Resolve a marker icon through the icon cache.
    pub async fn resolve_icon(&self, url: &str) -> IconRef {
        self.inner.icons.resolve(url).await
    }

    // ── State access ─────────────────────────────────────────────────

    pub fn cache(&self) -> &LayerResultCache {
        &self.inner.cache
    }

    pub fn icons(&self) -> &ImageBlobCache {
        &self.inner.icons
    }

    pub fn response_store(&self) -> Option<&Arc<dyn ResponseStore>> {
        self.inner.fetcher.store()
    }

    pub fn active_keys(&self) -> ActiveSnapshot {
        self.inner.active.snapshot()
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.inner.active.is_active(key)
    }

    pub fn subscribe_active(&self) -> SnapshotStream<ActiveSnapshot> {
        SnapshotStream::new(self.inner.active.subscribe())
    }

    pub fn subscribe_layers(&self) -> SnapshotStream<LayerSnapshot> {
        SnapshotStream::new(self.inner.cache.subscribe())
    }

    pub fn dedup_stats(&self) -> DedupStats {
        self.inner.dedup.stats()
    }

    pub fn fetch_stats(&self) -> FetchStats {
        self.inner.fetcher.stats()
    }

    /// Cancel running batches and stop the processing worker.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.processor.shutdown().await;
        self.inner.dedup.log_stats();
        info!(cached = self.inner.cache.len(), "layer pipeline shut down");
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Cache hit, or join/start the deduplicated load for the key.
    ///
    /// A joined load that was cancelled by its owner's token is not this
    /// caller's cancellation: the settled entry is already gone from the
    /// deduplicator, so the caller acquires again under its own token.
    async fn enable(
        &self,
        descriptor: LayerDescriptor,
        cancel: Option<CancellationToken>,
        streaming: bool,
        mut on_feature: Option<FeatureCallback>,
    ) -> Result<Arc<CacheEntry>, CoreError> {
        if let Some(hit) = self.inner.cache.get(&descriptor.key) {
            debug!(key = %descriptor.key, "layer cache hit");
            return Ok(hit);
        }

        loop {
            let inner = Arc::clone(&self.inner);
            let attempt = descriptor.clone();
            let attempt_cancel = cancel.clone();
            let callback = &mut on_feature;
            let result = self
                .inner
                .dedup
                .acquire(descriptor.key.clone(), move || {
                    // Only the load that actually runs consumes the callback.
                    let on_feature = callback.take();
                    async move {
                        // A load for this key may have settled between the
                        // cache check above and the dedup registration.
                        if let Some(hit) = inner.cache.get(&attempt.key) {
                            return Ok(hit);
                        }
                        inner.build(attempt, attempt_cancel, streaming, on_feature).await
                    }
                })
                .await;

            match result {
                Err(e) if e.is_cancelled() && !cancel.as_ref().is_some_and(CancellationToken::is_cancelled) => {
                    debug!(key = %descriptor.key, "joined load was cancelled by its owner, acquiring again");
                }
                other => return other,
            }
        }
    }
}

impl PipelineInner {
    fn fetch_options(&self, cancel: Option<CancellationToken>) -> FetchOptions {
        FetchOptions {
            timeout: self.config.fetch.timeout,
            max_retries: self.config.fetch.max_retries,
            cancel,
        }
    }

    async fn build(
        &self,
        descriptor: LayerDescriptor,
        cancel: Option<CancellationToken>,
        streaming: bool,
        on_feature: Option<FeatureCallback>,
    ) -> Result<Arc<CacheEntry>, CoreError> {
        let started = Instant::now();
        let opts = self.fetch_options(cancel);

        // The icon gets the same time budget as one layer attempt and never
        // outlives a cancelled load.
        let icon = async {
            match &descriptor.style.icon_url {
                Some(url) => Some(
                    self.icons
                        .resolve_within(url, self.config.fetch.timeout, opts.cancel.as_ref())
                        .await
                        .to_string(),
                ),
                None => None,
            }
        };
        let fetch = self.fetch_collection(&descriptor.url, &opts, streaming, on_feature);
        let (icon, collection) = tokio::join!(icon, fetch);
        let collection = collection?;
        if opts.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(CoreError::Cancelled);
        }

        let options = ProcessOptions {
            tolerance: descriptor.tolerance.or(self.config.processing.default_tolerance),
            style: ResolvedStyle::from_meta(&descriptor.style, icon),
        };
        let input_positions = collection.position_count();
        let data = self.processor.process(collection, options).await?;

        info!(
            key = %descriptor.key,
            features = data.len(),
            positions_in = input_positions,
            positions_out = data.position_count(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "layer ready"
        );

        let key = descriptor.key.clone();
        let entry = Arc::new(CacheEntry::new(data, descriptor));
        self.cache.put(key, Arc::clone(&entry));
        Ok(entry)
    }

    /// Fetch and parse one FeatureCollection.
    ///
    /// Streaming parse failures fall back to a full-body fetch and parse of
    /// the same URL; a body that fails to parse is dropped from the durable
    /// cache so it is not served again.
    async fn fetch_collection(
        &self,
        url: &str,
        opts: &FetchOptions,
        streaming: bool,
        on_feature: Option<FeatureCallback>,
    ) -> Result<FeatureCollection, CoreError> {
        if streaming {
            match self.stream_collection(url, opts, on_feature).await {
                Ok(collection) => return Ok(collection),
                Err(e @ geolayer_api::Error::Parse { .. }) => {
                    warn!(url, error = %e, "streaming parse failed, retrying as full-body fetch");
                    self.forget_response(url).await;
                }
                Err(e) => return Err(CoreError::from_api(url, e)),
            }
        }

        let body = self
            .fetcher
            .fetch(url, opts)
            .await
            .map_err(|e| CoreError::from_api(url, e))?;
        match FeatureCollection::from_slice(&body) {
            Ok(collection) => Ok(collection),
            Err(e) => {
                self.forget_response(url).await;
                Err(CoreError::from_api(url, e))
            }
        }
    }

    async fn stream_collection(
        &self,
        url: &str,
        opts: &FetchOptions,
        mut on_feature: Option<FeatureCallback>,
    ) -> Result<FeatureCollection, geolayer_api::Error> {
        let chunks = self.fetcher.fetch_stream(url, opts).await?;
        parse_stream(
            chunks,
            opts.cancel.as_ref(),
            |feature, count| {
                if let Some(callback) = on_feature.as_mut() {
                    callback(feature, count);
                }
            },
            |count| debug!(url, count, "features parsed"),
        )
        .await
    }

    async fn forget_response(&self, url: &str) {
        if let Some(store) = self.fetcher.store() {
            if let Err(e) = store.delete(url).await {
                warn!(url, error = %e, "failed to drop cached response");
            }
        }
    }
}
