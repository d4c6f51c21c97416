//! Layer pipeline between `geolayer-api` and map consumers (CLI, renderers).
//!
//! This crate owns the loading, processing, and caching of geospatial
//! layers:
//!
//! - **[`LayerPipeline`]**: Central facade. [`toggle_on()`](LayerPipeline::toggle_on)
//!   enables one layer (cache, dedup, streamed fetch, off-thread processing);
//!   [`load_batch()`](LayerPipeline::load_batch) enables many with bounded
//!   parallelism and per-item outcomes.
//!
//! - **[`Deduplicator`]**: Coalesces concurrent loads for one key into a
//!   single shared future.
//!
//! - **[`OffThreadProcessor`]**: Dedicated worker thread running
//!   [`simplify`] and [`style::enrich`] over whole collections, addressed
//!   by id-correlated request/response messages.
//!
//! - **[`LayerResultCache`] / [`ActiveLayers`]**: `DashMap` + `watch`
//!   backed state, observable through [`SnapshotStream`].
//!
//! - **[`ImageBlobCache`]**: Concurrency-bounded marker icon downloads
//!   with graceful fallback to the remote URL.

pub mod batch;
pub mod config;
pub mod dedup;
pub mod error;
pub mod icons;
pub mod model;
pub mod pipeline;
pub mod processor;
pub mod simplify;
pub mod store;
pub mod stream;
pub mod style;

// ── Primary re-exports ──────────────────────────────────────────────
pub use batch::{BatchOrchestrator, BatchReport, ItemOutcome, ItemStatus, Settled};
pub use config::{BatchConfig, CacheConfig, FetchConfig, IconConfig, PipelineConfig, ProcessingConfig};
pub use dedup::{DedupStats, Deduplicator};
pub use error::CoreError;
pub use icons::{IconBlob, IconRef, IconStats, ImageBlobCache};
pub use pipeline::{FeatureCallback, LayerPipeline};
pub use processor::{BatchItem, OffThreadProcessor, ProcessOptions, process_collection};
pub use store::{ActiveLayers, ActiveSnapshot, LayerResultCache, LayerSnapshot};
pub use stream::{SnapshotStream, SnapshotWatchStream};
pub use style::ResolvedStyle;

pub use model::{
    BatchProgress, CacheEntry, Color, EnhancedFeatureCollection, KeyedCollection, LayerDescriptor, LayerType,
    LineStyle, StyleMeta,
};

// Geometry types live in the transport crate; re-exported for consumers.
pub use geolayer_api::{Feature, FeatureCollection, Geometry, Position};
