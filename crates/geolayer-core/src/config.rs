// ── Runtime pipeline configuration ──
//
// These types describe how the pipeline fetches, retries, and caches.
// They never touch disk: the CLI (via geolayer-config) builds a
// `PipelineConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

/// Network fetch tuning for layer data.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    /// Time budget per attempt. Advisory unless the load is cancellable.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub retry_base: Duration,
    pub jitter: bool,
    /// Extra wait after a 429 before the normal backoff.
    pub rate_limit_cooldown: Duration,
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base: Duration::from_millis(500),
            jitter: true,
            rate_limit_cooldown: Duration::from_secs(2),
            user_agent: None,
        }
    }
}

/// Batch loading limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Maximum simultaneous layer loads per batch.
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

/// Marker icon fetch tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct IconConfig {
    /// Maximum simultaneous icon downloads.
    pub concurrency: usize,
    /// Total attempts per icon, including the first.
    pub max_attempts: u32,
    pub retry_base: Duration,
    /// Extra wait after a 429 before the normal backoff.
    pub rate_limit_cooldown: Duration,
    pub jitter: bool,
}

impl Default for IconConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            max_attempts: 5,
            retry_base: Duration::from_millis(500),
            rate_limit_cooldown: Duration::from_secs(2),
            jitter: true,
        }
    }
}

/// Geometry processing defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingConfig {
    /// Tolerance used when a layer does not specify one. `None` disables
    /// simplification.
    pub default_tolerance: Option<f64>,
    /// Stream-parse single-layer loads. Batch loads always buffer.
    pub streaming: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            default_tolerance: None,
            streaming: true,
        }
    }
}

/// Durable response cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub persistent: bool,
    /// Root directory for durable stores. `None` keeps responses in memory.
    pub directory: Option<PathBuf>,
    /// Store name for layer responses.
    pub name: String,
    /// Store name for icon responses.
    pub icon_name: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            persistent: true,
            directory: None,
            name: "geojson-v1".into(),
            icon_name: "icons-v1".into(),
        }
    }
}

/// Full pipeline configuration.
///
/// Built by the CLI, passed to `LayerPipeline::new`. Core never reads
/// config files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineConfig {
    pub fetch: FetchConfig,
    pub batch: BatchConfig,
    pub icons: IconConfig,
    pub processing: ProcessingConfig,
    pub cache: CacheConfig,
}
