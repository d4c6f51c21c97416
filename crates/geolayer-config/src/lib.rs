//! Configuration for the geolayer CLI.
//!
//! TOML config file + `GEOLAYER_*` environment overrides, platform paths,
//! translation to `geolayer_core::PipelineConfig`, and layer manifests that
//! describe batches.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use geolayer_core::{
    BatchConfig, CacheConfig, FetchConfig, IconConfig, LayerDescriptor, LayerType, PipelineConfig, ProcessingConfig,
    StyleMeta,
};

/// Environment variable prefix. Nested keys use a double underscore:
/// `GEOLAYER_FETCH__MAX_RETRIES=5`.
pub const ENV_PREFIX: &str = "GEOLAYER_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("invalid layer manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub defaults: Defaults,
    pub fetch: FetchSection,
    pub batch: BatchSection,
    pub icons: IconSection,
    pub processing: ProcessingSection,
    pub cache: CacheSection,
}

/// CLI presentation defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Defaults {
    pub output: String,
    pub color: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: "table".into(),
            color: "auto".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchSection {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub jitter: bool,
    pub rate_limit_cooldown_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for FetchSection {
    fn default() -> Self {
        let d = FetchConfig::default();
        Self {
            timeout_secs: d.timeout.as_secs(),
            max_retries: d.max_retries,
            retry_base_ms: millis(d.retry_base),
            jitter: d.jitter,
            rate_limit_cooldown_ms: millis(d.rate_limit_cooldown),
            user_agent: d.user_agent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchSection {
    pub concurrency: usize,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            concurrency: BatchConfig::default().concurrency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct IconSection {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub retry_base_ms: u64,
    pub rate_limit_cooldown_ms: u64,
    pub jitter: bool,
}

impl Default for IconSection {
    fn default() -> Self {
        let d = IconConfig::default();
        Self {
            concurrency: d.concurrency,
            max_attempts: d.max_attempts,
            retry_base_ms: millis(d.retry_base),
            rate_limit_cooldown_ms: millis(d.rate_limit_cooldown),
            jitter: d.jitter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcessingSection {
    /// Simplification tolerance for layers that do not set one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_tolerance: Option<f64>,
    pub streaming: bool,
}

impl Default for ProcessingSection {
    fn default() -> Self {
        let d = ProcessingConfig::default();
        Self {
            default_tolerance: d.default_tolerance,
            streaming: d.streaming,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSection {
    pub persistent: bool,
    /// Overrides the platform cache directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    pub name: String,
    pub icon_name: String,
}

impl Default for CacheSection {
    fn default() -> Self {
        let d = CacheConfig::default();
        Self {
            persistent: d.persistent,
            directory: None,
            name: d.name,
            icon_name: d.icon_name,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Translation to runtime config ───────────────────────────────────

impl Config {
    /// Validate and convert into the runtime pipeline configuration.
    ///
    /// A persistent cache without an explicit directory lands in the
    /// platform cache dir.
    pub fn to_pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
        if self.fetch.timeout_secs == 0 {
            return Err(invalid("fetch.timeout_secs", "must be at least 1"));
        }
        if self.batch.concurrency == 0 {
            return Err(invalid("batch.concurrency", "must be at least 1"));
        }
        if self.icons.concurrency == 0 {
            return Err(invalid("icons.concurrency", "must be at least 1"));
        }
        if self.icons.max_attempts == 0 {
            return Err(invalid("icons.max_attempts", "must be at least 1"));
        }
        if let Some(t) = self.processing.default_tolerance {
            if !t.is_finite() || t < 0.0 {
                return Err(invalid(
                    "processing.default_tolerance",
                    format!("expected a non-negative number, got {t}"),
                ));
            }
        }
        if self.cache.name.trim().is_empty() || self.cache.icon_name.trim().is_empty() {
            return Err(invalid("cache.name", "store names must not be empty"));
        }

        let directory = if self.cache.persistent {
            self.cache.directory.clone().or_else(default_cache_dir)
        } else {
            None
        };

        Ok(PipelineConfig {
            fetch: FetchConfig {
                timeout: Duration::from_secs(self.fetch.timeout_secs),
                max_retries: self.fetch.max_retries,
                retry_base: Duration::from_millis(self.fetch.retry_base_ms),
                jitter: self.fetch.jitter,
                rate_limit_cooldown: Duration::from_millis(self.fetch.rate_limit_cooldown_ms),
                user_agent: self.fetch.user_agent.clone(),
            },
            batch: BatchConfig {
                concurrency: self.batch.concurrency,
            },
            icons: IconConfig {
                concurrency: self.icons.concurrency,
                max_attempts: self.icons.max_attempts,
                retry_base: Duration::from_millis(self.icons.retry_base_ms),
                rate_limit_cooldown: Duration::from_millis(self.icons.rate_limit_cooldown_ms),
                jitter: self.icons.jitter,
            },
            processing: ProcessingConfig {
                default_tolerance: self.processing.default_tolerance,
                streaming: self.processing.streaming,
            },
            cache: CacheConfig {
                persistent: self.cache.persistent,
                directory,
                name: self.cache.name.clone(),
                icon_name: self.cache.icon_name.clone(),
            },
        })
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("io", "geolayer", "geolayer")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Platform cache directory for durable response stores.
pub fn default_cache_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.cache_dir().to_path_buf())
}

fn home_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("geolayer");
    p
}

// ── Config loading ──────────────────────────────────────────────────

fn figment_for(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file + environment. A missing file yields the
/// defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment_for(path).extract()?;
    Ok(config)
}

/// Load config, returning a default if the file is missing or invalid.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Layer manifests ─────────────────────────────────────────────────

/// A batch description: a list of layers, optionally relative to a base URL.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LayerManifest {
    /// Prepended to layer URLs that are not absolute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub layers: Vec<ManifestLayer>,
}

/// One `[[layers]]` entry. `id` defaults to `key`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ManifestLayer {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub layer_type: LayerType,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    #[serde(default, skip_serializing_if = "StyleMeta::is_empty")]
    pub style: StyleMeta,
}

impl LayerManifest {
    /// Parse TOML or JSON, chosen by the file extension (`.json` is JSON,
    /// anything else TOML).
    pub fn from_str_for(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let parsed = if is_json {
            serde_json::from_str(text).map_err(|e| e.to_string())
        } else {
            toml::from_str(text).map_err(|e| e.to_string())
        };
        parsed.map_err(|reason| ConfigError::Manifest {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Resolve URLs and validate into pipeline descriptors.
    pub fn into_descriptors(self, path: &Path) -> Result<Vec<LayerDescriptor>, ConfigError> {
        let manifest_err = |reason: String| ConfigError::Manifest {
            path: path.to_path_buf(),
            reason,
        };

        let base = self
            .base_url
            .as_deref()
            .map(url::Url::parse)
            .transpose()
            .map_err(|e| manifest_err(format!("base_url: {e}")))?;

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.layers.len());
        for layer in self.layers {
            if layer.key.trim().is_empty() {
                return Err(manifest_err("layer key must not be empty".into()));
            }
            if !seen.insert(layer.key.clone()) {
                return Err(manifest_err(format!("duplicate layer key '{}'", layer.key)));
            }
            if let Some(t) = layer.tolerance {
                if !t.is_finite() || t < 0.0 {
                    return Err(manifest_err(format!("layer '{}': invalid tolerance {t}", layer.key)));
                }
            }

            let url = match url::Url::parse(&layer.url) {
                Ok(absolute) => absolute,
                Err(url::ParseError::RelativeUrlWithoutBase) => match &base {
                    Some(base) => base
                        .join(&layer.url)
                        .map_err(|e| manifest_err(format!("layer '{}': {e}", layer.key)))?,
                    None => {
                        return Err(manifest_err(format!(
                            "layer '{}': relative url '{}' needs a base_url",
                            layer.key, layer.url
                        )));
                    }
                },
                Err(e) => return Err(manifest_err(format!("layer '{}': {e}", layer.key))),
            };

            let mut descriptor = LayerDescriptor::new(layer.key, url.as_str())
                .with_type(layer.layer_type)
                .with_style(layer.style);
            if let Some(id) = layer.id {
                descriptor.id = id;
            }
            descriptor.tolerance = layer.tolerance;
            out.push(descriptor);
        }
        Ok(out)
    }
}

/// Read a manifest file and return its layers as descriptors.
pub fn load_manifest(path: &Path) -> Result<Vec<LayerDescriptor>, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    LayerManifest::from_str_for(path, &text)?.into_descriptors(path)
}
