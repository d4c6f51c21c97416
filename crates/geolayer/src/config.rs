//! CLI-aware configuration: applies global flag overrides on top of the
//! file + environment config from `geolayer-config`.

use std::path::PathBuf;

use geolayer_config::{Config, config_path, load_config_from};
use geolayer_core::PipelineConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Config file in effect: `--config` / `GEOLAYER_CONFIG`, else the platform path.
pub fn effective_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config_path)
}

/// Load the file + environment config. A missing file yields defaults.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(load_config_from(&effective_path(global))?)
}

/// Apply global flags to a loaded config.
pub fn apply_overrides(mut cfg: Config, global: &GlobalOpts) -> Config {
    if let Some(secs) = global.timeout {
        cfg.fetch.timeout_secs = secs;
    }
    if let Some(retries) = global.retries {
        cfg.fetch.max_retries = retries;
    }
    if let Some(dir) = &global.cache_dir {
        cfg.cache.directory = Some(dir.clone());
    }
    if global.no_cache {
        cfg.cache.persistent = false;
    }
    cfg
}

/// Build the runtime pipeline config for a command.
pub fn pipeline_config(global: &GlobalOpts) -> Result<PipelineConfig, CliError> {
    let cfg = apply_overrides(load(global)?, global);
    Ok(cfg.to_pipeline_config()?)
}
