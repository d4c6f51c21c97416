//! `geolayer cache`: durable response cache maintenance.

use std::path::PathBuf;

use bytesize::ByteSize;
use serde::Serialize;
use tabled::Tabled;

use geolayer_api::{DiskResponseStore, ResponseStore};

use crate::cli::{CacheArgs, CacheCommand, GlobalOpts};
use crate::commands::util;
use crate::config;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize, Tabled)]
struct StoreRow {
    #[tabled(rename = "Store")]
    name: String,
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Size")]
    #[serde(skip)]
    size: String,
    #[tabled(skip)]
    bytes: u64,
}

pub async fn handle(args: CacheArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let stores = open_stores(global)?;

    match args.command {
        CacheCommand::Path => {
            let mut rows = Vec::with_capacity(stores.len());
            for store in &stores {
                let bytes = store.size_on_disk().await.map_err(|e| CliError::Internal(e.to_string()))?;
                rows.push(StoreRow {
                    name: store.name().to_owned(),
                    path: store.dir().display().to_string(),
                    size: ByteSize(bytes).to_string(),
                    bytes,
                });
            }
            let rendered = output::render_list(
                global.output,
                &rows,
                |r| StoreRow {
                    name: r.name.clone(),
                    path: r.path.clone(),
                    size: r.size.clone(),
                    bytes: r.bytes,
                },
                |r| r.path.clone(),
            )?;
            output::print_output(&rendered, global.quiet);
            Ok(())
        }
        CacheCommand::Clear => {
            if !util::confirm("Delete every cached response and icon?", "cache clear", global.yes)? {
                return Ok(());
            }
            for store in &stores {
                store.clear().await.map_err(|e| CliError::Internal(e.to_string()))?;
                tracing::info!(store = store.name(), path = %store.dir().display(), "cache cleared");
            }
            if !global.quiet {
                eprintln!("Cleared {} cache stores", stores.len());
            }
            Ok(())
        }
    }
}

/// Layer and icon stores under the configured cache directory.
fn open_stores(global: &GlobalOpts) -> Result<Vec<DiskResponseStore>, CliError> {
    let cfg = config::apply_overrides(config::load(global)?, global);
    let directory: Option<PathBuf> = cfg
        .cache
        .directory
        .clone()
        .or_else(geolayer_config::default_cache_dir);
    let directory = directory.ok_or_else(|| CliError::Validation {
        field: "cache.directory".into(),
        reason: "no platform cache directory; set one with --cache-dir".into(),
    })?;

    Ok(vec![
        DiskResponseStore::new(&directory, &cfg.cache.name),
        DiskResponseStore::new(&directory, &cfg.cache.icon_name),
    ])
}
