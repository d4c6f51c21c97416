//! `geolayer load`: stream one layer through the pipeline.

use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use geolayer_core::{LayerDescriptor, LayerPipeline};

use crate::cli::{GlobalOpts, LoadArgs, OutputFormat};
use crate::commands::util::{self, LayerSummary};
use crate::config;
use crate::error::CliError;
use crate::output;

pub async fn handle(args: LoadArgs, global: &GlobalOpts) -> Result<(), CliError> {
    util::check_tolerance(args.tolerance)?;
    let style = util::style_from_args(&args.style, args.icon.clone())?;
    let layer_type = util::parse_layer_type(args.layer_type.as_deref())?;

    let key = args.key.clone().unwrap_or_else(|| args.url.clone());
    let mut descriptor = LayerDescriptor::new(key, &args.url)
        .with_type(layer_type)
        .with_style(style);
    descriptor.tolerance = args.tolerance;

    let pipeline = LayerPipeline::new(config::pipeline_config(global)?)?;
    let cancel = cancel_on_ctrl_c();

    let spinner = feature_spinner(global);
    let on_feature = {
        let spinner = spinner.clone();
        move |_: &geolayer_core::Feature, count: usize| spinner.set_message(format!("{count} features"))
    };

    let result = pipeline
        .toggle_on_with_cancel(descriptor, Some(cancel), on_feature)
        .await;
    spinner.finish_and_clear();
    let stats = pipeline.fetch_stats();
    pipeline.shutdown().await;
    let entry = result?;

    if let Some(path) = &args.out {
        std::fs::write(path, serde_json::to_vec(&entry.data)?)?;
        tracing::info!(path = %path.display(), "wrote processed layer");
    }

    let rendered = if args.full {
        output::render_structured(global.output, &entry.data)?
    } else {
        let summary = LayerSummary::from(&*entry);
        output::render_single(
            global.output,
            &summary,
            |s| {
                output::detail_lines(&[
                    ("Key", s.key.clone()),
                    ("Type", s.layer_type.clone()),
                    ("Features", s.features.to_string()),
                    ("Positions", s.positions.to_string()),
                    ("Loaded", s.loaded_at.clone()),
                    ("Network", format!("{} attempts, {} cache hits", stats.network_attempts, stats.cache_hits)),
                ])
            },
            |s| s.key.clone(),
        )?
    };
    output::print_output(&rendered, global.quiet);
    Ok(())
}

/// Token cancelled by Ctrl-C, so an interrupted load exits with `Cancelled`.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}

fn feature_spinner(global: &GlobalOpts) -> ProgressBar {
    if global.quiet || global.output != OutputFormat::Table || !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} [{elapsed_precise}] {msg}") {
        spinner.set_style(style);
    }
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("connecting");
    spinner
}
