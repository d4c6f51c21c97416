//! `geolayer batch`: load every layer in a manifest.

use std::io::IsTerminal;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tabled::Tabled;

use geolayer_core::{BatchProgress, ItemStatus, LayerPipeline, Settled};

use crate::cli::{BatchArgs, GlobalOpts, OutputFormat};
use crate::config;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize, Tabled)]
struct BatchRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Features")]
    features: usize,
    #[tabled(rename = "Detail")]
    detail: String,
}

pub async fn handle(args: BatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let descriptors = geolayer_config::load_manifest(&args.manifest)?;
    let mut pipeline_config = config::pipeline_config(global)?;
    if let Some(n) = args.concurrency {
        if n == 0 {
            return Err(CliError::Validation {
                field: "concurrency".into(),
                reason: "must be at least 1".into(),
            });
        }
        pipeline_config.batch.concurrency = n;
    }

    let pipeline = LayerPipeline::new(pipeline_config)?;
    let total = descriptors.len();

    {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                pipeline.cancel_batch();
            }
        });
    }

    let bar = progress_bar(global, args.no_progress, total);
    let report = pipeline
        .load_batch(descriptors, |p: BatchProgress| {
            bar.set_position(u64::try_from(p.completed).unwrap_or(u64::MAX));
        })
        .await;
    bar.finish_and_clear();
    pipeline.shutdown().await;

    let color = output::should_color(global.color_mode);
    let rows: Vec<BatchRow> = report
        .outcomes
        .iter()
        .map(|item| {
            let status = item.outcome.status();
            let (features, detail) = match &item.outcome {
                Settled::Fulfilled(entry) => (entry.data.len(), String::new()),
                Settled::Rejected(e) => (0, e.to_string()),
                Settled::Aborted => (0, "cancelled".into()),
            };
            BatchRow {
                key: item.key.clone(),
                status: status.to_string(),
                features,
                detail,
            }
        })
        .collect();

    let rendered = output::render_list(
        global.output,
        &rows,
        |r| BatchRow {
            key: r.key.clone(),
            status: output::paint_status(&r.status, color),
            features: r.features,
            detail: r.detail.clone(),
        },
        |r| format!("{}\t{}", r.key, r.status),
    )?;
    output::print_output(&rendered, global.quiet);

    let rejected = report.count(ItemStatus::Rejected);
    if report.count(ItemStatus::Aborted) > 0 {
        return Err(CliError::Cancelled);
    }
    if rejected > 0 {
        return Err(CliError::BatchFailed {
            failed: rejected,
            total,
        });
    }
    Ok(())
}

fn progress_bar(global: &GlobalOpts, disabled: bool, total: usize) -> ProgressBar {
    if disabled || global.quiet || global.output != OutputFormat::Table || !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(u64::try_from(total).unwrap_or(u64::MAX));
    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} layers")
    {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar
}
