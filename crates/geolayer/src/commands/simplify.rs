//! `geolayer simplify`: process local GeoJSON files off-thread.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tabled::Tabled;

use geolayer_core::{BatchItem, LayerPipeline, ProcessOptions, ResolvedStyle};

use crate::cli::{GlobalOpts, SimplifyArgs};
use crate::commands::util;
use crate::config;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize, Tabled)]
struct SimplifyRow {
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "Features")]
    features: usize,
    #[tabled(rename = "Positions in")]
    positions_in: usize,
    #[tabled(rename = "Positions out")]
    positions_out: usize,
    #[tabled(rename = "Written to")]
    written_to: String,
}

pub async fn handle(args: SimplifyArgs, global: &GlobalOpts) -> Result<(), CliError> {
    util::check_tolerance(Some(args.tolerance))?;
    let style = util::style_from_args(&args.style, None)?;
    let options = ProcessOptions {
        tolerance: Some(args.tolerance),
        style: ResolvedStyle::from_meta(&style, None),
    };

    let mut items = Vec::with_capacity(args.files.len());
    let mut positions_in = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let collection = util::read_collection(path)?;
        positions_in.push(collection.position_count());
        items.push(BatchItem {
            key: path.display().to_string(),
            collection,
            options: options.clone(),
        });
    }

    let pipeline = LayerPipeline::new(config::pipeline_config(global)?)?;
    let result = pipeline.process_local(items).await;
    pipeline.shutdown().await;
    let results = result?;

    let Some(out_dir) = &args.out_dir else {
        let rendered = match results.as_slice() {
            [single] => output::render_structured(global.output, &single.data)?,
            many => output::render_structured(global.output, many)?,
        };
        output::print_output(&rendered, global.quiet);
        return Ok(());
    };

    std::fs::create_dir_all(out_dir)?;
    let mut rows = Vec::with_capacity(results.len());
    for ((path, keyed), before) in args.files.iter().zip(&results).zip(positions_in) {
        let target = output_path(out_dir, path);
        std::fs::write(&target, serde_json::to_vec(&keyed.data)?)?;
        rows.push(SimplifyRow {
            file: keyed.key.clone(),
            features: keyed.data.len(),
            positions_in: before,
            positions_out: keyed.data.position_count(),
            written_to: target.display().to_string(),
        });
    }

    let rendered = output::render_list(
        global.output,
        &rows,
        |r| SimplifyRow {
            file: r.file.clone(),
            features: r.features,
            positions_in: r.positions_in,
            positions_out: r.positions_out,
            written_to: r.written_to.clone(),
        },
        |r| r.written_to.clone(),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}

/// `<out_dir>/<stem>.simplified.geojson`
fn output_path(out_dir: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map_or_else(|| "layer".into(), |s| s.to_string_lossy().into_owned());
    out_dir.join(format!("{stem}.simplified.geojson"))
}
