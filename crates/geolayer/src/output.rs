//! Output formatting: table, JSON, YAML, plain.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`,
//! structured formats use serde, plain emits one identifier per line.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// Color a batch status word: green fulfilled, red rejected, yellow aborted.
pub fn paint_status(status: &str, color: bool) -> String {
    if !color {
        return status.to_owned();
    }
    match status {
        "fulfilled" => status.green().to_string(),
        "rejected" => status.red().to_string(),
        "aborted" => status.yellow().to_string(),
        _ => status.to_owned(),
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list of serde-serializable + tabled items in the chosen format.
pub fn render_list<T, R>(
    format: OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
    R: Tabled,
{
    match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            Ok(render_table(&rows))
        }
        OutputFormat::Plain => Ok(data.iter().map(id_fn).collect::<Vec<_>>().join("\n")),
        structured => render_structured(structured, data),
    }
}

/// Render a single item. Table mode uses `detail_fn` for a key/value view.
pub fn render_single<T>(
    format: OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
{
    match format {
        OutputFormat::Table => Ok(detail_fn(data)),
        OutputFormat::Plain => Ok(id_fn(data)),
        structured => render_structured(structured, data),
    }
}

/// Serialize with a structured format. Table and plain fall back to
/// pretty JSON, for payloads (like a FeatureCollection) with no tabular form.
pub fn render_structured<T: serde::Serialize + ?Sized>(format: OutputFormat, data: &T) -> Result<String, CliError> {
    match format {
        OutputFormat::JsonCompact => Ok(serde_json::to_string(data)?),
        OutputFormat::Yaml => serde_yaml::to_string(data).map_err(|e| CliError::Internal(format!("YAML output: {e}"))),
        OutputFormat::Json | OutputFormat::Table | OutputFormat::Plain => Ok(serde_json::to_string_pretty(data)?),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

/// Align `key: value` pairs for single-item table views.
pub fn detail_lines(pairs: &[(&str, String)]) -> String {
    let width = pairs.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    pairs
        .iter()
        .map(|(k, v)| format!("{k:>width$}  {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(serde::Serialize, Tabled)]
    struct Row {
        key: String,
        features: usize,
    }

    fn rows() -> Vec<Row> {
        vec![
            Row {
                key: "roads".into(),
                features: 3,
            },
            Row {
                key: "water".into(),
                features: 1,
            },
        ]
    }

    fn to_row(r: &Row) -> Row {
        Row {
            key: r.key.clone(),
            features: r.features,
        }
    }

    #[test]
    fn plain_lists_identifiers() {
        let out = render_list(OutputFormat::Plain, &rows(), to_row, |r| r.key.clone()).unwrap();
        assert_eq!(out, "roads\nwater");
    }

    #[test]
    fn compact_json_is_one_line() {
        let out = render_list(OutputFormat::JsonCompact, &rows(), to_row, |r| r.key.clone()).unwrap();
        assert_eq!(out, r#"[{"key":"roads","features":3},{"key":"water","features":1}]"#);
    }

    #[test]
    fn table_has_headers() {
        let out = render_list(OutputFormat::Table, &rows(), to_row, |r| r.key.clone()).unwrap();
        assert!(out.contains("key"));
        assert!(out.contains("features"));
        assert!(out.contains("water"));
    }

    #[test]
    fn detail_lines_align_keys() {
        let out = detail_lines(&[("key", "a".into()), ("features", "3".into())]);
        assert_eq!(out, "     key  a\nfeatures  3");
    }

    #[test]
    fn uncolored_status_is_plain() {
        assert_eq!(paint_status("rejected", false), "rejected");
    }
}
