//! Clap derive structures for the `geolayer` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// geolayer -- fetch, simplify, and style GeoJSON map layers
#[derive(Debug, Parser)]
#[command(
    name = "geolayer",
    version,
    about = "Fetch, simplify, and style GeoJSON map layers",
    long_about = "Loads GeoJSON layers with retries, a durable response cache,\n\
        streaming parsing, and off-thread geometry simplification.\n\n\
        Layer results are styled for rendering: stroke, fill, dash pattern,\n\
        and cached marker icons are merged into feature properties.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file to use instead of the platform default
    #[arg(long, env = "GEOLAYER_CONFIG", global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Bypass the durable response cache
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Durable cache directory (overrides config)
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Per-attempt request timeout in seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Retries after the first attempt
    #[arg(long, global = true, value_name = "N")]
    pub retries: Option<u32>,

    /// Output format
    #[arg(long, short = 'o', env = "GEOLAYER_OUTPUT", default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use colored terminal output
    #[arg(long, default_value = "auto", global = true)]
    pub color_mode: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load one layer, streaming features as they arrive
    #[command(alias = "l")]
    Load(LoadArgs),

    /// Load every layer in a manifest with bounded parallelism
    #[command(alias = "b")]
    Batch(BatchArgs),

    /// Simplify and style local GeoJSON files
    Simplify(SimplifyArgs),

    /// Manage the durable response cache
    Cache(CacheArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Shared style arguments ───────────────────────────────────────────

#[derive(Debug, Default, Args)]
pub struct StyleArgs {
    /// Stroke and fill color (#rgb, #rrggbb, #rrggbbaa, or a CSS name)
    #[arg(long)]
    pub color: Option<String>,

    /// Line style: solid, dashed, bold, dash-dot-dot, dash-dot-dash-dot-dot
    #[arg(long)]
    pub line_style: Option<String>,

    /// Fill opacity between 0 and 1
    #[arg(long)]
    pub fill_opacity: Option<f64>,
}

// ── Load ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct LoadArgs {
    /// GeoJSON resource URL
    pub url: String,

    /// Layer key (defaults to the URL)
    #[arg(long, short = 'k')]
    pub key: Option<String>,

    /// Layer type: boundary, road, waterway, landuse, building, point-of-interest, other
    #[arg(long = "type", value_name = "TYPE")]
    pub layer_type: Option<String>,

    /// Simplification tolerance in coordinate units
    #[arg(long, short = 't')]
    pub tolerance: Option<f64>,

    /// Marker icon URL for point features
    #[arg(long)]
    pub icon: Option<String>,

    #[command(flatten)]
    pub style: StyleArgs,

    /// Write the processed collection to this file
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,

    /// Print the processed collection instead of a summary
    #[arg(long)]
    pub full: bool,
}

// ── Batch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct BatchArgs {
    /// Layer manifest (TOML, or JSON by extension)
    pub manifest: PathBuf,

    /// Maximum simultaneous layer loads
    #[arg(long, short = 'j')]
    pub concurrency: Option<usize>,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

// ── Simplify ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SimplifyArgs {
    /// GeoJSON files to process
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Simplification tolerance in coordinate units
    #[arg(long, short = 't')]
    pub tolerance: f64,

    #[command(flatten)]
    pub style: StyleArgs,

    /// Write `<name>.simplified.geojson` files here instead of printing
    #[arg(long, value_name = "DIR")]
    pub out_dir: Option<PathBuf>,
}

// ── Cache ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Print the cache directory and its size
    Path,
    /// Delete every cached response and icon
    Clear,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the config file path
    Path,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
