//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use geolayer_config::ConfigError;
use geolayer_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    pub const CANCELLED: i32 = 130;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Network ──────────────────────────────────────────────────────
    #[error("Could not fetch {url}")]
    #[diagnostic(
        code(geolayer::connection_failed),
        help("{message}\nCheck the URL and your network, or raise --retries.")
    )]
    ConnectionFailed { url: String, message: String },

    #[error("Rate limited by {url}")]
    #[diagnostic(
        code(geolayer::rate_limited),
        help("The server kept answering 429 Too Many Requests. Try again later or lower --concurrency.")
    )]
    RateLimited { url: String },

    #[error("Request timed out after {seconds}s: {url}")]
    #[diagnostic(
        code(geolayer::timeout),
        help("Increase the per-attempt budget with --timeout.")
    )]
    Timeout { url: String, seconds: u64 },

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(code(geolayer::not_found))]
    NotFound {
        resource_type: String,
        identifier: String,
    },

    // ── Data ─────────────────────────────────────────────────────────
    #[error("Invalid GeoJSON from {source_name}")]
    #[diagnostic(code(geolayer::parse), help("{message}"))]
    Parse { source_name: String, message: String },

    #[error("Processing failed: {message}")]
    #[diagnostic(code(geolayer::processing))]
    Processing { message: String },

    #[error("{failed} of {total} layers failed to load")]
    #[diagnostic(
        code(geolayer::batch_failed),
        help("Rerun with -v to see why each layer failed.")
    )]
    BatchFailed { failed: usize, total: usize },

    #[error("Operation cancelled")]
    #[diagnostic(code(geolayer::cancelled))]
    Cancelled,

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(geolayer::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(geolayer::config),
        help("Inspect the effective configuration with: geolayer config show")
    )]
    Config(#[from] ConfigError),

    #[error("Config file already exists: {path}")]
    #[diagnostic(code(geolayer::config_exists), help("Use --force to overwrite it."))]
    ConfigExists { path: String },

    // ── Interactive ──────────────────────────────────────────────────
    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(geolayer::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(geolayer::json))]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(geolayer::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::RateLimited { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Cancelled => exit_code::CANCELLED,
            Self::Validation { .. } | Self::NonInteractiveRequiresYes { .. } | Self::ConfigExists { .. } => {
                exit_code::USAGE
            }
            Self::Config(ConfigError::Validation { .. } | ConfigError::Manifest { .. }) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Cancelled => Self::Cancelled,
            CoreError::Network { url, message } => Self::ConnectionFailed { url, message },
            CoreError::Timeout { url, timeout_ms } => Self::Timeout {
                url,
                seconds: timeout_ms.div_ceil(1000),
            },
            CoreError::NotFound { url } => Self::NotFound {
                resource_type: "layer".into(),
                identifier: url,
            },
            CoreError::RateLimited { url } => Self::RateLimited { url },
            CoreError::Parse { url, message } => Self::Parse {
                source_name: url,
                message,
            },
            CoreError::Processing { message } => Self::Processing { message },
            CoreError::WorkerUnavailable => Self::Processing {
                message: "processing worker is not running".into(),
            },
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Internal(message) => Self::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_kind() {
        let cases = [
            (CoreError::Cancelled, exit_code::CANCELLED),
            (
                CoreError::NotFound {
                    url: "http://x".into(),
                },
                exit_code::NOT_FOUND,
            ),
            (
                CoreError::Timeout {
                    url: "http://x".into(),
                    timeout_ms: 1500,
                },
                exit_code::TIMEOUT,
            ),
            (
                CoreError::Network {
                    url: "http://x".into(),
                    message: "refused".into(),
                },
                exit_code::CONNECTION,
            ),
            (
                CoreError::Parse {
                    url: "http://x".into(),
                    message: "eof".into(),
                },
                exit_code::GENERAL,
            ),
        ];
        for (core, code) in cases {
            assert_eq!(CliError::from(core).exit_code(), code);
        }
    }

    #[test]
    fn timeout_rounds_up_to_whole_seconds() {
        let err = CliError::from(CoreError::Timeout {
            url: "http://x".into(),
            timeout_ms: 1500,
        });
        assert!(matches!(err, CliError::Timeout { seconds: 2, .. }));
    }
}
