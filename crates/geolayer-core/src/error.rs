// ── Core error types ──
//
// Domain errors from geolayer-core. Consumers see layer-level outcomes
// (cancelled, not found, parse failure), never raw HTTP plumbing.
// The `From<geolayer_api::Error>` impl translates transport-layer errors.
//
// `CoreError` is `Clone` because one deduplicated load settles every waiter
// with the same outcome.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    // ── Control flow ─────────────────────────────────────────────────
    #[error("Operation cancelled")]
    Cancelled,

    // ── Network errors ───────────────────────────────────────────────
    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("Timed out after {timeout_ms}ms fetching {url}")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Resource not found: {url}")]
    NotFound { url: String },

    #[error("Rate limited by server for {url}")]
    RateLimited { url: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Invalid GeoJSON from {url}: {message}")]
    Parse { url: String, message: String },

    #[error("Processing failed: {message}")]
    Processing { message: String },

    #[error("Processing worker is not running")]
    WorkerUnavailable,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Attach the requested URL to a transport error.
    pub fn from_api(url: &str, err: geolayer_api::Error) -> Self {
        use geolayer_api::Error as Api;
        match err {
            Api::Cancelled => Self::Cancelled,
            Api::NotFound { url } => Self::NotFound { url },
            Api::RateLimited { .. } => Self::RateLimited { url: url.to_owned() },
            Api::Parse { message } => Self::Parse {
                url: url.to_owned(),
                message,
            },
            Api::InvalidUrl(e) => Self::Config {
                message: format!("Invalid URL {url}: {e}"),
            },
            Api::Transport(ref e) if e.is_builder() => Self::Config {
                message: format!("Cannot build request for {url}: {e}"),
            },
            Api::Timeout { timeout_ms } => Self::Timeout {
                url: url.to_owned(),
                timeout_ms,
            },
            other @ (Api::Transport(_) | Api::Http { .. }) => {
                Self::Network {
                    url: url.to_owned(),
                    message: other.to_string(),
                }
            }
            Api::Cache { message } => Self::Internal(format!("Response cache: {message}")),
            Api::Io(e) => Self::Internal(format!("I/O error: {e}")),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<geolayer_api::Error> for CoreError {
    fn from(err: geolayer_api::Error) -> Self {
        let url = match &err {
            geolayer_api::Error::NotFound { url } | geolayer_api::Error::Http { url, .. } => {
                url.clone()
            }
            geolayer_api::Error::Transport(e) => {
                e.url().map(ToString::to_string).unwrap_or_else(|| "<unknown>".into())
            }
            _ => "<unknown>".into(),
        };
        Self::from_api(&url, err)
    }
}
