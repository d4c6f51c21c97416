use thiserror::Error;

/// Top-level error type for the `geolayer-api` crate.
///
/// Covers every failure mode of the fetch layer: cancellation, transport,
/// HTTP status, durable cache I/O, and GeoJSON parsing.
/// `geolayer-core` maps these into the domain taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Control flow ────────────────────────────────────────────────
    /// The caller's cancellation token fired. Never retried.
    #[error("Request cancelled")]
    Cancelled,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A single attempt exceeded its time budget.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ── HTTP status ─────────────────────────────────────────────────
    /// Non-success status that is not otherwise classified.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// 404 on the requested resource.
    #[error("Resource not found: {url}")]
    NotFound { url: String },

    /// 429 from the server. Includes retry-after in seconds when sent.
    #[error("Rate limited -- retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    // ── Data ────────────────────────────────────────────────────────
    /// Malformed or truncated GeoJSON.
    #[error("GeoJSON parse error: {message}")]
    Parse { message: String },

    // ── Durable cache ───────────────────────────────────────────────
    /// Durable response store failure.
    #[error("Response cache error: {message}")]
    Cache { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` if this error came from a cancellation token.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` if this is a transient error worth retrying.
    ///
    /// Everything that went wrong on the wire is transient from the
    /// fetcher's point of view; cancellation and local failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_)
            | Self::Timeout { .. }
            | Self::Http { .. }
            | Self::NotFound { .. }
            | Self::RateLimited { .. } => true,
            Self::Cancelled
            | Self::InvalidUrl(_)
            | Self::Parse { .. }
            | Self::Cache { .. }
            | Self::Io(_) => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::NotFound { .. } | Self::Http { status: 404, .. } => true,
            _ => false,
        }
    }

    /// HTTP status code, if this error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            Self::Http { status, .. } => Some(*status),
            Self::NotFound { .. } => Some(404),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_never_transient() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn http_failures_are_transient() {
        let err = Error::Http {
            status: 503,
            url: "http://x/".into(),
        };
        assert!(err.is_transient());
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn not_found_classification() {
        let err = Error::NotFound {
            url: "http://x/icon.png".into(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.status(), Some(404));
        assert!(!Error::parse("bad").is_not_found());
    }
}
