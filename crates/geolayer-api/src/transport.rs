// Shared transport configuration for building reqwest::Client instances.
//
// The layer fetcher and the icon fetcher share user agent, default headers,
// and connect timeout through this module, avoiding duplicated builder logic.

use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};

use crate::error::Error;

const DEFAULT_USER_AGENT: &str = concat!("geolayer/", env!("CARGO_PKG_VERSION"));

/// Shared transport configuration for building HTTP clients.
///
/// There is deliberately no whole-request timeout here: per-attempt time
/// budgets are enforced by [`RetryingFetcher`](crate::RetryingFetcher).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` for GeoJSON resources.
    ///
    /// Sends `Accept: application/json`. `Accept-Encoding: gzip, deflate, br`
    /// is added by reqwest itself and responses are decompressed transparently.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        self.build_client_with_headers(headers)
    }

    /// Build a `reqwest::Client` with caller-supplied default headers.
    ///
    /// Used by the icon fetcher, which accepts any image type.
    pub fn build_client_with_headers(&self, headers: HeaderMap) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(self.user_agent.as_str())
            .default_headers(headers)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(Error::Transport)
    }
}
