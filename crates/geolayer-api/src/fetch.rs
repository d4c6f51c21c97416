// Retrying, cache-aware HTTP fetcher.
//
// Every GET goes durable cache -> network (with per-attempt time budget,
// cancellation, and exponential backoff) -> durable cache write. The same
// fetcher serves whole-body reads and streamed reads.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Error;
use crate::response_cache::ResponseStore;
use crate::transport::TransportConfig;

/// Per-call fetch options.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Time budget for one attempt. Enforced only when `cancel` is set;
    /// otherwise overruns are logged and the attempt keeps waiting.
    pub timeout: Duration,
    /// Retries after the first attempt. `2` means at most 3 attempts.
    pub max_retries: u32,
    pub cancel: Option<CancellationToken>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            cancel: None,
        }
    }
}

impl FetchOptions {
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Backoff and classification rules for one fetcher.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Base delay; retry `k` (0-based) waits `base * 2^(first_exponent + k)`.
    pub base: Duration,
    pub first_exponent: u32,
    pub jitter: bool,
    /// Treat 404 as terminal instead of retrying it.
    pub fail_fast_not_found: bool,
    /// Minimum extra wait added before the normal backoff after a 429. A
    /// longer `Retry-After` from the server wins.
    pub rate_limit_cooldown: Option<Duration>,
}

/// Upper bound on a server-sent `Retry-After`.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            first_exponent: 0,
            jitter: true,
            fail_fast_not_found: false,
            rate_limit_cooldown: None,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `retry` (0-based), excluding any 429 cooldown.
    pub fn delay(&self, retry: u32) -> Duration {
        backoff_delay(self.base, self.first_exponent + retry, self.jitter)
    }

    /// Extra wait owed to a 429 before the normal backoff: the larger of
    /// the configured cooldown and the server's `Retry-After`.
    pub fn rate_limit_wait(&self, err: &Error) -> Duration {
        let Error::RateLimited { retry_after_secs } = err else {
            return Duration::ZERO;
        };
        let requested = Duration::from_secs(*retry_after_secs).min(MAX_RETRY_AFTER);
        self.rate_limit_cooldown.unwrap_or_default().max(requested)
    }

    fn should_retry(&self, err: &Error) -> bool {
        if err.is_cancelled() || !err.is_transient() {
            return false;
        }
        !(self.fail_fast_not_found && err.is_not_found())
    }
}

/// Counters exposed for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub network_attempts: u64,
    pub cache_hits: u64,
    pub cache_write_failures: u64,
}

/// Cache-first GET with bounded retries.
pub struct RetryingFetcher {
    http: reqwest::Client,
    store: Option<Arc<dyn ResponseStore>>,
    policy: RetryPolicy,
    network_attempts: AtomicU64,
    cache_hits: AtomicU64,
    cache_write_failures: AtomicU64,
}

impl std::fmt::Debug for RetryingFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingFetcher")
            .field("store", &self.store.as_ref().map(|s| s.name().to_owned()))
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryingFetcher {
    /// Create a fetcher from a `TransportConfig`.
    pub fn new(transport: &TransportConfig, policy: RetryPolicy) -> Result<Self, Error> {
        Ok(Self::with_client(transport.build_client()?, policy))
    }

    /// Create a fetcher with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, policy: RetryPolicy) -> Self {
        Self {
            http,
            store: None,
            policy,
            network_attempts: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_write_failures: AtomicU64::new(0),
        }
    }

    /// Attach a durable response store, checked before the network.
    pub fn with_store(mut self, store: Arc<dyn ResponseStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn store(&self) -> Option<&Arc<dyn ResponseStore>> {
        self.store.as_ref()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn stats(&self) -> FetchStats {
        FetchStats {
            network_attempts: self.network_attempts.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_write_failures: self.cache_write_failures.load(Ordering::Relaxed),
        }
    }

    // ── Public fetch paths ───────────────────────────────────────────

    /// Fetch a whole response body.
    pub async fn fetch(&self, url: &str, opts: &FetchOptions) -> Result<Bytes, Error> {
        if let Some(hit) = self.cached(url).await {
            return Ok(hit);
        }

        let body = self
            .retrying(url, opts, || async {
                let resp = self.send(url).await?;
                resp.bytes().await.map_err(Error::Transport)
            })
            .await?;

        self.store_copy(url, body.clone()).await;
        Ok(body)
    }

    /// Fetch a response as a chunk stream.
    ///
    /// Retries cover establishing the response (status line and headers).
    /// Once streaming starts, transport errors surface through the stream.
    /// The body is written to the durable store only after the stream has
    /// been read to the end without error.
    pub async fn fetch_stream(
        &self,
        url: &str,
        opts: &FetchOptions,
    ) -> Result<BoxStream<'static, Result<Bytes, Error>>, Error> {
        if let Some(hit) = self.cached(url).await {
            return Ok(stream::once(async move { Ok(hit) }).boxed());
        }

        let resp = self.retrying(url, opts, || self.send(url)).await?;
        let cancel = opts.cancel.clone().unwrap_or_default();
        let store = self.store.clone();
        let url = url.to_owned();

        let body = async_stream::try_stream! {
            let mut chunks = resp.bytes_stream();
            let mut copy = store.as_ref().map(|_| Vec::new());
            loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    chunk = chunks.next() => Some(chunk),
                };
                let Some(next) = next else {
                    Err::<(), Error>(Error::Cancelled)?;
                    break;
                };
                let Some(chunk) = next else { break };
                let chunk = chunk.map_err(Error::Transport)?;
                if let Some(buf) = copy.as_mut() {
                    buf.extend_from_slice(&chunk);
                }
                yield chunk;
            }
            if let (Some(store), Some(buf)) = (store, copy) {
                if let Err(e) = store.put(&url, Bytes::from(buf)).await {
                    warn!(url = %url, error = %e, "failed to write response cache (non-fatal)");
                }
            }
        };
        Ok(body.boxed())
    }

    // ── Durable cache ────────────────────────────────────────────────

    async fn cached(&self, url: &str) -> Option<Bytes> {
        let store = self.store.as_ref()?;
        match store.get(url).await {
            Ok(Some(body)) => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!(url, store = store.name(), "response cache hit");
                Some(body)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(url, error = %e, "response cache read failed, treating as miss");
                None
            }
        }
    }

    async fn store_copy(&self, url: &str, body: Bytes) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        if let Err(e) = store.put(url, body).await {
            self.cache_write_failures.fetch_add(1, Ordering::Relaxed);
            warn!(url, error = %e, "failed to write response cache (non-fatal)");
        }
    }

    // ── Network ──────────────────────────────────────────────────────

    /// One GET, with status classification.
    async fn send(&self, url: &str) -> Result<reqwest::Response, Error> {
        self.network_attempts.fetch_add(1, Ordering::Relaxed);
        debug!("GET {}", url);

        let resp = self.http.get(url).send().await.map_err(Error::Transport)?;
        let status = resp.status();

        if status.is_success() {
            return Ok(resp);
        }
        Err(match status {
            StatusCode::NOT_FOUND => Error::NotFound { url: url.to_owned() },
            StatusCode::TOO_MANY_REQUESTS => Error::RateLimited {
                retry_after_secs: resp
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
            },
            _ => Error::Http {
                status: status.as_u16(),
                url: url.to_owned(),
            },
        })
    }

    /// Run `op` until it succeeds, fails terminally, or retries run out.
    async fn retrying<T, F, Fut>(&self, url: &str, opts: &FetchOptions, mut op: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut retry: u32 = 0;
        loop {
            if opts.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                return Err(Error::Cancelled);
            }

            let err = match bounded(op(), opts, url).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !self.policy.should_retry(&err) || retry >= opts.max_retries {
                if !err.is_cancelled() {
                    debug!(url, attempts = retry + 1, error = %err, "giving up");
                }
                return Err(err);
            }

            let delay = self.policy.delay(retry) + self.policy.rate_limit_wait(&err);
            warn!(
                url,
                attempt = retry + 1,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "fetch failed, retrying"
            );

            match &opts.cancel {
                Some(token) => tokio::select! {
                    biased;
                    () = token.cancelled() => return Err(Error::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                },
                None => tokio::time::sleep(delay).await,
            }
            retry += 1;
        }
    }
}

/// Apply the per-attempt time budget.
///
/// With a cancellation token the budget is enforced and an overrun becomes
/// [`Error::Timeout`]; the token itself aborts the attempt with
/// [`Error::Cancelled`]. Without a token an overrun is only logged.
async fn bounded<T, Fut>(fut: Fut, opts: &FetchOptions, url: &str) -> Result<T, Error>
where
    Fut: Future<Output = Result<T, Error>>,
{
    let timeout_ms = u64::try_from(opts.timeout.as_millis()).unwrap_or(u64::MAX);
    let mut fut = std::pin::pin!(fut);

    if let Some(token) = &opts.cancel {
        return tokio::select! {
            biased;
            () = token.cancelled() => Err(Error::Cancelled),
            res = tokio::time::timeout(opts.timeout, &mut fut) => {
                res.unwrap_or(Err(Error::Timeout { timeout_ms }))
            }
        };
    }

    tokio::select! {
        res = &mut fut => res,
        () = tokio::time::sleep(opts.timeout) => {
            warn!(url, timeout_ms, "request exceeded its time budget, still waiting");
            fut.await
        }
    }
}

/// Exponential backoff with optional jitter.
///
/// `delay = base * 2^exponent (+ up to 25% jitter)`
///
/// Jitter is deterministic, seeded from the exponent, and only ever adds.
pub fn backoff_delay(base: Duration, exponent: u32, jitter: bool) -> Duration {
    let factor = 2_f64.powi(i32::try_from(exponent.min(20)).unwrap_or(20));
    let raw = base.as_secs_f64() * factor;
    let jittered = if jitter {
        raw * (1.0 + 0.25 * (f64::from(exponent) * 7.3).sin().abs())
    } else {
        raw
    };
    Duration::from_secs_f64(jittered.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_without_jitter() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 0, false), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 1, false), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 3, false), Duration::from_millis(4000));
    }

    #[test]
    fn jitter_only_adds_up_to_a_quarter() {
        let base = Duration::from_millis(500);
        for exp in 0..8 {
            let plain = backoff_delay(base, exp, false);
            let jittered = backoff_delay(base, exp, true);
            assert!(jittered >= plain);
            assert!(jittered <= plain.mul_f64(1.25) + Duration::from_nanos(1));
        }
    }

    #[test]
    fn policy_offsets_exponent() {
        let policy = RetryPolicy {
            base: Duration::from_millis(100),
            first_exponent: 1,
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay(0), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(800));
    }

    #[test]
    fn policy_classification() {
        let layer = RetryPolicy::default();
        let icon = RetryPolicy {
            fail_fast_not_found: true,
            ..RetryPolicy::default()
        };
        let nf = Error::NotFound { url: "u".into() };
        assert!(layer.should_retry(&nf));
        assert!(!icon.should_retry(&nf));
        assert!(!layer.should_retry(&Error::Cancelled));
        assert!(icon.should_retry(&Error::RateLimited { retry_after_secs: 1 }));
    }

    #[test]
    fn rate_limit_wait_takes_the_longer_of_cooldown_and_retry_after() {
        let policy = RetryPolicy {
            rate_limit_cooldown: Some(Duration::from_secs(2)),
            ..RetryPolicy::default()
        };
        let limited = |secs| Error::RateLimited { retry_after_secs: secs };
        assert_eq!(policy.rate_limit_wait(&limited(0)), Duration::from_secs(2));
        assert_eq!(policy.rate_limit_wait(&limited(5)), Duration::from_secs(5));
        assert_eq!(policy.rate_limit_wait(&limited(3600)), Duration::from_secs(60));
        assert_eq!(policy.rate_limit_wait(&Error::Timeout { timeout_ms: 5 }), Duration::ZERO);

        let layer = RetryPolicy::default();
        assert_eq!(layer.rate_limit_wait(&limited(1)), Duration::from_secs(1));
        assert_eq!(layer.rate_limit_wait(&limited(0)), Duration::ZERO);
    }
}
