//! Batch orchestration.
//!
//! Runs a loader over N items with bounded parallelism, reports progress
//! once per settled item in completion order, and collects a per-item
//! outcome instead of failing the whole batch. Only one batch is active at
//! a time: starting a new batch cancels the previous one.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use futures_util::StreamExt;
use futures_util::stream;
use serde::Serialize;
use strum::Display;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::model::BatchProgress;

/// How one batch item settled.
#[derive(Debug, Clone)]
pub enum Settled<T> {
    Fulfilled(T),
    Rejected(CoreError),
    Aborted,
}

impl<T> Settled<T> {
    pub fn status(&self) -> ItemStatus {
        match self {
            Self::Fulfilled(_) => ItemStatus::Fulfilled,
            Self::Rejected(_) => ItemStatus::Rejected,
            Self::Aborted => ItemStatus::Aborted,
        }
    }

    fn from_result(result: Result<T, CoreError>) -> Self {
        match result {
            Ok(value) => Self::Fulfilled(value),
            Err(e) if e.is_cancelled() => Self::Aborted,
            Err(e) => Self::Rejected(e),
        }
    }
}

/// Outcome kind, without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ItemStatus {
    Fulfilled,
    Rejected,
    Aborted,
}

/// One settled item.
#[derive(Debug, Clone)]
pub struct ItemOutcome<T> {
    pub key: String,
    pub outcome: Settled<T>,
}

/// Every item of one batch, in completion order.
#[derive(Debug, Clone)]
pub struct BatchReport<T> {
    pub outcomes: Vec<ItemOutcome<T>>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self { outcomes: Vec::new() }
    }
}

impl<T> BatchReport<T> {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn count(&self, status: ItemStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.outcome.status() == status)
            .count()
    }

    pub fn fulfilled(&self) -> impl Iterator<Item = (&str, &T)> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            Settled::Fulfilled(v) => Some((o.key.as_str(), v)),
            _ => None,
        })
    }

    pub fn rejected(&self) -> impl Iterator<Item = (&str, &CoreError)> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            Settled::Rejected(e) => Some((o.key.as_str(), e)),
            _ => None,
        })
    }

    pub fn aborted(&self) -> impl Iterator<Item = &str> {
        self.outcomes.iter().filter_map(|o| match o.outcome {
            Settled::Aborted => Some(o.key.as_str()),
            _ => None,
        })
    }

    pub fn get(&self, key: &str) -> Option<&Settled<T>> {
        self.outcomes.iter().find(|o| o.key == key).map(|o| &o.outcome)
    }
}

/// Owns the single active batch cancellation token.
#[derive(Debug)]
pub struct BatchOrchestrator {
    parent: CancellationToken,
    active: Mutex<Option<(u64, CancellationToken)>>,
    next_batch: AtomicU64,
}

impl Default for BatchOrchestrator {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl BatchOrchestrator {
    /// Batches run under child tokens of `parent`; cancelling it aborts
    /// every current and future batch.
    pub fn new(parent: CancellationToken) -> Self {
        Self {
            parent,
            active: Mutex::new(None),
            next_batch: AtomicU64::new(1),
        }
    }

    /// Run `load` over `items`, at most `concurrency` at a time.
    ///
    /// `load` is called lazily, when a slot frees up, with the batch's
    /// cancellation token. `on_progress` fires once per settled item.
    pub async fn run<I, T, K, F, Fut, P>(
        &self,
        items: Vec<I>,
        concurrency: usize,
        key_of: K,
        load: F,
        mut on_progress: P,
    ) -> BatchReport<T>
    where
        K: Fn(&I) -> String,
        F: Fn(I, CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
        P: FnMut(BatchProgress),
    {
        let (batch, token) = self.begin();
        let total = items.len();
        info!(batch, total, concurrency, "batch started");

        let mut settled = stream::iter(items.into_iter().map(|item| {
            let key = key_of(&item);
            let token = token.clone();
            let work = load(item, token.clone());
            async move {
                if token.is_cancelled() {
                    return ItemOutcome {
                        key,
                        outcome: Settled::Aborted,
                    };
                }
                let outcome = tokio::select! {
                    biased;
                    () = token.cancelled() => Settled::Aborted,
                    result = work => Settled::from_result(result),
                };
                ItemOutcome { key, outcome }
            }
        }))
        .buffer_unordered(concurrency.max(1));

        let mut report = BatchReport::default();
        while let Some(item) = settled.next().await {
            debug!(batch, key = %item.key, status = %item.outcome.status(), "batch item settled");
            report.outcomes.push(item);
            on_progress(BatchProgress {
                completed: report.outcomes.len(),
                total,
            });
        }

        self.finish(batch);
        info!(
            batch,
            fulfilled = report.count(ItemStatus::Fulfilled),
            rejected = report.count(ItemStatus::Rejected),
            aborted = report.count(ItemStatus::Aborted),
            "batch finished"
        );
        report
    }

    /// Cancel the active batch, if any. Returns `true` if one was running.
    pub fn cancel_active(&self) -> bool {
        match self.lock_active().take() {
            Some((batch, token)) => {
                info!(batch, "cancelling active batch");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn has_active(&self) -> bool {
        self.lock_active().is_some()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<(u64, CancellationToken)>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a fresh token, cancelling the previous batch.
    fn begin(&self) -> (u64, CancellationToken) {
        let batch = self.next_batch.fetch_add(1, Ordering::Relaxed);
        let token = self.parent.child_token();
        let previous = self.lock_active().replace((batch, token.clone()));
        if let Some((prev, prev_token)) = previous {
            info!(batch = prev, superseded_by = batch, "cancelling superseded batch");
            prev_token.cancel();
        }
        (batch, token)
    }

    /// Clear the active slot if it still belongs to `batch`.
    fn finish(&self, batch: u64) {
        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|(id, _)| *id == batch) {
            *active = None;
        }
    }
}
