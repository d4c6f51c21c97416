//! Off-thread geometry processing.
//!
//! Simplification and style enrichment run on one dedicated OS thread,
//! started lazily on first use and reused until [`OffThreadProcessor::shutdown`].
//! Callers never block: each request gets a monotonically increasing id,
//! is queued to the worker, and is settled by a router task that matches
//! the worker's response back to the caller's oneshot by id.
//!
//! A failing or panicking job only rejects its own request.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use dashmap::DashMap;
use geolayer_api::FeatureCollection;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::model::{EnhancedFeatureCollection, KeyedCollection};
use crate::simplify::simplify;
use crate::style::{ResolvedStyle, enrich};

// ── Protocol ─────────────────────────────────────────────────────────

/// How to process one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessOptions {
    /// `None` or `0` disables simplification.
    pub tolerance: Option<f64>,
    pub style: ResolvedStyle,
}

/// A single-collection job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessJob {
    pub collection: FeatureCollection,
    pub options: ProcessOptions,
}

/// One keyed element of a batch job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub key: String,
    pub collection: FeatureCollection,
    pub options: ProcessOptions,
}

/// Messages sent to the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerRequest {
    ProcessOne { id: u64, payload: ProcessJob },
    ProcessBatch { id: u64, payload: Vec<BatchItem> },
}

impl WorkerRequest {
    pub fn id(&self) -> u64 {
        match self {
            Self::ProcessOne { id, .. } | Self::ProcessBatch { id, .. } => *id,
        }
    }
}

/// Messages sent back by the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerResponse {
    Result { id: u64, data: EnhancedFeatureCollection },
    BatchResult { id: u64, data: Vec<KeyedCollection> },
    Error { id: u64, error: String },
}

impl WorkerResponse {
    pub fn id(&self) -> u64 {
        match self {
            Self::Result { id, .. } | Self::BatchResult { id, .. } | Self::Error { id, .. } => *id,
        }
    }
}

// ── Processor ────────────────────────────────────────────────────────

struct WorkerHandle {
    requests: mpsc::UnboundedSender<WorkerRequest>,
    thread: thread::JoinHandle<()>,
    router: tokio::task::JoinHandle<()>,
}

enum WorkerState {
    Idle,
    Running(WorkerHandle),
    Stopped,
}

/// Process-scoped handle to the processing worker.
pub struct OffThreadProcessor {
    next_id: AtomicU64,
    pending: Arc<DashMap<u64, oneshot::Sender<WorkerResponse>>>,
    state: Mutex<WorkerState>,
}

impl Default for OffThreadProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OffThreadProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffThreadProcessor")
            .field("running", &self.is_running())
            .field("in_flight", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl OffThreadProcessor {
    /// Create a processor. The worker thread is not started until
    /// [`init`](Self::init) or the first request.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
            state: Mutex::new(WorkerState::Idle),
        }
    }

    /// Start the worker if it is not already running.
    ///
    /// Must be called from within a Tokio runtime. Fails after
    /// [`shutdown`](Self::shutdown).
    pub fn init(&self) -> Result<(), CoreError> {
        self.sender().map(drop)
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lock_state(), WorkerState::Running(_))
    }

    /// Requests sent and not yet settled.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Simplify and enrich one collection.
    pub async fn process(
        &self,
        collection: FeatureCollection,
        options: ProcessOptions,
    ) -> Result<EnhancedFeatureCollection, CoreError> {
        let payload = ProcessJob {
            collection,
            options,
        };
        match self
            .dispatch(|id| WorkerRequest::ProcessOne { id, payload })
            .await?
        {
            WorkerResponse::Result { data, .. } => Ok(data),
            WorkerResponse::Error { error, .. } => Err(CoreError::Processing { message: error }),
            WorkerResponse::BatchResult { id, .. } => Err(CoreError::Internal(format!(
                "worker answered request {id} with a batch result"
            ))),
        }
    }

    /// Process several keyed collections in one worker round trip.
    ///
    /// Output order matches input order. One failing item fails the batch.
    pub async fn process_batch(&self, items: Vec<BatchItem>) -> Result<Vec<KeyedCollection>, CoreError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        match self
            .dispatch(|id| WorkerRequest::ProcessBatch { id, payload: items })
            .await?
        {
            WorkerResponse::BatchResult { data, .. } => Ok(data),
            WorkerResponse::Error { error, .. } => Err(CoreError::Processing { message: error }),
            WorkerResponse::Result { id, .. } => Err(CoreError::Internal(format!(
                "worker answered batch request {id} with a single result"
            ))),
        }
    }

    /// Stop the worker. Already-queued requests still complete; later
    /// requests fail with [`CoreError::WorkerUnavailable`].
    pub async fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), WorkerState::Stopped);
        let WorkerState::Running(handle) = previous else {
            return;
        };

        drop(handle.requests);
        if let Err(e) = handle.router.await {
            warn!(error = %e, "processing router task failed");
        }
        match tokio::task::spawn_blocking(move || handle.thread.join()).await {
            Ok(Ok(())) => info!("processing worker stopped"),
            Ok(Err(_)) => warn!("processing worker thread panicked"),
            Err(e) => warn!(error = %e, "failed to join processing worker"),
        }
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn lock_state(&self) -> std::sync::MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sender to the running worker, starting it on first use.
    fn sender(&self) -> Result<mpsc::UnboundedSender<WorkerRequest>, CoreError> {
        let mut state = self.lock_state();
        match &*state {
            WorkerState::Running(handle) => return Ok(handle.requests.clone()),
            WorkerState::Stopped => return Err(CoreError::WorkerUnavailable),
            WorkerState::Idle => {}
        }

        let handle = spawn_worker(Arc::clone(&self.pending))?;
        let sender = handle.requests.clone();
        *state = WorkerState::Running(handle);
        Ok(sender)
    }

    async fn dispatch<F>(&self, build: F) -> Result<WorkerResponse, CoreError>
    where
        F: FnOnce(u64) -> WorkerRequest,
    {
        let sender = self.sender()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        if sender.send(build(id)).is_err() {
            self.pending.remove(&id);
            return Err(CoreError::WorkerUnavailable);
        }
        debug!(id, "queued processing request");

        rx.await.map_err(|_| CoreError::WorkerUnavailable)
    }
}

fn spawn_worker(
    pending: Arc<DashMap<u64, oneshot::Sender<WorkerResponse>>>,
) -> Result<WorkerHandle, CoreError> {
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let (resp_tx, mut resp_rx) = mpsc::unbounded_channel::<WorkerResponse>();

    let thread = thread::Builder::new()
        .name("geolayer-worker".into())
        .spawn(move || run_worker(req_rx, &resp_tx))
        .map_err(|e| CoreError::Internal(format!("cannot start processing worker: {e}")))?;

    let router = tokio::spawn(async move {
        while let Some(response) = resp_rx.recv().await {
            let id = response.id();
            if let WorkerResponse::Error { error, .. } = &response {
                warn!(id, error = %error, "processing request failed");
            }
            match pending.remove(&id) {
                Some((_, waiter)) => {
                    let _ = waiter.send(response);
                }
                None => debug!(id, "dropping response for abandoned request"),
            }
        }
        // Worker exited: nothing will answer what is still pending.
        pending.clear();
    });

    info!("processing worker started");
    Ok(WorkerHandle {
        requests: req_tx,
        thread,
        router,
    })
}

// ── Worker side ──────────────────────────────────────────────────────

fn run_worker(
    mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
    responses: &mpsc::UnboundedSender<WorkerResponse>,
) {
    while let Some(request) = requests.blocking_recv() {
        let id = request.id();
        let response = panic::catch_unwind(AssertUnwindSafe(|| handle_request(request)))
            .unwrap_or_else(|payload| WorkerResponse::Error {
                id,
                error: panic_message(payload.as_ref()),
            });
        if responses.send(response).is_err() {
            break;
        }
    }
}

fn handle_request(request: WorkerRequest) -> WorkerResponse {
    match request {
        WorkerRequest::ProcessOne { id, payload } => {
            match process_collection(payload.collection, &payload.options) {
                Ok(data) => WorkerResponse::Result { id, data },
                Err(error) => WorkerResponse::Error { id, error },
            }
        }
        WorkerRequest::ProcessBatch { id, payload } => {
            let results: Result<Vec<_>, String> = payload
                .into_iter()
                .map(|item| {
                    process_collection(item.collection, &item.options)
                        .map(|data| KeyedCollection {
                            key: item.key.clone(),
                            data,
                        })
                        .map_err(|e| format!("{}: {e}", item.key))
                })
                .collect();
            match results {
                Ok(data) => WorkerResponse::BatchResult { id, data },
                Err(error) => WorkerResponse::Error { id, error },
            }
        }
    }
}

/// Simplify every geometry and apply the style, preserving feature order
/// and collection metadata.
pub fn process_collection(
    collection: FeatureCollection,
    options: &ProcessOptions,
) -> Result<EnhancedFeatureCollection, String> {
    let tolerance = match options.tolerance {
        Some(t) if !t.is_finite() || t < 0.0 => {
            return Err(format!("invalid tolerance {t}"));
        }
        Some(t) if t > 0.0 => Some(t),
        _ => None,
    };

    let FeatureCollection {
        kind,
        features,
        name,
        crs,
        bbox,
    } = collection;

    let features = features
        .into_iter()
        .map(|mut feature| {
            if let (Some(t), Some(geometry)) = (tolerance, feature.geometry.as_ref()) {
                feature.geometry = Some(simplify(geometry, t));
            }
            enrich(feature, &options.style)
        })
        .collect();

    Ok(EnhancedFeatureCollection(FeatureCollection {
        kind,
        features,
        name,
        crs,
        bbox,
    }))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("worker panicked: {s}")
    } else {
        "worker panicked".into()
    }
}
