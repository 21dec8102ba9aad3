//! Batch scheduler: one-item-in, one-result-out over a batched downstream
//!
//! `Scheduler` exposes a per-request `submit` contract to callers while
//! internally coalescing requests into batches for a processor that is
//! batch-oriented. A single worker task owns the dispatch side: it drains
//! one batch at a time from the [`BatchedQueue`](crate::queue::BatchedQueue),
//! hands it to the [`BatchProcessor`], and fans the positionally-matched
//! results back out to the waiting callers through a correlation map.
//!
//! Each job's pending result is a `oneshot` channel: a single-assignment
//! cell that is resolved exactly once on every code path (success, wholesale
//! processor failure, or shutdown).

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::errors::{ProcessorError, SchedulerError, SchedulerResult};
use crate::queue::BatchedQueue;

/// Opaque token correlating one submission with its eventual result.
///
/// Unique for the lifetime of the process; never re-used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Downstream batch processor capability.
///
/// The contract is order- and length-preserving: the response at position
/// `i` belongs to the request at position `i`. The call may fail wholesale
/// for the entire batch; the scheduler recovers by failing every job in it.
#[async_trait]
pub trait BatchProcessor: Send + Sync + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;

    async fn process(
        &self,
        requests: Vec<Self::Request>,
    ) -> Result<Vec<Self::Response>, ProcessorError>;
}

type ResultSender<P> =
    oneshot::Sender<SchedulerResult<<P as BatchProcessor>::Response>>;

/// Batch coalescer and result correlator.
///
/// Cloning is cheap and produces another handle to the same scheduler.
/// The worker task keeps the shared state alive, so call [`shutdown`]
/// (rather than just dropping every handle) to stop it.
///
/// [`shutdown`]: Scheduler::shutdown
pub struct Scheduler<P: BatchProcessor> {
    inner: Arc<SchedulerInner<P>>,
}

struct SchedulerInner<P: BatchProcessor> {
    queue: BatchedQueue<(JobId, P::Request)>,
    /// Correlation map: one entry per in-flight job, inserted by `submit`
    /// and removed by the worker (or the shutdown drain) after resolution.
    pending: DashMap<JobId, ResultSender<P>>,
    processor: P,
    shutting_down: AtomicBool,
    shutdown_signal: Notify,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<P: BatchProcessor> Clone for Scheduler<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: BatchProcessor> Scheduler<P> {
    /// Create a scheduler and start its worker task.
    ///
    /// Validates the configuration up front; no state is created on a
    /// configuration error. Must be called from within a Tokio runtime.
    pub fn new(config: SchedulerConfig, processor: P) -> SchedulerResult<Self> {
        config.validate()?;
        let inner = Arc::new(SchedulerInner {
            queue: BatchedQueue::new(config.max_batch_size, config.max_batch_delay)?,
            pending: DashMap::new(),
            processor,
            shutting_down: AtomicBool::new(false),
            shutdown_signal: Notify::new(),
            worker: Mutex::new(None),
        });

        let handle = tokio::spawn(worker_loop(Arc::clone(&inner)));
        *worker_slot(&inner) = Some(handle);

        Ok(Self { inner })
    }

    /// Submit one request and await its own response.
    ///
    /// Concurrent submitters do not block each other: the caller suspends
    /// only while awaiting its pending result, never while holding a queue
    /// lock. Dropping the returned future is safe; the worker still
    /// resolves and removes the job's entry, and the result is discarded.
    pub async fn submit(&self, request: P::Request) -> SchedulerResult<P::Response> {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(SchedulerError::Shutdown);
        }

        let job_id = JobId::new();
        let (tx, rx) = oneshot::channel();

        // Insert before enqueue so the worker can never drain a job id it
        // cannot find in the correlation map.
        self.inner.pending.insert(job_id, tx);
        self.inner.queue.add((job_id, request)).await;
        debug!(%job_id, "job queued");

        // Shutdown may have drained the map between the check above and the
        // insert; an entry registered after that drain would never be
        // resolved, so resolve it here.
        if self.inner.shutting_down.load(Ordering::Acquire) {
            if let Some((_, tx)) = self.inner.pending.remove(&job_id) {
                let _ = tx.send(Err(SchedulerError::Shutdown));
            }
        }

        match rx.await {
            Ok(outcome) => outcome,
            // Senders live in the correlation map and are always consumed
            // by the worker or the shutdown drain, so this arm should be
            // unreachable; map it to a shutdown failure rather than hanging
            // the caller.
            Err(_) => Err(SchedulerError::Shutdown),
        }
    }

    /// Number of in-flight jobs (submitted but not yet resolved).
    pub fn pending_jobs(&self) -> usize {
        self.inner.pending.len()
    }

    /// Stop the worker and fail every still-pending job with `Shutdown`.
    ///
    /// Idempotent. A batch already handed to the processor is awaited and
    /// resolved normally before the worker exits; jobs still buffered in
    /// the queue are failed so no caller blocks forever.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("scheduler shutting down");
        self.inner.shutdown_signal.notify_one();

        let handle = worker_slot(&self.inner).take();
        if let Some(handle) = handle {
            if handle.await.is_err() {
                warn!("worker task panicked or was aborted during shutdown");
            }
        }

        let stranded: Vec<JobId> =
            self.inner.pending.iter().map(|entry| *entry.key()).collect();
        for job_id in stranded {
            if let Some((_, tx)) = self.inner.pending.remove(&job_id) {
                let _ = tx.send(Err(SchedulerError::Shutdown));
            }
        }
        info!("scheduler shutdown complete");
    }
}

fn worker_slot<P: BatchProcessor>(
    inner: &SchedulerInner<P>,
) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
    inner.worker.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Single worker task: retrieve a batch, dispatch it, fan results out.
///
/// Runs for the lifetime of the scheduler and never dies on a processing
/// failure; it exits only when shutdown is signaled.
async fn worker_loop<P: BatchProcessor>(inner: Arc<SchedulerInner<P>>) {
    info!("scheduler worker started");
    loop {
        let batch = tokio::select! {
            _ = inner.shutdown_signal.notified() => break,
            batch = inner.queue.retrieve() => batch,
        };
        dispatch(&inner, batch).await;
    }
    info!("scheduler worker stopped");
}

/// Send one batch to the processor and resolve every job in it.
///
/// Results are matched positionally; the length contract is validated here
/// and a violation fails the whole batch instead of mis-correlating.
async fn dispatch<P: BatchProcessor>(
    inner: &Arc<SchedulerInner<P>>,
    batch: Vec<(JobId, P::Request)>,
) {
    let (job_ids, requests): (Vec<JobId>, Vec<P::Request>) = batch.into_iter().unzip();
    debug!(
        batch_size = job_ids.len(),
        jobs = %job_ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
        "processing batch"
    );

    // A panicking processor must not kill the worker: contain the panic
    // and fail the batch wholesale, like any other processor failure.
    let outcome = AssertUnwindSafe(inner.processor.process(requests))
        .catch_unwind()
        .await;

    match outcome {
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(
                panic = message,
                batch_size = job_ids.len(),
                "batch processor panicked; failing every job in the batch"
            );
            let err = ProcessorError::new(format!("batch processor panicked: {message}"));
            for job_id in job_ids {
                resolve(inner, job_id, Err(SchedulerError::Processor(err.clone())));
            }
        }
        Ok(Ok(responses)) if responses.len() == job_ids.len() => {
            for (job_id, response) in job_ids.into_iter().zip(responses) {
                resolve(inner, job_id, Ok(response));
            }
        }
        Ok(Ok(responses)) => {
            warn!(
                expected = job_ids.len(),
                actual = responses.len(),
                "batch processor violated the length contract"
            );
            let expected = job_ids.len();
            let actual = responses.len();
            for job_id in job_ids {
                resolve(
                    inner,
                    job_id,
                    Err(SchedulerError::ShapeMismatch { expected, actual }),
                );
            }
        }
        Ok(Err(err)) => {
            warn!(
                error = %err,
                batch_size = job_ids.len(),
                "batch processor failed; failing every job in the batch"
            );
            for job_id in job_ids {
                resolve(inner, job_id, Err(SchedulerError::Processor(err.clone())));
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Resolve one job: remove its entry from the correlation map and complete
/// its pending result. Removal-then-send makes double resolution
/// structurally impossible; outside of shutdown, a missing entry indicates
/// a bookkeeping bug.
fn resolve<P: BatchProcessor>(
    inner: &Arc<SchedulerInner<P>>,
    job_id: JobId,
    outcome: SchedulerResult<P::Response>,
) {
    match inner.pending.remove(&job_id) {
        Some((_, tx)) => {
            if tx.send(outcome).is_err() {
                // Caller cancelled its submit; the result is discarded.
                debug!(%job_id, "caller gone before resolution");
            }
        }
        None => {
            if inner.shutting_down.load(Ordering::Acquire) {
                // The shutdown path already failed this job with `Shutdown`
                // and took its entry; the worker's result is discarded.
                debug!(%job_id, "job already failed by shutdown");
            } else {
                debug_assert!(false, "job {job_id} resolved but absent from correlation map");
                warn!(%job_id, "job resolved but absent from correlation map");
            }
        }
    }
}
