//! Batching queue: multi-producer, single-consumer group release
//!
//! `BatchedQueue` decouples producers that submit one item at a time from a
//! consumer that wants items in bounded groups. A group is released as soon
//! as either trigger fires:
//!
//! - **size trigger**: the buffer reaches `max_batch_size` items, or
//! - **time trigger**: `max_batch_delay` has elapsed since the buffer became
//!   non-empty and it is still non-empty.
//!
//! The wait/notify discipline follows the classic condition-variable shape:
//! the retriever re-checks its predicate under the lock after every wake, so
//! spurious or stale notifications are harmless.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::trace;

use crate::errors::{SchedulerError, SchedulerResult};

/// Task-safe queue that accumulates items and releases them in batches.
///
/// Cloning is cheap and produces another handle to the same queue.
pub struct BatchedQueue<T> {
    inner: Arc<QueueInner<T>>,
}

struct QueueInner<T> {
    max_batch_size: usize,
    max_batch_delay: Duration,
    state: Mutex<QueueState<T>>,
    /// Woken when a release trigger fires while a retriever may be parked.
    batch_ready: Notify,
}

struct QueueState<T> {
    buffer: VecDeque<T>,
    /// At most one outstanding deferred-wake registration per queue.
    timeout: Option<JoinHandle<()>>,
    /// Set by the timeout task under the lock; cleared on every drain.
    timer_fired: bool,
}

impl<T> Clone for BatchedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> BatchedQueue<T> {
    /// Create a queue releasing batches of up to `max_batch_size` items,
    /// or earlier once `max_batch_delay` has elapsed with items waiting.
    ///
    /// `max_batch_size` must be at least 1. A zero `max_batch_delay`
    /// disables the time trigger.
    pub fn new(max_batch_size: usize, max_batch_delay: Duration) -> SchedulerResult<Self> {
        if max_batch_size == 0 {
            return Err(SchedulerError::Configuration {
                reason: "max_batch_size must be at least 1".to_string(),
            });
        }
        Ok(Self {
            inner: Arc::new(QueueInner {
                max_batch_size,
                max_batch_delay,
                state: Mutex::new(QueueState {
                    buffer: VecDeque::new(),
                    timeout: None,
                    timer_fired: false,
                }),
                batch_ready: Notify::new(),
            }),
        })
    }

    /// Append an item to the tail of the buffer.
    ///
    /// Reaching the size threshold wakes the retriever; otherwise a timeout
    /// is armed if none is outstanding. Never blocks beyond the critical
    /// section and is safe for any number of concurrent producers.
    pub async fn add(&self, item: T) {
        let mut state = self.inner.state.lock().await;
        state.buffer.push_back(item);
        if state.buffer.len() >= self.inner.max_batch_size {
            self.inner.batch_ready.notify_one();
        } else if state.timeout.is_none() && self.inner.max_batch_delay > Duration::ZERO {
            state.timeout = Some(arm_timeout(&self.inner));
        }
    }

    /// Wait for a release trigger and drain one batch in FIFO order.
    ///
    /// Returns between 1 and `max_batch_size` items; never an empty batch.
    /// The cap is absolute: a timeout firing with more than a full batch
    /// buffered still yields at most `max_batch_size` items, and any
    /// leftovers get a fresh full-length timeout of their own.
    pub async fn retrieve(&self) -> Vec<T> {
        loop {
            {
                let mut state = self.inner.state.lock().await;
                let size_ready = state.buffer.len() >= self.inner.max_batch_size;
                let timer_ready = state.timer_fired && !state.buffer.is_empty();
                if size_ready || timer_ready {
                    trace!(
                        buffered = state.buffer.len(),
                        size_ready,
                        timer_ready,
                        "release trigger fired"
                    );
                    return drain_batch(&self.inner, &mut state);
                }
            }
            // Lock is released while parked. `Notify` retains a permit from
            // a wake that arrives between the predicate check and this await,
            // so the trigger cannot be missed.
            self.inner.batch_ready.notified().await;
        }
    }

    /// Number of items currently buffered.
    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.buffer.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Drain up to one full batch from the head of the buffer.
///
/// Caller holds the state lock. Disarms the outstanding timeout and re-arms
/// a fresh one if items remain behind.
fn drain_batch<T: Send + 'static>(
    inner: &Arc<QueueInner<T>>,
    state: &mut QueueState<T>,
) -> Vec<T> {
    if let Some(handle) = state.timeout.take() {
        handle.abort();
    }
    state.timer_fired = false;

    let take = state.buffer.len().min(inner.max_batch_size);
    let batch: Vec<T> = state.buffer.drain(..take).collect();

    if !state.buffer.is_empty() && inner.max_batch_delay > Duration::ZERO {
        state.timeout = Some(arm_timeout(inner));
    }
    batch
}

/// Schedule a deferred wake: after `max_batch_delay`, notify the retriever
/// if items are still waiting. Aborted whenever the buffer is drained.
fn arm_timeout<T: Send + 'static>(inner: &Arc<QueueInner<T>>) -> JoinHandle<()> {
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        tokio::time::sleep(inner.max_batch_delay).await;
        let mut state = inner.state.lock().await;
        if !state.buffer.is_empty() {
            state.timer_fired = true;
            inner.batch_ready.notify_one();
        }
    })
}
