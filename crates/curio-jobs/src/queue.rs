//! Dedupe-keyed, bounded-concurrency scheduler for independent async work.
//!
//! A dedupe key has at most one job in pending ∪ active at any instant;
//! admitting a key that is already outstanding is a silent no-op. Pending
//! jobs start in admission order, up to the concurrency limit; whenever a
//! slot frees, the queue re-pumps immediately. Concurrency bounds logical
//! overlap of I/O-bound work, not CPU threads.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::config::QueueConfig;

/// Type-erased unit of queued work.
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The job was admitted and will run.
    Queued,
    /// A job with the same key is already pending or active; the new one
    /// was dropped. Not an error — the original job's callbacks still fire.
    Deduped,
    /// The queue has been disposed and admits nothing.
    Disposed,
}

impl Admission {
    pub fn is_queued(&self) -> bool {
        matches!(self, Admission::Queued)
    }
}

struct PendingJob {
    key: String,
    work: JobFuture,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PendingJob>,
    pending_keys: HashSet<String>,
    active_keys: HashSet<String>,
    /// A delayed first pump is scheduled; admission waits for it while
    /// nothing is active.
    delay_armed: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    concurrency: AtomicUsize,
    start_delay: Duration,
    disposed: AtomicBool,
}

/// Dedupe-keyed scheduler with a bounded active set.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                concurrency: AtomicUsize::new(config.concurrency.max(1)),
                start_delay: config.start_delay,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Admit `work` under `key` unless the key is already outstanding.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(&self, key: impl Into<String>, work: JobFuture) -> Admission {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Admission::Disposed;
        }
        let key = key.into();
        let arm_delay = {
            let mut state = self.inner.state.lock();
            if state.pending_keys.contains(&key) || state.active_keys.contains(&key) {
                trace!(%key, "duplicate enqueue dropped");
                return Admission::Deduped;
            }
            let was_idle = state.pending.is_empty() && state.active_keys.is_empty();
            state.pending_keys.insert(key.clone());
            state.pending.push_back(PendingJob { key, work });
            if state.delay_armed {
                // The armed pump will pick this job up with the batch.
                return Admission::Queued;
            }
            let arm = was_idle && !self.inner.start_delay.is_zero();
            if arm {
                state.delay_armed = true;
            }
            arm
        };

        if arm_delay {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(inner.start_delay).await;
                inner.state.lock().delay_armed = false;
                Self::pump(&inner);
            });
        } else {
            Self::pump(&self.inner);
        }
        Admission::Queued
    }

    /// Change the concurrency limit. Affects only future admission
    /// decisions; running jobs are never preempted.
    pub fn set_concurrency(&self, concurrency: usize) {
        self.inner
            .concurrency
            .store(concurrency.max(1), Ordering::SeqCst);
        Self::pump(&self.inner);
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency.load(Ordering::SeqCst)
    }

    /// Drop all pending jobs and refuse further admission. Jobs already
    /// active run to completion; their callbacks are expected to check
    /// [`TaskQueue::is_disposed`] before touching shared state.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        let dropped = {
            let mut state = self.inner.state.lock();
            state.pending_keys.clear();
            let dropped = state.pending.len();
            state.pending.clear();
            dropped
        };
        debug!(dropped, "task queue disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn active_len(&self) -> usize {
        self.inner.state.lock().active_keys.len()
    }

    fn pump(inner: &Arc<QueueInner>) {
        let mut to_start = Vec::new();
        {
            let mut state = inner.state.lock();
            // While the first pump is deferred and nothing runs yet, hold
            // admissions so the burst starts as one batch.
            if state.delay_armed && state.active_keys.is_empty() {
                return;
            }
            let limit = inner.concurrency.load(Ordering::SeqCst);
            while state.active_keys.len() < limit {
                let Some(job) = state.pending.pop_front() else {
                    break;
                };
                state.pending_keys.remove(&job.key);
                state.active_keys.insert(job.key.clone());
                to_start.push(job);
            }
        }

        for job in to_start {
            let PendingJob { key, work } = job;
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                trace!(%key, "job started");
                work.await;
                inner.state.lock().active_keys.remove(&key);
                trace!(%key, "job finished");
                Self::pump(&inner);
            });
        }
    }
}
