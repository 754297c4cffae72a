//! Timeout and retry wrapper over the task queue.
//!
//! Each attempt is spawned as its own task and raced against a timer. An
//! attempt that outlives its budget is disregarded, not cancelled — the
//! runner simply stops listening and moves on to the next attempt. A job
//! makes `max_retries + 1` attempts with no backoff; the completion
//! callback fires exactly once, with the first in-time success or the last
//! observed failure.

use std::future::Future;

use tracing::{debug, warn};

use curio_core::{Error, Result};

use crate::config::RunnerConfig;
use crate::queue::{Admission, TaskQueue};

/// Per-job overrides for the runner's default policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobPolicy {
    pub timeout: Option<std::time::Duration>,
    pub max_retries: Option<u32>,
}

/// Retry/timeout job runner built on [`TaskQueue`].
#[derive(Clone)]
pub struct RetryableJobRunner {
    queue: TaskQueue,
    config: RunnerConfig,
}

impl RetryableJobRunner {
    pub fn new(config: RunnerConfig) -> Self {
        let queue = TaskQueue::new(crate::config::QueueConfig {
            concurrency: config.concurrency,
            start_delay: config.start_delay,
        });
        Self { queue, config }
    }

    /// Adjust concurrency for future admissions; running jobs are never
    /// preempted.
    pub fn set_concurrency(&self, concurrency: usize) {
        self.queue.set_concurrency(concurrency);
    }

    pub fn concurrency(&self) -> usize {
        self.queue.concurrency()
    }

    pub fn dispose(&self) {
        self.queue.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.queue.is_disposed()
    }

    pub fn active_len(&self) -> usize {
        self.queue.active_len()
    }

    /// Submit a retryable job under `key`. `attempt` builds one attempt
    /// future; `complete` receives the final outcome exactly once.
    ///
    /// Admission is deduplicated by key like [`TaskQueue::enqueue`].
    pub fn submit<T, Op, Fut, Done, DoneFut>(
        &self,
        key: impl Into<String>,
        policy: JobPolicy,
        attempt: Op,
        complete: Done,
    ) -> Admission
    where
        T: Send + 'static,
        Op: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        Done: FnOnce(Result<T>) -> DoneFut + Send + 'static,
        DoneFut: Future<Output = ()> + Send + 'static,
    {
        let timeout = policy.timeout.unwrap_or(self.config.timeout);
        let max_retries = policy.max_retries.unwrap_or(self.config.max_retries);
        let key = key.into();
        let job_key = key.clone();

        self.queue.enqueue(
            key,
            Box::pin(async move {
                let mut success = None;
                let mut last_error = None;
                for attempt_index in 1..=max_retries + 1 {
                    // Detached task: expiry disregards the attempt but does
                    // not cancel the underlying operation.
                    let handle = tokio::spawn(attempt());
                    match tokio::time::timeout(timeout, handle).await {
                        Ok(Ok(Ok(value))) => {
                            success = Some(value);
                            break;
                        }
                        Ok(Ok(Err(error))) => {
                            debug!(key = %job_key, attempt = attempt_index, %error, "attempt failed");
                            last_error = Some(error);
                        }
                        Ok(Err(join_error)) => {
                            debug!(key = %job_key, attempt = attempt_index, %join_error, "attempt task aborted");
                            last_error =
                                Some(Error::Internal(format!("attempt task failed: {join_error}")));
                        }
                        Err(_elapsed) => {
                            debug!(key = %job_key, attempt = attempt_index, timeout_ms = timeout.as_millis() as u64, "attempt timed out");
                            last_error = Some(Error::Timeout(timeout.as_millis() as u64));
                        }
                    }
                }

                match success {
                    Some(value) => complete(Ok(value)).await,
                    None => {
                        let error = last_error
                            .unwrap_or_else(|| Error::Internal("job made no attempts".to_string()));
                        warn!(key = %job_key, attempts = max_retries + 1, %error, "job failed");
                        complete(Err(error)).await;
                    }
                }
            }),
        )
    }
}
