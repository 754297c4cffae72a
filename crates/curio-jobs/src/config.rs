//! Configuration for the job queue, the retry runner, and the pipeline
//! coordinators.

use std::time::Duration;

/// Configuration for a [`TaskQueue`](crate::queue::TaskQueue).
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How many jobs may be logically in flight at once.
    pub concurrency: usize,
    /// Delay before the first pump after the pending set goes from empty to
    /// non-empty, so a burst of rapid enqueues is admitted as one batch.
    /// Zero disables batching.
    pub start_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            start_delay: Duration::ZERO,
        }
    }
}

/// Configuration for a [`RetryableJobRunner`](crate::runner::RetryableJobRunner).
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub concurrency: usize,
    /// Default per-attempt budget.
    pub timeout: Duration,
    /// Default retry bound: a job makes `max_retries + 1` attempts in total.
    pub max_retries: u32,
    pub start_delay: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            timeout: Duration::from_secs(30),
            max_retries: 1,
            start_delay: Duration::ZERO,
        }
    }
}

/// Configuration for the import pipeline.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub queue: QueueConfig,
    /// Images whose longest side does not exceed this are served as-is and
    /// never get a thumbnail.
    pub thumb_skip_max: u32,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig {
                concurrency: 2,
                start_delay: Duration::from_millis(150),
            },
            thumb_skip_max: 480,
        }
    }
}

/// Configuration for the thumbnail pipeline.
#[derive(Debug, Clone)]
pub struct ThumbnailConfig {
    pub concurrency: usize,
    /// Concurrency while the user is interacting with the UI.
    pub throttled_concurrency: usize,
    pub timeout: Duration,
    pub max_retries: u32,
    /// Idle window after the last interaction before the normal concurrency
    /// is restored.
    pub interaction_debounce: Duration,
    /// How often to re-check an item whose vault fields are not yet
    /// populated (it may still be mid-import).
    pub lookup_retries: u32,
    pub lookup_retry_delay: Duration,
    /// Longest side of generated thumbnails.
    pub max_size: u32,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            throttled_concurrency: 1,
            timeout: Duration::from_secs(60),
            max_retries: 1,
            interaction_debounce: Duration::from_millis(600),
            lookup_retries: 3,
            lookup_retry_delay: Duration::from_millis(300),
            max_size: 480,
        }
    }
}

/// Configuration for the bookmark metadata pipeline.
#[derive(Debug, Clone)]
pub struct MetadataConfig {
    pub concurrency: usize,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            timeout: Duration::from_secs(12),
            max_retries: 1,
        }
    }
}
