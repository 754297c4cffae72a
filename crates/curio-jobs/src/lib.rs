//! Background job orchestration for the curio organizer.
//!
//! The building blocks are a dedupe-keyed, bounded-concurrency
//! [`TaskQueue`] and a timeout/retry [`RetryableJobRunner`] on top of it.
//! Three pipeline coordinators consume them: imports (vault storage with
//! content dedup), thumbnails (content-keyed, idempotent, throttled during
//! interaction), and bookmark metadata (fixed policy, failure never fails
//! the item).

pub mod config;
pub mod import;
pub mod metadata;
pub mod queue;
pub mod runner;
pub mod thumbnail;

pub use config::{ImportConfig, MetadataConfig, QueueConfig, RunnerConfig, ThumbnailConfig};
pub use import::{ImportCoordinator, ImportRequest, ImportSource};
pub use metadata::{normalize_bookmark_url, MetadataCoordinator};
pub use queue::{Admission, JobFuture, TaskQueue};
pub use runner::{JobPolicy, RetryableJobRunner};
pub use thumbnail::ThumbnailCoordinator;
