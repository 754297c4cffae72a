//! Thumbnail pipeline keyed by vault content, not by item.
//!
//! Multiple items that share identical bytes resolve to one thumbnail job,
//! and an output already on disk short-circuits to `Ready` without running
//! anything. Re-evaluation requests per item collapse through a
//! `requested` set, so a UI retrying a failed `<img>` load cannot stack
//! evaluations. While the user is interacting, the runner is throttled to
//! one slot; the normal level returns after an idle window.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use curio_core::{
    now_millis, ItemId, ItemStore, MediaStateUpdate, StateCell, ThumbStatus, ThumbnailGenerator,
    VaultKey,
};

use crate::config::{RunnerConfig, ThumbnailConfig};
use crate::runner::{JobPolicy, RetryableJobRunner};

/// Coordinates idempotent thumbnail generation over a retryable runner.
pub struct ThumbnailCoordinator {
    state: StateCell,
    store: Arc<dyn ItemStore>,
    generator: Arc<dyn ThumbnailGenerator>,
    runner: RetryableJobRunner,
    /// Item ids with an evaluation in flight.
    requested: Mutex<HashSet<ItemId>>,
    thumbs_root: PathBuf,
    config: ThumbnailConfig,
    last_interaction: Mutex<Option<Instant>>,
    throttled: AtomicBool,
}

impl ThumbnailCoordinator {
    pub fn new(
        state: StateCell,
        store: Arc<dyn ItemStore>,
        generator: Arc<dyn ThumbnailGenerator>,
        thumbs_root: PathBuf,
        config: ThumbnailConfig,
    ) -> Arc<Self> {
        let runner = RetryableJobRunner::new(RunnerConfig {
            concurrency: config.concurrency,
            timeout: config.timeout,
            max_retries: config.max_retries,
            start_delay: Duration::ZERO,
        });
        Arc::new(Self {
            state,
            store,
            generator,
            runner,
            requested: Mutex::new(HashSet::new()),
            thumbs_root,
            config,
            last_interaction: Mutex::new(None),
            throttled: AtomicBool::new(false),
        })
    }

    /// Current runner concurrency (normal or throttled).
    pub fn concurrency(&self) -> usize {
        self.runner.concurrency()
    }

    pub fn dispose(&self) {
        self.runner.dispose();
    }

    /// Ask for an item's thumbnail to be (re-)evaluated. Repeated requests
    /// for the same item collapse into the evaluation already in flight.
    pub fn request(self: &Arc<Self>, item_id: ItemId) {
        {
            let mut requested = self.requested.lock();
            if !requested.insert(item_id.clone()) {
                trace!(item = %item_id, "thumbnail evaluation already in flight");
                return;
            }
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.evaluate(item_id).await;
        });
    }

    /// Record user interaction: throttle admissions to one slot until the
    /// idle window elapses. Never touches running jobs.
    pub fn notify_interaction(self: &Arc<Self>) {
        *self.last_interaction.lock() = Some(Instant::now());
        if self.throttled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.runner
            .set_concurrency(self.config.throttled_concurrency);
        debug!(
            concurrency = self.config.throttled_concurrency,
            "thumbnail admissions throttled during interaction"
        );

        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let remaining = {
                    let last = this.last_interaction.lock();
                    match *last {
                        Some(last) => this
                            .config
                            .interaction_debounce
                            .checked_sub(last.elapsed())
                            .unwrap_or(Duration::ZERO),
                        None => Duration::ZERO,
                    }
                };
                if remaining.is_zero() {
                    break;
                }
                tokio::time::sleep(remaining).await;
            }
            this.throttled.store(false, Ordering::SeqCst);
            this.runner.set_concurrency(this.config.concurrency);
            debug!(
                concurrency = this.config.concurrency,
                "thumbnail admissions restored after idle window"
            );
        });
    }

    /// Output path for a content key: `<thumbs_root>/<sanitized key>.webp`.
    /// `None` when nothing of the key survives sanitization.
    fn output_path_for(&self, key: &VaultKey) -> Option<PathBuf> {
        let sanitized: String = key
            .file_name()
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_'))
            .collect();
        if sanitized.is_empty() {
            return None;
        }
        Some(self.thumbs_root.join(format!("{sanitized}.webp")))
    }

    fn finish_request(&self, item_id: &ItemId) {
        self.requested.lock().remove(item_id);
    }

    async fn evaluate(self: Arc<Self>, item_id: ItemId) {
        // The item may still be mid-import; give its vault fields a few
        // chances to appear before giving up.
        let mut lookup = 0;
        let (key, input_path) = loop {
            if self.runner.is_disposed() {
                self.finish_request(&item_id);
                return;
            }
            let snapshot = self.state.snapshot();
            let Some(item) = snapshot.item(&item_id) else {
                trace!(item = %item_id, "item gone before thumbnail evaluation");
                self.finish_request(&item_id);
                return;
            };
            if matches!(item.thumb_status, ThumbStatus::Ready | ThumbStatus::Skipped) {
                self.finish_request(&item_id);
                return;
            }
            if let (Some(key), Some(path)) = (&item.vault_key, &item.vault_path) {
                break (key.clone(), PathBuf::from(path));
            }
            if lookup >= self.config.lookup_retries {
                debug!(item = %item_id, "vault fields never populated; thumbnail evaluation dropped");
                self.finish_request(&item_id);
                return;
            }
            lookup += 1;
            tokio::time::sleep(self.config.lookup_retry_delay).await;
        };

        if !key.is_image() {
            self.finish_request(&item_id);
            return;
        }
        let Some(output) = self.output_path_for(&key) else {
            warn!(item = %item_id, %key, "unusable vault key for thumbnail output");
            self.apply_outcome(&key, ThumbStatus::Error, None).await;
            self.finish_request(&item_id);
            return;
        };

        // Idempotent re-evaluation: content already rendered for this key.
        if output.exists() {
            debug!(%key, "thumbnail already on disk");
            self.apply_outcome(&key, ThumbStatus::Ready, Some(output)).await;
            self.finish_request(&item_id);
            return;
        }

        let max_size = self.config.max_size;
        let generator = Arc::clone(&self.generator);
        let job_output = output.clone();
        let this = Arc::clone(&self);
        let job_key = key.clone();
        let job_item = item_id.clone();
        let admission = self.runner.submit(
            key.file_name(),
            JobPolicy::default(),
            move || {
                let generator = Arc::clone(&generator);
                let input = input_path.clone();
                let output = job_output.clone();
                async move { generator.generate(&input, &output, max_size).await }
            },
            move |outcome| async move {
                match outcome {
                    Ok(path) => {
                        this.apply_outcome(&job_key, ThumbStatus::Ready, Some(path)).await;
                    }
                    Err(error) => {
                        warn!(%job_key, %error, "thumbnail generation failed");
                        this.apply_outcome(&job_key, ThumbStatus::Error, None).await;
                    }
                }
                this.finish_request(&job_item);
            },
        );
        if !admission.is_queued() {
            // Another item with the same content is already generating; its
            // completion updates every item sharing the key.
            self.finish_request(&item_id);
        }
    }

    /// Write the settled status to every item sharing the content key, in
    /// the latest state, and persist each row.
    async fn apply_outcome(&self, key: &VaultKey, status: ThumbStatus, path: Option<PathBuf>) {
        if self.runner.is_disposed() {
            return;
        }
        let thumb_path = path.map(|p| p.to_string_lossy().to_string());
        let item_ids = self.state.snapshot().items_with_vault_key(key);
        for item_id in item_ids {
            let merged = self.state.update_item(&item_id, |current| {
                let mut next = current.clone();
                next.thumb_status = status;
                next.thumb_path = thumb_path.clone();
                next.touch(now_millis());
                next
            });
            if !merged {
                continue;
            }
            let update = MediaStateUpdate {
                item_id: item_id.clone(),
                width: None,
                height: None,
                thumb_status: Some(status),
                thumb_path: thumb_path.clone(),
            };
            if let Err(error) = self.store.update_media_state(&update).await {
                warn!(item = %item_id, %error, "failed to persist thumbnail state");
            }
        }
    }
}
