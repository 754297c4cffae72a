//! Import pipeline: a dropped file, URL payload, or clipboard blob becomes
//! a stored, deduplicated vault entry.
//!
//! A placeholder item is created and persisted before the job runs, so the
//! UI sees it immediately. The job stores the content through the vault
//! (which dedupes identical bytes before any copy), then merges the
//! finalized fields into the *latest* item state — the item may have been
//! edited while the import was suspended.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use curio_core::{
    extension_from_filename, is_image_ext, now_millis, CollectionId, Error, ImportFinalize,
    ImportStatus, Item, ItemId, ItemKind, ItemStore, MembershipInstance, PreviewReleaser, Result,
    StateCell, ThumbStatus, Vault,
};

use crate::config::ImportConfig;
use crate::queue::TaskQueue;
use crate::thumbnail::ThumbnailCoordinator;

/// Where the imported bytes come from.
#[derive(Debug, Clone)]
pub enum ImportSource {
    Path(PathBuf),
    Bytes {
        bytes: Vec<u8>,
        ext: Option<String>,
        filename: Option<String>,
    },
}

impl ImportSource {
    fn placeholder_filename(&self) -> String {
        match self {
            ImportSource::Path(path) => path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("imported.bin")
                .to_string(),
            ImportSource::Bytes { filename, .. } => filename
                .clone()
                .unwrap_or_else(|| "clipboard-image".to_string()),
        }
    }

    fn ext(&self) -> Option<String> {
        match self {
            ImportSource::Path(path) => path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(str::to_string),
            ImportSource::Bytes { ext, filename, .. } => ext
                .clone()
                .or_else(|| filename.as_deref().and_then(extension_from_filename)),
        }
    }

    fn kind(&self) -> ItemKind {
        match self.ext() {
            Some(ext) if is_image_ext(&ext) => ItemKind::Image,
            _ => ItemKind::File,
        }
    }
}

/// One import request handed over by the shell.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub source: ImportSource,
    /// Collection the new item joins, if any.
    pub collection: Option<CollectionId>,
    /// Transient preview the shell already shows for the placeholder.
    pub preview_url: Option<String>,
}

/// Coordinates the import pipeline over a dedupe-keyed queue.
pub struct ImportCoordinator {
    state: StateCell,
    store: Arc<dyn ItemStore>,
    vault: Arc<dyn Vault>,
    thumbnails: Arc<ThumbnailCoordinator>,
    previews: Option<Arc<dyn PreviewReleaser>>,
    queue: TaskQueue,
    config: ImportConfig,
}

impl ImportCoordinator {
    pub fn new(
        state: StateCell,
        store: Arc<dyn ItemStore>,
        vault: Arc<dyn Vault>,
        thumbnails: Arc<ThumbnailCoordinator>,
        config: ImportConfig,
    ) -> Self {
        let queue = TaskQueue::new(config.queue.clone());
        Self {
            state,
            store,
            vault,
            thumbnails,
            previews: None,
            queue,
            config,
        }
    }

    pub fn with_preview_releaser(mut self, previews: Arc<dyn PreviewReleaser>) -> Self {
        self.previews = Some(previews);
        self
    }

    /// Stop admitting imports. In-flight jobs run to completion but no
    /// longer touch shared state.
    pub fn dispose(&self) {
        self.queue.dispose();
    }

    /// Create and persist a placeholder item, then enqueue the import job.
    /// Returns the new item's id.
    pub async fn enqueue_import(&self, request: ImportRequest) -> Result<ItemId> {
        let now = now_millis();
        if let Some(collection) = &request.collection {
            if !self.state.snapshot().collections.contains_key(collection) {
                return Err(Error::CollectionNotFound(collection.to_string()));
            }
        }

        let filename = request.source.placeholder_filename();
        let mut staged = Item::placeholder(request.source.kind(), filename.clone(), filename);
        staged.preview_url = request.preview_url.clone();
        let item_id = staged.id.clone();
        let staged_title = staged.title.clone();

        self.state.update(|current| {
            if let Some(collection) = &request.collection {
                let sort_index = current.next_sort_index(collection);
                staged
                    .memberships
                    .insert(collection.clone(), MembershipInstance::new(sort_index, now));
                staged.primary_collection = Some(collection.clone());
            }
            current.with_item(staged.clone())
        });
        // Persisted before the job runs: visible to the UI across restarts.
        self.store.insert_item(&staged).await?;

        let job = self.import_job(item_id.clone(), staged_title, request.source);
        if !self.queue.enqueue(item_id.to_string(), Box::pin(job)).is_queued() {
            return Err(Error::Internal("import pipeline is disposed".to_string()));
        }
        debug!(item = %item_id, "import enqueued");
        Ok(item_id)
    }

    fn import_job(
        &self,
        item_id: ItemId,
        staged_title: String,
        source: ImportSource,
    ) -> impl std::future::Future<Output = ()> + Send + 'static {
        let state = self.state.clone();
        let store = Arc::clone(&self.store);
        let vault = Arc::clone(&self.vault);
        let thumbnails = Arc::clone(&self.thumbnails);
        let previews = self.previews.clone();
        let queue = self.queue.clone();
        let skip_max = self.config.thumb_skip_max;

        async move {
            let outcome = match source {
                ImportSource::Path(path) => vault.import_path(&path).await,
                ImportSource::Bytes {
                    bytes,
                    ext,
                    filename,
                } => {
                    vault
                        .import_bytes(&bytes, ext.as_deref(), filename.as_deref())
                        .await
                }
            };
            if queue.is_disposed() {
                debug!(item = %item_id, "import finished after dispose; result dropped");
                return;
            }

            match outcome {
                Ok(import) => {
                    let key = import.vault_key();
                    let thumb_status = if !key.is_image() {
                        ThumbStatus::Ready
                    } else {
                        match (import.width, import.height) {
                            (Some(w), Some(h)) if w.max(h) <= skip_max => ThumbStatus::Skipped,
                            (Some(_), Some(_)) => ThumbStatus::Pending,
                            _ => ThumbStatus::Error,
                        }
                    };
                    info!(
                        file = %import.original_filename,
                        hash_ms = import.metrics.hash_ms,
                        copy_ms = import.metrics.copy_ms,
                        metadata_ms = import.metrics.metadata_ms,
                        total_ms = import.metrics.total_ms,
                        deduped = import.metrics.deduped,
                        ?thumb_status,
                        "import pipeline finished"
                    );

                    let now = now_millis();
                    let mut finalize = None;
                    let merged = state.update_item(&item_id, |current| {
                        let mut next = current.clone();
                        next.vault_key = Some(key.clone());
                        next.vault_path = Some(import.vault_path.clone());
                        next.width = import.width;
                        next.height = import.height;
                        next.filename = import.original_filename.clone();
                        // Keep a title the user typed while the import ran.
                        if next.title == staged_title {
                            next.title = import.original_filename.clone();
                        }
                        next.import_status = ImportStatus::Ready;
                        next.thumb_status = thumb_status;
                        next.touch(now);
                        finalize = Some(ImportFinalize {
                            item_id: item_id.clone(),
                            title: next.title.clone(),
                            filename: next.filename.clone(),
                            vault_key: key.clone(),
                            vault_path: import.vault_path.clone(),
                            width: next.width,
                            height: next.height,
                            thumb_status,
                        });
                        next
                    });
                    if !merged {
                        debug!(item = %item_id, "item removed mid-import; finalize dropped");
                        return;
                    }
                    if let Some(finalize) = finalize {
                        if let Err(store_error) = store.finalize_import(&finalize).await {
                            error!(item = %item_id, %store_error, "failed to persist finalized import");
                        }
                    }
                    if thumb_status == ThumbStatus::Pending {
                        thumbnails.request(item_id.clone());
                    }
                }
                Err(import_error) => {
                    warn!(item = %item_id, %import_error, "import failed");
                    let mut preview = None;
                    state.update_item(&item_id, |current| {
                        let mut next = current.clone();
                        next.import_status = ImportStatus::Error;
                        if next.kind == ItemKind::Image {
                            next.thumb_status = ThumbStatus::Error;
                        }
                        preview = next.preview_url.take();
                        next.touch(now_millis());
                        next
                    });
                    if let (Some(previews), Some(preview_url)) = (&previews, preview) {
                        previews.release(&preview_url);
                    }
                    // Persist the error so a later retry does not assume
                    // the item is ready.
                    if let Err(store_error) = store.mark_import_error(&item_id).await {
                        error!(item = %item_id, %store_error, "failed to persist import error");
                    }
                }
            }
        }
    }
}
