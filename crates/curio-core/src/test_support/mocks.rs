//! Deterministic in-memory collaborators for exercising the job and
//! mutation layers without a real backend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{Error, Result};
use crate::model::{
    is_image_ext, normalize_ext, now_millis, AppState, CollectionId, ImportStatus, Item, ItemId,
    ItemKind, MembershipInstance, ThumbStatus,
};
use crate::traits::{
    BookmarkMetadata, BookmarkMetadataUpdate, DeleteOutcome, ImportFinalize, ItemStore,
    MediaStateUpdate, MembershipUpdate, MetadataFetcher, OrderUpdate, PreviewReleaser,
    ThumbnailGenerator, Vault, VaultCleanupEntry, VaultImport, VaultImportMetrics,
};

/// Every call an in-memory store has served, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    InsertItem(ItemId),
    InsertItems(usize),
    UpdateMediaState(ItemId),
    UpdateBookmarkMetadata(ItemId),
    FinalizeImport(ItemId),
    MarkImportError(ItemId),
    MoveMemberships {
        item_ids: Vec<ItemId>,
        source: Option<CollectionId>,
        target: Option<CollectionId>,
    },
    AddToCollection {
        item_ids: Vec<ItemId>,
        collection: CollectionId,
    },
    ReorderCollection(CollectionId),
    DeleteItems(Vec<ItemId>),
    LoadFullState,
}

/// In-memory [`ItemStore`] that mirrors the backend's membership semantics
/// (fallback source resolution, collapse, primary-collection sync) so
/// `load_full_state` reconciliation is meaningful in tests.
#[derive(Default)]
pub struct MockItemStore {
    state: Mutex<AppState>,
    calls: Mutex<Vec<StoreCall>>,
    fail_next: Mutex<Option<String>>,
}

impl MockItemStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_state(state: AppState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            ..Self::default()
        })
    }

    /// Make the next store call fail with a `Store` error.
    pub fn fail_next(&self, message: &str) {
        *self.fail_next.lock() = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    /// Clone of the backing state.
    pub fn backing_state(&self) -> AppState {
        self.state.lock().clone()
    }

    fn record(&self, call: StoreCall) -> Result<()> {
        self.calls.lock().push(call);
        match self.fail_next.lock().take() {
            Some(message) => Err(Error::Store(message)),
            None => Ok(()),
        }
    }

    fn resolve_source(
        state: &AppState,
        item_id: &ItemId,
        source: Option<&CollectionId>,
    ) -> Option<CollectionId> {
        let item = state.item(item_id)?;
        if let Some(source) = source {
            return item.has_membership(source).then(|| source.clone());
        }
        item.resolve_primary(None)
    }
}

#[async_trait]
impl ItemStore for MockItemStore {
    async fn insert_item(&self, item: &Item) -> Result<()> {
        self.record(StoreCall::InsertItem(item.id.clone()))?;
        self.state.lock().items.insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn insert_items(&self, items: &[Item]) -> Result<()> {
        self.record(StoreCall::InsertItems(items.len()))?;
        let mut state = self.state.lock();
        for item in items {
            state.items.insert(item.id.clone(), item.clone());
        }
        Ok(())
    }

    async fn update_media_state(&self, update: &MediaStateUpdate) -> Result<i64> {
        self.record(StoreCall::UpdateMediaState(update.item_id.clone()))?;
        let now = now_millis();
        let mut state = self.state.lock();
        if let Some(item) = state.items.get_mut(&update.item_id) {
            if update.width.is_some() {
                item.width = update.width;
            }
            if update.height.is_some() {
                item.height = update.height;
            }
            if let Some(status) = update.thumb_status {
                item.thumb_status = status;
            }
            if update.thumb_path.is_some() {
                item.thumb_path = update.thumb_path.clone();
            }
            item.touch(now);
        }
        Ok(now)
    }

    async fn update_bookmark_metadata(&self, update: &BookmarkMetadataUpdate) -> Result<i64> {
        self.record(StoreCall::UpdateBookmarkMetadata(update.item_id.clone()))?;
        let now = now_millis();
        let mut state = self.state.lock();
        if let Some(item) = state.items.get_mut(&update.item_id) {
            if update.url.is_some() {
                item.url = update.url.clone();
            }
            if update.title.is_some() {
                item.title = update.title.clone().unwrap_or_default();
            }
            if update.favicon_path.is_some() {
                item.favicon_path = update.favicon_path.clone();
            }
            item.meta_status = update.meta_status;
            item.touch(now);
        }
        Ok(now)
    }

    async fn finalize_import(&self, finalize: &ImportFinalize) -> Result<i64> {
        self.record(StoreCall::FinalizeImport(finalize.item_id.clone()))?;
        let now = now_millis();
        let mut state = self.state.lock();
        if let Some(item) = state.items.get_mut(&finalize.item_id) {
            item.title = finalize.title.clone();
            item.filename = finalize.filename.clone();
            item.vault_key = Some(finalize.vault_key.clone());
            item.vault_path = Some(finalize.vault_path.clone());
            item.width = finalize.width;
            item.height = finalize.height;
            item.thumb_status = finalize.thumb_status;
            item.import_status = ImportStatus::Ready;
            item.touch(now);
        }
        Ok(now)
    }

    async fn mark_import_error(&self, item_id: &ItemId) -> Result<i64> {
        self.record(StoreCall::MarkImportError(item_id.clone()))?;
        let now = now_millis();
        let mut state = self.state.lock();
        if let Some(item) = state.items.get_mut(item_id) {
            item.import_status = ImportStatus::Error;
            if item.kind == ItemKind::Image {
                item.thumb_status = ThumbStatus::Error;
            }
            item.touch(now);
        }
        Ok(now)
    }

    async fn move_memberships(
        &self,
        item_ids: &[ItemId],
        source: Option<&CollectionId>,
        target: Option<&CollectionId>,
    ) -> Result<MembershipUpdate> {
        self.record(StoreCall::MoveMemberships {
            item_ids: item_ids.to_vec(),
            source: source.cloned(),
            target: target.cloned(),
        })?;
        let now = now_millis();
        let mut update = MembershipUpdate {
            updated_at: now,
            ..MembershipUpdate::default()
        };
        let mut state = self.state.lock();
        for item_id in item_ids {
            let resolved = Self::resolve_source(&state, item_id, source);
            let has_target = target
                .map(|target| {
                    state
                        .item(item_id)
                        .map(|item| item.has_membership(target))
                        .unwrap_or(false)
                })
                .unwrap_or(false);
            let next_sort = target.map(|target| state.next_sort_index(target));
            let Some(item) = state.items.get_mut(item_id) else {
                update.skipped_rows += 1;
                continue;
            };
            match (resolved, target) {
                (None, None) => {
                    update.skipped_rows += 1;
                }
                (None, Some(target)) => {
                    if has_target {
                        update.skipped_rows += 1;
                    } else {
                        item.memberships.insert(
                            target.clone(),
                            MembershipInstance::new(next_sort.unwrap_or(0), now),
                        );
                        update.created_rows += 1;
                    }
                    item.sync_primary(Some(target), now);
                }
                (Some(current), Some(target)) => {
                    if &current == target {
                        update.skipped_rows += 1;
                    } else if has_target {
                        item.memberships.remove(&current);
                        update.deleted_rows += 1;
                    } else if let Some(mut instance) = item.memberships.remove(&current) {
                        instance.sort_index = next_sort.unwrap_or(0);
                        item.memberships.insert(target.clone(), instance);
                        update.updated_rows += 1;
                    } else {
                        update.skipped_rows += 1;
                    }
                    item.sync_primary(Some(target), now);
                }
                (Some(current), None) => {
                    item.memberships.remove(&current);
                    update.deleted_rows += 1;
                    item.sync_primary(None, now);
                }
            }
        }
        Ok(update)
    }

    async fn add_to_collection(
        &self,
        item_ids: &[ItemId],
        collection: &CollectionId,
    ) -> Result<MembershipUpdate> {
        self.record(StoreCall::AddToCollection {
            item_ids: item_ids.to_vec(),
            collection: collection.clone(),
        })?;
        let now = now_millis();
        let mut update = MembershipUpdate {
            updated_at: now,
            ..MembershipUpdate::default()
        };
        let mut state = self.state.lock();
        for item_id in item_ids {
            let next_sort = state.next_sort_index(collection);
            let Some(item) = state.items.get_mut(item_id) else {
                update.skipped_rows += 1;
                continue;
            };
            if item.has_membership(collection) {
                update.skipped_rows += 1;
            } else {
                item.memberships
                    .insert(collection.clone(), MembershipInstance::new(next_sort, now));
                update.created_rows += 1;
            }
            item.sync_primary(None, now);
        }
        Ok(update)
    }

    async fn reorder_collection(
        &self,
        collection: &CollectionId,
        ordered_item_ids: &[ItemId],
    ) -> Result<OrderUpdate> {
        self.record(StoreCall::ReorderCollection(collection.clone()))?;
        let now = now_millis();
        let mut update = OrderUpdate {
            updated_at: now,
            ..OrderUpdate::default()
        };
        let mut state = self.state.lock();
        for (index, item_id) in ordered_item_ids.iter().enumerate() {
            match state
                .items
                .get_mut(item_id)
                .and_then(|item| item.memberships.get_mut(collection))
            {
                Some(instance) => {
                    instance.sort_index = index as i64;
                    update.updated_rows += 1;
                }
                None => update.skipped_rows += 1,
            }
        }
        Ok(update)
    }

    async fn delete_items_with_cleanup(&self, item_ids: &[ItemId]) -> Result<DeleteOutcome> {
        self.record(StoreCall::DeleteItems(item_ids.to_vec()))?;
        let mut state = self.state.lock();
        let mut outcome = DeleteOutcome::default();
        let mut removed = Vec::new();
        for item_id in item_ids {
            if let Some(item) = state.items.remove(item_id) {
                outcome.deleted_rows += 1;
                removed.push(item);
            }
        }
        for item in removed {
            let (Some(key), Some(path)) = (item.vault_key, item.vault_path) else {
                continue;
            };
            let still_referenced = !state.items_with_vault_key(&key).is_empty();
            outcome.cleanup.push(VaultCleanupEntry {
                vault_key: key,
                vault_path: path,
                deleted_from_disk: !still_referenced,
            });
        }
        Ok(outcome)
    }

    async fn load_full_state(&self) -> Result<AppState> {
        self.record(StoreCall::LoadFullState)?;
        Ok(self.state.lock().clone())
    }
}

struct StoredEntry {
    path: String,
    size: u64,
}

/// Content-addressable in-memory [`Vault`]: identical bytes hash to the
/// same stored path, and the second import reports `deduped`.
pub struct MockVault {
    root: PathBuf,
    entries: Mutex<HashMap<String, StoredEntry>>,
    default_dimensions: Mutex<Option<(u32, u32)>>,
    delay: Mutex<Option<Duration>>,
    failure: Mutex<Option<String>>,
    imports: AtomicUsize,
}

impl MockVault {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            root: PathBuf::from("/vault"),
            entries: Mutex::new(HashMap::new()),
            default_dimensions: Mutex::new(Some((1920, 1080))),
            delay: Mutex::new(None),
            failure: Mutex::new(None),
            imports: AtomicUsize::new(0),
        })
    }

    /// Dimensions reported for image imports.
    pub fn set_default_dimensions(&self, dimensions: Option<(u32, u32)>) {
        *self.default_dimensions.lock() = dimensions;
    }

    /// Hold every import for `delay` before resolving.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Make every import fail with a `Vault` error.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock() = Some(message.to_string());
    }

    pub fn import_count(&self) -> usize {
        self.imports.load(Ordering::SeqCst)
    }

    /// Distinct stored paths, sorted.
    pub fn stored_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .entries
            .lock()
            .values()
            .map(|entry| entry.path.clone())
            .collect();
        paths.sort();
        paths
    }

    async fn import(&self, bytes: &[u8], ext: &str, filename: &str) -> Result<VaultImport> {
        self.imports.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.failure.lock().clone() {
            return Err(Error::Vault(message));
        }

        let sha256 = format!("{:x}", Sha256::digest(bytes));
        let ext = normalize_ext(ext);
        let key = format!("{sha256}.{ext}");
        let mut entries = self.entries.lock();
        let (path, size, deduped) = match entries.get(&key) {
            Some(existing) => (existing.path.clone(), existing.size, true),
            None => {
                let path = self.root.join(&key).to_string_lossy().to_string();
                entries.insert(
                    key,
                    StoredEntry {
                        path: path.clone(),
                        size: bytes.len() as u64,
                    },
                );
                (path, bytes.len() as u64, false)
            }
        };

        let dimensions = if is_image_ext(&ext) {
            *self.default_dimensions.lock()
        } else {
            None
        };
        Ok(VaultImport {
            sha256,
            ext,
            vault_path: path,
            size,
            width: dimensions.map(|(w, _)| w),
            height: dimensions.map(|(_, h)| h),
            original_filename: filename.to_string(),
            metrics: VaultImportMetrics {
                deduped,
                ..VaultImportMetrics::default()
            },
        })
    }
}

#[async_trait]
impl Vault for MockVault {
    async fn import_path(&self, path: &Path) -> Result<VaultImport> {
        let bytes = std::fs::read(path)
            .map_err(|err| Error::Vault(format!("failed to read {}: {err}", path.display())))?;
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("bin")
            .to_string();
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("imported.bin")
            .to_string();
        self.import(&bytes, &ext, &filename).await
    }

    async fn import_bytes(
        &self,
        bytes: &[u8],
        requested_ext: Option<&str>,
        original_filename: Option<&str>,
    ) -> Result<VaultImport> {
        let ext = requested_ext
            .map(str::to_string)
            .or_else(|| {
                original_filename
                    .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext.to_string()))
            })
            .unwrap_or_else(|| "bin".to_string());
        let filename = original_filename.unwrap_or("clipboard-image");
        self.import(bytes, &ext, filename).await
    }
}

/// How a mock thumbnail generator responds.
#[derive(Debug, Clone)]
pub enum ThumbBehavior {
    /// Write a stub output file and succeed.
    Succeed,
    /// Fail this many calls, then succeed.
    FailTimes(u32),
    /// Fail every call.
    AlwaysFail,
    /// Never resolve.
    Hang,
}

pub struct MockThumbnailGenerator {
    behavior: Mutex<ThumbBehavior>,
    calls: AtomicUsize,
}

impl MockThumbnailGenerator {
    pub fn new(behavior: ThumbBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ThumbnailGenerator for MockThumbnailGenerator {
    async fn generate(&self, _input: &Path, output: &Path, _max_size: u32) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = {
            let mut behavior = self.behavior.lock();
            match *behavior {
                ThumbBehavior::FailTimes(0) => ThumbBehavior::Succeed,
                ThumbBehavior::FailTimes(n) => {
                    *behavior = ThumbBehavior::FailTimes(n - 1);
                    ThumbBehavior::AlwaysFail
                }
                ref other => other.clone(),
            }
        };
        match behavior {
            ThumbBehavior::Succeed | ThumbBehavior::FailTimes(_) => {
                if let Some(parent) = output.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|err| Error::Transport(format!("mkdir failed: {err}")))?;
                }
                std::fs::write(output, b"thumb")
                    .map_err(|err| Error::Transport(format!("write failed: {err}")))?;
                Ok(output.to_path_buf())
            }
            ThumbBehavior::AlwaysFail => Err(Error::Transport("thumbnail encoder crashed".into())),
            ThumbBehavior::Hang => std::future::pending().await,
        }
    }
}

/// How a mock metadata fetcher responds.
#[derive(Clone)]
pub enum FetchBehavior {
    Respond(BookmarkMetadata),
    Fail(String),
    Hang,
}

pub struct MockMetadataFetcher {
    behavior: Mutex<FetchBehavior>,
    calls: AtomicUsize,
}

impl MockMetadataFetcher {
    pub fn respond_with(metadata: BookmarkMetadata) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(FetchBehavior::Respond(metadata)),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn fail_with(message: &str) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(FetchBehavior::Fail(message.to_string())),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn hanging() -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(FetchBehavior::Hang),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataFetcher for MockMetadataFetcher {
    async fn fetch(&self, _url: &Url) -> Result<BookmarkMetadata> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.lock().clone();
        match behavior {
            FetchBehavior::Respond(metadata) => Ok(metadata),
            FetchBehavior::Fail(message) => Err(Error::Transport(message)),
            FetchBehavior::Hang => std::future::pending().await,
        }
    }
}

/// Records every released preview URL.
#[derive(Default)]
pub struct RecordingPreviewReleaser {
    released: Mutex<Vec<String>>,
}

impl RecordingPreviewReleaser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().clone()
    }
}

impl PreviewReleaser for RecordingPreviewReleaser {
    fn release(&self, preview_url: &str) {
        self.released.lock().push(preview_url.to_string());
    }
}
