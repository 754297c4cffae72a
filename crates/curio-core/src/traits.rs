//! Collaborator interfaces consumed by the job and mutation layers.
//!
//! The persistence store, the content-addressable vault, the thumbnail
//! generator, and the metadata fetcher are all owned by the shell and
//! injected as `Arc<dyn Trait>`. This crate only defines the seams.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Result;
use crate::model::{AppState, CollectionId, Item, ItemId, MetaStatus, ThumbStatus, VaultKey};

/// Stage timings reported by a vault import.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VaultImportMetrics {
    pub hash_ms: u64,
    pub copy_ms: u64,
    pub metadata_ms: u64,
    pub total_ms: u64,
    /// True when an entry with the same content already existed and no copy
    /// was performed.
    pub deduped: bool,
}

/// Outcome of storing bytes or a file in the vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultImport {
    pub sha256: String,
    pub ext: String,
    pub vault_path: String,
    pub size: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub original_filename: String,
    pub metrics: VaultImportMetrics,
}

impl VaultImport {
    pub fn vault_key(&self) -> VaultKey {
        VaultKey::new(self.sha256.clone(), &self.ext)
    }
}

/// Content-addressable storage: identical bytes hash to the same key and
/// resolve to the same stored path, deduplicated before any copy occurs.
#[async_trait]
pub trait Vault: Send + Sync {
    async fn import_path(&self, path: &Path) -> Result<VaultImport>;

    async fn import_bytes(
        &self,
        bytes: &[u8],
        requested_ext: Option<&str>,
        original_filename: Option<&str>,
    ) -> Result<VaultImport>;
}

/// Long-running native thumbnail encoder. Expected to be idempotent: an
/// existing output file short-circuits the call.
#[async_trait]
pub trait ThumbnailGenerator: Send + Sync {
    async fn generate(&self, input: &Path, output: &Path, max_size: u32) -> Result<PathBuf>;
}

/// Metadata scraped for a bookmark URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkMetadata {
    pub final_url: String,
    pub title: Option<String>,
    pub favicon_path: Option<String>,
}

#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<BookmarkMetadata>;
}

/// Shell hook for dropping transient preview resources (e.g. object URLs)
/// once the item they belong to failed to import or was permanently removed.
pub trait PreviewReleaser: Send + Sync {
    fn release(&self, preview_url: &str);
}

/// Width/height/thumbnail fields written back after media processing.
#[derive(Debug, Clone)]
pub struct MediaStateUpdate {
    pub item_id: ItemId,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub thumb_status: Option<ThumbStatus>,
    pub thumb_path: Option<String>,
}

/// Bookmark metadata fields written back after a fetch settles.
#[derive(Debug, Clone)]
pub struct BookmarkMetadataUpdate {
    pub item_id: ItemId,
    pub url: Option<String>,
    pub title: Option<String>,
    pub favicon_path: Option<String>,
    pub meta_status: MetaStatus,
}

/// Fields written when a placeholder item is promoted to `Ready`.
#[derive(Debug, Clone)]
pub struct ImportFinalize {
    pub item_id: ItemId,
    pub title: String,
    pub filename: String,
    pub vault_key: VaultKey,
    pub vault_path: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub thumb_status: ThumbStatus,
}

/// Row counts reported by a membership mutation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MembershipUpdate {
    pub created_rows: usize,
    pub updated_rows: usize,
    pub deleted_rows: usize,
    pub skipped_rows: usize,
    pub updated_at: i64,
}

/// Row counts reported by a reorder.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub updated_rows: usize,
    pub skipped_rows: usize,
    pub updated_at: i64,
}

/// Per-content-key report of what a delete actually removed from disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultCleanupEntry {
    pub vault_key: VaultKey,
    pub vault_path: String,
    pub deleted_from_disk: bool,
}

/// Outcome of deleting items together with their vault cleanup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub deleted_rows: usize,
    pub cleanup: Vec<VaultCleanupEntry>,
}

/// The persistence layer. Implementations own schema and transactions; the
/// membership primitives are also responsible for primary-collection and
/// ordering side effects, which is why commits reconcile through
/// [`ItemStore::load_full_state`] instead of predicting them locally.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn insert_item(&self, item: &Item) -> Result<()>;

    async fn insert_items(&self, items: &[Item]) -> Result<()>;

    async fn update_media_state(&self, update: &MediaStateUpdate) -> Result<i64>;

    async fn update_bookmark_metadata(&self, update: &BookmarkMetadataUpdate) -> Result<i64>;

    async fn finalize_import(&self, finalize: &ImportFinalize) -> Result<i64>;

    async fn mark_import_error(&self, item_id: &ItemId) -> Result<i64>;

    /// Move items between collections; `source = None` resolves the source
    /// membership per item, `target = None` removes the membership.
    async fn move_memberships(
        &self,
        item_ids: &[ItemId],
        source: Option<&CollectionId>,
        target: Option<&CollectionId>,
    ) -> Result<MembershipUpdate>;

    async fn add_to_collection(
        &self,
        item_ids: &[ItemId],
        collection: &CollectionId,
    ) -> Result<MembershipUpdate>;

    async fn reorder_collection(
        &self,
        collection: &CollectionId,
        ordered_item_ids: &[ItemId],
    ) -> Result<OrderUpdate>;

    async fn delete_items_with_cleanup(&self, item_ids: &[ItemId]) -> Result<DeleteOutcome>;

    /// Authoritative items/collections/tags, used to reconcile the shared
    /// state after every membership transaction commit.
    async fn load_full_state(&self) -> Result<AppState>;
}
