//! Core data model, shared state, and collaborator seams for the curio
//! organizer. The job pipelines live in `curio-jobs`; the optimistic
//! mutation layer lives in `curio-undo`.

pub mod error;
pub mod model;
pub mod state;
pub mod test_support;
pub mod traits;

pub use error::{Error, Result};
pub use model::{
    extension_from_filename, is_image_ext, normalize_ext, now_millis, AppState, Collection,
    CollectionId, ImportStatus, InstanceId, Item, ItemId, ItemKind, MembershipInstance, MetaStatus,
    Tag, TagId, ThumbStatus, VaultKey,
};
pub use state::StateCell;
pub use traits::{
    BookmarkMetadata, BookmarkMetadataUpdate, DeleteOutcome, ImportFinalize, ItemStore,
    MediaStateUpdate, MembershipUpdate, MetadataFetcher, OrderUpdate, PreviewReleaser,
    ThumbnailGenerator, Vault, VaultCleanupEntry, VaultImport, VaultImportMetrics,
};
