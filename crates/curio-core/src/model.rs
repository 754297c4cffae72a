//! Data model for the organizer: items, collections, tags, and the
//! membership instances that tie items to collections.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current time as epoch milliseconds, the unit persisted on rows.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh random id.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_type!(
    /// Identity of an item.
    ItemId
);
id_type!(
    /// Identity of a collection.
    CollectionId
);
id_type!(
    /// Identity of a tag.
    TagId
);
id_type!(
    /// Identity of one membership instance, independent of the item and the
    /// collection it links.
    InstanceId
);

/// What kind of content an item holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Image,
    File,
    Bookmark,
}

/// Thumbnail lifecycle of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbStatus {
    #[default]
    Pending,
    Ready,
    Skipped,
    Error,
}

/// Import lifecycle of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Processing,
    Ready,
    Error,
}

/// Bookmark metadata lifecycle of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaStatus {
    #[default]
    Pending,
    Ready,
    Error,
}

/// Lowercased extension without a leading dot; empty input becomes `bin`.
pub fn normalize_ext(ext: &str) -> String {
    let trimmed = ext.trim().trim_start_matches('.').to_ascii_lowercase();
    if trimmed.is_empty() {
        "bin".to_string()
    } else {
        trimmed
    }
}

/// Extension taken from a filename, normalized; `None` when the name has no
/// usable extension.
pub fn extension_from_filename(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(stem, ext)| (stem, ext.trim()))
        .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
        .map(|(_, ext)| normalize_ext(ext))
}

/// Whether an extension names a raster format the thumbnail pipeline handles.
pub fn is_image_ext(ext: &str) -> bool {
    matches!(
        normalize_ext(ext).as_str(),
        "png" | "jpg" | "jpeg" | "webp" | "gif" | "bmp"
    )
}

/// Content identity of a vault entry. Two imports with identical bytes
/// resolve to the same key, and therefore the same stored path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VaultKey {
    pub sha256: String,
    pub ext: String,
}

impl VaultKey {
    pub fn new(sha256: impl Into<String>, ext: &str) -> Self {
        Self {
            sha256: sha256.into(),
            ext: normalize_ext(ext),
        }
    }

    /// Canonical `<sha256>.<ext>` rendering used for vault file names and
    /// as the thumbnail dedupe key.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.sha256, self.ext)
    }

    pub fn is_image(&self) -> bool {
        is_image_ext(&self.ext)
    }
}

impl fmt::Display for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sha256, self.ext)
    }
}

/// One item's presence in one collection. The instance id is stable across
/// moves; only duplication mints a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipInstance {
    pub id: InstanceId,
    pub sort_index: i64,
    pub created_at: i64,
    pub custom_title: Option<String>,
    pub custom_description: Option<String>,
}

impl MembershipInstance {
    pub fn new(sort_index: i64, created_at: i64) -> Self {
        Self {
            id: InstanceId::generate(),
            sort_index,
            created_at,
            custom_title: None,
            custom_description: None,
        }
    }
}

/// A stored piece of content: file, image, or bookmark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub kind: ItemKind,
    pub title: String,
    pub filename: String,
    pub vault_key: Option<VaultKey>,
    pub vault_path: Option<String>,
    /// Transient preview handed over by the shell while the import runs.
    pub preview_url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub thumb_status: ThumbStatus,
    pub thumb_path: Option<String>,
    pub import_status: ImportStatus,
    pub url: Option<String>,
    pub favicon_path: Option<String>,
    pub meta_status: MetaStatus,
    pub description: Option<String>,
    pub rating: i64,
    pub is_favorite: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub tag_ids: Vec<TagId>,
    /// Explicitly preferred or derived primary collection; if non-null it is
    /// always a key of `memberships`.
    pub primary_collection: Option<CollectionId>,
    pub memberships: BTreeMap<CollectionId, MembershipInstance>,
}

impl Item {
    /// A fresh placeholder in `Processing` state, visible to the UI before
    /// any background work has run.
    pub fn placeholder(kind: ItemKind, title: impl Into<String>, filename: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: ItemId::generate(),
            kind,
            title: title.into(),
            filename: filename.into(),
            vault_key: None,
            vault_path: None,
            preview_url: None,
            width: None,
            height: None,
            thumb_status: ThumbStatus::Pending,
            thumb_path: None,
            import_status: ImportStatus::Processing,
            url: None,
            favicon_path: None,
            meta_status: MetaStatus::Pending,
            description: None,
            rating: 0,
            is_favorite: false,
            created_at: now,
            updated_at: now,
            tag_ids: Vec::new(),
            primary_collection: None,
            memberships: BTreeMap::new(),
        }
    }

    pub fn has_membership(&self, collection: &CollectionId) -> bool {
        self.memberships.contains_key(collection)
    }

    /// Resolve the primary collection: the preferred id if it is a current
    /// member, else the existing primary if still a member, else the member
    /// with the lowest `(sort_index, created_at, instance id)`, else `None`.
    pub fn resolve_primary(&self, preferred: Option<&CollectionId>) -> Option<CollectionId> {
        if let Some(preferred) = preferred {
            if self.has_membership(preferred) {
                return Some(preferred.clone());
            }
        }
        if let Some(current) = &self.primary_collection {
            if self.has_membership(current) {
                return Some(current.clone());
            }
        }
        self.memberships
            .iter()
            .min_by_key(|(_, instance)| (instance.sort_index, instance.created_at, instance.id.clone()))
            .map(|(collection, _)| collection.clone())
    }

    /// Re-derive the primary collection and bump the updated timestamp.
    pub fn sync_primary(&mut self, preferred: Option<&CollectionId>, now: i64) {
        self.primary_collection = self.resolve_primary(preferred);
        self.touch(now);
    }

    pub fn touch(&mut self, now: i64) {
        self.updated_at = now;
    }
}

/// A user-defined grouping of items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,
    pub parent_id: Option<CollectionId>,
    pub name: String,
    pub description: Option<String>,
    pub icon: String,
    pub color: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Collection {
    pub fn new(id: impl Into<CollectionId>, name: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            parent_id: None,
            name: name.into(),
            description: None,
            icon: "folder".to_string(),
            color: "#60a5fa".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A user-defined label applied to items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    pub color: String,
    pub sort_index: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// The live in-memory world: every coordinator reads and replaces this as a
/// whole. Mutations build a new state; they never edit in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppState {
    pub collections: HashMap<CollectionId, Collection>,
    pub tags: HashMap<TagId, Tag>,
    pub items: HashMap<ItemId, Item>,
}

impl AppState {
    pub fn item(&self, id: &ItemId) -> Option<&Item> {
        self.items.get(id)
    }

    /// New state with `item` inserted or replaced.
    pub fn with_item(&self, item: Item) -> AppState {
        let mut next = self.clone();
        next.items.insert(item.id.clone(), item);
        next
    }

    /// New state with the given items removed.
    pub fn without_items(&self, ids: &[ItemId]) -> AppState {
        let mut next = self.clone();
        for id in ids {
            next.items.remove(id);
        }
        next
    }

    /// Next free sort index in a collection: `max + 1`, or `0` when empty.
    pub fn next_sort_index(&self, collection: &CollectionId) -> i64 {
        self.items
            .values()
            .filter_map(|item| item.memberships.get(collection))
            .map(|instance| instance.sort_index)
            .max()
            .map(|max| max + 1)
            .unwrap_or(0)
    }

    /// Ids of every item whose content resolves to `key`.
    pub fn items_with_vault_key(&self, key: &VaultKey) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self
            .items
            .values()
            .filter(|item| item.vault_key.as_ref() == Some(key))
            .map(|item| item.id.clone())
            .collect();
        ids.sort();
        ids
    }
}
