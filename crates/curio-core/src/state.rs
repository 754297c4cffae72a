//! Shared state cell with single-writer discipline.
//!
//! Every coordinator and mutation service reads the live item collection
//! through a [`StateCell`]. Readers take a cheap [`StateCell::snapshot`];
//! writers rebuild the whole state inside [`StateCell::update`] and swap it
//! in. A snapshot taken before a suspension point may be stale by the time
//! the suspended work resumes, so results are always merged against a fresh
//! snapshot, never written through a captured one.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::model::{AppState, Item, ItemId};

/// Owned cell holding the live [`AppState`].
#[derive(Clone)]
pub struct StateCell {
    inner: Arc<RwLock<Arc<AppState>>>,
}

impl StateCell {
    pub fn new(initial: AppState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    /// The current state. Cheap (`Arc` clone); the returned snapshot never
    /// changes under the caller.
    pub fn snapshot(&self) -> Arc<AppState> {
        self.inner.read().clone()
    }

    /// Replace the state wholesale, e.g. with a canonical reload from the
    /// persistence layer.
    pub fn replace(&self, next: AppState) {
        debug!(items = next.items.len(), "state replaced");
        *self.inner.write() = Arc::new(next);
    }

    /// Rebuild the state from the current one and swap it in. The write
    /// lock is held across the rebuild, which keeps writers serialized; `f`
    /// must not block or suspend.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&AppState) -> AppState,
    {
        let mut guard = self.inner.write();
        let next = f(guard.as_ref());
        *guard = Arc::new(next);
    }

    /// Merge a change into the *latest* version of one item. Returns false
    /// if the item no longer exists, in which case nothing is written.
    pub fn update_item<F>(&self, id: &ItemId, f: F) -> bool
    where
        F: FnOnce(&Item) -> Item,
    {
        let mut guard = self.inner.write();
        let Some(current) = guard.item(id) else {
            return false;
        };
        let next_item = f(current);
        let next = guard.with_item(next_item);
        *guard = Arc::new(next);
        true
    }
}
