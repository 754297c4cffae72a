//! Item deletion staged through the undo window.
//!
//! Items leave the in-memory state immediately; the persistence delete (and
//! its vault cleanup) only runs at commit time. Undo therefore just
//! restores the snapshots — nothing was deleted from the backend yet.
//! Transient previews are released in the finalizer, once the items are
//! permanently gone.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info};

use curio_core::{Item, ItemId, ItemStore, PreviewReleaser, Result, StateCell};

use crate::transaction::{TransactionId, TransactionManager, TransactionSpec};

/// Outcome of a delete request.
#[derive(Debug, Clone)]
pub struct DeletionOutcome {
    /// Staged transaction, or `None` when nothing matched.
    pub transaction: Option<TransactionId>,
    pub deleted: usize,
    pub message: String,
}

/// Deletes items through [`TransactionManager`].
pub struct ItemDeletionService {
    state: StateCell,
    store: Arc<dyn ItemStore>,
    transactions: TransactionManager,
    previews: Option<Arc<dyn PreviewReleaser>>,
}

impl ItemDeletionService {
    pub fn new(state: StateCell, store: Arc<dyn ItemStore>, transactions: TransactionManager) -> Self {
        Self {
            state,
            store,
            transactions,
            previews: None,
        }
    }

    pub fn with_preview_releaser(mut self, previews: Arc<dyn PreviewReleaser>) -> Self {
        self.previews = Some(previews);
        self
    }

    /// Remove the items optimistically and stage the persistence delete.
    pub async fn delete_items(&self, item_ids: Vec<ItemId>) -> Result<DeletionOutcome> {
        let mut seen = HashSet::new();
        let item_ids: Vec<ItemId> = item_ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        // Settle any pending window before snapshotting, so its commit-time
        // reload cannot land on top of this deletion's optimistic apply.
        if let Err(previous_error) = self.transactions.commit().await {
            error!(%previous_error, "previous transaction failed while being superseded");
        }

        let snapshot = self.state.snapshot();
        let snapshots: Vec<Item> = item_ids
            .iter()
            .filter_map(|id| snapshot.item(id).cloned())
            .collect();
        if snapshots.is_empty() {
            debug!("delete request matched no items");
            return Ok(DeletionOutcome {
                transaction: None,
                deleted: 0,
                message: message_for(0),
            });
        }

        let affected_ids: Vec<ItemId> = snapshots.iter().map(|item| item.id.clone()).collect();
        let preview_urls: Vec<String> = snapshots
            .iter()
            .filter_map(|item| item.preview_url.clone())
            .collect();

        self.state.update(|current| current.without_items(&affected_ids));

        let message = message_for(snapshots.len());
        let commit = {
            let store = Arc::clone(&self.store);
            let item_ids = affected_ids.clone();
            move || async move {
                let outcome = store.delete_items_with_cleanup(&item_ids).await?;
                for entry in &outcome.cleanup {
                    if entry.deleted_from_disk {
                        debug!(key = %entry.vault_key, path = %entry.vault_path, "vault file removed");
                    } else {
                        debug!(key = %entry.vault_key, "vault file retained (still referenced)");
                    }
                }
                info!(deleted = outcome.deleted_rows, "items deleted");
                Ok(())
            }
        };
        let undo = {
            let state = self.state.clone();
            move || async move {
                state.update(|current| {
                    let mut next = current.clone();
                    for item in &snapshots {
                        next.items.insert(item.id.clone(), item.clone());
                    }
                    next
                });
                info!("deletion undone");
            }
        };
        let finalize = {
            let previews = self.previews.clone();
            move || async move {
                if let Some(previews) = previews {
                    for url in &preview_urls {
                        previews.release(url);
                    }
                }
            }
        };

        let transaction = self
            .transactions
            .stage(
                TransactionSpec::new(message.clone(), commit, undo).with_finalize(finalize),
            )
            .await;
        info!(%message, "deletion staged");
        Ok(DeletionOutcome {
            transaction: Some(transaction),
            deleted: affected_ids.len(),
            message,
        })
    }
}

fn message_for(count: usize) -> String {
    if count == 1 {
        "Deleted 1 item".to_string()
    } else {
        format!("Deleted {count} items")
    }
}
