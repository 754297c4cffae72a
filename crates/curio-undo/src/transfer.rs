//! Move, duplicate, and remove items across collections, with per-item
//! inverse operations for the undo window.
//!
//! The membership change is applied to in-memory state immediately, then
//! staged: `commit` runs the persistence membership primitive and reloads
//! canonical state (the backend owns primary-collection and ordering side
//! effects), `undo` restores the pre-mutation snapshots and issues the
//! inverse operation per item so the backend does not silently diverge from
//! the reverted UI.
//!
//! A move whose target already holds the item collapses to a pure removal
//! from the source. Undoing a collapse re-adds the source membership but
//! does not recreate the duplicate link — the collapsed instance's metadata
//! is discarded at collapse time and cannot be restored.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, error, info};

use curio_core::{
    now_millis, AppState, CollectionId, Error, Item, ItemId, ItemStore, MembershipInstance,
    Result, StateCell,
};

use crate::transaction::{TransactionId, TransactionManager, TransactionSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferMode {
    Move,
    Duplicate,
    Remove,
}

/// What the change amounts to for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    /// Fresh membership appended to the target.
    AddToTarget,
    /// The same instance relocates from source to target.
    Relocate { source: CollectionId },
    /// Target already holds the item: the source membership is deleted and
    /// the target's existing membership is untouched.
    Collapse { source: CollectionId },
    /// Membership deleted, no target.
    RemoveFromSource { source: CollectionId },
    /// No membership change; the primary collection is still re-synced.
    SyncOnly,
}

/// Inverse persistence operation, derived from which of
/// `{had source, had target}` held before the change.
#[derive(Debug, Clone, PartialEq, Eq)]
enum InverseOp {
    RemoveFromTarget,
    AddBackToSource { source: CollectionId },
    MoveBackToSource { source: CollectionId },
}

struct ItemPlan {
    item_id: ItemId,
    action: Action,
    inverse: Option<InverseOp>,
}

impl ItemPlan {
    fn mutates(&self) -> bool {
        !matches!(self.action, Action::SyncOnly)
    }
}

/// Outcome of a transfer request.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    /// Staged transaction, or `None` when the request folded to a no-op.
    pub transaction: Option<TransactionId>,
    pub affected: usize,
    pub skipped: usize,
    pub message: String,
}

/// Membership move/duplicate/remove built on [`TransactionManager`].
pub struct MembershipTransferService {
    state: StateCell,
    store: Arc<dyn ItemStore>,
    transactions: TransactionManager,
}

impl MembershipTransferService {
    pub fn new(state: StateCell, store: Arc<dyn ItemStore>, transactions: TransactionManager) -> Self {
        Self {
            state,
            store,
            transactions,
        }
    }

    /// Move items out of `source` (resolved per item when `None`) into
    /// `target`. Degenerates to a pure removal from the source when the
    /// target already holds an item.
    pub async fn move_items(
        &self,
        item_ids: Vec<ItemId>,
        source: Option<CollectionId>,
        target: CollectionId,
    ) -> Result<TransferOutcome> {
        self.transfer(item_ids, source, Some(target), TransferMode::Move)
            .await
    }

    /// Add items to `target` without touching their other memberships.
    pub async fn duplicate_items(
        &self,
        item_ids: Vec<ItemId>,
        target: CollectionId,
    ) -> Result<TransferOutcome> {
        self.transfer(item_ids, None, Some(target), TransferMode::Duplicate)
            .await
    }

    /// Remove items from `source` (resolved per item when `None`).
    pub async fn remove_items(
        &self,
        item_ids: Vec<ItemId>,
        source: Option<CollectionId>,
    ) -> Result<TransferOutcome> {
        self.transfer(item_ids, source, None, TransferMode::Remove)
            .await
    }

    async fn transfer(
        &self,
        item_ids: Vec<ItemId>,
        source: Option<CollectionId>,
        target: Option<CollectionId>,
        mode: TransferMode,
    ) -> Result<TransferOutcome> {
        let item_ids = dedupe_ids(item_ids);
        // Settle any pending window first: its commit reloads canonical
        // state, which must not land on top of this transfer's optimistic
        // apply. A failed commit has already been rolled back by the
        // manager.
        if let Err(previous_error) = self.transactions.commit().await {
            error!(%previous_error, "previous transaction failed while being superseded");
        }
        let snapshot = self.state.snapshot();

        if let Some(target) = &target {
            if !snapshot.collections.contains_key(target) {
                return Err(Error::CollectionNotFound(target.to_string()));
            }
        }
        if let Some(source) = &source {
            if !snapshot.collections.contains_key(source) {
                return Err(Error::CollectionNotFound(source.to_string()));
            }
        }
        if source.is_some() && source == target {
            // Intentional fold, not an error.
            debug!("source equals target; transfer folded to a no-op");
            return Ok(TransferOutcome {
                transaction: None,
                affected: 0,
                skipped: item_ids.len(),
                message: message_for(mode, 0),
            });
        }

        let mut plans = Vec::new();
        let mut skipped = 0;
        let mut snapshots: Vec<Item> = Vec::new();
        for item_id in &item_ids {
            let Some(item) = snapshot.item(item_id) else {
                skipped += 1;
                continue;
            };
            match plan_for(item, source.as_ref(), target.as_ref(), mode) {
                Some(plan) => {
                    snapshots.push(item.clone());
                    plans.push(plan);
                }
                None => skipped += 1,
            }
        }
        let affected = plans.iter().filter(|plan| plan.mutates()).count();
        skipped += plans.len() - affected;
        if affected == 0 {
            return Ok(TransferOutcome {
                transaction: None,
                affected: 0,
                skipped,
                message: message_for(mode, 0),
            });
        }

        // Optimistic apply, before any persistence work.
        let now = now_millis();
        let preferred = match mode {
            TransferMode::Move => target.clone(),
            TransferMode::Duplicate | TransferMode::Remove => None,
        };
        self.state.update(|current| {
            let mut next = current.clone();
            for plan in &plans {
                apply_plan(&mut next, plan, target.as_ref(), preferred.as_ref(), now);
            }
            next
        });

        let message = message_for(mode, affected);
        let mutated_ids: Vec<ItemId> = plans
            .iter()
            .filter(|plan| plan.mutates())
            .map(|plan| plan.item_id.clone())
            .collect();
        let inverses: Vec<(ItemId, InverseOp)> = plans
            .iter()
            .filter_map(|plan| {
                plan.inverse
                    .clone()
                    .map(|inverse| (plan.item_id.clone(), inverse))
            })
            .collect();

        let commit = {
            let store = Arc::clone(&self.store);
            let state = self.state.clone();
            let item_ids = mutated_ids.clone();
            let source = source.clone();
            let target = target.clone();
            move || async move {
                match mode {
                    TransferMode::Duplicate => {
                        let target = target
                            .as_ref()
                            .ok_or_else(|| Error::Internal("duplicate without target".into()))?;
                        store.add_to_collection(&item_ids, target).await?;
                    }
                    TransferMode::Move | TransferMode::Remove => {
                        store
                            .move_memberships(&item_ids, source.as_ref(), target.as_ref())
                            .await?;
                    }
                }
                // Membership also owns primary-collection and ordering side
                // effects; reload rather than predict them.
                let canonical = store.load_full_state().await?;
                state.replace(canonical);
                Ok(())
            }
        };
        let undo = {
            let store = Arc::clone(&self.store);
            let state = self.state.clone();
            let target = target.clone();
            move || async move {
                state.update(|current| {
                    let mut next = current.clone();
                    for item in &snapshots {
                        next.items.insert(item.id.clone(), item.clone());
                    }
                    next
                });
                issue_inverse_ops(&store, target.as_ref(), inverses).await;
                info!("membership change undone");
            }
        };

        let transaction = self
            .transactions
            .stage(TransactionSpec::new(message.clone(), commit, undo))
            .await;
        info!(%message, affected, skipped, "membership transfer staged");
        Ok(TransferOutcome {
            transaction: Some(transaction),
            affected,
            skipped,
            message,
        })
    }
}

fn dedupe_ids(item_ids: Vec<ItemId>) -> Vec<ItemId> {
    let mut seen = HashSet::new();
    item_ids
        .into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

fn message_for(mode: TransferMode, count: usize) -> String {
    let noun = if count == 1 { "item" } else { "items" };
    match mode {
        TransferMode::Move => format!("Moved {count} {noun}"),
        TransferMode::Duplicate => format!("Duplicated {count} {noun}"),
        TransferMode::Remove => format!("Removed {count} {noun}"),
    }
}

/// Effective source membership: the explicit source if the item holds it,
/// otherwise the primary-first fallback.
fn resolve_source(item: &Item, source: Option<&CollectionId>) -> Option<CollectionId> {
    match source {
        Some(source) => item.has_membership(source).then(|| source.clone()),
        None => item.resolve_primary(None),
    }
}

fn plan_for(
    item: &Item,
    source: Option<&CollectionId>,
    target: Option<&CollectionId>,
    mode: TransferMode,
) -> Option<ItemPlan> {
    if mode == TransferMode::Duplicate {
        let target = target?;
        if item.has_membership(target) {
            return Some(ItemPlan {
                item_id: item.id.clone(),
                action: Action::SyncOnly,
                inverse: None,
            });
        }
        return Some(ItemPlan {
            item_id: item.id.clone(),
            action: Action::AddToTarget,
            inverse: Some(InverseOp::RemoveFromTarget),
        });
    }

    let resolved = resolve_source(item, source);
    let had_source = resolved.is_some();
    let had_target = target.map(|t| item.has_membership(t)).unwrap_or(false);

    let action = match (&resolved, target) {
        (None, None) => return None,
        (None, Some(_)) if had_target => Action::SyncOnly,
        (None, Some(_)) => Action::AddToTarget,
        (Some(current), Some(t)) if current == t => Action::SyncOnly,
        (Some(current), Some(_)) if had_target => Action::Collapse {
            source: current.clone(),
        },
        (Some(current), Some(_)) => Action::Relocate {
            source: current.clone(),
        },
        (Some(current), None) => Action::RemoveFromSource {
            source: current.clone(),
        },
    };

    let inverse = if target.is_none() {
        // Pure removal inverts by re-adding the deleted membership.
        resolved
            .clone()
            .map(|source| InverseOp::AddBackToSource { source })
    } else {
        match (had_source, had_target) {
            (true, false) => Some(InverseOp::RemoveFromTarget),
            (false, true) => source
                .cloned()
                .map(|source| InverseOp::AddBackToSource { source }),
            // Collapse: the duplicate link is not recreated.
            (true, true) => resolved
                .clone()
                .map(|source| InverseOp::AddBackToSource { source }),
            (false, false) => source
                .cloned()
                .map(|source| InverseOp::MoveBackToSource { source }),
        }
    };

    Some(ItemPlan {
        item_id: item.id.clone(),
        action,
        inverse,
    })
}

fn apply_plan(
    state: &mut AppState,
    plan: &ItemPlan,
    target: Option<&CollectionId>,
    preferred: Option<&CollectionId>,
    now: i64,
) {
    let next_sort = match (&plan.action, target) {
        (Action::AddToTarget | Action::Relocate { .. }, Some(target)) => {
            Some(state.next_sort_index(target))
        }
        _ => None,
    };
    let Some(item) = state.items.get_mut(&plan.item_id) else {
        return;
    };
    match &plan.action {
        Action::AddToTarget => {
            if let (Some(target), Some(sort_index)) = (target, next_sort) {
                item.memberships
                    .insert(target.clone(), MembershipInstance::new(sort_index, now));
            }
            item.sync_primary(preferred, now);
        }
        Action::Relocate { source } => {
            if let (Some(target), Some(sort_index)) = (target, next_sort) {
                // The instance survives the move; only its collection and
                // position change.
                if let Some(mut instance) = item.memberships.remove(source) {
                    instance.sort_index = sort_index;
                    item.memberships.insert(target.clone(), instance);
                }
            }
            item.sync_primary(preferred, now);
        }
        Action::Collapse { source } => {
            item.memberships.remove(source);
            item.sync_primary(preferred, now);
        }
        Action::RemoveFromSource { source } => {
            item.memberships.remove(source);
            item.sync_primary(None, now);
        }
        Action::SyncOnly => {
            item.sync_primary(preferred, now);
        }
    }
}

async fn issue_inverse_ops(
    store: &Arc<dyn ItemStore>,
    target: Option<&CollectionId>,
    inverses: Vec<(ItemId, InverseOp)>,
) {
    let mut remove_from_target = Vec::new();
    let mut add_back: HashMap<CollectionId, Vec<ItemId>> = HashMap::new();
    let mut move_back: HashMap<CollectionId, Vec<ItemId>> = HashMap::new();
    for (item_id, inverse) in inverses {
        match inverse {
            InverseOp::RemoveFromTarget => remove_from_target.push(item_id),
            InverseOp::AddBackToSource { source } => {
                add_back.entry(source).or_default().push(item_id)
            }
            InverseOp::MoveBackToSource { source } => {
                move_back.entry(source).or_default().push(item_id)
            }
        }
    }

    // Best effort: the UI is already restored; failures are reported and
    // reconciled by the next full-state load.
    if !remove_from_target.is_empty() {
        if let Err(op_error) = store
            .move_memberships(&remove_from_target, target, None)
            .await
        {
            error!(%op_error, "inverse removal from target failed");
        }
    }
    for (source, item_ids) in add_back {
        if let Err(op_error) = store.add_to_collection(&item_ids, &source).await {
            error!(%op_error, collection = %source, "inverse add-back failed");
        }
    }
    for (source, item_ids) in move_back {
        if let Err(op_error) = store
            .move_memberships(&item_ids, target, Some(&source))
            .await
        {
            error!(%op_error, collection = %source, "inverse move-back failed");
        }
    }
}
