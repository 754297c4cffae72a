//! Membership transfer scenarios: optimistic apply, the collapse edge
//! case, inverse-operation derivation, and commit reconciliation.

use std::sync::Arc;
use std::time::Duration;

use curio_core::test_support::mocks::{MockItemStore, StoreCall};
use curio_core::{
    AppState, Collection, CollectionId, ImportStatus, Item, ItemKind, MembershipInstance,
    StateCell,
};
use curio_undo::{MembershipTransferService, TransactionManager};

fn item_in(name: &str, memberships: &[(&str, i64)]) -> Item {
    let mut item = Item::placeholder(ItemKind::Image, name, format!("{name}.png"));
    item.import_status = ImportStatus::Ready;
    let created_at = item.created_at;
    for (collection, sort_index) in memberships {
        item.memberships.insert(
            (*collection).into(),
            MembershipInstance::new(*sort_index, created_at),
        );
    }
    item.primary_collection = item.resolve_primary(None);
    item
}

fn fixture(
    items: Vec<Item>,
) -> (
    StateCell,
    Arc<MockItemStore>,
    TransactionManager,
    MembershipTransferService,
) {
    let mut app = AppState::default();
    for id in ["a", "b"] {
        let collection = Collection::new(id, id.to_uppercase());
        app.collections.insert(collection.id.clone(), collection);
    }
    for item in items {
        app.items.insert(item.id.clone(), item);
    }
    let state = StateCell::new(app.clone());
    let store = MockItemStore::with_state(app);
    let manager = TransactionManager::with_default_window();
    let service = MembershipTransferService::new(state.clone(), store.clone(), manager.clone());
    (state, store, manager, service)
}

fn a() -> CollectionId {
    "a".into()
}

fn b() -> CollectionId {
    "b".into()
}

#[tokio::test(start_paused = true)]
async fn plain_move_relocates_the_same_instance() {
    let item = item_in("y", &[("a", 0)]);
    let item_id = item.id.clone();
    let original_instance = item.memberships[&a()].id.clone();
    let (state, store, manager, service) = fixture(vec![item]);

    let outcome = service
        .move_items(vec![item_id.clone()], Some(a()), b())
        .await
        .unwrap();
    assert_eq!(outcome.affected, 1);
    assert_eq!(outcome.message, "Moved 1 item");
    assert!(outcome.transaction.is_some());

    // Optimistic: the instance relocated, it was not recreated.
    let moved = state.snapshot().item(&item_id).cloned().unwrap();
    assert!(!moved.has_membership(&a()));
    assert_eq!(moved.memberships[&b()].id, original_instance);
    assert_eq!(moved.primary_collection, Some(b()));

    manager.commit().await.unwrap();
    let calls = store.calls();
    assert!(calls.iter().any(|call| matches!(
        call,
        StoreCall::MoveMemberships { item_ids, source: Some(s), target: Some(t) }
            if item_ids == &vec![item_id.clone()] && s == &a() && t == &b()
    )));
    assert!(calls.iter().any(|call| matches!(call, StoreCall::LoadFullState)));

    // Reconciled canonical state agrees.
    let canonical = state.snapshot().item(&item_id).cloned().unwrap();
    assert!(canonical.has_membership(&b()));
    assert!(!canonical.has_membership(&a()));
}

#[tokio::test(start_paused = true)]
async fn collapse_move_removes_source_only_and_undo_restores_it() {
    let item = item_in("x", &[("a", 0), ("b", 1)]);
    let item_id = item.id.clone();
    let source_instance = item.memberships[&a()].id.clone();
    let target_instance = item.memberships[&b()].id.clone();
    let (state, store, manager, service) = fixture(vec![item]);

    let outcome = service
        .move_items(vec![item_id.clone()], Some(a()), b())
        .await
        .unwrap();
    assert_eq!(outcome.affected, 1);

    // Collapse: removed from the source only, no duplicate target link.
    let collapsed = state.snapshot().item(&item_id).cloned().unwrap();
    assert!(!collapsed.has_membership(&a()));
    assert_eq!(collapsed.memberships.len(), 1);
    assert_eq!(collapsed.memberships[&b()].id, target_instance);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(manager.undo().await);

    // The source membership is back with its original instance id.
    let restored = state.snapshot().item(&item_id).cloned().unwrap();
    assert_eq!(restored.memberships[&a()].id, source_instance);
    assert_eq!(restored.memberships[&b()].id, target_instance);

    // The forward membership update never reached the store; the inverse
    // re-adds the source link (the collapsed duplicate is not recreated).
    let calls = store.calls();
    assert!(!calls
        .iter()
        .any(|call| matches!(call, StoreCall::MoveMemberships { target: Some(_), .. })));
    assert!(calls.iter().any(|call| matches!(
        call,
        StoreCall::AddToCollection { item_ids, collection }
            if item_ids == &vec![item_id.clone()] && collection == &a()
    )));
}

#[tokio::test(start_paused = true)]
async fn undo_restores_the_exact_pre_mutation_snapshot() {
    let item = item_in("y", &[("a", 3)]);
    let item_id = item.id.clone();
    let (state, store, manager, service) = fixture(vec![item]);
    let before = state.snapshot().item(&item_id).cloned().unwrap();

    service
        .move_items(vec![item_id.clone()], Some(a()), b())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(manager.undo().await);

    assert_eq!(state.snapshot().item(&item_id).cloned().unwrap(), before);
    // Plain move inverts by removing the item from the target again.
    assert!(store.calls().iter().any(|call| matches!(
        call,
        StoreCall::MoveMemberships { source: Some(s), target: None, .. } if s == &b()
    )));
    assert!(!store
        .calls()
        .iter()
        .any(|call| matches!(call, StoreCall::LoadFullState)));
}

#[tokio::test(start_paused = true)]
async fn duplicate_mints_a_new_instance_and_leaves_the_source_alone() {
    let item = item_in("y", &[("a", 0)]);
    let item_id = item.id.clone();
    let source_instance = item.memberships[&a()].id.clone();
    let (state, store, manager, service) = fixture(vec![item]);

    let outcome = service
        .duplicate_items(vec![item_id.clone()], b())
        .await
        .unwrap();
    assert_eq!(outcome.message, "Duplicated 1 item");

    let duplicated = state.snapshot().item(&item_id).cloned().unwrap();
    assert_eq!(duplicated.memberships[&a()].id, source_instance);
    assert_ne!(duplicated.memberships[&b()].id, source_instance);
    // Duplication does not steal the primary collection.
    assert_eq!(duplicated.primary_collection, Some(a()));

    manager.commit().await.unwrap();
    assert!(store.calls().iter().any(|call| matches!(
        call,
        StoreCall::AddToCollection { collection, .. } if collection == &b()
    )));
}

#[tokio::test(start_paused = true)]
async fn duplicate_undo_drops_only_the_new_target_link() {
    let item = item_in("y", &[("a", 0)]);
    let item_id = item.id.clone();
    let (state, store, manager, service) = fixture(vec![item]);
    let before = state.snapshot().item(&item_id).cloned().unwrap();

    service
        .duplicate_items(vec![item_id.clone()], b())
        .await
        .unwrap();
    assert!(manager.undo().await);

    assert_eq!(state.snapshot().item(&item_id).cloned().unwrap(), before);
    assert!(store.calls().iter().any(|call| matches!(
        call,
        StoreCall::MoveMemberships { source: Some(s), target: None, .. } if s == &b()
    )));
}

#[tokio::test(start_paused = true)]
async fn duplicating_into_a_holding_collection_is_a_skip() {
    let item = item_in("y", &[("a", 0), ("b", 1)]);
    let item_id = item.id.clone();
    let (state, store, manager, service) = fixture(vec![item]);
    let before = state.snapshot().item(&item_id).cloned().unwrap();

    let outcome = service
        .duplicate_items(vec![item_id.clone()], b())
        .await
        .unwrap();
    assert!(outcome.transaction.is_none());
    assert_eq!(outcome.affected, 0);
    assert_eq!(outcome.skipped, 1);
    assert!(!manager.has_pending().await);
    assert_eq!(state.snapshot().item(&item_id).cloned().unwrap(), before);
    assert!(store.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn remove_deletes_the_membership_and_undo_adds_it_back() {
    let item = item_in("y", &[("a", 0)]);
    let item_id = item.id.clone();
    let (state, store, manager, service) = fixture(vec![item]);

    let outcome = service
        .remove_items(vec![item_id.clone()], Some(a()))
        .await
        .unwrap();
    assert_eq!(outcome.message, "Removed 1 item");

    let removed = state.snapshot().item(&item_id).cloned().unwrap();
    assert!(removed.memberships.is_empty());
    assert_eq!(removed.primary_collection, None);

    assert!(manager.undo().await);
    let restored = state.snapshot().item(&item_id).cloned().unwrap();
    assert!(restored.has_membership(&a()));
    assert!(store.calls().iter().any(|call| matches!(
        call,
        StoreCall::AddToCollection { collection, .. } if collection == &a()
    )));
}

#[tokio::test(start_paused = true)]
async fn moving_within_the_same_collection_folds_to_a_no_op() {
    let item = item_in("y", &[("a", 0)]);
    let item_id = item.id.clone();
    let (state, store, manager, service) = fixture(vec![item]);
    let before = state.snapshot().item(&item_id).cloned().unwrap();

    let outcome = service
        .move_items(vec![item_id.clone()], Some(a()), a())
        .await
        .unwrap();
    assert!(outcome.transaction.is_none());
    assert_eq!(outcome.skipped, 1);
    assert!(!manager.has_pending().await);
    assert_eq!(state.snapshot().item(&item_id).cloned().unwrap(), before);
    assert!(store.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unknown_collections_are_rejected_upfront() {
    let item = item_in("y", &[("a", 0)]);
    let item_id = item.id.clone();
    let (_state, _store, manager, service) = fixture(vec![item]);

    let result = service
        .move_items(vec![item_id], Some(a()), "nowhere".into())
        .await;
    assert!(matches!(
        result,
        Err(curio_core::Error::CollectionNotFound(_))
    ));
    assert!(!manager.has_pending().await);
}

#[tokio::test(start_paused = true)]
async fn deadline_auto_commit_reconciles_with_the_store() {
    let item = item_in("y", &[("a", 0)]);
    let item_id = item.id.clone();
    let (state, store, _manager, service) = fixture(vec![item]);

    service
        .move_items(vec![item_id.clone()], Some(a()), b())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(8)).await;

    let calls = store.calls();
    assert!(calls
        .iter()
        .any(|call| matches!(call, StoreCall::MoveMemberships { .. })));
    assert!(calls.iter().any(|call| matches!(call, StoreCall::LoadFullState)));
    let item = state.snapshot().item(&item_id).cloned().unwrap();
    assert!(item.has_membership(&b()));
    assert!(!item.has_membership(&a()));
}

#[tokio::test(start_paused = true)]
async fn failed_commit_rolls_the_move_back() {
    let item = item_in("y", &[("a", 0)]);
    let item_id = item.id.clone();
    let (state, store, manager, service) = fixture(vec![item]);
    let before = state.snapshot().item(&item_id).cloned().unwrap();

    service
        .move_items(vec![item_id.clone()], Some(a()), b())
        .await
        .unwrap();
    store.fail_next("constraint violation");
    let result = manager.commit().await;

    assert!(matches!(result, Err(curio_core::Error::Store(_))));
    assert_eq!(state.snapshot().item(&item_id).cloned().unwrap(), before);
}

#[tokio::test(start_paused = true)]
async fn staging_a_second_transfer_commits_the_first() {
    let first_item = item_in("y", &[("a", 0)]);
    let second_item = item_in("z", &[("a", 1)]);
    let first_id = first_item.id.clone();
    let second_id = second_item.id.clone();
    let (_state, store, manager, service) = fixture(vec![first_item, second_item]);

    service
        .move_items(vec![first_id.clone()], Some(a()), b())
        .await
        .unwrap();
    assert!(store.calls().is_empty());

    service
        .move_items(vec![second_id.clone()], Some(a()), b())
        .await
        .unwrap();

    // The first transfer was force-committed when the second was staged.
    assert!(store.calls().iter().any(|call| matches!(
        call,
        StoreCall::MoveMemberships { item_ids, .. } if item_ids == &vec![first_id.clone()]
    )));
    assert_eq!(
        manager.pending_message().await.as_deref(),
        Some("Moved 1 item")
    );
}
