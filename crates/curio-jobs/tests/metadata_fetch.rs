//! Bookmark metadata fetch scenarios: validation, merge precedence, and
//! failure isolation.

use std::sync::Arc;
use std::time::Duration;

use curio_core::test_support::mocks::{MockItemStore, MockMetadataFetcher, StoreCall};
use curio_core::{
    AppState, BookmarkMetadata, Error, Item, ItemId, ItemKind, MetaStatus, StateCell,
};
use curio_jobs::{Admission, MetadataConfig, MetadataCoordinator};

fn bookmark_item(title: &str, url: &str) -> Item {
    let mut item = Item::placeholder(ItemKind::Bookmark, title, "bookmark");
    item.url = Some(url.to_string());
    item
}

fn coordinator(
    state: &StateCell,
    store: &Arc<MockItemStore>,
    fetcher: Arc<MockMetadataFetcher>,
) -> MetadataCoordinator {
    MetadataCoordinator::new(
        state.clone(),
        store.clone(),
        fetcher,
        MetadataConfig::default(),
    )
}

fn add_item(state: &StateCell, item: Item) -> ItemId {
    let id = item.id.clone();
    state.update(|current| current.with_item(item.clone()));
    id
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn malformed_urls_are_rejected_before_any_job_exists() {
    let state = StateCell::new(AppState::default());
    let store = MockItemStore::new();
    let fetcher = MockMetadataFetcher::respond_with(BookmarkMetadata {
        final_url: "https://example.com/".into(),
        title: None,
        favicon_path: None,
    });
    let coordinator = coordinator(&state, &store, fetcher.clone());
    let item_id = add_item(&state, bookmark_item("", "ftp://example.com"));

    for bad in ["", "   ", "ftp://example.com", "not a url"] {
        let result = coordinator.request_fetch(item_id.clone(), bad);
        assert!(matches!(result, Err(Error::Validation(_))));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fetcher.call_count(), 0);
    assert!(store.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn fetched_metadata_fills_placeholder_titles() {
    let state = StateCell::new(AppState::default());
    let store = MockItemStore::new();
    let fetcher = MockMetadataFetcher::respond_with(BookmarkMetadata {
        final_url: "https://example.com/docs".into(),
        title: Some("Example Docs".into()),
        favicon_path: Some("/favicons/example.png".into()),
    });
    let coordinator = coordinator(&state, &store, fetcher);
    // Placeholder title is the hostname.
    let item_id = add_item(&state, bookmark_item("example.com", "https://example.com/docs"));

    let admission = coordinator
        .request_fetch(item_id.clone(), "https://example.com/docs")
        .unwrap();
    assert_eq!(admission, Admission::Queued);

    let probe = state.clone();
    let id = item_id.clone();
    wait_until(move || {
        probe
            .snapshot()
            .item(&id)
            .is_some_and(|item| item.meta_status == MetaStatus::Ready)
    })
    .await;

    let item = state.snapshot().item(&item_id).cloned().unwrap();
    assert_eq!(item.title, "Example Docs");
    assert_eq!(item.url.as_deref(), Some("https://example.com/docs"));
    assert_eq!(item.favicon_path.as_deref(), Some("/favicons/example.png"));
    assert!(store
        .calls()
        .iter()
        .any(|call| matches!(call, StoreCall::UpdateBookmarkMetadata(_))));
}

#[tokio::test(start_paused = true)]
async fn user_edited_titles_win_over_fetched_ones() {
    let state = StateCell::new(AppState::default());
    let store = MockItemStore::new();
    let fetcher = MockMetadataFetcher::respond_with(BookmarkMetadata {
        final_url: "https://example.com/".into(),
        title: Some("Example Domain".into()),
        favicon_path: None,
    });
    let coordinator = coordinator(&state, &store, fetcher);
    let item_id = add_item(&state, bookmark_item("My reading list", "https://example.com/"));

    coordinator
        .request_fetch(item_id.clone(), "https://example.com/")
        .unwrap();

    let probe = state.clone();
    let id = item_id.clone();
    wait_until(move || {
        probe
            .snapshot()
            .item(&id)
            .is_some_and(|item| item.meta_status == MetaStatus::Ready)
    })
    .await;

    assert_eq!(
        state.snapshot().item(&item_id).unwrap().title,
        "My reading list"
    );
}

#[tokio::test(start_paused = true)]
async fn empty_fetched_titles_fall_back_to_the_hostname() {
    let state = StateCell::new(AppState::default());
    let store = MockItemStore::new();
    let fetcher = MockMetadataFetcher::respond_with(BookmarkMetadata {
        final_url: "https://blog.example.org/post".into(),
        title: Some("   ".into()),
        favicon_path: None,
    });
    let coordinator = coordinator(&state, &store, fetcher);
    let item_id = add_item(&state, bookmark_item("", "https://blog.example.org/post"));

    coordinator
        .request_fetch(item_id.clone(), "https://blog.example.org/post")
        .unwrap();

    let probe = state.clone();
    let id = item_id.clone();
    wait_until(move || {
        probe
            .snapshot()
            .item(&id)
            .is_some_and(|item| item.meta_status == MetaStatus::Ready)
    })
    .await;

    assert_eq!(
        state.snapshot().item(&item_id).unwrap().title,
        "blog.example.org"
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_mark_metadata_error_without_failing_the_item() {
    let state = StateCell::new(AppState::default());
    let store = MockItemStore::new();
    let fetcher = MockMetadataFetcher::fail_with("dns failure");
    let coordinator = coordinator(&state, &store, fetcher.clone());
    let item_id = add_item(&state, bookmark_item("example.com", "https://example.com/"));

    coordinator
        .request_fetch(item_id.clone(), "https://example.com/")
        .unwrap();

    let probe = state.clone();
    let id = item_id.clone();
    wait_until(move || {
        probe
            .snapshot()
            .item(&id)
            .is_some_and(|item| item.meta_status == MetaStatus::Error)
    })
    .await;

    // One retry: two attempts in total; the item stays usable.
    assert_eq!(fetcher.call_count(), 2);
    let item = state.snapshot().item(&item_id).cloned().unwrap();
    assert_eq!(item.title, "example.com");
    assert!(store
        .calls()
        .iter()
        .any(|call| matches!(call, StoreCall::UpdateBookmarkMetadata(_))));
}

#[tokio::test(start_paused = true)]
async fn duplicate_requests_for_the_same_item_and_url_are_dropped() {
    let state = StateCell::new(AppState::default());
    let store = MockItemStore::new();
    let fetcher = MockMetadataFetcher::hanging();
    let coordinator = coordinator(&state, &store, fetcher.clone());
    let item_id = add_item(&state, bookmark_item("", "https://example.com/"));

    let first = coordinator
        .request_fetch(item_id.clone(), "https://example.com/")
        .unwrap();
    tokio::task::yield_now().await;
    let second = coordinator
        .request_fetch(item_id.clone(), "https://example.com/")
        .unwrap();
    assert_eq!(first, Admission::Queued);
    assert_eq!(second, Admission::Deduped);

    // A different URL for the same item is its own job.
    let other = coordinator
        .request_fetch(item_id.clone(), "https://example.com/about")
        .unwrap();
    assert_eq!(other, Admission::Queued);
}
