//! Bookmark metadata pipeline: fetch title, favicon, and final URL for a
//! bookmark item with a fixed timeout/retry policy.
//!
//! A failed fetch never fails the item — the bookmark stays usable with the
//! hostname as its fallback title, and the error status is persisted so the
//! UI can offer a manual retry.

use std::sync::Arc;

use tracing::{debug, info, warn};
use url::Url;

use curio_core::{
    now_millis, BookmarkMetadataUpdate, Error, ItemId, ItemStore, MetaStatus, MetadataFetcher,
    Result, StateCell,
};

use crate::config::{MetadataConfig, RunnerConfig};
use crate::queue::Admission;
use crate::runner::{JobPolicy, RetryableJobRunner};

/// Reject anything that is not a well-formed http(s) URL before any job is
/// created.
pub fn normalize_bookmark_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("bookmark url cannot be empty".into()));
    }
    let parsed =
        Url::parse(trimmed).map_err(|err| Error::Validation(format!("invalid bookmark url: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::Validation(
            "only http:// and https:// URLs are supported".into(),
        ));
    }
    Ok(parsed)
}

/// Whether a bookmark title is still the staged placeholder (empty, the raw
/// URL, or its hostname) rather than something the user typed.
fn is_placeholder_title(title: &str, url: &Url) -> bool {
    let trimmed = title.trim();
    trimmed.is_empty()
        || trimmed == url.as_str()
        || trimmed == url.as_str().trim_end_matches('/')
        || url.host_str().is_some_and(|host| trimmed == host)
}

/// Coordinates bookmark metadata fetches over a retryable runner.
pub struct MetadataCoordinator {
    state: StateCell,
    store: Arc<dyn ItemStore>,
    fetcher: Arc<dyn MetadataFetcher>,
    runner: RetryableJobRunner,
}

impl MetadataCoordinator {
    pub fn new(
        state: StateCell,
        store: Arc<dyn ItemStore>,
        fetcher: Arc<dyn MetadataFetcher>,
        config: MetadataConfig,
    ) -> Self {
        let runner = RetryableJobRunner::new(RunnerConfig {
            concurrency: config.concurrency,
            timeout: config.timeout,
            max_retries: config.max_retries,
            start_delay: std::time::Duration::ZERO,
        });
        Self {
            state,
            store,
            fetcher,
            runner,
        }
    }

    pub fn dispose(&self) {
        self.runner.dispose();
    }

    /// Validate the URL and enqueue a fetch for `item_id`. Duplicate
    /// requests for the same `(item, url)` pair are dropped.
    pub fn request_fetch(&self, item_id: ItemId, raw_url: &str) -> Result<Admission> {
        let url = normalize_bookmark_url(raw_url)?;
        let key = format!("{item_id}:{url}");

        let fetcher = Arc::clone(&self.fetcher);
        let attempt_url = url.clone();
        let state = self.state.clone();
        let store = Arc::clone(&self.store);
        let runner = self.runner.clone();
        let job_item = item_id.clone();

        let admission = self.runner.submit(
            key,
            JobPolicy::default(),
            move || {
                let fetcher = Arc::clone(&fetcher);
                let url = attempt_url.clone();
                async move { fetcher.fetch(&url).await }
            },
            move |outcome| async move {
                if runner.is_disposed() {
                    return;
                }
                match outcome {
                    Ok(metadata) => {
                        apply_fetched_metadata(&state, &store, &job_item, &url, metadata).await;
                    }
                    Err(error) => {
                        warn!(item = %job_item, %error, "bookmark metadata fetch failed");
                        state.update_item(&job_item, |current| {
                            let mut next = current.clone();
                            next.meta_status = MetaStatus::Error;
                            next.touch(now_millis());
                            next
                        });
                        let update = BookmarkMetadataUpdate {
                            item_id: job_item.clone(),
                            url: None,
                            title: None,
                            favicon_path: None,
                            meta_status: MetaStatus::Error,
                        };
                        if let Err(store_error) = store.update_bookmark_metadata(&update).await {
                            warn!(item = %job_item, %store_error, "failed to persist metadata error");
                        }
                    }
                }
            },
        );
        if admission == Admission::Deduped {
            debug!(item = %item_id, "metadata fetch already outstanding");
        }
        Ok(admission)
    }
}

async fn apply_fetched_metadata(
    state: &StateCell,
    store: &Arc<dyn ItemStore>,
    item_id: &ItemId,
    requested_url: &Url,
    metadata: curio_core::BookmarkMetadata,
) {
    let now = now_millis();
    let mut update = BookmarkMetadataUpdate {
        item_id: item_id.clone(),
        url: Some(metadata.final_url.clone()),
        title: None,
        favicon_path: metadata.favicon_path.clone(),
        meta_status: MetaStatus::Ready,
    };
    let merged = state.update_item(item_id, |current| {
        let mut next = current.clone();
        // A title the user typed wins over anything fetched; placeholders
        // are filled from the page title, with the hostname as fallback.
        if is_placeholder_title(&next.title, requested_url) {
            let fetched = metadata
                .title
                .as_deref()
                .map(str::trim)
                .filter(|title| !title.is_empty());
            match fetched {
                Some(title) => next.title = title.to_string(),
                None => {
                    if let Some(host) = Url::parse(&metadata.final_url)
                        .ok()
                        .and_then(|parsed| parsed.host_str().map(str::to_string))
                    {
                        next.title = host;
                    }
                }
            }
        }
        next.url = Some(metadata.final_url.clone());
        if metadata.favicon_path.is_some() {
            next.favicon_path = metadata.favicon_path.clone();
        }
        next.meta_status = MetaStatus::Ready;
        next.touch(now);
        update.title = Some(next.title.clone());
        next
    });
    if !merged {
        debug!(item = %item_id, "item gone before metadata merge");
        return;
    }
    info!(item = %item_id, final_url = %metadata.final_url, "bookmark metadata merged");
    if let Err(error) = store.update_bookmark_metadata(&update).await {
        warn!(item = %item_id, %error, "failed to persist bookmark metadata");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_non_http_urls() {
        assert!(matches!(
            normalize_bookmark_url("   "),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            normalize_bookmark_url("ftp://example.com"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            normalize_bookmark_url("not a url"),
            Err(Error::Validation(_))
        ));
        assert!(normalize_bookmark_url("https://example.com/page").is_ok());
    }

    #[test]
    fn placeholder_titles_are_detected() {
        let url = Url::parse("https://example.com/path").unwrap();
        assert!(is_placeholder_title("", &url));
        assert!(is_placeholder_title("https://example.com/path", &url));
        assert!(is_placeholder_title("example.com", &url));
        assert!(!is_placeholder_title("My reading list", &url));
    }
}
