//! Optimistic transaction manager with a single undo window.
//!
//! A mutation is applied to in-memory state synchronously at stage time;
//! the persistence call lives in its `commit` callback. Exactly zero or one
//! transaction is pending at any time: staging a new one force-commits the
//! old one first, so stacked undo windows cannot exist. A pending
//! transaction auto-commits when its deadline elapses, unless `undo()` or a
//! manual `commit()` settles it first. A failed commit rolls back through
//! `undo` — the UI is never left assuming a commit that did not happen.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use curio_core::Result;

/// Monotonic identity of a staged transaction.
pub type TransactionId = u64;

type CommitFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;
type UndoFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;
type FinalizeFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A mutation staged for the undo window: its commit, its exact inverse,
/// and an optional post-commit finalizer.
pub struct TransactionSpec {
    message: String,
    commit: CommitFn,
    undo: UndoFn,
    finalize: Option<FinalizeFn>,
}

impl TransactionSpec {
    /// `commit` persists the already-applied mutation; `undo` restores
    /// exactly the pre-mutation state.
    pub fn new<C, CFut, U, UFut>(message: impl Into<String>, commit: C, undo: U) -> Self
    where
        C: FnOnce() -> CFut + Send + 'static,
        CFut: std::future::Future<Output = Result<()>> + Send + 'static,
        U: FnOnce() -> UFut + Send + 'static,
        UFut: std::future::Future<Output = ()> + Send + 'static,
    {
        Self {
            message: message.into(),
            commit: Box::new(move || Box::pin(commit())),
            undo: Box::new(move || Box::pin(undo())),
            finalize: None,
        }
    }

    /// Attach a finalizer that runs only after a successful commit, e.g. to
    /// release resources tied to permanently-removed items.
    pub fn with_finalize<F, FFut>(mut self, finalize: F) -> Self
    where
        F: FnOnce() -> FFut + Send + 'static,
        FFut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.finalize = Some(Box::new(move || Box::pin(finalize())));
        self
    }
}

struct PendingTransaction {
    id: TransactionId,
    message: String,
    commit: CommitFn,
    undo: UndoFn,
    finalize: Option<FinalizeFn>,
    deadline_timer: JoinHandle<()>,
}

struct ManagerInner {
    slot: Mutex<Option<PendingTransaction>>,
    next_id: AtomicU64,
    undo_window: Duration,
}

/// Single-slot manager for time-boxed optimistic mutations.
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<ManagerInner>,
}

impl TransactionManager {
    /// Undo window used when none is given: 7 seconds.
    pub const DEFAULT_UNDO_WINDOW: Duration = Duration::from_secs(7);

    pub fn new(undo_window: Duration) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                slot: Mutex::new(None),
                next_id: AtomicU64::new(0),
                undo_window,
            }),
        }
    }

    pub fn with_default_window() -> Self {
        Self::new(Self::DEFAULT_UNDO_WINDOW)
    }

    /// Stage a transaction. Any transaction already pending is committed
    /// synchronously first (its deadline is cancelled), guaranteeing only
    /// one undo window is ever visible.
    pub async fn stage(&self, spec: TransactionSpec) -> TransactionId {
        let mut slot = self.inner.slot.lock().await;
        if let Some(previous) = slot.take() {
            previous.deadline_timer.abort();
            debug!(id = previous.id, "superseded by a new transaction; committing now");
            if let Err(commit_error) = Self::run_commit(previous).await {
                error!(%commit_error, "superseded transaction failed to commit");
            }
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let deadline_timer = {
            let manager = self.clone();
            let window = self.inner.undo_window;
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                manager.auto_commit(id).await;
            })
        };
        info!(id, message = %spec.message, "transaction staged");
        *slot = Some(PendingTransaction {
            id,
            message: spec.message,
            commit: spec.commit,
            undo: spec.undo,
            finalize: spec.finalize,
            deadline_timer,
        });
        id
    }

    /// Commit the pending transaction now, if any.
    pub async fn commit(&self) -> Result<()> {
        let taken = self.inner.slot.lock().await.take();
        match taken {
            Some(transaction) => {
                transaction.deadline_timer.abort();
                Self::run_commit(transaction).await
            }
            None => Ok(()),
        }
    }

    /// Undo the pending transaction. Returns whether one was pending; its
    /// `commit` will never run.
    pub async fn undo(&self) -> bool {
        let taken = self.inner.slot.lock().await.take();
        match taken {
            Some(transaction) => {
                transaction.deadline_timer.abort();
                info!(id = transaction.id, message = %transaction.message, "transaction undone");
                (transaction.undo)().await;
                true
            }
            None => false,
        }
    }

    /// Message of the pending transaction, for the shell's undo toast.
    pub async fn pending_message(&self) -> Option<String> {
        self.inner
            .slot
            .lock()
            .await
            .as_ref()
            .map(|transaction| transaction.message.clone())
    }

    pub async fn has_pending(&self) -> bool {
        self.inner.slot.lock().await.is_some()
    }

    /// Deadline path. A stale timer (superseded or settled transaction)
    /// finds a different id in the slot and does nothing.
    async fn auto_commit(&self, id: TransactionId) {
        let taken = {
            let mut slot = self.inner.slot.lock().await;
            match slot.as_ref() {
                Some(pending) if pending.id == id => slot.take(),
                _ => None,
            }
        };
        if let Some(transaction) = taken {
            debug!(id, "undo window elapsed; auto-committing");
            if let Err(commit_error) = Self::run_commit(transaction).await {
                error!(id, %commit_error, "auto-commit failed");
            }
        }
    }

    async fn run_commit(transaction: PendingTransaction) -> Result<()> {
        let PendingTransaction {
            id,
            message,
            commit,
            undo,
            finalize,
            deadline_timer: _,
        } = transaction;
        match (commit)().await {
            Ok(()) => {
                debug!(id, "transaction committed");
                if let Some(finalize) = finalize {
                    finalize().await;
                }
                Ok(())
            }
            Err(commit_error) => {
                // Never leave the UI assuming a commit that didn't happen.
                error!(id, %message, %commit_error, "commit failed; rolling back");
                (undo)().await;
                Err(commit_error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curio_core::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Probe {
        commits: AtomicUsize,
        undos: AtomicUsize,
        finalizes: AtomicUsize,
    }

    impl Probe {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                commits: AtomicUsize::new(0),
                undos: AtomicUsize::new(0),
                finalizes: AtomicUsize::new(0),
            })
        }

        fn spec(self: &Arc<Self>, message: &str) -> TransactionSpec {
            let commit_probe = Arc::clone(self);
            let undo_probe = Arc::clone(self);
            let finalize_probe = Arc::clone(self);
            TransactionSpec::new(
                message,
                move || async move {
                    commit_probe.commits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                move || async move {
                    undo_probe.undos.fetch_add(1, Ordering::SeqCst);
                },
            )
            .with_finalize(move || async move {
                finalize_probe.finalizes.fetch_add(1, Ordering::SeqCst);
            })
        }

        fn failing_spec(self: &Arc<Self>, message: &str) -> TransactionSpec {
            let undo_probe = Arc::clone(self);
            TransactionSpec::new(
                message,
                move || async move { Err(Error::Store("commit rejected".into())) },
                move || async move {
                    undo_probe.undos.fetch_add(1, Ordering::SeqCst);
                },
            )
        }
    }

    #[tokio::test(start_paused = true)]
    async fn undo_before_deadline_prevents_commit() {
        let manager = TransactionManager::with_default_window();
        let probe = Probe::new();

        manager.stage(probe.spec("Deleted 1 item")).await;
        assert_eq!(
            manager.pending_message().await.as_deref(),
            Some("Deleted 1 item")
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(manager.undo().await);

        // Even past the original deadline, nothing commits.
        tokio::time::sleep(TransactionManager::DEFAULT_UNDO_WINDOW * 2).await;
        assert_eq!(probe.commits.load(Ordering::SeqCst), 0);
        assert_eq!(probe.undos.load(Ordering::SeqCst), 1);
        assert_eq!(probe.finalizes.load(Ordering::SeqCst), 0);
        assert!(!manager.has_pending().await);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_auto_commits_once() {
        let manager = TransactionManager::new(Duration::from_secs(7));
        let probe = Probe::new();

        manager.stage(probe.spec("Moved 2 items")).await;
        tokio::time::sleep(Duration::from_secs(8)).await;

        assert_eq!(probe.commits.load(Ordering::SeqCst), 1);
        assert_eq!(probe.finalizes.load(Ordering::SeqCst), 1);
        assert_eq!(probe.undos.load(Ordering::SeqCst), 0);
        assert!(!manager.has_pending().await);

        // Undo after settlement is a no-op.
        assert!(!manager.undo().await);
    }

    #[tokio::test(start_paused = true)]
    async fn staging_forces_previous_transaction_to_commit_exactly_once() {
        let manager = TransactionManager::with_default_window();
        let first = Probe::new();
        let second = Probe::new();

        manager.stage(first.spec("first")).await;
        manager.stage(second.spec("second")).await;

        // The first committed synchronously during the second stage.
        assert_eq!(first.commits.load(Ordering::SeqCst), 1);
        assert_eq!(second.commits.load(Ordering::SeqCst), 0);
        assert_eq!(manager.pending_message().await.as_deref(), Some("second"));

        // The first transaction's (aborted) timer never double-commits.
        tokio::time::sleep(TransactionManager::DEFAULT_UNDO_WINDOW * 2).await;
        assert_eq!(first.commits.load(Ordering::SeqCst), 1);
        assert_eq!(second.commits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_commit_rolls_back_and_reports() {
        let manager = TransactionManager::with_default_window();
        let probe = Probe::new();

        manager.stage(probe.failing_spec("won't stick")).await;
        let result = manager.commit().await;

        assert!(matches!(result, Err(Error::Store(_))));
        assert_eq!(probe.undos.load(Ordering::SeqCst), 1);
        assert_eq!(probe.finalizes.load(Ordering::SeqCst), 0);
        assert!(!manager.has_pending().await);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_commit_settles_and_cancels_the_timer() {
        let manager = TransactionManager::with_default_window();
        let probe = Probe::new();

        manager.stage(probe.spec("edit")).await;
        manager.commit().await.unwrap();
        assert_eq!(probe.commits.load(Ordering::SeqCst), 1);

        tokio::time::sleep(TransactionManager::DEFAULT_UNDO_WINDOW * 2).await;
        assert_eq!(probe.commits.load(Ordering::SeqCst), 1);
    }
}
