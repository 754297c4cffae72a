//! Optimistic mutation layer for the curio organizer.
//!
//! [`TransactionManager`] stages a mutation that was already applied to
//! in-memory state, exposes a time-boxed undo window, and auto-commits or
//! rolls back depending on outcome. [`MembershipTransferService`] and
//! [`ItemDeletionService`] build the user-facing move/duplicate/remove and
//! delete actions on top of it.

pub mod deletion;
pub mod transaction;
pub mod transfer;

pub use deletion::{DeletionOutcome, ItemDeletionService};
pub use transaction::{TransactionId, TransactionManager, TransactionSpec};
pub use transfer::{MembershipTransferService, TransferOutcome};
