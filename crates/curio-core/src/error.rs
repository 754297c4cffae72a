//! Error types shared across the curio workspace.

use thiserror::Error;

/// Errors surfaced by jobs, coordinators, and mutation services.
///
/// Duplicate admissions and collapse-producing moves are *not* errors; they
/// are reported through `Admission`/outcome values by the callers that fold
/// them.
#[derive(Error, Debug)]
pub enum Error {
    /// An operation exceeded its time budget. The underlying call is
    /// disregarded, not cancelled.
    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    /// A native, storage, or network call failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Input was rejected before any job or transaction was created.
    #[error("validation error: {0}")]
    Validation(String),

    /// Persistence layer failure.
    #[error("store error: {0}")]
    Store(String),

    /// Vault/storage layer failure.
    #[error("vault error: {0}")]
    Vault(String),

    /// Item is not present in the shared state.
    #[error("item not found: {0}")]
    ItemNotFound(String),

    /// Collection is not present in the shared state.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for curio operations.
pub type Result<T> = std::result::Result<T, Error>;
