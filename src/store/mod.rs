//! In-memory aggregate stores with optimistic concurrency.
//!
//! The pull request row is the one contended shared resource in the system.
//! It is never held under a long-lived lock; instead every mutation goes
//! through [`PullReqStore::update_opt_lock`] — a bounded read-mutate-write
//! retry loop on the row's `version` token. Losers of a concurrent write
//! reload and retry (or abort through their mutation closure).

pub mod activity;
pub mod pullreq;
pub mod repo;

pub use activity::ActivityStore;
pub use pullreq::{PullReqFilter, PullReqStore};
pub use repo::RepoStore;

use thiserror::Error;

/// Errors returned by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("resource not found")]
    NotFound,

    /// The row's version moved since it was read.
    #[error("version conflict")]
    VersionConflict,

    /// A uniqueness constraint would be violated.
    #[error("duplicate key: {0}")]
    Duplicate(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Outcome of an optimistic-lock update loop.
///
/// `Aborted` carries the mutation closure's own error; the loop stops
/// immediately without writing. `RetriesExhausted` means the row kept moving
/// under us for the whole retry budget — callers treat it as retryable.
#[derive(Debug, Error)]
pub enum OptLockError<E> {
    #[error("update aborted: {0}")]
    Aborted(E),

    #[error(transparent)]
    Store(StoreError),

    #[error("optimistic lock retries exhausted")]
    RetriesExhausted,
}

/// Retry budget for optimistic-lock update loops.
pub const OPT_LOCK_MAX_ATTEMPTS: u32 = 5;
