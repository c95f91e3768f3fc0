//! Git executor interface.
//!
//! The actual clone/merge/ref-update primitives live in an external git
//! service; this module defines the call contract the sync and mergeability
//! services program against, plus a deterministic in-memory implementation
//! ([`MemoryGit`]) used by tests and local runs.

pub mod memory;

pub use memory::MemoryGit;

use std::future::Future;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::types::Sha;

/// Server-maintained reference namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefType {
    Branch,
    Tag,
    /// `refs/pullreq/{number}/head` — always points at the PR's current
    /// source commit so clients can fetch PR state without the source
    /// branch.
    PullReqHead,
    /// `refs/pullreq/{number}/merge` — the speculative merge commit.
    PullReqMerge,
}

impl RefType {
    /// Expands a short name into the full reference path.
    pub fn full_name(&self, name: &str) -> String {
        match self {
            RefType::Branch => format!("refs/heads/{name}"),
            RefType::Tag => format!("refs/tags/{name}"),
            RefType::PullReqHead => format!("refs/pullreq/{name}/head"),
            RefType::PullReqMerge => format!("refs/pullreq/{name}/merge"),
        }
    }
}

/// Errors returned by the git executor.
///
/// `PreconditionFailed`, `MergeConflict`, `NotFound` and `Cancelled` are the
/// discardable class: the triggering event is no longer actionable and must
/// not be retried. Everything else is transient.
#[derive(Debug, Error)]
pub enum GitError {
    /// A CAS expectation on a reference or head SHA did not hold.
    #[error("reference precondition failed: expected {expected}, found {actual}")]
    PreconditionFailed { expected: Sha, actual: Sha },

    /// The three-way merge hit conflicting changes.
    #[error("merge conflict between {head} and {base}")]
    MergeConflict { head: Sha, base: Sha },

    /// Repository, reference, or object does not exist.
    #[error("git object not found: {0}")]
    NotFound(String),

    /// The caller's cancellation token fired mid-operation.
    #[error("git operation cancelled")]
    Cancelled,

    /// Transient executor failure.
    #[error("git executor failure: {0}")]
    Internal(String),
}

impl GitError {
    /// True for outcomes that supersede rather than fail the triggering
    /// event.
    pub fn is_discardable(&self) -> bool {
        matches!(
            self,
            GitError::PreconditionFailed { .. }
                | GitError::MergeConflict { .. }
                | GitError::NotFound(_)
                | GitError::Cancelled
        )
    }
}

/// Result type for git operations.
pub type Result<T> = std::result::Result<T, GitError>;

/// Parameters for [`GitExecutor::update_ref`].
#[derive(Debug, Clone)]
pub struct UpdateRefParams {
    pub repo_uid: String,
    pub ref_type: RefType,
    /// Short name; expanded via [`RefType::full_name`].
    pub name: String,
    /// `None` deletes the reference.
    pub new_value: Option<Sha>,
    /// If set, the update only applies while the reference still points
    /// here (CAS on the ref itself). `None` skips the check.
    pub old_value: Option<Sha>,
}

/// Parameters for [`GitExecutor::merge`].
#[derive(Debug, Clone)]
pub struct MergeParams {
    pub repo_uid: String,
    /// Branch the PR targets; its tip is the merge base side.
    pub target_branch: String,
    /// Branch being merged in.
    pub source_branch: String,
    /// The source-branch tip this computation was started for. The merge
    /// fails with `PreconditionFailed` if the branch has moved on.
    pub head_expected_sha: Sha,
    pub ref_type: RefType,
    /// Short name of the ref the merge commit is written to.
    pub ref_name: String,
    /// Overwrite a stale merge ref unconditionally.
    pub force: bool,
}

/// Result of a successful speculative merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutput {
    /// SHA of the created merge commit (now behind the merge ref).
    pub merge_sha: Sha,
    /// Merge base between source and target.
    pub base_sha: Sha,
    /// The source tip that was merged (equals `head_expected_sha`).
    pub head_sha: Sha,
}

/// A commit, as far as this crate needs one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub sha: Sha,
    pub title: String,
}

/// The call contract against the external git service.
///
/// All operations are async I/O; `merge` can be slow relative to push
/// frequency and must observe the caller's cancellation token.
pub trait GitExecutor: Send + Sync + 'static {
    fn update_ref(&self, params: UpdateRefParams) -> impl Future<Output = Result<()>> + Send;

    fn merge(
        &self,
        params: MergeParams,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<MergeOutput>> + Send;

    fn merge_base(
        &self,
        repo_uid: &str,
        ref1: &Sha,
        ref2: &Sha,
    ) -> impl Future<Output = Result<Sha>> + Send;

    fn get_commit(&self, repo_uid: &str, sha: &Sha) -> impl Future<Output = Result<Commit>> + Send;

    /// Resolves a reference to the SHA it points at.
    fn get_ref(
        &self,
        repo_uid: &str,
        ref_type: RefType,
        name: &str,
    ) -> impl Future<Output = Result<Sha>> + Send;
}
