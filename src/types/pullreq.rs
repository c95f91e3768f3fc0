//! The pull request aggregate and its state machine.
//!
//! A pull request row is the only contended shared resource in the system.
//! It is mutated exclusively through the optimistic-lock protocol in
//! [`crate::store`]: every committed mutation bumps `version`, and
//! `activity_seq` strictly increases so that timeline entries get unique,
//! ordered positions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{PrincipalId, PullReqId, PullReqNumber, RepoId, Sha};

/// The lifecycle state of a pull request.
///
/// Allowed transitions: `Open -> Closed`, `Open -> Merged`, `Closed -> Open`.
/// `Merged` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullReqState {
    Open,
    Closed,
    Merged,
}

impl PullReqState {
    pub fn is_open(&self) -> bool {
        matches!(self, PullReqState::Open)
    }

    /// Returns true if `next` is a legal transition from this state.
    pub fn can_transition_to(&self, next: PullReqState) -> bool {
        matches!(
            (self, next),
            (PullReqState::Open, PullReqState::Closed)
                | (PullReqState::Open, PullReqState::Merged)
                | (PullReqState::Closed, PullReqState::Open)
        )
    }
}

impl fmt::Display for PullReqState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PullReqState::Open => "open",
            PullReqState::Closed => "closed",
            PullReqState::Merged => "merged",
        };
        write!(f, "{s}")
    }
}

/// The pull request aggregate.
///
/// Merge fields (`merge_base_sha`, `merge_head_sha`, `merge_ref_sha`) are a
/// cache of the last successful mergeability computation. They are cleared
/// whenever the source branch moves and repopulated by the mergeability
/// engine; a populated `merge_ref_sha` means the speculative merge commit
/// exists under the PR's merge ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullReq {
    pub id: PullReqId,

    /// Monotonic per target repository.
    pub number: PullReqNumber,

    pub created_by: PrincipalId,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,

    pub source_repo_id: RepoId,
    pub source_branch: String,

    /// Tip of the source branch as last observed by the sync service.
    /// The mergeability engine's stale-write check compares against this.
    pub source_sha: Sha,

    pub target_repo_id: RepoId,
    pub target_branch: String,

    pub title: String,
    pub state: PullReqState,
    pub is_draft: bool,

    /// Monotonic activity sequence counter; owns timeline ordering.
    pub activity_seq: i64,

    /// Merge base between source and target, if known.
    pub merge_base_sha: Option<Sha>,

    /// Tip of the target branch at the time the merge base was computed.
    pub merge_target_sha: Option<Sha>,

    /// Source SHA the cached merge result was computed for.
    pub merge_head_sha: Option<Sha>,

    /// SHA of the speculative merge commit written to the merge ref.
    pub merge_ref_sha: Option<Sha>,

    /// Optimistic-lock token, bumped by the store on every committed write.
    pub version: i64,
}

impl PullReq {
    /// Clears the cached merge result so the mergeability engine re-runs.
    pub fn mark_merge_unchecked(&mut self) {
        self.merge_head_sha = None;
        self.merge_ref_sha = None;
    }
}
