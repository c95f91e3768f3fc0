//! Pull request timeline activities.
//!
//! Activities are append-only rows keyed by `(pullreq_id, order)` where
//! `order` equals the pull request's `activity_seq` at the moment the owning
//! operation committed. Each payload variant carries enough data to render a
//! timeline entry without further lookups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{PrincipalId, PullReqId, Sha};
use super::pullreq::PullReqState;

/// Who produced an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// Produced by the server itself (branch updates, state changes, ...).
    System,
    /// Produced by a user action (reviews, comments, ...).
    User,
}

/// Tagged activity payload. Closed set; immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityPayload {
    /// The source branch moved to a new commit.
    BranchUpdate { old: Sha, new: Sha, forced: bool },

    /// The source branch was deleted; `sha` is the last known tip.
    BranchDelete { sha: Sha },

    /// The pull request changed lifecycle state.
    StateChange {
        old: PullReqState,
        new: PullReqState,
        old_draft: bool,
        new_draft: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// A review was submitted.
    ReviewSubmit {
        decision: ReviewDecision,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// The title was edited.
    TitleChange { old: String, new: String },

    /// The pull request was merged.
    Merge { method: MergeMethod, sha: Sha },
}

/// Review outcome carried by [`ActivityPayload::ReviewSubmit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    ChangesRequested,
    Reviewed,
}

/// How a pull request was merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMethod {
    Merge,
    Squash,
    Rebase,
}

/// One row of the per-PR timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullReqActivity {
    pub pullreq_id: PullReqId,

    /// Position in the timeline; unique per PR, strictly increasing.
    pub order: i64,

    /// Position among replies to the same `order` (0 for top-level rows).
    pub sub_order: i64,

    pub kind: ActivityKind,
    pub payload: ActivityPayload,

    pub created_by: PrincipalId,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,

    /// Set when a user-edited activity was last changed; system activities
    /// are never edited.
    pub edited: Option<DateTime<Utc>>,
}
