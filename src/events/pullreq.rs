//! Pull request lifecycle events.
//!
//! Published by the REST controllers (create, reopen, close, merge — out of
//! scope here) and by the sync service when a branch push moves an open PR.
//! The mergeability engine and the downstream webhook/CI consumers subscribe
//! to this category.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bus::MemoryBus;
use crate::types::{MergeMethod, PrincipalId, PullReqId, PullReqNumber, RepoId, Sha};

/// Bus category for pull request events.
pub const CATEGORY: &str = "pullreq";

pub const CREATED: &str = "created";
pub const REOPENED: &str = "reopened";
pub const CLOSED: &str = "closed";
pub const MERGED: &str = "merged";
pub const BRANCH_UPDATED: &str = "branch_updated";

/// Fields common to every pull request event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Base {
    pub pullreq_id: PullReqId,
    pub source_repo_id: RepoId,
    pub target_repo_id: RepoId,
    pub principal_id: PrincipalId,
    pub number: PullReqNumber,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedPayload {
    #[serde(flatten)]
    pub base: Base,
    pub source_sha: Sha,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReopenedPayload {
    #[serde(flatten)]
    pub base: Base,
    pub source_sha: Sha,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedPayload {
    #[serde(flatten)]
    pub base: Base,
    pub source_sha: Sha,
    pub source_branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedPayload {
    #[serde(flatten)]
    pub base: Base,
    pub method: MergeMethod,
    pub merge_sha: Sha,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchUpdatedPayload {
    #[serde(flatten)]
    pub base: Base,
    pub old_sha: Sha,
    pub new_sha: Sha,
    pub old_merge_base_sha: Option<Sha>,
    pub new_merge_base_sha: Option<Sha>,
    pub forced: bool,
}

/// Publishes pull request lifecycle events, logging (never propagating)
/// publish failures: the triggering mutation has already committed.
#[derive(Clone)]
pub struct PullReqEventReporter {
    bus: MemoryBus,
}

impl PullReqEventReporter {
    pub fn new(bus: MemoryBus) -> Self {
        PullReqEventReporter { bus }
    }

    pub fn created(&self, payload: &CreatedPayload) {
        self.publish(CREATED, payload);
    }

    pub fn reopened(&self, payload: &ReopenedPayload) {
        self.publish(REOPENED, payload);
    }

    pub fn closed(&self, payload: &ClosedPayload) {
        self.publish(CLOSED, payload);
    }

    pub fn merged(&self, payload: &MergedPayload) {
        self.publish(MERGED, payload);
    }

    pub fn branch_updated(&self, payload: &BranchUpdatedPayload) {
        self.publish(BRANCH_UPDATED, payload);
    }

    fn publish<P: Serialize>(&self, event_type: &str, payload: &P) {
        match self.bus.publish(CATEGORY, event_type, payload) {
            Ok(event_id) => debug!(%event_id, event_type, "published pullreq event"),
            Err(err) => warn!(event_type, error = %err, "failed to publish pullreq event"),
        }
    }
}
