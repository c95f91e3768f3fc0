//! Git reference events.
//!
//! The producer is invoked synchronously from the post-receive hook handler
//! after the push has already succeeded, so a publish failure can only be
//! logged — the git state is durable regardless, and the next push will
//! reconcile any consumer that missed an event.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bus::MemoryBus;
use crate::types::refs::{BRANCH_PREFIX, TAG_PREFIX};
use crate::types::{PrincipalId, RefChange, RefUpdate, RepoId, Sha};

/// Bus category for git reference events.
pub const CATEGORY: &str = "git";

pub const BRANCH_CREATED: &str = "branch_created";
pub const BRANCH_UPDATED: &str = "branch_updated";
pub const BRANCH_DELETED: &str = "branch_deleted";
pub const TAG_CREATED: &str = "tag_created";
pub const TAG_UPDATED: &str = "tag_updated";
pub const TAG_DELETED: &str = "tag_deleted";

/// Payload for `branch_created` and `tag_created`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedPayload {
    pub repo_id: RepoId,
    pub principal_id: PrincipalId,
    /// Full reference name (`refs/heads/...` or `refs/tags/...`).
    pub ref_name: String,
    pub sha: Sha,
}

/// Payload for `branch_updated` and `tag_updated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatedPayload {
    pub repo_id: RepoId,
    pub principal_id: PrincipalId,
    pub ref_name: String,
    pub old_sha: Sha,
    pub new_sha: Sha,
    pub forced: bool,
}

/// Payload for `branch_deleted` and `tag_deleted`; `sha` is the value the
/// reference pointed at before deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedPayload {
    pub repo_id: RepoId,
    pub principal_id: PrincipalId,
    pub ref_name: String,
    pub sha: Sha,
}

/// Translates raw post-receive reference updates into typed bus events.
#[derive(Clone)]
pub struct GitEventReporter {
    bus: MemoryBus,
}

impl GitEventReporter {
    pub fn new(bus: MemoryBus) -> Self {
        GitEventReporter { bus }
    }

    /// Classifies and publishes every reference update of one push.
    ///
    /// References outside `refs/heads/` and `refs/tags/` are ignored. The
    /// hook never sees an error: by the time this runs the push has
    /// committed, so publishing is fire-and-forget.
    pub fn report_ref_updates(
        &self,
        repo_id: RepoId,
        principal_id: PrincipalId,
        updates: &[RefUpdate],
    ) {
        for update in updates {
            let kind = if update.ref_name.starts_with(BRANCH_PREFIX) {
                RefKind::Branch
            } else if update.ref_name.starts_with(TAG_PREFIX) {
                RefKind::Tag
            } else {
                debug!(ref_name = %update.ref_name, "ignoring reference outside known namespaces");
                continue;
            };

            let Some(change) = update.change() else {
                warn!(ref_name = %update.ref_name, "nil -> nil reference update, skipping");
                continue;
            };

            match change {
                RefChange::Created => self.publish(
                    kind.created_type(),
                    &CreatedPayload {
                        repo_id,
                        principal_id,
                        ref_name: update.ref_name.clone(),
                        sha: update.new.clone(),
                    },
                ),
                RefChange::Updated => self.publish(
                    kind.updated_type(),
                    &UpdatedPayload {
                        repo_id,
                        principal_id,
                        ref_name: update.ref_name.clone(),
                        old_sha: update.old.clone(),
                        new_sha: update.new.clone(),
                        forced: update.forced,
                    },
                ),
                RefChange::Deleted => self.publish(
                    kind.deleted_type(),
                    &DeletedPayload {
                        repo_id,
                        principal_id,
                        ref_name: update.ref_name.clone(),
                        sha: update.old.clone(),
                    },
                ),
            }
        }
    }

    fn publish<P: Serialize>(&self, event_type: &str, payload: &P) {
        match self.bus.publish(CATEGORY, event_type, payload) {
            Ok(event_id) => debug!(%event_id, event_type, "published git event"),
            Err(err) => warn!(event_type, error = %err, "failed to publish git event"),
        }
    }
}

#[derive(Clone, Copy)]
enum RefKind {
    Branch,
    Tag,
}

impl RefKind {
    fn created_type(self) -> &'static str {
        match self {
            RefKind::Branch => BRANCH_CREATED,
            RefKind::Tag => TAG_CREATED,
        }
    }

    fn updated_type(self) -> &'static str {
        match self {
            RefKind::Branch => BRANCH_UPDATED,
            RefKind::Tag => TAG_UPDATED,
        }
    }

    fn deleted_type(self) -> &'static str {
        match self {
            RefKind::Branch => BRANCH_DELETED,
            RefKind::Tag => TAG_DELETED,
        }
    }
}
