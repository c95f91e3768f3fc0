//! Core domain types shared by all services.

pub mod activity;
pub mod ids;
pub mod pullreq;
pub mod refs;

pub use activity::{ActivityKind, ActivityPayload, MergeMethod, PullReqActivity, ReviewDecision};
pub use ids::{InvalidSha, PrincipalId, PullReqId, PullReqNumber, RepoId, Sha};
pub use pullreq::{PullReq, PullReqState};
pub use refs::{branch_from_ref, tag_from_ref, RefChange, RefUpdate, WrongRefNamespace};

use serde::{Deserialize, Serialize};

/// A repository, as the sync services see it.
///
/// `git_uid` is the handle the git executor addresses the repository by;
/// it is distinct from the database id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub id: RepoId,
    pub git_uid: String,
    pub default_branch: String,
}
