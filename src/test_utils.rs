//! Shared fixtures for unit and integration tests.

use chrono::Utc;

use crate::types::{
    PrincipalId, PullReq, PullReqId, PullReqNumber, PullReqState, Repo, RepoId, Sha,
};

/// An open same-repo pull request with empty merge cache. `id` and `version`
/// are placeholders until [`crate::store::PullReqStore::create`] assigns them.
pub fn pull_req_fixture(repo: i64, number: i64, branch: &str, source_sha: Sha) -> PullReq {
    let now = Utc::now();
    PullReq {
        id: PullReqId(0),
        number: PullReqNumber(number),
        created_by: PrincipalId(1),
        created: now,
        updated: now,
        source_repo_id: RepoId(repo),
        source_branch: branch.to_string(),
        source_sha,
        target_repo_id: RepoId(repo),
        target_branch: "main".to_string(),
        title: format!("change {number}"),
        state: PullReqState::Open,
        is_draft: false,
        activity_seq: 0,
        merge_base_sha: None,
        merge_target_sha: None,
        merge_head_sha: None,
        merge_ref_sha: None,
        version: 0,
    }
}

pub fn repo_fixture(id: i64) -> Repo {
    Repo {
        id: RepoId(id),
        git_uid: format!("repo-{id}"),
        default_branch: "main".to_string(),
    }
}
