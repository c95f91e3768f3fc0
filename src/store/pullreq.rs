//! The pull request store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use super::{OptLockError, Result, StoreError, OPT_LOCK_MAX_ATTEMPTS};
use crate::types::{PullReq, PullReqId, PullReqNumber, PullReqState, RepoId};

/// Filter for [`PullReqStore::list`].
#[derive(Debug, Clone, Default)]
pub struct PullReqFilter {
    pub source_repo_id: Option<RepoId>,
    pub source_branch: Option<String>,
    pub states: Vec<PullReqState>,

    /// Page size bound. The sync service passes a large limit here — open
    /// PRs per branch are practically bounded, so no real pagination is
    /// done (matching the original system's semantics).
    pub size: usize,
}

impl PullReqFilter {
    /// Filter for open pull requests sourced from `branch` in `repo`.
    pub fn open_from_branch(repo: RepoId, branch: impl Into<String>) -> Self {
        PullReqFilter {
            source_repo_id: Some(repo),
            source_branch: Some(branch.into()),
            states: vec![PullReqState::Open],
            size: 1_000_000,
        }
    }

    fn matches(&self, pr: &PullReq) -> bool {
        if let Some(repo) = self.source_repo_id {
            if pr.source_repo_id != repo {
                return false;
            }
        }
        if let Some(branch) = &self.source_branch {
            if &pr.source_branch != branch {
                return false;
            }
        }
        if !self.states.is_empty() && !self.states.contains(&pr.state) {
            return false;
        }
        true
    }
}

#[derive(Default)]
struct Inner {
    rows: HashMap<PullReqId, PullReq>,
    next_id: i64,
}

/// Versioned in-memory pull request store. Cheap to clone; clones share
/// state.
#[derive(Clone, Default)]
pub struct PullReqStore {
    inner: Arc<Mutex<Inner>>,
}

impl PullReqStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn find(&self, id: PullReqId) -> Result<PullReq> {
        let inner = self.inner.lock().expect("pullreq store lock poisoned");
        inner.rows.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    pub async fn find_by_number(
        &self,
        target_repo_id: RepoId,
        number: PullReqNumber,
    ) -> Result<PullReq> {
        let inner = self.inner.lock().expect("pullreq store lock poisoned");
        inner
            .rows
            .values()
            .find(|pr| pr.target_repo_id == target_repo_id && pr.number == number)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    /// Lists matching rows ordered by number ascending, bounded by
    /// `filter.size`.
    pub async fn list(&self, filter: &PullReqFilter) -> Vec<PullReq> {
        let inner = self.inner.lock().expect("pullreq store lock poisoned");
        let mut rows: Vec<PullReq> = inner
            .rows
            .values()
            .filter(|pr| filter.matches(pr))
            .cloned()
            .collect();
        rows.sort_by_key(|pr| pr.number);
        if filter.size > 0 {
            rows.truncate(filter.size);
        }
        rows
    }

    /// Inserts a new row; assigns the id and initializes the version token.
    pub async fn create(&self, mut pr: PullReq) -> Result<PullReq> {
        let mut inner = self.inner.lock().expect("pullreq store lock poisoned");
        if inner
            .rows
            .values()
            .any(|row| row.target_repo_id == pr.target_repo_id && row.number == pr.number)
        {
            return Err(StoreError::Duplicate(format!(
                "pull request {} in repo {}",
                pr.number, pr.target_repo_id
            )));
        }
        inner.next_id += 1;
        pr.id = PullReqId(inner.next_id);
        pr.version = 1;
        pr.created = Utc::now();
        pr.updated = pr.created;
        inner.rows.insert(pr.id, pr.clone());
        Ok(pr)
    }

    /// Clears the cached merge data of every open pull request targeting
    /// `branch` in `repo`, bumping each row's version. The merge base is
    /// kept as a last-known value. Returns the number of rows touched.
    pub async fn reset_merge_check_status(&self, repo: RepoId, branch: &str) -> usize {
        let mut inner = self.inner.lock().expect("pullreq store lock poisoned");
        let now = Utc::now();
        let mut touched = 0;
        for row in inner.rows.values_mut() {
            if row.target_repo_id == repo && row.target_branch == branch && row.state.is_open() {
                row.merge_target_sha = None;
                row.mark_merge_unchecked();
                row.version += 1;
                row.updated = now;
                touched += 1;
            }
        }
        touched
    }

    /// Writes `pr` back if its version still matches the stored row; bumps
    /// the version on success.
    pub async fn update(&self, pr: &PullReq) -> Result<PullReq> {
        let mut inner = self.inner.lock().expect("pullreq store lock poisoned");
        let stored = inner.rows.get_mut(&pr.id).ok_or(StoreError::NotFound)?;
        if stored.version != pr.version {
            return Err(StoreError::VersionConflict);
        }
        let mut updated = pr.clone();
        updated.version += 1;
        updated.updated = Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }

    /// Read-mutate-write with bounded retry on version conflict.
    ///
    /// `mutate` is applied to a fresh copy of the row on every attempt; it
    /// may abort the whole loop by returning an error, in which case nothing
    /// is written. Returns the committed row on success.
    pub async fn update_opt_lock<E, F>(
        &self,
        pr: &PullReq,
        mut mutate: F,
    ) -> std::result::Result<PullReq, OptLockError<E>>
    where
        F: FnMut(&mut PullReq) -> std::result::Result<(), E>,
    {
        let mut current = pr.clone();
        for _ in 0..OPT_LOCK_MAX_ATTEMPTS {
            let mut modified = current.clone();
            mutate(&mut modified).map_err(OptLockError::Aborted)?;

            match self.update(&modified).await {
                Ok(committed) => return Ok(committed),
                Err(StoreError::VersionConflict) => {
                    current = self.find(pr.id).await.map_err(OptLockError::Store)?;
                }
                Err(err) => return Err(OptLockError::Store(err)),
            }
        }
        Err(OptLockError::RetriesExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::pull_req_fixture;
    use crate::types::Sha;
    use std::convert::Infallible;

    fn sha(c: char) -> Sha {
        Sha::parse(c.to_string().repeat(40)).unwrap()
    }

    #[tokio::test]
    async fn create_assigns_id_and_version() {
        let store = PullReqStore::new();
        let pr = store
            .create(pull_req_fixture(1, 1, "feature", sha('a')))
            .await
            .unwrap();
        assert_eq!(pr.version, 1);
        assert!(pr.id.0 > 0);
    }

    #[tokio::test]
    async fn duplicate_number_rejected() {
        let store = PullReqStore::new();
        store
            .create(pull_req_fixture(1, 1, "feature", sha('a')))
            .await
            .unwrap();
        let err = store
            .create(pull_req_fixture(1, 1, "other", sha('b')))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn update_detects_version_conflict() {
        let store = PullReqStore::new();
        let pr = store
            .create(pull_req_fixture(1, 1, "feature", sha('a')))
            .await
            .unwrap();

        // First writer wins.
        let mut first = pr.clone();
        first.title = "first".to_string();
        store.update(&first).await.unwrap();

        // Second writer holds the stale version.
        let mut second = pr;
        second.title = "second".to_string();
        let err = store.update(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict));
    }

    #[tokio::test]
    async fn opt_lock_retries_past_conflicts() {
        let store = PullReqStore::new();
        let pr = store
            .create(pull_req_fixture(1, 1, "feature", sha('a')))
            .await
            .unwrap();

        // Move the row underneath the caller's snapshot.
        let mut moved = pr.clone();
        moved.activity_seq = 10;
        store.update(&moved).await.unwrap();

        // The loop reloads and applies the mutation on the fresh row.
        let committed = store
            .update_opt_lock::<Infallible, _>(&pr, |row| {
                row.activity_seq += 1;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(committed.activity_seq, 11);
    }

    #[tokio::test]
    async fn opt_lock_abort_writes_nothing() {
        let store = PullReqStore::new();
        let pr = store
            .create(pull_req_fixture(1, 1, "feature", sha('a')))
            .await
            .unwrap();

        let result = store
            .update_opt_lock(&pr, |row| {
                row.activity_seq += 1;
                Err("not applicable")
            })
            .await;
        assert!(matches!(result, Err(OptLockError::Aborted("not applicable"))));

        let reloaded = store.find(pr.id).await.unwrap();
        assert_eq!(reloaded.activity_seq, pr.activity_seq);
        assert_eq!(reloaded.version, pr.version);
    }

    #[tokio::test]
    async fn list_filters_by_branch_and_state() {
        let store = PullReqStore::new();
        store
            .create(pull_req_fixture(1, 1, "feature-x", sha('a')))
            .await
            .unwrap();
        store
            .create(pull_req_fixture(1, 2, "feature-y", sha('b')))
            .await
            .unwrap();
        let mut closed = pull_req_fixture(1, 3, "feature-x", sha('c'));
        closed.state = PullReqState::Closed;
        store.create(closed).await.unwrap();

        let open_x = store
            .list(&PullReqFilter::open_from_branch(RepoId(1), "feature-x"))
            .await;
        assert_eq!(open_x.len(), 1);
        assert_eq!(open_x[0].number, PullReqNumber(1));
    }

    #[tokio::test]
    async fn reset_merge_check_status_touches_only_open_targeting_rows() {
        let store = PullReqStore::new();

        let mut targeting = pull_req_fixture(1, 1, "feature", sha('a'));
        targeting.merge_base_sha = Some(sha('d'));
        targeting.merge_target_sha = Some(sha('e'));
        targeting.merge_head_sha = Some(sha('a'));
        targeting.merge_ref_sha = Some(sha('f'));
        let targeting = store.create(targeting).await.unwrap();

        let mut closed = pull_req_fixture(1, 2, "feature-2", sha('b'));
        closed.state = PullReqState::Closed;
        closed.merge_ref_sha = Some(sha('f'));
        let closed = store.create(closed).await.unwrap();

        let mut elsewhere = pull_req_fixture(1, 3, "feature-3", sha('c'));
        elsewhere.target_branch = "develop".to_string();
        elsewhere.merge_ref_sha = Some(sha('f'));
        let elsewhere = store.create(elsewhere).await.unwrap();

        let touched = store.reset_merge_check_status(RepoId(1), "main").await;
        assert_eq!(touched, 1);

        let reloaded = store.find(targeting.id).await.unwrap();
        assert!(reloaded.merge_target_sha.is_none());
        assert!(reloaded.merge_head_sha.is_none());
        assert!(reloaded.merge_ref_sha.is_none());
        // Merge base survives as a last-known value.
        assert_eq!(reloaded.merge_base_sha, Some(sha('d')));
        assert_eq!(reloaded.version, targeting.version + 1);

        // Closed rows and rows targeting other branches keep their cache.
        assert!(store.find(closed.id).await.unwrap().merge_ref_sha.is_some());
        assert!(store.find(elsewhere.id).await.unwrap().merge_ref_sha.is_some());
    }

    #[tokio::test]
    async fn concurrent_increments_never_lose_updates() {
        let store = PullReqStore::new();
        let pr = store
            .create(pull_req_fixture(1, 1, "feature", sha('a')))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let pr = pr.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update_opt_lock::<Infallible, _>(&pr, |row| {
                        row.activity_seq += 1;
                        Ok(())
                    })
                    .await
            }));
        }

        let mut committed = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                committed += 1;
            }
        }

        let final_row = store.find(pr.id).await.unwrap();
        assert_eq!(final_row.activity_seq, committed as i64);
    }
}
