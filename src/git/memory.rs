//! Deterministic in-memory git executor.
//!
//! References are a map from full ref name to SHA; merge commits are derived
//! by hashing the (base, head) pair, so the same inputs always produce the
//! same merge SHA. Tests can inject conflicts, merge bases, and an
//! artificial merge delay to exercise the cancellation protocol.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use super::{Commit, GitError, GitExecutor, MergeOutput, MergeParams, RefType, Result, UpdateRefParams};
use crate::types::Sha;

#[derive(Default)]
struct RepoState {
    refs: HashMap<String, Sha>,
    commits: HashMap<Sha, String>,
}

#[derive(Default)]
struct Inner {
    repos: HashMap<String, RepoState>,
    /// `(head, base)` pairs that conflict.
    conflicts: HashSet<(Sha, Sha)>,
    /// Overrides for merge-base lookups; defaults to the second argument.
    merge_bases: HashMap<(Sha, Sha), Sha>,
    /// Artificial latency for `merge`, to race cancellations in tests.
    merge_delay: Option<Duration>,
}

/// In-memory [`GitExecutor`]. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryGit {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryGit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_repo(&self, repo_uid: impl Into<String>) {
        let mut inner = self.lock();
        inner.repos.entry(repo_uid.into()).or_default();
    }

    /// Registers a commit so `get_commit` can resolve it.
    pub fn add_commit(&self, repo_uid: &str, sha: Sha, title: impl Into<String>) {
        let mut inner = self.lock();
        inner
            .repos
            .entry(repo_uid.to_string())
            .or_default()
            .commits
            .insert(sha, title.into());
    }

    /// Points a branch at `sha`, registering the commit as a side effect.
    pub fn set_branch(&self, repo_uid: &str, branch: &str, sha: Sha) {
        let mut inner = self.lock();
        let repo = inner.repos.entry(repo_uid.to_string()).or_default();
        repo.commits.entry(sha.clone()).or_default();
        repo.refs.insert(RefType::Branch.full_name(branch), sha);
    }

    /// Marks the `(head, base)` pair as conflicting.
    pub fn set_conflict(&self, head: Sha, base: Sha) {
        self.lock().conflicts.insert((head, base));
    }

    pub fn set_merge_base(&self, head: Sha, base: Sha, merge_base: Sha) {
        self.lock().merge_bases.insert((head, base), merge_base);
    }

    /// Makes every subsequent merge take at least `delay`.
    pub fn set_merge_delay(&self, delay: Duration) {
        self.lock().merge_delay = Some(delay);
    }

    /// Resolves a full reference name, if present.
    pub fn resolve(&self, repo_uid: &str, full_ref: &str) -> Option<Sha> {
        self.lock()
            .repos
            .get(repo_uid)
            .and_then(|repo| repo.refs.get(full_ref).cloned())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory git lock poisoned")
    }

    fn derive_merge_sha(base: &Sha, head: &Sha) -> Sha {
        let digest = Sha256::new()
            .chain_update(base.as_str())
            .chain_update(head.as_str())
            .finalize();
        let hex = hex::encode(digest);
        Sha::parse(&hex[..40]).expect("sha256 prefix is valid hex")
    }
}

impl GitExecutor for MemoryGit {
    async fn update_ref(&self, params: UpdateRefParams) -> Result<()> {
        let full = params.ref_type.full_name(&params.name);
        let mut inner = self.lock();
        let repo = inner
            .repos
            .get_mut(&params.repo_uid)
            .ok_or_else(|| GitError::NotFound(format!("repository {}", params.repo_uid)))?;

        if let Some(expected) = &params.old_value {
            let actual = repo.refs.get(&full).cloned().unwrap_or_else(Sha::nil);
            if &actual != expected {
                return Err(GitError::PreconditionFailed {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        match params.new_value {
            Some(sha) => {
                repo.commits.entry(sha.clone()).or_default();
                repo.refs.insert(full, sha);
            }
            None => {
                repo.refs.remove(&full);
            }
        }
        Ok(())
    }

    async fn merge(&self, params: MergeParams, cancel: CancellationToken) -> Result<MergeOutput> {
        // Snapshot inputs under the lock, then simulate the slow part
        // outside it.
        let (base_tip, delay) = {
            let inner = self.lock();
            let repo = inner
                .repos
                .get(&params.repo_uid)
                .ok_or_else(|| GitError::NotFound(format!("repository {}", params.repo_uid)))?;

            let source_full = RefType::Branch.full_name(&params.source_branch);
            let source_tip = repo
                .refs
                .get(&source_full)
                .cloned()
                .ok_or_else(|| GitError::NotFound(source_full))?;
            if source_tip != params.head_expected_sha {
                return Err(GitError::PreconditionFailed {
                    expected: params.head_expected_sha.clone(),
                    actual: source_tip,
                });
            }

            let target_full = RefType::Branch.full_name(&params.target_branch);
            let base_tip = repo
                .refs
                .get(&target_full)
                .cloned()
                .ok_or_else(|| GitError::NotFound(target_full))?;

            (base_tip, inner.merge_delay)
        };

        if let Some(delay) = delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(GitError::Cancelled),
            }
        } else if cancel.is_cancelled() {
            return Err(GitError::Cancelled);
        }

        let head = params.head_expected_sha.clone();
        let mut inner = self.lock();
        if inner.conflicts.contains(&(head.clone(), base_tip.clone())) {
            return Err(GitError::MergeConflict {
                head,
                base: base_tip,
            });
        }

        let base_sha = inner
            .merge_bases
            .get(&(head.clone(), base_tip.clone()))
            .cloned()
            .unwrap_or_else(|| base_tip.clone());
        let merge_sha = Self::derive_merge_sha(&base_tip, &head);

        let full_ref = params.ref_type.full_name(&params.ref_name);
        let repo = inner
            .repos
            .get_mut(&params.repo_uid)
            .ok_or_else(|| GitError::NotFound(format!("repository {}", params.repo_uid)))?;
        if !params.force {
            if let Some(existing) = repo.refs.get(&full_ref) {
                return Err(GitError::PreconditionFailed {
                    expected: Sha::nil(),
                    actual: existing.clone(),
                });
            }
        }
        repo.commits.entry(merge_sha.clone()).or_default();
        repo.refs.insert(full_ref, merge_sha.clone());

        Ok(MergeOutput {
            merge_sha,
            base_sha,
            head_sha: head,
        })
    }

    async fn merge_base(&self, _repo_uid: &str, ref1: &Sha, ref2: &Sha) -> Result<Sha> {
        let inner = self.lock();
        Ok(inner
            .merge_bases
            .get(&(ref1.clone(), ref2.clone()))
            .cloned()
            .unwrap_or_else(|| ref2.clone()))
    }

    async fn get_commit(&self, repo_uid: &str, sha: &Sha) -> Result<Commit> {
        let inner = self.lock();
        let repo = inner
            .repos
            .get(repo_uid)
            .ok_or_else(|| GitError::NotFound(format!("repository {repo_uid}")))?;
        repo.commits
            .get(sha)
            .map(|title| Commit {
                sha: sha.clone(),
                title: title.clone(),
            })
            .ok_or_else(|| GitError::NotFound(format!("commit {sha}")))
    }

    async fn get_ref(&self, repo_uid: &str, ref_type: RefType, name: &str) -> Result<Sha> {
        let full = ref_type.full_name(name);
        self.resolve(repo_uid, &full)
            .ok_or(GitError::NotFound(full))
    }
}
