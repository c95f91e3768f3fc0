//! Pull request synchronization.
//!
//! Consumes git branch events and brings every affected open pull request
//! back in line with the repository: head ref, `source_sha`, merge base,
//! timeline activity, and the follow-up pull request event that drives the
//! mergeability engine.
//!
//! Deliveries carry no ordering guarantee and can repeat. Correctness comes
//! from the optimistic-lock mutation: a PR is only touched while it is open
//! and while its recorded `source_sha` still matches the event's `old` SHA,
//! so replays and reordered deliveries abort instead of corrupting state.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bus::{
    HandlerError, HandlerRegistry, HandlerResult, MemoryBus, SubscribeOptions, Subscription,
};
use crate::events::git as git_events;
use crate::events::pullreq as pr_events;
use crate::events::pullreq::PullReqEventReporter;
use crate::git::{GitExecutor, RefType, UpdateRefParams};
use crate::store::{OptLockError, PullReqFilter, PullReqStore, RepoStore, StoreError};
use crate::timeline::ActivityService;
use crate::types::refs::branch_from_ref;
use crate::types::{ActivityPayload, PrincipalId, PullReq, PullReqState, Repo, RepoId, Sha};

/// Reader group joined by every sync consumer.
pub const GROUP: &str = "pullsync:sync";

/// Errors from processing one pull request within a branch event.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Git(#[from] crate::git::GitError),

    #[error("pull request row kept moving, retries exhausted")]
    RetriesExhausted,

    #[error("cross-repository pull request {number} cannot be synced (source repo {source_repo}, target repo {target_repo})")]
    CrossRepo {
        number: i64,
        source_repo: RepoId,
        target_repo: RepoId,
    },
}

/// Mutation-closure abort reasons. Both mean the event no longer applies to
/// this row and the PR must be left untouched.
#[derive(Debug, Error)]
enum SyncAbort {
    #[error("pull request is not open")]
    NotOpen,

    #[error("recorded source SHA does not match the event")]
    SourceMoved,
}

/// Keeps pull requests in sync with branch pushes and deletions.
pub struct SyncService<G> {
    pullreq_store: PullReqStore,
    repo_store: RepoStore,
    git: Arc<G>,
    activities: ActivityService,
    pullreq_events: PullReqEventReporter,
}

impl<G> Clone for SyncService<G> {
    fn clone(&self) -> Self {
        SyncService {
            pullreq_store: self.pullreq_store.clone(),
            repo_store: self.repo_store.clone(),
            git: Arc::clone(&self.git),
            activities: self.activities.clone(),
            pullreq_events: self.pullreq_events.clone(),
        }
    }
}

impl<G: GitExecutor> SyncService<G> {
    pub fn new(
        pullreq_store: PullReqStore,
        repo_store: RepoStore,
        git: Arc<G>,
        activities: ActivityService,
        pullreq_events: PullReqEventReporter,
    ) -> Self {
        SyncService {
            pullreq_store,
            repo_store,
            git,
            activities,
            pullreq_events,
        }
    }

    /// Joins the sync reader group on the git event category.
    pub fn subscribe(
        &self,
        bus: &MemoryBus,
        consumer_id: &str,
        options: SubscribeOptions,
    ) -> Result<Subscription, crate::bus::BusError> {
        let mut registry = HandlerRegistry::new();

        let service = self.clone();
        registry.register(
            git_events::BRANCH_UPDATED,
            move |_ctx, payload: git_events::UpdatedPayload| {
                let service = service.clone();
                async move { service.handle_branch_updated(payload).await }
            },
        );

        let service = self.clone();
        registry.register(
            git_events::BRANCH_DELETED,
            move |_ctx, payload: git_events::DeletedPayload| {
                let service = service.clone();
                async move { service.handle_branch_deleted(payload).await }
            },
        );

        bus.subscribe(git_events::CATEGORY, GROUP, consumer_id, registry, options)
    }

    async fn handle_branch_updated(&self, payload: git_events::UpdatedPayload) -> HandlerResult {
        let repo = self
            .repo_store
            .find(payload.repo_id)
            .await
            .map_err(not_found_discards)?;
        let branch = match branch_from_ref(&payload.ref_name) {
            Ok(branch) => branch,
            Err(err) => return Err(HandlerError::discard(err.to_string())),
        };

        // The push moved this branch, so every cached speculative merge of a
        // PR *targeting* it is stale even though those PRs' sources did not
        // change. Clear their merge data; the merge base stays as a
        // last-known value.
        let reset = self
            .pullreq_store
            .reset_merge_check_status(payload.repo_id, branch)
            .await;
        if reset > 0 {
            debug!(
                branch,
                count = reset,
                "cleared merge data of pull requests targeting the pushed branch"
            );
        }

        // The pushed commit must still exist; if the branch has already been
        // rewound past it the event is moot.
        match self.git.get_commit(&repo.git_uid, &payload.new_sha).await {
            Ok(_) => {}
            Err(err) if err.is_discardable() => return Err(HandlerError::discard(err.to_string())),
            Err(err) => return Err(HandlerError::failed(err)),
        }

        // Per-PR failures are logged and isolated: they fail neither the
        // sibling PRs nor the delivery.
        for pr in self.open_prs_from(payload.repo_id, branch).await {
            if let Err(err) = self
                .sync_one(&repo, &pr, &payload.old_sha, &payload.new_sha, payload.forced, payload.principal_id)
                .await
            {
                warn!(
                    pullreq = %pr.number,
                    branch,
                    error = %err,
                    "failed to sync pull request after branch update"
                );
            }
        }
        Ok(())
    }

    /// Brings one open PR in line with a source branch push.
    async fn sync_one(
        &self,
        repo: &Repo,
        pr: &PullReq,
        old: &Sha,
        new: &Sha,
        forced: bool,
        principal_id: PrincipalId,
    ) -> Result<(), SyncError> {
        if pr.source_repo_id != pr.target_repo_id {
            return Err(SyncError::CrossRepo {
                number: pr.number.0,
                source_repo: pr.source_repo_id,
                target_repo: pr.target_repo_id,
            });
        }

        // Keep the PR head ref pointing at the current source tip, expecting
        // the previous one. A racing update (or a replayed delivery) fails
        // the precondition; the PR is skipped this round and the next event
        // reconciles.
        match self
            .git
            .update_ref(UpdateRefParams {
                repo_uid: repo.git_uid.clone(),
                ref_type: RefType::PullReqHead,
                name: pr.number.0.to_string(),
                new_value: Some(new.clone()),
                old_value: Some(old.clone()),
            })
            .await
        {
            Ok(()) => {}
            Err(crate::git::GitError::PreconditionFailed { expected, actual }) => {
                debug!(
                    pullreq = %pr.number,
                    expected = %expected.short(),
                    actual = %actual.short(),
                    "head ref moved concurrently, skipping"
                );
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        let target_sha = self
            .git
            .get_ref(&repo.git_uid, RefType::Branch, &pr.target_branch)
            .await?;
        let merge_base = self.git.merge_base(&repo.git_uid, new, &target_sha).await?;
        let old_merge_base = pr.merge_base_sha.clone();

        let committed = match self
            .pullreq_store
            .update_opt_lock(pr, |row| {
                if !row.state.is_open() {
                    return Err(SyncAbort::NotOpen);
                }
                if &row.source_sha != old {
                    return Err(SyncAbort::SourceMoved);
                }
                row.activity_seq += 1;
                row.source_sha = new.clone();
                row.merge_target_sha = Some(target_sha.clone());
                row.merge_base_sha = Some(merge_base.clone());
                row.mark_merge_unchecked();
                Ok(())
            })
            .await
        {
            Ok(committed) => committed,
            Err(OptLockError::Aborted(reason)) => {
                debug!(pullreq = %pr.number, %reason, "skipping pull request");
                return Ok(());
            }
            Err(OptLockError::Store(err)) => return Err(err.into()),
            Err(OptLockError::RetriesExhausted) => return Err(SyncError::RetriesExhausted),
        };

        self.activities
            .append_best_effort(
                &committed,
                committed.activity_seq,
                principal_id,
                ActivityPayload::BranchUpdate {
                    old: old.clone(),
                    new: new.clone(),
                    forced,
                },
            )
            .await;

        self.pullreq_events
            .branch_updated(&pr_events::BranchUpdatedPayload {
                base: pr_events::Base {
                    pullreq_id: committed.id,
                    source_repo_id: committed.source_repo_id,
                    target_repo_id: committed.target_repo_id,
                    principal_id,
                    number: committed.number,
                },
                old_sha: old.clone(),
                new_sha: new.clone(),
                old_merge_base_sha: old_merge_base,
                new_merge_base_sha: committed.merge_base_sha.clone(),
                forced,
            });

        info!(
            pullreq = %committed.number,
            new_sha = %new.short(),
            "pull request synced to branch update"
        );
        Ok(())
    }

    async fn handle_branch_deleted(&self, payload: git_events::DeletedPayload) -> HandlerResult {
        let branch = match branch_from_ref(&payload.ref_name) {
            Ok(branch) => branch,
            Err(err) => return Err(HandlerError::discard(err.to_string())),
        };

        for pr in self.open_prs_from(payload.repo_id, branch).await {
            if let Err(err) = self.close_one(&pr, &payload.sha, payload.principal_id).await {
                warn!(
                    pullreq = %pr.number,
                    branch,
                    error = %err,
                    "failed to close pull request after branch deletion"
                );
            }
        }
        Ok(())
    }

    /// Closes one open PR whose source branch was deleted.
    ///
    /// Two activities are written — the deletion itself, then the state
    /// change — so the sequence is advanced by two in a single committed
    /// mutation.
    async fn close_one(
        &self,
        pr: &PullReq,
        deleted_sha: &Sha,
        principal_id: PrincipalId,
    ) -> Result<(), SyncError> {
        let committed = match self
            .pullreq_store
            .update_opt_lock(pr, |row| {
                if !row.state.is_open() {
                    return Err(SyncAbort::NotOpen);
                }
                row.activity_seq += 2;
                row.state = PullReqState::Closed;
                row.mark_merge_unchecked();
                Ok(())
            })
            .await
        {
            Ok(committed) => committed,
            Err(OptLockError::Aborted(reason)) => {
                debug!(pullreq = %pr.number, %reason, "skipping pull request");
                return Ok(());
            }
            Err(OptLockError::Store(err)) => return Err(err.into()),
            Err(OptLockError::RetriesExhausted) => return Err(SyncError::RetriesExhausted),
        };

        self.activities
            .append_best_effort(
                &committed,
                committed.activity_seq - 1,
                principal_id,
                ActivityPayload::BranchDelete {
                    sha: deleted_sha.clone(),
                },
            )
            .await;
        self.activities
            .append_best_effort(
                &committed,
                committed.activity_seq,
                principal_id,
                ActivityPayload::StateChange {
                    old: PullReqState::Open,
                    new: PullReqState::Closed,
                    old_draft: committed.is_draft,
                    new_draft: committed.is_draft,
                    message: Some("source branch deleted".to_string()),
                },
            )
            .await;

        self.pullreq_events.closed(&pr_events::ClosedPayload {
            base: pr_events::Base {
                pullreq_id: committed.id,
                source_repo_id: committed.source_repo_id,
                target_repo_id: committed.target_repo_id,
                principal_id,
                number: committed.number,
            },
            source_sha: committed.source_sha.clone(),
            source_branch: committed.source_branch.clone(),
        });

        info!(pullreq = %committed.number, "pull request closed after branch deletion");
        Ok(())
    }

    async fn open_prs_from(&self, repo_id: RepoId, branch: &str) -> Vec<PullReq> {
        self.pullreq_store
            .list(&PullReqFilter::open_from_branch(repo_id, branch))
            .await
    }
}

fn not_found_discards(err: StoreError) -> HandlerError {
    match err {
        StoreError::NotFound => HandlerError::discard("repository not found"),
        other => HandlerError::failed(other),
    }
}
