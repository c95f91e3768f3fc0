//! Mergeability engine.
//!
//! Consumes pull request lifecycle events and keeps the speculative merge
//! commit (the PR's merge ref) plus the cached merge fields on the row up to
//! date. Computations can be slow; the engine cancels superseded runs
//! in-process ([`CancelRegistry`]) and across instances ([`CancelChannel`]),
//! but neither is load-bearing: the authoritative guard is the stale-write
//! check at persist time, which only stores a result while the row's
//! `source_sha` still matches the SHA the merge was computed for.

pub mod cancel;
pub mod channel;


pub use cancel::{CancelGuard, CancelRegistry};
pub use channel::CancelChannel;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bus::{
    HandlerError, HandlerRegistry, HandlerResult, MemoryBus, SubscribeOptions, Subscription,
};
use crate::events::pullreq as pr_events;
use crate::git::{GitError, GitExecutor, MergeParams, RefType, UpdateRefParams};
use crate::store::{OptLockError, PullReqStore, RepoStore, StoreError};
use crate::types::{PullReqNumber, RepoId, Sha};

/// Reader group joined by every mergeability consumer.
pub const GROUP: &str = "pullsync:mergecheck";

/// Computes and caches pull request mergeability.
pub struct MergeCheckService<G> {
    pullreq_store: PullReqStore,
    repo_store: RepoStore,
    git: Arc<G>,
    registry: CancelRegistry,
    channel: CancelChannel,
}

impl<G> Clone for MergeCheckService<G> {
    fn clone(&self) -> Self {
        MergeCheckService {
            pullreq_store: self.pullreq_store.clone(),
            repo_store: self.repo_store.clone(),
            git: Arc::clone(&self.git),
            registry: self.registry.clone(),
            channel: self.channel.clone(),
        }
    }
}

impl<G: GitExecutor> MergeCheckService<G> {
    pub fn new(
        pullreq_store: PullReqStore,
        repo_store: RepoStore,
        git: Arc<G>,
        channel: CancelChannel,
    ) -> Self {
        MergeCheckService {
            pullreq_store,
            repo_store,
            git,
            registry: CancelRegistry::new(),
            channel,
        }
    }

    /// Joins the mergeability reader group on the pull request category and
    /// starts the cancellation-broadcast listener.
    pub fn subscribe(
        &self,
        bus: &MemoryBus,
        consumer_id: &str,
        options: SubscribeOptions,
    ) -> Result<Subscription, crate::bus::BusError> {
        let mut registry = HandlerRegistry::new();

        let service = self.clone();
        registry.register(
            pr_events::CREATED,
            move |_ctx, payload: pr_events::CreatedPayload| {
                let service = service.clone();
                async move {
                    service
                        .update_merge_data(
                            payload.base.target_repo_id,
                            payload.base.number,
                            None,
                            payload.source_sha,
                        )
                        .await
                }
            },
        );

        let service = self.clone();
        registry.register(
            pr_events::REOPENED,
            move |_ctx, payload: pr_events::ReopenedPayload| {
                let service = service.clone();
                async move {
                    service
                        .update_merge_data(
                            payload.base.target_repo_id,
                            payload.base.number,
                            None,
                            payload.source_sha,
                        )
                        .await
                }
            },
        );

        let service = self.clone();
        registry.register(
            pr_events::BRANCH_UPDATED,
            move |_ctx, payload: pr_events::BranchUpdatedPayload| {
                let service = service.clone();
                async move {
                    service
                        .update_merge_data(
                            payload.base.target_repo_id,
                            payload.base.number,
                            Some(payload.old_sha),
                            payload.new_sha,
                        )
                        .await
                }
            },
        );

        let service = self.clone();
        registry.register(
            pr_events::CLOSED,
            move |_ctx, payload: pr_events::ClosedPayload| {
                let service = service.clone();
                async move {
                    service.registry.cancel(&payload.source_sha);
                    service.channel.announce(payload.source_sha.clone());
                    service
                        .delete_merge_ref(payload.base.target_repo_id, payload.base.number)
                        .await
                }
            },
        );

        let service = self.clone();
        registry.register(
            pr_events::MERGED,
            move |_ctx, payload: pr_events::MergedPayload| {
                let service = service.clone();
                async move {
                    service
                        .delete_merge_ref(payload.base.target_repo_id, payload.base.number)
                        .await
                }
            },
        );

        let mut sub = bus.subscribe(pr_events::CATEGORY, GROUP, consumer_id, registry, options)?;
        sub.attach(self.spawn_cancel_listener(sub.token()));
        Ok(sub)
    }

    /// Listens for superseded SHAs announced by peer instances and cancels
    /// any matching local computation.
    fn spawn_cancel_listener(
        &self,
        stop: tokio_util::sync::CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let registry = self.registry.clone();
        let mut rx = self.channel.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    received = rx.recv() => match received {
                        Ok(sha) => registry.cancel(&sha),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            // Missed cancellations only waste work.
                            debug!(missed, "cancellation listener lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        })
    }

    /// Recomputes mergeability for one pull request.
    ///
    /// `old` is the SHA the triggering event superseded (if any); `new` is
    /// the source tip the computation runs for. The result is persisted only
    /// while the row's `source_sha` still equals `new`.
    pub async fn update_merge_data(
        &self,
        target_repo_id: RepoId,
        number: PullReqNumber,
        old: Option<Sha>,
        new: Sha,
    ) -> HandlerResult {
        let pr = match self.pullreq_store.find_by_number(target_repo_id, number).await {
            Ok(pr) => pr,
            Err(StoreError::NotFound) => {
                return Err(HandlerError::discard("pull request not found"))
            }
            Err(err) => return Err(HandlerError::failed(err)),
        };
        if !pr.state.is_open() {
            return Err(HandlerError::discard("pull request is not open"));
        }
        if pr.source_repo_id != pr.target_repo_id {
            return Err(HandlerError::discard(
                "cross-repository pull requests are not checked",
            ));
        }
        if pr.source_sha != new {
            return Err(HandlerError::discard(
                "event superseded by a newer source SHA",
            ));
        }

        // Supersede any computation still running for the previous tip, here
        // and on peer instances.
        if let Some(old) = old {
            self.registry.cancel(&old);
            self.channel.announce(old);
        }
        let guard = self.registry.register(new.clone());

        let repo = match self.repo_store.find(target_repo_id).await {
            Ok(repo) => repo,
            Err(StoreError::NotFound) => {
                return Err(HandlerError::discard("repository not found"))
            }
            Err(err) => return Err(HandlerError::failed(err)),
        };

        let output = match self
            .git
            .merge(
                MergeParams {
                    repo_uid: repo.git_uid.clone(),
                    target_branch: pr.target_branch.clone(),
                    source_branch: pr.source_branch.clone(),
                    head_expected_sha: new.clone(),
                    ref_type: RefType::PullReqMerge,
                    ref_name: pr.number.0.to_string(),
                    force: true,
                },
                guard.token(),
            )
            .await
        {
            Ok(output) => output,
            Err(GitError::MergeConflict { head, base }) => {
                // Unmergeable is a discardable outcome: the row keeps the
                // cleared merge fields from the last sync, signalling
                // "unchecked / not mergeable right now".
                debug!(
                    pullreq = %pr.number,
                    head = %head.short(),
                    base = %base.short(),
                    "merge conflict"
                );
                return Err(HandlerError::discard("merge conflict"));
            }
            Err(err) if err.is_discardable() => {
                debug!(pullreq = %pr.number, error = %err, "mergeability run superseded");
                return Err(HandlerError::discard(err.to_string()));
            }
            Err(err) => return Err(HandlerError::failed(err)),
        };

        info!(
            pullreq = %pr.number,
            merge_sha = %output.merge_sha.short(),
            "computed speculative merge"
        );
        self.persist(
            &pr,
            &output.head_sha,
            Some(output.base_sha),
            Some(output.merge_sha),
        )
        .await
    }

    /// Stores a computed result, rejecting it if the row has moved on.
    async fn persist(
        &self,
        pr: &crate::types::PullReq,
        head: &Sha,
        base: Option<Sha>,
        merge_ref: Option<Sha>,
    ) -> HandlerResult {
        let result = self
            .pullreq_store
            .update_opt_lock(pr, |row| {
                if !row.state.is_open() {
                    return Err("pull request is no longer open");
                }
                // The authoritative stale-write check: only a result for the
                // current source tip may be stored.
                if &row.source_sha != head {
                    return Err("source branch moved during the computation");
                }
                row.merge_head_sha = Some(head.clone());
                row.merge_base_sha = base.clone().or(row.merge_base_sha.take());
                row.merge_ref_sha = merge_ref.clone();
                Ok(())
            })
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(OptLockError::Aborted(reason)) => Err(HandlerError::discard(reason)),
            Err(OptLockError::Store(err)) => Err(HandlerError::failed(err)),
            Err(OptLockError::RetriesExhausted) => {
                Err(HandlerError::failed("pull request row kept moving"))
            }
        }
    }

    /// Removes the PR's merge ref once the PR leaves the open state.
    async fn delete_merge_ref(
        &self,
        target_repo_id: RepoId,
        number: PullReqNumber,
    ) -> HandlerResult {
        let repo = match self.repo_store.find(target_repo_id).await {
            Ok(repo) => repo,
            Err(StoreError::NotFound) => {
                return Err(HandlerError::discard("repository not found"))
            }
            Err(err) => return Err(HandlerError::failed(err)),
        };

        match self
            .git
            .update_ref(UpdateRefParams {
                repo_uid: repo.git_uid,
                ref_type: RefType::PullReqMerge,
                name: number.0.to_string(),
                new_value: None,
                old_value: None,
            })
            .await
        {
            Ok(()) => {
                debug!(pullreq = %number, "deleted merge ref");
                Ok(())
            }
            Err(err) if err.is_discardable() => Err(HandlerError::discard(err.to_string())),
            Err(err) => {
                warn!(pullreq = %number, error = %err, "failed to delete merge ref");
                Err(HandlerError::failed(err))
            }
        }
    }
}
