//! Per-PR activity timeline.
//!
//! Every timeline entry's `order` comes from the pull request's own
//! `activity_seq` counter, advanced through the optimistic-lock protocol.
//! Payload builders run against the *post-advance* snapshot of the row, so
//! they see up-to-date fields (draft flag, state, SHAs).

use std::convert::Infallible;

use chrono::Utc;
use thiserror::Error;
use tracing::warn;

use crate::store::{ActivityStore, OptLockError, PullReqStore, StoreError};
use crate::types::{ActivityKind, ActivityPayload, PrincipalId, PullReq, PullReqActivity, PullReqId};

/// Errors from timeline operations.
#[derive(Debug, Error)]
pub enum TimelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("activity sequence advance retries exhausted")]
    RetriesExhausted,
}

/// Result type for timeline operations.
pub type Result<T> = std::result::Result<T, TimelineError>;

/// Appends activities to pull request timelines.
#[derive(Clone)]
pub struct ActivityService {
    pullreq_store: PullReqStore,
    activity_store: ActivityStore,
}

impl ActivityService {
    pub fn new(pullreq_store: PullReqStore, activity_store: ActivityStore) -> Self {
        ActivityService {
            pullreq_store,
            activity_store,
        }
    }

    /// Advances the PR's activity sequence and appends one system activity
    /// at the freshly claimed order.
    ///
    /// The builder receives the committed, post-advance row.
    pub async fn add_activity<F>(
        &self,
        pullreq_id: PullReqId,
        principal_id: PrincipalId,
        build: F,
    ) -> Result<PullReqActivity>
    where
        F: FnOnce(&PullReq) -> ActivityPayload,
    {
        let pr = self.pullreq_store.find(pullreq_id).await?;
        let pr = self
            .pullreq_store
            .update_opt_lock::<Infallible, _>(&pr, |row| {
                row.activity_seq += 1;
                Ok(())
            })
            .await
            .map_err(flatten_infallible)?;

        let payload = build(&pr);
        self.append(&pr, pr.activity_seq, principal_id, payload)
            .await
    }

    /// Creates one activity row at an already-claimed order.
    ///
    /// Callers that advance the sequence themselves (e.g. the sync service
    /// claiming two orders in one CAS) use this directly.
    pub async fn append(
        &self,
        pr: &PullReq,
        order: i64,
        principal_id: PrincipalId,
        payload: ActivityPayload,
    ) -> Result<PullReqActivity> {
        let now = Utc::now();
        let activity = PullReqActivity {
            pullreq_id: pr.id,
            order,
            sub_order: 0,
            kind: ActivityKind::System,
            payload,
            created_by: principal_id,
            created: now,
            updated: now,
            edited: None,
        };
        Ok(self.activity_store.create(activity).await?)
    }

    /// Best-effort variant of [`Self::append`]: timeline bookkeeping never
    /// fails the primary mutation that already committed.
    pub async fn append_best_effort(
        &self,
        pr: &PullReq,
        order: i64,
        principal_id: PrincipalId,
        payload: ActivityPayload,
    ) {
        if let Err(err) = self.append(pr, order, principal_id, payload).await {
            warn!(
                pullreq = %pr.number,
                order,
                error = %err,
                "failed to write pull request activity"
            );
        }
    }
}

fn flatten_infallible(err: OptLockError<Infallible>) -> TimelineError {
    match err {
        OptLockError::Aborted(never) => match never {},
        OptLockError::Store(err) => TimelineError::Store(err),
        OptLockError::RetriesExhausted => TimelineError::RetriesExhausted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::pull_req_fixture;
    use crate::types::{PullReqState, Sha};

    fn sha(c: char) -> Sha {
        Sha::parse(c.to_string().repeat(40)).unwrap()
    }

    async fn setup() -> (ActivityService, PullReqStore, PullReq) {
        let pullreq_store = PullReqStore::new();
        let activity_store = ActivityStore::new();
        let pr = pullreq_store
            .create(pull_req_fixture(1, 1, "feature", sha('a')))
            .await
            .unwrap();
        (
            ActivityService::new(pullreq_store.clone(), activity_store),
            pullreq_store,
            pr,
        )
    }

    #[tokio::test]
    async fn add_activity_advances_sequence() {
        let (service, store, pr) = setup().await;

        let activity = service
            .add_activity(pr.id, pr.created_by, |row| ActivityPayload::BranchDelete {
                sha: row.source_sha.clone(),
            })
            .await
            .unwrap();

        assert_eq!(activity.order, 1);
        assert_eq!(store.find(pr.id).await.unwrap().activity_seq, 1);
    }

    #[tokio::test]
    async fn orders_are_strictly_increasing() {
        let (service, _store, pr) = setup().await;

        let mut orders = Vec::new();
        for _ in 0..5 {
            let activity = service
                .add_activity(pr.id, pr.created_by, |row| ActivityPayload::BranchDelete {
                    sha: row.source_sha.clone(),
                })
                .await
                .unwrap();
            orders.push(activity.order);
        }
        assert_eq!(orders, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn builder_sees_post_advance_snapshot() {
        let (service, store, pr) = setup().await;

        // Close the PR between our read and the builder running.
        let mut closed = store.find(pr.id).await.unwrap();
        closed.state = PullReqState::Closed;
        store.update(&closed).await.unwrap();

        let seen_state = std::sync::Arc::new(std::sync::Mutex::new(None));
        let sink = std::sync::Arc::clone(&seen_state);
        service
            .add_activity(pr.id, pr.created_by, move |row| {
                *sink.lock().unwrap() = Some(row.state);
                ActivityPayload::BranchDelete {
                    sha: row.source_sha.clone(),
                }
            })
            .await
            .unwrap();

        assert_eq!(*seen_state.lock().unwrap(), Some(PullReqState::Closed));
    }

    #[tokio::test]
    async fn concurrent_activities_get_unique_orders() {
        let (service, _store, pr) = setup().await;

        let mut handles = Vec::new();
        for _ in 0..6 {
            let service = service.clone();
            let id = pr.id;
            let principal = pr.created_by;
            handles.push(tokio::spawn(async move {
                service
                    .add_activity(id, principal, |row| ActivityPayload::BranchDelete {
                        sha: row.source_sha.clone(),
                    })
                    .await
            }));
        }

        let mut orders = Vec::new();
        for handle in handles {
            if let Ok(activity) = handle.await.unwrap() {
                orders.push(activity.order);
            }
        }
        orders.sort_unstable();
        let mut deduped = orders.clone();
        deduped.dedup();
        assert_eq!(orders, deduped, "orders must be unique");
    }
}
