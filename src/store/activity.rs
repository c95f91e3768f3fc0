//! Append-only activity store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{Result, StoreError};
use crate::types::{PullReqActivity, PullReqId};

/// In-memory activity store. Enforces uniqueness of `(pullreq_id, order,
/// sub_order)` — the ordering invariant the timeline relies on.
#[derive(Clone, Default)]
pub struct ActivityStore {
    inner: Arc<Mutex<HashMap<PullReqId, Vec<PullReqActivity>>>>,
}

impl ActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, activity: PullReqActivity) -> Result<PullReqActivity> {
        let mut inner = self.inner.lock().expect("activity store lock poisoned");
        let rows = inner.entry(activity.pullreq_id).or_default();
        if rows
            .iter()
            .any(|row| row.order == activity.order && row.sub_order == activity.sub_order)
        {
            return Err(StoreError::Duplicate(format!(
                "activity order {} for pull request {}",
                activity.order, activity.pullreq_id
            )));
        }
        rows.push(activity.clone());
        Ok(activity)
    }

    /// Activities for one pull request, ordered by `(order, sub_order)`.
    pub async fn list(&self, pullreq_id: PullReqId) -> Vec<PullReqActivity> {
        let inner = self.inner.lock().expect("activity store lock poisoned");
        let mut rows = inner.get(&pullreq_id).cloned().unwrap_or_default();
        rows.sort_by_key(|row| (row.order, row.sub_order));
        rows
    }
}
