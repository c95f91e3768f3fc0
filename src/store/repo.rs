//! Repository lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{Result, StoreError};
use crate::types::{Repo, RepoId};

/// In-memory repository store / finder.
#[derive(Clone, Default)]
pub struct RepoStore {
    inner: Arc<Mutex<HashMap<RepoId, Repo>>>,
}

impl RepoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn find(&self, id: RepoId) -> Result<Repo> {
        let inner = self.inner.lock().expect("repo store lock poisoned");
        inner.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    pub async fn upsert(&self, repo: Repo) {
        let mut inner = self.inner.lock().expect("repo store lock poisoned");
        inner.insert(repo.id, repo);
    }
}
