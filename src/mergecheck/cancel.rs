//! In-process cancellation registry.
//!
//! Each running mergeability computation registers under the source SHA it
//! was started for. When a newer push supersedes that SHA, the old
//! computation's token is cancelled so the slow merge aborts early instead
//! of finishing a result the stale-write check would throw away anyway.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::types::Sha;

#[derive(Default)]
struct Inner {
    next_entry: u64,
    running: HashMap<Sha, (u64, CancellationToken)>,
}

/// Registry of in-flight computations keyed by source SHA.
///
/// Strictly an optimization: correctness comes from the stale-write check at
/// persist time, so a missed cancellation only wastes work.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a computation for `sha` and returns a guard that releases
    /// (and cancels) the entry when dropped. Registering over an existing
    /// entry cancels and replaces it.
    pub fn register(&self, sha: Sha) -> CancelGuard {
        let token = CancellationToken::new();
        let mut inner = self.lock();
        inner.next_entry += 1;
        let entry = inner.next_entry;
        if let Some((_, old)) = inner.running.insert(sha.clone(), (entry, token.clone())) {
            old.cancel();
        }
        CancelGuard {
            registry: self.clone(),
            sha,
            entry,
            token,
        }
    }

    /// Cancels the computation registered for `sha`, if any.
    pub fn cancel(&self, sha: &Sha) {
        let removed = self.lock().running.remove(sha);
        if let Some((_, token)) = removed {
            token.cancel();
        }
    }

    fn release(&self, sha: &Sha, entry: u64) {
        let mut inner = self.lock();
        // Only remove our own entry; a replacement may have taken the slot.
        if inner.running.get(sha).is_some_and(|(id, _)| *id == entry) {
            inner.running.remove(sha);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("cancel registry lock poisoned")
    }
}

/// RAII handle for one registered computation.
pub struct CancelGuard {
    registry: CancelRegistry,
    sha: Sha,
    entry: u64,
    token: CancellationToken,
}

impl CancelGuard {
    /// Token the computation passes down into the git executor.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.registry.release(&self.sha, self.entry);
        self.token.cancel();
    }
}
