//! Cross-instance cancellation broadcast.
//!
//! Every engine instance announces the SHAs it has superseded; peers listen
//! and cancel any matching local computation. Delivery is best effort — a
//! lagging or disconnected listener only means wasted work, because the
//! stale-write check at persist time rejects superseded results regardless.

use tokio::sync::broadcast;
use tracing::debug;

use crate::types::Sha;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast channel carrying superseded source SHAs.
#[derive(Clone)]
pub struct CancelChannel {
    tx: broadcast::Sender<Sha>,
}

impl CancelChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        CancelChannel { tx }
    }

    /// Announces that computations for `sha` are superseded.
    pub fn announce(&self, sha: Sha) {
        // Err means no listener is currently subscribed, which is fine.
        if self.tx.send(sha).is_err() {
            debug!("no cancellation listeners");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Sha> {
        self.tx.subscribe()
    }
}

impl Default for CancelChannel {
    fn default() -> Self {
        Self::new()
    }
}
