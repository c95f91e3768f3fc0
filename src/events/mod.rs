//! Typed event contracts and their producers.
//!
//! Two categories exist:
//! - [`git`] — reference-level events derived from post-receive hook input.
//! - [`pullreq`] — pull request lifecycle events emitted by the REST
//!   controllers and the sync service.
//!
//! Downstream consumers (webhook dispatch, CI triggers, the mergeability
//! engine) subscribe with their own reader groups so retry accounting stays
//! isolated per consumer.

pub mod git;
pub mod pullreq;
