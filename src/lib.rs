//! Event-driven pull request synchronization and mergeability engine for a
//! self-hosted git server.
//!
//! Pushes arrive through the post-receive hook, become typed events on the
//! bus, and are consumed by two services: [`sync`] keeps pull request rows
//! and head refs in line with their source branches, and [`mergecheck`]
//! maintains the speculative merge commit behind each PR's merge ref.

pub mod bus;
pub mod config;
pub mod events;
pub mod git;
pub mod mergecheck;
pub mod server;
pub mod store;
pub mod sync;
pub mod timeline;
pub mod types;

#[cfg(test)]
pub mod test_utils;
