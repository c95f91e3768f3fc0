//! Reference updates as reported by the git post-receive hook.
//!
//! A `RefUpdate` is ephemeral input: it is parsed from the hook payload,
//! classified, turned into typed events, and never stored.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::Sha;

/// Prefix of branch references.
pub const BRANCH_PREFIX: &str = "refs/heads/";
/// Prefix of tag references.
pub const TAG_PREFIX: &str = "refs/tags/";

/// A single reference update from a git push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefUpdate {
    /// Full reference name, e.g. `refs/heads/main`.
    pub ref_name: String,

    /// Value before the push; nil SHA for reference creation.
    pub old: Sha,

    /// Value after the push; nil SHA for reference deletion.
    pub new: Sha,

    /// Whether the push was forced.
    #[serde(default)]
    pub forced: bool,
}

/// How a reference changed, derived from the nil-SHA convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefChange {
    Created,
    Updated,
    Deleted,
}

impl RefUpdate {
    /// Classifies this update. Returns `None` for the no-op nil -> nil case,
    /// which git never produces but a malformed hook payload could.
    pub fn change(&self) -> Option<RefChange> {
        match (self.old.is_nil(), self.new.is_nil()) {
            (true, true) => None,
            (true, false) => Some(RefChange::Created),
            (false, true) => Some(RefChange::Deleted),
            (false, false) => Some(RefChange::Updated),
        }
    }
}

/// Error returned when a ref name is not under the expected namespace.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("not a {expected} reference: {ref_name:?}")]
pub struct WrongRefNamespace {
    pub expected: &'static str,
    pub ref_name: String,
}

/// Extracts the branch name from a full `refs/heads/...` reference.
pub fn branch_from_ref(ref_name: &str) -> Result<&str, WrongRefNamespace> {
    strip_prefix(ref_name, BRANCH_PREFIX, "branch")
}

/// Extracts the tag name from a full `refs/tags/...` reference.
pub fn tag_from_ref(ref_name: &str) -> Result<&str, WrongRefNamespace> {
    strip_prefix(ref_name, TAG_PREFIX, "tag")
}

fn strip_prefix<'a>(
    ref_name: &'a str,
    prefix: &str,
    expected: &'static str,
) -> Result<&'a str, WrongRefNamespace> {
    match ref_name.strip_prefix(prefix) {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(WrongRefNamespace {
            expected,
            ref_name: ref_name.to_string(),
        }),
    }
}
