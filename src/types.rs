//! Core types for the surface store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A value held by the store.
///
/// Values are shared, never mutated in place. Change detection compares
/// the `Arc` pointer, so a writer that wants other surfaces to see a change
/// must hand over a freshly allocated value.
pub type SharedValue = Arc<serde_json::Value>;

/// One independently versioned slice of shared state.
///
/// The set is closed: keys are never added or removed at runtime, and
/// [`LogicalKey::ALL`] fixes the order in which change notifications of a
/// single poll tick are delivered.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogicalKey {
    #[serde(rename = "options")]
    Options,
    #[serde(rename = "ISSUE_CACHE")]
    IssueCache,
    #[serde(rename = "WORKLOG_CACHE")]
    WorklogCache,
    #[serde(rename = "tracking")]
    Tracking,
    #[serde(rename = "updates")]
    Updates,
}

impl LogicalKey {
    /// Number of logical keys.
    pub const COUNT: usize = 5;

    /// Every key, in notification order.
    pub const ALL: [LogicalKey; LogicalKey::COUNT] = [
        LogicalKey::Options,
        LogicalKey::IssueCache,
        LogicalKey::WorklogCache,
        LogicalKey::Tracking,
        LogicalKey::Updates,
    ];

    /// Name under which the key is persisted in the durable store.
    pub fn storage_name(self) -> &'static str {
        match self {
            LogicalKey::Options => "options",
            LogicalKey::IssueCache => "ISSUE_CACHE",
            LogicalKey::WorklogCache => "WORKLOG_CACHE",
            LogicalKey::Tracking => "tracking",
            LogicalKey::Updates => "updates",
        }
    }

    /// Position of the key in [`LogicalKey::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Debug for LogicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogicalKey({})", self.storage_name())
    }
}

impl fmt::Display for LogicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.storage_name())
    }
}

impl FromStr for LogicalKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogicalKey::ALL
            .into_iter()
            .find(|key| key.storage_name() == s)
            .ok_or_else(|| format!("unknown logical key: {}", s))
    }
}

/// Lifecycle of a UI surface as seen by its callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceState {
    /// Constructed, driver not started.
    Uninitialized,
    /// Waiting for the first successful snapshot.
    Loading,
    /// Snapshot is warm; reads and subscriptions are meaningful.
    Active,
    /// Torn down. Timer cancelled, listeners inert.
    Disposed,
}
