//! Git-specific types

use serde::{Deserialize, Serialize};

/// How a working copy was brought up to date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquireOutcome {
    /// No working copy existed; a fresh clone was made
    Cloned,
    /// An existing working copy was fetched and reset to its remote branch
    Updated,
}

/// Options for reading commit history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryOptions {
    /// Maximum commits to list, newest first
    pub max_history_depth: usize,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            max_history_depth: 10_000,
        }
    }
}
