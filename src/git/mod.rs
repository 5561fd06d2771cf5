//! Git working copy integration
//!
//! The ingestion pipeline only needs two things from version control: get a
//! working copy up to date, and list its commit history as raw
//! `hash:tree:author:date:subject` lines.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

mod repository;
pub mod types;

pub use repository::{format_commit_line, GitRepository};
pub use types::AcquireOutcome;

/// Version-control collaborator used by the ingestion pipeline
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Update `dest` in place if it already holds a working copy, otherwise
    /// clone `url` into it
    async fn acquire_or_update(&self, url: &str, dest: &Path) -> Result<AcquireOutcome>;

    /// Commit history of `dest`, newest first, one raw line per commit
    async fn list_commits(&self, dest: &Path) -> Result<Vec<String>>;
}
