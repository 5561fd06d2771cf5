//! Git working copy acquisition and history listing

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::path::Path;
use tokio::task;
use tracing::{debug, info, instrument};

use crate::git::types::{AcquireOutcome, HistoryOptions};
use crate::git::VersionControl;

/// Render one commit as `hash:tree:author:date:subject`.
///
/// The date is the author date as `YYYY-MM-DD` and colons in the author name
/// are replaced with spaces, so only the subject may contain further colons.
pub fn format_commit_line(
    hash: &str,
    tree: &str,
    author: &str,
    when: DateTime<FixedOffset>,
    subject: &str,
) -> String {
    format!(
        "{}:{}:{}:{}:{}",
        hash,
        tree,
        author.replace(':', " "),
        when.format("%Y-%m-%d"),
        subject.lines().next().unwrap_or("")
    )
}

/// `git2`-backed version control collaborator
#[derive(Debug, Clone, Default)]
pub struct GitRepository {
    options: HistoryOptions,
}

impl GitRepository {
    pub fn new(options: HistoryOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl VersionControl for GitRepository {
    #[instrument(skip(self))]
    async fn acquire_or_update(&self, url: &str, dest: &Path) -> Result<AcquireOutcome> {
        let url = url.to_string();
        let dest = dest.to_path_buf();
        task::spawn_blocking(move || acquire_blocking(&url, &dest))
            .await
            .context("git acquisition task panicked")?
    }

    #[instrument(skip(self))]
    async fn list_commits(&self, dest: &Path) -> Result<Vec<String>> {
        let dest = dest.to_path_buf();
        let limit = self.options.max_history_depth;
        task::spawn_blocking(move || list_commits_blocking(&dest, limit))
            .await
            .context("git history task panicked")?
    }
}

#[cfg(feature = "git-integration")]
fn acquire_blocking(url: &str, dest: &Path) -> Result<AcquireOutcome> {
    match git2::Repository::open(dest) {
        Ok(repo) => {
            info!(repo = %url, path = %dest.display(), "Updating existing working copy");
            update_in_place(&repo)
                .with_context(|| format!("Failed to update working copy at {:?}", dest))?;
            Ok(AcquireOutcome::Updated)
        }
        Err(_) => {
            if dest.exists() && std::fs::read_dir(dest)?.next().is_some() {
                anyhow::bail!(
                    "Destination {:?} exists but is not a git working copy",
                    dest
                );
            }
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }

            info!(repo = %url, path = %dest.display(), "Cloning repository");
            git2::build::RepoBuilder::new()
                .clone(url, dest)
                .with_context(|| format!("Failed to clone repository: {}", url))?;
            Ok(AcquireOutcome::Cloned)
        }
    }
}

#[cfg(feature = "git-integration")]
fn update_in_place(repo: &git2::Repository) -> Result<()> {
    let mut remote = repo
        .find_remote("origin")
        .context("Working copy has no 'origin' remote")?;
    remote
        .fetch(&[] as &[&str], None, None)
        .context("Failed to fetch from origin")?;

    let head = repo.head().context("Failed to read HEAD")?;
    let branch = head
        .shorthand()
        .filter(|name| *name != "HEAD")
        .context("Working copy HEAD is detached")?;

    let tracking = repo
        .find_reference(&format!("refs/remotes/origin/{}", branch))
        .with_context(|| format!("No remote-tracking ref for branch {}", branch))?;
    let target = tracking.peel_to_commit()?;

    debug!(branch, target = %target.id(), "Resetting working copy to origin");
    repo.reset(target.as_object(), git2::ResetType::Hard, None)?;
    Ok(())
}

#[cfg(feature = "git-integration")]
fn list_commits_blocking(dest: &Path, limit: usize) -> Result<Vec<String>> {
    let repo = git2::Repository::open(dest)
        .with_context(|| format!("Failed to open git repository at {:?}", dest))?;

    let mut revwalk = repo.revwalk()?;
    revwalk.push_head().context("Repository has no commits")?;
    revwalk.set_sorting(git2::Sort::TIME)?;

    let mut lines = Vec::new();
    for oid in revwalk.take(limit) {
        let commit = repo.find_commit(oid?)?;
        let author = commit.author();
        let time = author.when();
        let offset = FixedOffset::east_opt(time.offset_minutes() * 60)
            .unwrap_or_else(|| Utc.fix());
        let when = DateTime::from_timestamp(time.seconds(), 0)
            .context("Commit timestamp out of range")?
            .with_timezone(&offset);

        lines.push(format_commit_line(
            &commit.id().to_string(),
            &commit.tree_id().to_string(),
            author.name().unwrap_or("Unknown"),
            when,
            commit.summary().unwrap_or(""),
        ));
    }

    debug!(count = lines.len(), "Listed commit history");
    Ok(lines)
}

#[cfg(not(feature = "git-integration"))]
fn acquire_blocking(_url: &str, _dest: &Path) -> Result<AcquireOutcome> {
    anyhow::bail!("Git integration feature not enabled. Rebuild with --features git-integration")
}

#[cfg(not(feature = "git-integration"))]
fn list_commits_blocking(_dest: &Path, _limit: usize) -> Result<Vec<String>> {
    anyhow::bail!("Git integration feature not enabled")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_format_commit_line() {
        let when = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 1, 23, 30, 0)
            .unwrap();
        let line = format_commit_line("abc", "def", "Ada: L", when, "Fix: edge\n\nbody");
        assert_eq!(line, "abc:def:Ada  L:2024-01-01:Fix: edge");
    }

    #[tokio::test]
    async fn test_list_commits_outside_repository_fails() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let git = GitRepository::default();
        assert!(git.list_commits(temp_dir.path()).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_refuses_to_clone_into_populated_directory() -> Result<()> {
        let temp_dir = TempDir::new()?;
        std::fs::write(temp_dir.path().join("stray.txt"), "x")?;
        let git = GitRepository::default();
        let result = git
            .acquire_or_update("https://github.com/owner/repo.git", temp_dir.path())
            .await;
        assert!(result.is_err());
        Ok(())
    }
}
