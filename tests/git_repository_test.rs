// Git working copy integration tests against real repositories
#![cfg(feature = "git-integration")]


use anyhow::Result;
use git_test_helpers::{clone_destination, TestGitRepository, FEB_FIRST_2024};
use repograph::git::types::HistoryOptions;
use repograph::{parse_commit_line, AcquireOutcome, GitRepository, VersionControl};

#[tokio::test]
async fn test_clone_then_list_commits() -> Result<()> {
    let source = TestGitRepository::new()?;
    let (_dest_dir, dest) = clone_destination()?;
    let git = GitRepository::default();

    let outcome = git.acquire_or_update(&source.url(), &dest).await?;
    assert_eq!(outcome, AcquireOutcome::Cloned);
    assert!(dest.join("README.md").exists());

    let lines = git.list_commits(&dest).await?;
    assert_eq!(lines.len(), 1);

    let commit = parse_commit_line(1, &lines[0])?;
    assert_eq!(commit.tree, source.head_tree_id()?.to_string());
    assert_eq!(commit.author, "RepoGraph Test");
    assert_eq!(commit.date, "2024-01-01");
    assert_eq!(commit.message, "Initial commit");
    Ok(())
}

#[tokio::test]
async fn test_existing_copy_is_updated_in_place() -> Result<()> {
    let source = TestGitRepository::new()?;
    let (_dest_dir, dest) = clone_destination()?;
    let git = GitRepository::default();

    git.acquire_or_update(&source.url(), &dest).await?;
    let second = source.commit_file(
        "src/lib.rs",
        "pub fn answer() -> u32 { 42 }\n",
        "RepoGraph Test",
        "Add lib: answer",
        FEB_FIRST_2024,
    )?;

    let outcome = git.acquire_or_update(&source.url(), &dest).await?;
    assert_eq!(outcome, AcquireOutcome::Updated);
    assert!(dest.join("src/lib.rs").exists());

    let lines = git.list_commits(&dest).await?;
    assert_eq!(lines.len(), 2);

    // Newest first
    let newest = parse_commit_line(1, &lines[0])?;
    assert_eq!(newest.hash, second.to_string());
    assert_eq!(newest.date, "2024-02-01");
    assert_eq!(newest.message, "Add lib: answer");
    Ok(())
}

#[tokio::test]
async fn test_history_depth_limit() -> Result<()> {
    let source = TestGitRepository::new()?;
    source.commit_file("a.txt", "a", "RepoGraph Test", "Second", FEB_FIRST_2024)?;
    let (_dest_dir, dest) = clone_destination()?;
    let git = GitRepository::new(HistoryOptions {
        max_history_depth: 1,
    });

    git.acquire_or_update(&source.url(), &dest).await?;
    let lines = git.list_commits(&dest).await?;
    assert_eq!(lines.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_colon_in_author_name_keeps_line_parseable() -> Result<()> {
    let source = TestGitRepository::new()?;
    source.commit_file("b.txt", "b", "Ada: Lovelace", "Note: colons", FEB_FIRST_2024)?;
    let (_dest_dir, dest) = clone_destination()?;
    let git = GitRepository::default();

    git.acquire_or_update(&source.url(), &dest).await?;
    let lines = git.list_commits(&dest).await?;
    let commit = parse_commit_line(1, &lines[0])?;
    assert_eq!(commit.author, "Ada  Lovelace");
    assert_eq!(commit.message, "Note: colons");
    Ok(())
}

#[tokio::test]
async fn test_clone_from_missing_source_fails() -> Result<()> {
    let (_dest_dir, dest) = clone_destination()?;
    let git = GitRepository::default();

    let result = git
        .acquire_or_update("/nonexistent/repository/path", &dest)
        .await;
    assert!(result.is_err());
    Ok(())
}
