// Core Data Model
// Path entries as reported by a tree listing, the graph nodes and containment
// edges derived from them, and structured commit records.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::error::RepositoryUrlError;

/// Whether a tree entry (or graph node) is a file or a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Directory => "directory",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" | "blob" => Ok(EntryKind::File),
            "directory" | "dir" | "tree" => Ok(EntryKind::Directory),
            other => Err(format!("unknown entry kind '{other}'")),
        }
    }
}

/// One file or directory record from a repository tree listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathEntry {
    /// Slash-separated, repository-relative path
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub content_hash: String,
}

impl PathEntry {
    pub fn file(path: impl Into<String>, size: u64, content_hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
            size,
            content_hash: content_hash.into(),
        }
    }

    pub fn directory(path: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Directory,
            size: 0,
            content_hash: content_hash.into(),
        }
    }
}

/// A node in the containment graph, identified by its full path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// Last path segment
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub content_hash: String,
}

/// Directed "parent directory contains child" relationship
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainmentEdge {
    pub parent_path: String,
    pub child_path: String,
}

impl ContainmentEdge {
    pub fn new(parent_path: impl Into<String>, child_path: impl Into<String>) -> Self {
        Self {
            parent_path: parent_path.into(),
            child_path: child_path.into(),
        }
    }
}

/// Deduplicated node and edge sets produced by one flattening run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlattenedTree {
    /// Nodes in first-encountered order, unique by path
    pub nodes: Vec<GraphNode>,
    /// Edges in first-encountered order, unique by (parent, child)
    pub edges: Vec<ContainmentEdge>,
}

impl FlattenedTree {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    pub fn node(&self, path: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|node| node.path == path)
    }
}

/// Structured commit metadata, unique by hash within a commit store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub hash: String,
    pub tree: String,
    pub author: String,
    pub date: String,
    pub message: String,
}

/// Owner and repository name of a GitHub-hosted repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoCoordinates {
    pub owner: String,
    pub repo: String,
}

static SCP_GITHUB_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^git@github\.com:([^/]+)/([^/]+?)/?$").expect("static regex is valid")
});

static REPO_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("static regex is valid"));

const GITHUB_HOST: &str = "github.com";

/// A single owner or repository name: no separators, no `.`/`..`
fn is_valid_segment(segment: &str) -> bool {
    REPO_SEGMENT.is_match(segment) && segment != "." && segment != ".."
}

impl RepoCoordinates {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Extract owner and repository from an https or scp-style GitHub URL.
    /// The host must be exactly `github.com`. A trailing `.git` and any path
    /// after the repository name are ignored.
    pub fn from_github_url(url: &str) -> Result<Self, RepositoryUrlError> {
        let trimmed = url.trim();
        let not_github = || RepositoryUrlError::NotGitHub {
            url: url.to_string(),
        };

        let (owner, repo) = if let Some(captures) = SCP_GITHUB_URL.captures(trimmed) {
            (captures[1].to_string(), captures[2].to_string())
        } else {
            let parsed = Url::parse(trimmed).map_err(|_| not_github())?;
            if !matches!(parsed.scheme(), "https" | "http" | "ssh" | "git")
                || parsed.host_str() != Some(GITHUB_HOST)
            {
                return Err(not_github());
            }
            let mut segments = parsed
                .path_segments()
                .ok_or_else(not_github)?
                .filter(|segment| !segment.is_empty());
            let owner = segments.next().ok_or_else(not_github)?.to_string();
            let repo = segments.next().unwrap_or_default().to_string();
            (owner, repo)
        };

        let repo = repo.strip_suffix(".git").unwrap_or(&repo).to_string();
        if repo.is_empty() {
            return Err(RepositoryUrlError::MissingRepository {
                url: url.to_string(),
            });
        }
        for segment in [&owner, &repo] {
            if !is_valid_segment(segment) {
                return Err(RepositoryUrlError::InvalidSegment {
                    url: url.to_string(),
                    segment: segment.clone(),
                });
            }
        }

        Ok(Self { owner, repo })
    }

    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl fmt::Display for RepoCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_https_url() {
        let coords = RepoCoordinates::from_github_url("https://github.com/Kace33/ProjectHierarchy")
            .unwrap();
        assert_eq!(coords.owner, "Kace33");
        assert_eq!(coords.repo, "ProjectHierarchy");
        assert_eq!(coords.slug(), "Kace33/ProjectHierarchy");
    }

    #[test]
    fn test_parse_url_with_git_suffix_and_extra_segments() {
        let coords =
            RepoCoordinates::from_github_url("https://github.com/Kace33/ProjectHierarchy.git")
                .unwrap();
        assert_eq!(coords.repo, "ProjectHierarchy");

        let coords =
            RepoCoordinates::from_github_url("https://github.com/rust-lang/rust/tree/master/src")
                .unwrap();
        assert_eq!(coords, RepoCoordinates::new("rust-lang", "rust"));

        let coords = RepoCoordinates::from_github_url("https://github.com/owner/repo.name/").unwrap();
        assert_eq!(coords.repo, "repo.name");
    }

    #[test]
    fn test_parse_scp_style_url() {
        let coords = RepoCoordinates::from_github_url("git@github.com:owner/repo.git").unwrap();
        assert_eq!(coords, RepoCoordinates::new("owner", "repo"));
    }

    #[test]
    fn test_reject_non_github_url() {
        assert!(RepoCoordinates::from_github_url("https://gitlab.com/owner/repo").is_err());
        assert!(RepoCoordinates::from_github_url("not a url").is_err());
        assert!(RepoCoordinates::from_github_url("https://github.com/owner/.git").is_err());
        assert!(RepoCoordinates::from_github_url("https://github.com/owner").is_err());
    }

    #[test]
    fn test_reject_foreign_hosts() {
        for url in [
            "https://evil.example/github.com/a/b",
            "https://notgithub.com/a/b",
            "https://github.com.evil.example/a/b",
            "ftp://github.com/a/b",
            "git@evil.example:github.com/a/b",
        ] {
            assert!(
                matches!(
                    RepoCoordinates::from_github_url(url),
                    Err(RepositoryUrlError::NotGitHub { .. })
                ),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn test_reject_dot_segments() {
        for url in [
            "https://github.com/../.",
            "https://github.com/owner/..",
            "https://github.com/./repo",
            "https://github.com/%2E%2E/repo",
            "git@github.com:../repo.git",
            "git@github.com:owner/...git",
            "https://github.com/own%20er/repo",
        ] {
            assert!(
                RepoCoordinates::from_github_url(url).is_err(),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn test_accepts_allowed_name_characters() {
        let coords = RepoCoordinates::from_github_url("http://github.com/a-b/c_d.e").unwrap();
        assert_eq!(coords, RepoCoordinates::new("a-b", "c_d.e"));
    }

    #[test]
    fn test_entry_kind_parsing() {
        assert_eq!("blob".parse::<EntryKind>().unwrap(), EntryKind::File);
        assert_eq!("tree".parse::<EntryKind>().unwrap(), EntryKind::Directory);
        assert_eq!("Directory".parse::<EntryKind>().unwrap(), EntryKind::Directory);
        assert!("symlink".parse::<EntryKind>().is_err());
    }

    #[test]
    fn test_path_entry_serializes_camel_case() {
        let entry = PathEntry::file("a/b.txt", 10, "h1");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["contentHash"], "h1");
        assert_eq!(json["kind"], "file");
    }
}
