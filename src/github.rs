//! GitHub tree listing
//!
//! Lists every path of a repository branch through the git trees API and
//! maps the result into [`PathEntry`] records.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::GitHubConfig;
use crate::types::{EntryKind, PathEntry, RepoCoordinates};

/// Remote tree collaborator used by the ingestion pipeline
#[async_trait]
pub trait TreeSource: Send + Sync {
    /// Flat recursive listing of the repository's branch
    async fn fetch_tree(&self, coords: &RepoCoordinates) -> Result<Vec<PathEntry>>;
}

#[derive(Debug, Deserialize)]
struct RepositoryInfo {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
pub struct TreeResponse {
    #[serde(default)]
    pub truncated: bool,
    pub tree: Vec<TreeItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TreeItem {
    pub path: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub sha: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Map API tree items to path entries. Submodule (`commit`) and unknown
/// entries are dropped.
pub fn entries_from_tree(items: Vec<TreeItem>) -> Vec<PathEntry> {
    items
        .into_iter()
        .filter_map(|item| {
            let kind = match item.item_type.as_str() {
                "blob" => EntryKind::File,
                "tree" => EntryKind::Directory,
                other => {
                    debug!(path = %item.path, kind = other, "Skipping tree entry");
                    return None;
                }
            };
            Some(PathEntry {
                path: item.path,
                kind,
                size: item.size.unwrap_or(0),
                content_hash: item.sha,
            })
        })
        .collect()
}

/// `reqwest`-backed client for the GitHub REST API
#[derive(Debug, Clone)]
pub struct GitHubTreeClient {
    client: Client,
    api_url: String,
    token: Option<String>,
    branch: Option<String>,
}

impl GitHubTreeClient {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        Url::parse(&config.api_url)
            .with_context(|| format!("invalid GitHub API url: {}", config.api_url))?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build GitHub HTTP client")?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            branch: config.branch.clone(),
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let request = self
            .client
            .get(format!("{}{}", self.api_url, path))
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, concat!("repograph/", env!("CARGO_PKG_VERSION")));
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    /// Configured branch, or the repository's default branch
    pub async fn resolve_branch(&self, coords: &RepoCoordinates) -> Result<String> {
        if let Some(branch) = &self.branch {
            return Ok(branch.clone());
        }

        let info: RepositoryInfo = self
            .get(&format!("/repos/{}/{}", coords.owner, coords.repo))
            .send()
            .await
            .with_context(|| format!("failed to request repository {}", coords))?
            .error_for_status()
            .with_context(|| format!("GitHub rejected repository lookup for {}", coords))?
            .json()
            .await
            .context("malformed repository response")?;

        Ok(info.default_branch)
    }
}

#[async_trait]
impl TreeSource for GitHubTreeClient {
    #[instrument(skip(self), fields(repo = %coords))]
    async fn fetch_tree(&self, coords: &RepoCoordinates) -> Result<Vec<PathEntry>> {
        let branch = self.resolve_branch(coords).await?;

        let response: TreeResponse = self
            .get(&format!(
                "/repos/{}/{}/git/trees/{}?recursive=1",
                coords.owner, coords.repo, branch
            ))
            .send()
            .await
            .with_context(|| format!("failed to request tree for {}@{}", coords, branch))?
            .error_for_status()
            .with_context(|| format!("GitHub rejected tree listing for {}@{}", coords, branch))?
            .json()
            .await
            .context("malformed tree response")?;

        if response.truncated {
            warn!(repo = %coords, "GitHub truncated the tree listing; ingesting partial tree");
        }

        let entries = entries_from_tree(response.tree);
        info!(repo = %coords, branch = %branch, entries = entries.len(), "Fetched repository tree");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_from_tree_maps_kinds() {
        let json = r#"{
            "sha": "root",
            "truncated": false,
            "tree": [
                {"path": "src", "mode": "040000", "type": "tree", "sha": "t1"},
                {"path": "src/lib.rs", "mode": "100644", "type": "blob", "sha": "b1", "size": 120},
                {"path": "vendor/dep", "mode": "160000", "type": "commit", "sha": "c1"}
            ]
        }"#;
        let response: TreeResponse = serde_json::from_str(json).unwrap();
        let entries = entries_from_tree(response.tree);

        assert_eq!(
            entries,
            vec![
                PathEntry::directory("src", "t1"),
                PathEntry::file("src/lib.rs", 120, "b1"),
            ]
        );
    }

    #[test]
    fn test_client_trims_api_url() {
        let config = GitHubConfig {
            api_url: "http://localhost:1234/".to_string(),
            ..GitHubConfig::default()
        };
        let client = GitHubTreeClient::new(&config).unwrap();
        assert_eq!(client.api_url, "http://localhost:1234");
    }

    #[test]
    fn test_client_rejects_invalid_api_url() {
        let config = GitHubConfig {
            api_url: "not a url".to_string(),
            ..GitHubConfig::default()
        };
        assert!(GitHubTreeClient::new(&config).is_err());
    }
}
