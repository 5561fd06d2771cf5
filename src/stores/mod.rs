//! Document and graph store seams
//!
//! The ingestion core only talks to these traits. Store handles are built once
//! at process start and shared through `Arc`, so tests can substitute the
//! in-memory implementations.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::config::{StorageBackend, StorageConfig};
use crate::types::{Commit, ContainmentEdge, EntryKind, GraphNode};

mod memory;
mod postgres;

pub use memory::{MemoryCommitStore, MemoryGraphStore};
pub use postgres::{PgCommitStore, PgGraphStore};

/// Per-document result of a bulk insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeUpsert {
    Created,
    Existing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeUpsert {
    Created,
    Existing,
    /// One endpoint is absent; carries the missing path
    MissingEndpoint(String),
}

/// Field-equality filter over stored commits; `None` fields match anything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitFilter {
    pub author: Option<String>,
    pub date: Option<String>,
    pub hash: Option<String>,
}

impl CommitFilter {
    pub fn matches(&self, commit: &Commit) -> bool {
        field_matches(&self.author, &commit.author)
            && field_matches(&self.date, &commit.date)
            && field_matches(&self.hash, &commit.hash)
    }
}

/// Field-equality filter over stored graph nodes; `None` fields match anything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeFilter {
    pub name: Option<String>,
    pub path: Option<String>,
    #[serde(rename = "type", alias = "kind")]
    pub kind: Option<EntryKind>,
    pub size: Option<u64>,
    #[serde(rename = "sha", alias = "contentHash")]
    pub content_hash: Option<String>,
}

impl NodeFilter {
    pub fn matches(&self, node: &GraphNode) -> bool {
        field_matches(&self.name, &node.name)
            && field_matches(&self.path, &node.path)
            && self.kind.map_or(true, |kind| kind == node.kind)
            && self.size.map_or(true, |size| size == node.size)
            && field_matches(&self.content_hash, &node.content_hash)
    }
}

fn field_matches(expected: &Option<String>, actual: &str) -> bool {
    expected.as_deref().map_or(true, |value| value == actual)
}

/// Commit metadata store with a uniqueness guarantee on `hash`
#[async_trait]
pub trait CommitStore: Send + Sync {
    /// Create the unique constraint on `hash` if it is not already present
    async fn ensure_unique_index(&self) -> Result<()>;

    /// Unordered bulk insert; one outcome per input commit, in input order.
    /// A failing document never prevents the others from being written. An
    /// `Err` means nothing in this call was written.
    async fn insert_many(&self, commits: &[Commit]) -> Result<Vec<InsertOutcome>>;

    async fn find(&self, filter: &CommitFilter) -> Result<Vec<Commit>>;

    async fn count(&self) -> Result<usize>;
}

/// Containment graph store with upsert semantics for nodes and edges
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_node(&self, node: &GraphNode) -> Result<NodeUpsert>;

    async fn upsert_edge(&self, edge: &ContainmentEdge) -> Result<EdgeUpsert>;

    async fn find_nodes(&self, filter: &NodeFilter) -> Result<Vec<GraphNode>>;

    async fn node_count(&self) -> Result<usize>;

    async fn edge_count(&self) -> Result<usize>;
}

/// Long-lived store handles shared across requests
#[derive(Clone)]
pub struct StoreHandles {
    pub commits: Arc<dyn CommitStore>,
    pub graph: Arc<dyn GraphStore>,
    pool: Option<PgPool>,
}

impl StoreHandles {
    pub fn in_memory() -> Self {
        Self {
            commits: Arc::new(MemoryCommitStore::new()),
            graph: Arc::new(MemoryGraphStore::new()),
            pool: None,
        }
    }

    /// Connect the configured backend and make sure its schema exists.
    /// Safe to call repeatedly against the same database.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        match config.backend {
            StorageBackend::Memory => {
                info!("Using in-memory stores");
                Ok(Self::in_memory())
            }
            StorageBackend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .context("storage.database_url is required for the postgres backend")?;
                let pool = PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .acquire_timeout(config.connect_timeout)
                    .connect(url)
                    .await
                    .context("failed to connect to postgres")?;

                let commits = PgCommitStore::new(pool.clone());
                let graph = PgGraphStore::new(pool.clone());
                commits.ensure_unique_index().await?;
                graph.ensure_schema().await?;
                info!("Connected postgres stores");

                Ok(Self {
                    commits: Arc::new(commits),
                    graph: Arc::new(graph),
                    pool: Some(pool),
                })
            }
        }
    }

    /// Release pooled connections; called once at shutdown
    pub async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
            info!("Closed postgres connection pool");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(hash: &str, author: &str, date: &str) -> Commit {
        Commit {
            hash: hash.to_string(),
            tree: "t".to_string(),
            author: author.to_string(),
            date: date.to_string(),
            message: "m".to_string(),
        }
    }

    #[test]
    fn test_empty_commit_filter_matches_everything() {
        let filter = CommitFilter::default();
        assert!(filter.matches(&commit("a", "Alice", "2024-01-01")));
    }

    #[test]
    fn test_commit_filter_requires_every_field() {
        let filter = CommitFilter {
            author: Some("Alice".to_string()),
            date: Some("2024-01-01".to_string()),
            hash: None,
        };
        assert!(filter.matches(&commit("a", "Alice", "2024-01-01")));
        assert!(!filter.matches(&commit("a", "Alice", "2024-01-02")));
        assert!(!filter.matches(&commit("a", "Bob", "2024-01-01")));
    }

    #[test]
    fn test_node_filter_deserializes_query_form_names() {
        let filter: NodeFilter =
            serde_json::from_str(r#"{"type": "file", "sha": "h1", "size": 10}"#).unwrap();
        assert_eq!(filter.kind, Some(EntryKind::File));
        assert_eq!(filter.content_hash.as_deref(), Some("h1"));

        let node = GraphNode {
            name: "b.txt".to_string(),
            path: "a/b.txt".to_string(),
            kind: EntryKind::File,
            size: 10,
            content_hash: "h1".to_string(),
        };
        assert!(filter.matches(&node));
        assert!(!NodeFilter {
            size: Some(11),
            ..NodeFilter::default()
        }
        .matches(&node));
    }
}
