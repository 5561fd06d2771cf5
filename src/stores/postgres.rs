use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashSet;
use tracing::instrument;

use super::{
    CommitFilter, CommitStore, EdgeUpsert, GraphStore, InsertOutcome, NodeFilter, NodeUpsert,
};
use crate::types::{Commit, ContainmentEdge, EntryKind, GraphNode};

#[derive(Debug, Clone, sqlx::FromRow)]
struct CommitRow {
    hash: String,
    tree: String,
    author: String,
    date: String,
    message: String,
}

impl From<CommitRow> for Commit {
    fn from(row: CommitRow) -> Self {
        Self {
            hash: row.hash,
            tree: row.tree,
            author: row.author,
            date: row.date,
            message: row.message,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct NodeRow {
    name: String,
    path: String,
    kind: String,
    size: i64,
    content_hash: String,
}

impl TryFrom<NodeRow> for GraphNode {
    type Error = anyhow::Error;

    fn try_from(row: NodeRow) -> Result<Self> {
        let kind: EntryKind = row.kind.parse().map_err(anyhow::Error::msg)?;
        Ok(Self {
            name: row.name,
            path: row.path,
            kind,
            size: u64::try_from(row.size).unwrap_or_default(),
            content_hash: row.content_hash,
        })
    }
}

fn column(commits: &[Commit], field: impl Fn(&Commit) -> &str) -> Vec<String> {
    commits.iter().map(|commit| field(commit).to_string()).collect()
}

/// Commit store backed by a postgres `commits` table
#[derive(Clone)]
pub struct PgCommitStore {
    pool: PgPool,
}

impl PgCommitStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CommitStore for PgCommitStore {
    #[instrument(skip(self))]
    async fn ensure_unique_index(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS commits (
                hash TEXT NOT NULL,
                tree TEXT NOT NULL,
                author TEXT NOT NULL,
                date TEXT NOT NULL,
                message TEXT NOT NULL,
                ingested_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create commits table")?;

        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS commits_hash_key ON commits (hash)")
            .execute(&self.pool)
            .await
            .context("failed to create unique index on commits.hash")?;

        Ok(())
    }

    /// One statement per call; hashes absent from `RETURNING` already existed
    #[instrument(skip(self, commits), fields(count = commits.len()))]
    async fn insert_many(&self, commits: &[Commit]) -> Result<Vec<InsertOutcome>> {
        let inserted = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO commits (hash, tree, author, date, message)
            SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[], $5::text[])
            ON CONFLICT (hash) DO NOTHING
            RETURNING hash
            "#,
        )
        .bind(column(commits, |c| c.hash.as_str()))
        .bind(column(commits, |c| c.tree.as_str()))
        .bind(column(commits, |c| c.author.as_str()))
        .bind(column(commits, |c| c.date.as_str()))
        .bind(column(commits, |c| c.message.as_str()))
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to insert batch of {} commits", commits.len()))?;

        // A hash repeated within the batch is inserted once; later copies are duplicates
        let mut fresh: HashSet<String> = inserted.into_iter().collect();
        Ok(commits
            .iter()
            .map(|commit| {
                if fresh.remove(&commit.hash) {
                    InsertOutcome::Inserted
                } else {
                    InsertOutcome::Duplicate
                }
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn find(&self, filter: &CommitFilter) -> Result<Vec<Commit>> {
        let rows = sqlx::query_as::<_, CommitRow>(
            r#"
            SELECT hash, tree, author, date, message
            FROM commits
            WHERE ($1::text IS NULL OR author = $1)
              AND ($2::text IS NULL OR date = $2)
              AND ($3::text IS NULL OR hash = $3)
            ORDER BY ingested_at ASC
            "#,
        )
        .bind(filter.author.as_deref())
        .bind(filter.date.as_deref())
        .bind(filter.hash.as_deref())
        .fetch_all(&self.pool)
        .await
        .context("failed to query commits")?;

        Ok(rows.into_iter().map(Commit::from).collect())
    }

    async fn count(&self) -> Result<usize> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM commits")
            .fetch_one(&self.pool)
            .await
            .context("failed to count commits")?;
        Ok(count as usize)
    }
}

/// Graph store backed by postgres `repo_nodes` / `repo_edges` tables
#[derive(Clone)]
pub struct PgGraphStore {
    pool: PgPool,
}

impl PgGraphStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create node and edge tables; idempotent
    #[instrument(skip(self))]
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS repo_nodes (
                path TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                size BIGINT NOT NULL DEFAULT 0,
                content_hash TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create repo_nodes table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS repo_edges (
                parent_path TEXT NOT NULL REFERENCES repo_nodes (path),
                child_path TEXT NOT NULL REFERENCES repo_nodes (path),
                PRIMARY KEY (parent_path, child_path)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create repo_edges table")?;

        Ok(())
    }
}

#[async_trait]
impl GraphStore for PgGraphStore {
    async fn upsert_node(&self, node: &GraphNode) -> Result<NodeUpsert> {
        let created = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO repo_nodes (path, name, kind, size, content_hash)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (path) DO NOTHING
            RETURNING path
            "#,
        )
        .bind(&node.path)
        .bind(&node.name)
        .bind(node.kind.as_str())
        .bind(node.size as i64)
        .bind(&node.content_hash)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to upsert node {}", node.path))?;

        Ok(match created {
            Some(_) => NodeUpsert::Created,
            None => NodeUpsert::Existing,
        })
    }

    async fn upsert_edge(&self, edge: &ContainmentEdge) -> Result<EdgeUpsert> {
        let present = sqlx::query_scalar::<_, String>(
            "SELECT path FROM repo_nodes WHERE path = $1 OR path = $2",
        )
        .bind(&edge.parent_path)
        .bind(&edge.child_path)
        .fetch_all(&self.pool)
        .await
        .context("failed to look up edge endpoints")?;

        for endpoint in [&edge.parent_path, &edge.child_path] {
            if !present.contains(endpoint) {
                return Ok(EdgeUpsert::MissingEndpoint(endpoint.clone()));
            }
        }

        let created = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO repo_edges (parent_path, child_path)
            VALUES ($1, $2)
            ON CONFLICT (parent_path, child_path) DO NOTHING
            RETURNING parent_path
            "#,
        )
        .bind(&edge.parent_path)
        .bind(&edge.child_path)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| {
            format!(
                "failed to upsert edge {} -> {}",
                edge.parent_path, edge.child_path
            )
        })?;

        Ok(match created {
            Some(_) => EdgeUpsert::Created,
            None => EdgeUpsert::Existing,
        })
    }

    #[instrument(skip(self))]
    async fn find_nodes(&self, filter: &NodeFilter) -> Result<Vec<GraphNode>> {
        let rows = sqlx::query_as::<_, NodeRow>(
            r#"
            SELECT name, path, kind, size, content_hash
            FROM repo_nodes
            WHERE ($1::text IS NULL OR name = $1)
              AND ($2::text IS NULL OR path = $2)
              AND ($3::text IS NULL OR kind = $3)
              AND ($4::bigint IS NULL OR size = $4)
              AND ($5::text IS NULL OR content_hash = $5)
            ORDER BY path ASC
            "#,
        )
        .bind(filter.name.as_deref())
        .bind(filter.path.as_deref())
        .bind(filter.kind.map(|kind| kind.as_str()))
        .bind(filter.size.map(|size| size as i64))
        .bind(filter.content_hash.as_deref())
        .fetch_all(&self.pool)
        .await
        .context("failed to query repo_nodes")?;

        rows.into_iter().map(GraphNode::try_from).collect()
    }

    async fn node_count(&self) -> Result<usize> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM repo_nodes")
            .fetch_one(&self.pool)
            .await
            .context("failed to count nodes")?;
        Ok(count as usize)
    }

    async fn edge_count(&self) -> Result<usize> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM repo_edges")
            .fetch_one(&self.pool)
            .await
            .context("failed to count edges")?;
        Ok(count as usize)
    }
}
