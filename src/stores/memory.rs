// In-memory stores
// Same observable semantics as the postgres stores: unique commit hashes,
// nodes unique by path, edges unique by endpoint pair.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{
    CommitFilter, CommitStore, EdgeUpsert, GraphStore, InsertOutcome, NodeFilter, NodeUpsert,
};
use crate::types::{Commit, ContainmentEdge, GraphNode};

#[derive(Default)]
pub struct MemoryCommitStore {
    commits: RwLock<IndexMap<String, Commit>>,
    unique_index: AtomicBool,
}

impl MemoryCommitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_unique_index(&self) -> bool {
        self.unique_index.load(Ordering::Acquire)
    }
}

#[async_trait]
impl CommitStore for MemoryCommitStore {
    async fn ensure_unique_index(&self) -> Result<()> {
        self.unique_index.store(true, Ordering::Release);
        Ok(())
    }

    async fn insert_many(&self, commits: &[Commit]) -> Result<Vec<InsertOutcome>> {
        let mut stored = self.commits.write();
        let outcomes = commits
            .iter()
            .map(|commit| {
                if stored.contains_key(&commit.hash) {
                    InsertOutcome::Duplicate
                } else {
                    stored.insert(commit.hash.clone(), commit.clone());
                    InsertOutcome::Inserted
                }
            })
            .collect();
        Ok(outcomes)
    }

    async fn find(&self, filter: &CommitFilter) -> Result<Vec<Commit>> {
        Ok(self
            .commits
            .read()
            .values()
            .filter(|commit| filter.matches(commit))
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.commits.read().len())
    }
}

#[derive(Default)]
pub struct MemoryGraphStore {
    nodes: DashMap<String, GraphNode>,
    edges: RwLock<IndexSet<ContainmentEdge>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_edge(&self, parent_path: &str, child_path: &str) -> bool {
        self.edges
            .read()
            .contains(&ContainmentEdge::new(parent_path, child_path))
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert_node(&self, node: &GraphNode) -> Result<NodeUpsert> {
        match self.nodes.entry(node.path.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(NodeUpsert::Existing),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(node.clone());
                Ok(NodeUpsert::Created)
            }
        }
    }

    async fn upsert_edge(&self, edge: &ContainmentEdge) -> Result<EdgeUpsert> {
        for endpoint in [&edge.parent_path, &edge.child_path] {
            if !self.nodes.contains_key(endpoint) {
                return Ok(EdgeUpsert::MissingEndpoint(endpoint.clone()));
            }
        }

        if self.edges.write().insert(edge.clone()) {
            Ok(EdgeUpsert::Created)
        } else {
            Ok(EdgeUpsert::Existing)
        }
    }

    async fn find_nodes(&self, filter: &NodeFilter) -> Result<Vec<GraphNode>> {
        let mut found: Vec<GraphNode> = self
            .nodes
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(found)
    }

    async fn node_count(&self) -> Result<usize> {
        Ok(self.nodes.len())
    }

    async fn edge_count(&self) -> Result<usize> {
        Ok(self.edges.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntryKind;

    fn node(path: &str, kind: EntryKind) -> GraphNode {
        GraphNode {
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            path: path.to_string(),
            kind,
            size: 0,
            content_hash: String::new(),
        }
    }

    #[test]
    fn test_duplicate_within_one_batch() {
        let store = MemoryCommitStore::new();
        let commit = Commit {
            hash: "abc".to_string(),
            tree: "t".to_string(),
            author: "Alice".to_string(),
            date: "2024-01-01".to_string(),
            message: "init".to_string(),
        };
        let outcomes =
            tokio_test::block_on(store.insert_many(&[commit.clone(), commit])).unwrap();
        assert_eq!(outcomes, vec![InsertOutcome::Inserted, InsertOutcome::Duplicate]);
    }

    #[tokio::test]
    async fn test_existing_node_is_left_untouched() -> Result<()> {
        let store = MemoryGraphStore::new();
        assert_eq!(
            store.upsert_node(&node("a", EntryKind::Directory)).await?,
            NodeUpsert::Created
        );
        assert_eq!(
            store.upsert_node(&node("a", EntryKind::File)).await?,
            NodeUpsert::Existing
        );

        let stored = store
            .find_nodes(&NodeFilter {
                path: Some("a".to_string()),
                ..NodeFilter::default()
            })
            .await?;
        assert_eq!(stored[0].kind, EntryKind::Directory);
        Ok(())
    }

    #[tokio::test]
    async fn test_edge_requires_both_endpoints() -> Result<()> {
        let store = MemoryGraphStore::new();
        store.upsert_node(&node("a", EntryKind::Directory)).await?;

        let edge = ContainmentEdge::new("a", "a/b");
        assert_eq!(
            store.upsert_edge(&edge).await?,
            EdgeUpsert::MissingEndpoint("a/b".to_string())
        );

        store.upsert_node(&node("a/b", EntryKind::File)).await?;
        assert_eq!(store.upsert_edge(&edge).await?, EdgeUpsert::Created);
        assert_eq!(store.upsert_edge(&edge).await?, EdgeUpsert::Existing);
        assert_eq!(store.edge_count().await?, 1);
        Ok(())
    }
}
