//! Repository tree flattening
//!
//! Turns a flat listing of repository paths into a deduplicated set of
//! directory/file nodes plus parent-to-child containment edges, ready to be
//! upserted into a graph store.

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, warn};

use crate::error::FlattenError;
use crate::types::{ContainmentEdge, EntryKind, FlattenedTree, GraphNode, PathEntry};

/// Check that a path is a well-formed, slash-separated relative path
pub fn validate_entry_path(path: &str) -> Result<(), FlattenError> {
    let invalid = |reason| FlattenError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    if path.is_empty() {
        return Err(invalid("path is empty"));
    }
    if path.starts_with('/') {
        return Err(invalid("path must be repository-relative"));
    }
    if path.split('/').any(str::is_empty) {
        return Err(invalid("path contains an empty segment"));
    }
    Ok(())
}

/// Flatten tree entries into unique nodes and containment edges.
///
/// Every prefix of every entry path becomes a node. Intermediate prefixes are
/// always directories; the terminal segment takes the entry's own kind, size
/// and content hash. When two entries disagree about the same path, the node
/// created first is kept.
pub fn flatten(entries: &[PathEntry]) -> Result<FlattenedTree, FlattenError> {
    let mut nodes: IndexMap<String, GraphNode> = IndexMap::new();
    let mut edges: IndexSet<ContainmentEdge> = IndexSet::new();

    for entry in entries {
        validate_entry_path(&entry.path)?;

        let segments: Vec<&str> = entry.path.split('/').collect();
        let last = segments.len() - 1;
        let mut current = String::with_capacity(entry.path.len());
        let mut parent: Option<String> = None;

        for (depth, segment) in segments.iter().enumerate() {
            if depth > 0 {
                current.push('/');
            }
            current.push_str(segment);

            let terminal = depth == last;
            let kind = if terminal {
                entry.kind
            } else {
                EntryKind::Directory
            };

            match nodes.get(&current) {
                Some(existing) if terminal && existing.kind != kind => {
                    warn!(
                        path = %current,
                        existing = %existing.kind,
                        incoming = %kind,
                        "Conflicting kinds for path, keeping first"
                    );
                }
                Some(_) => {}
                None => {
                    let (size, content_hash) = if terminal {
                        (entry.size, entry.content_hash.clone())
                    } else {
                        (0, String::new())
                    };
                    nodes.insert(
                        current.clone(),
                        GraphNode {
                            name: segment.to_string(),
                            path: current.clone(),
                            kind,
                            size,
                            content_hash,
                        },
                    );
                }
            }

            if let Some(parent_path) = parent.take() {
                edges.insert(ContainmentEdge::new(parent_path, current.clone()));
            }
            parent = Some(current.clone());
        }
    }

    debug!(
        entries = entries.len(),
        nodes = nodes.len(),
        edges = edges.len(),
        "Flattened repository tree"
    );

    Ok(FlattenedTree {
        nodes: nodes.into_values().collect(),
        edges: edges.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_nested_file() {
        let tree = flatten(&[PathEntry::file("a/b.txt", 10, "h1")]).unwrap();

        assert_eq!(
            tree.nodes,
            vec![
                GraphNode {
                    name: "a".to_string(),
                    path: "a".to_string(),
                    kind: EntryKind::Directory,
                    size: 0,
                    content_hash: String::new(),
                },
                GraphNode {
                    name: "b.txt".to_string(),
                    path: "a/b.txt".to_string(),
                    kind: EntryKind::File,
                    size: 10,
                    content_hash: "h1".to_string(),
                },
            ]
        );
        assert_eq!(tree.edges, vec![ContainmentEdge::new("a", "a/b.txt")]);
    }

    #[test]
    fn test_empty_input() {
        let tree = flatten(&[]).unwrap();
        assert!(tree.is_empty());
    }

    #[test]
    fn test_root_level_file_has_no_edge() {
        let tree = flatten(&[PathEntry::file("README.md", 42, "r1")]).unwrap();
        assert_eq!(tree.nodes.len(), 1);
        assert!(tree.edges.is_empty());
    }

    #[test]
    fn test_shared_prefixes_are_deduplicated() {
        let entries = vec![
            PathEntry::directory("src", "t1"),
            PathEntry::file("src/lib.rs", 100, "f1"),
            PathEntry::file("src/main.rs", 200, "f2"),
            PathEntry::file("src/git/mod.rs", 50, "f3"),
        ];
        let tree = flatten(&entries).unwrap();

        let paths: Vec<&str> = tree.nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["src", "src/lib.rs", "src/main.rs", "src/git", "src/git/mod.rs"]
        );
        assert_eq!(tree.edges.len(), 4);
        assert_eq!(tree.node("src").unwrap().content_hash, "t1");
        assert_eq!(tree.node("src/git").unwrap().kind, EntryKind::Directory);
    }

    #[test]
    fn test_directory_listed_after_children_keeps_first_node() {
        let entries = vec![
            PathEntry::file("docs/guide.md", 5, "g1"),
            PathEntry::directory("docs", "t9"),
        ];
        let tree = flatten(&entries).unwrap();
        assert_eq!(tree.nodes.len(), 2);
        assert_eq!(tree.node("docs").unwrap().content_hash, "");
    }

    #[test]
    fn test_conflicting_kind_first_wins() {
        let entries = vec![
            PathEntry::file("a", 1, "x"),
            PathEntry::file("a/b", 2, "y"),
        ];
        let tree = flatten(&entries).unwrap();
        assert_eq!(tree.node("a").unwrap().kind, EntryKind::File);
        assert_eq!(tree.node("a/b").unwrap().kind, EntryKind::File);
        assert_eq!(tree.edges, vec![ContainmentEdge::new("a", "a/b")]);
    }

    #[test]
    fn test_invalid_paths_are_rejected() {
        for bad in ["", "/abs/path", "a//b", "trailing/"] {
            let err = flatten(&[PathEntry::file(bad, 1, "h")]).unwrap_err();
            assert!(matches!(err, FlattenError::InvalidPath { .. }), "{bad:?}");
        }
    }
}
