//! Graph store synchronisation
//!
//! Upserts flattened nodes and containment edges. Nodes are written before
//! any edge so that edges only ever reference nodes that exist.

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::SyncError;
use crate::observability::{record_metric, Counter};
use crate::stores::{EdgeUpsert, GraphStore, NodeUpsert};
use crate::types::{ContainmentEdge, GraphNode};

/// What one sync call changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub nodes_created: usize,
    pub nodes_existing: usize,
    pub edges_created: usize,
    pub edges_existing: usize,
    /// Edges skipped because an endpoint node was missing
    #[serde(serialize_with = "serialize_errors")]
    pub dangling_edges: Vec<SyncError>,
}

fn serialize_errors<S: serde::Serializer>(
    errors: &[SyncError],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(errors.iter().map(|e| e.to_string()))
}

/// Upsert nodes, then edges. Dangling edges are collected in the report; any
/// other store failure aborts the call.
#[instrument(skip_all, fields(nodes = nodes.len(), edges = edges.len()))]
pub async fn sync<S>(
    nodes: &[GraphNode],
    edges: &[ContainmentEdge],
    store: &S,
) -> Result<SyncReport, SyncError>
where
    S: GraphStore + ?Sized,
{
    let mut report = SyncReport::default();

    for node in nodes {
        let outcome = store
            .upsert_node(node)
            .await
            .map_err(|e| SyncError::StoreFailure {
                target: format!("node {}", node.path),
                reason: format!("{e:#}"),
            })?;
        match outcome {
            NodeUpsert::Created => report.nodes_created += 1,
            NodeUpsert::Existing => report.nodes_existing += 1,
        }
    }

    for edge in edges {
        let outcome = store
            .upsert_edge(edge)
            .await
            .map_err(|e| SyncError::StoreFailure {
                target: format!("edge {} -> {}", edge.parent_path, edge.child_path),
                reason: format!("{e:#}"),
            })?;
        match outcome {
            EdgeUpsert::Created => report.edges_created += 1,
            EdgeUpsert::Existing => report.edges_existing += 1,
            EdgeUpsert::MissingEndpoint(missing) => {
                let err = SyncError::DanglingEdge {
                    parent_path: edge.parent_path.clone(),
                    child_path: edge.child_path.clone(),
                    missing,
                };
                warn!("{}", err);
                report.dangling_edges.push(err);
            }
        }
    }

    record_metric(Counter::NodesCreated, report.nodes_created as u64);
    record_metric(Counter::EdgesCreated, report.edges_created as u64);
    record_metric(Counter::DanglingEdges, report.dangling_edges.len() as u64);

    info!(
        nodes_created = report.nodes_created,
        edges_created = report.edges_created,
        dangling = report.dangling_edges.len(),
        "Graph sync complete"
    );
    Ok(report)
}
