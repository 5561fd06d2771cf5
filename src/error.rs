// Error Taxonomy
// Typed failures for each ingestion stage. Per-item failures (malformed commit
// lines, dangling edges) are reported alongside results; stage failures are
// carried in the pipeline result with the stage that produced them.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;

/// Errors from turning tree entries into graph nodes and edges
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlattenError {
    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },
}

/// Errors from parsing a raw `hash:tree:author:date:message` line
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitParseError {
    #[error("Malformed commit line {line_number}: expected 5 ':'-separated fields with a non-empty hash, found {fields}")]
    MalformedCommitLine {
        line_number: usize,
        line: String,
        fields: usize,
    },
}

/// Non-duplicate failures while writing commits to the document store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error("Commit ingestion failed ({inserted} inserted, {failed} failed): {reason}")]
    IngestFailure {
        reason: String,
        inserted: usize,
        failed: usize,
    },
}

/// Errors from upserting nodes and edges into the graph store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Per-edge and non-fatal: the edge is skipped and sync continues
    #[error("Dangling edge {parent_path} -> {child_path}: node {missing} does not exist")]
    DanglingEdge {
        parent_path: String,
        child_path: String,
        missing: String,
    },

    #[error("Graph store failure while upserting {target}: {reason}")]
    StoreFailure { target: String, reason: String },
}

/// Errors from interpreting a repository URL as GitHub coordinates
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryUrlError {
    #[error("Invalid GitHub URL: {url}")]
    NotGitHub { url: String },

    #[error("GitHub URL has no repository name: {url}")]
    MissingRepository { url: String },

    #[error("GitHub URL {url} has an unusable owner or repository name {segment:?}")]
    InvalidSegment { url: String, segment: String },
}

/// Errors from the containerized static analysis run
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Static analysis is disabled in configuration")]
    Disabled,

    #[error("Failed to launch scanner: {0}")]
    Launch(#[source] std::io::Error),

    #[error("Scanner exited with status {status}: {stderr}")]
    ScannerFailed { status: i32, stderr: String },

    #[error("Scanner timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to fetch analysis results: {0}")]
    Results(#[source] reqwest::Error),
}

/// The pipeline stages whose outcome is reported independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Acquire,
    Commits,
    Tree,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Acquire => "acquire",
            Stage::Commits => "commits",
            Stage::Tree => "tree",
        }
    }
}

/// A stage-level failure of an ingestion run
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to acquire working copy of {url} at {dest:?}: {reason}")]
    AcquireFailure {
        url: String,
        dest: PathBuf,
        reason: String,
    },

    #[error("Failed to enumerate commits in {dest:?}: {reason}")]
    CommitEnumerationFailure { dest: PathBuf, reason: String },

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("Failed to fetch repository tree for {repository}: {reason}")]
    TreeFetchFailure { repository: String, reason: String },

    #[error(transparent)]
    Flatten(#[from] FlattenError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::AcquireFailure { .. } => Stage::Acquire,
            PipelineError::CommitEnumerationFailure { .. } | PipelineError::Ingest(_) => {
                Stage::Commits
            }
            PipelineError::TreeFetchFailure { .. }
            | PipelineError::Flatten(_)
            | PipelineError::Sync(_) => Stage::Tree,
        }
    }

    /// Stable machine-readable name of the failure kind
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::AcquireFailure { .. } => "acquire_failure",
            PipelineError::CommitEnumerationFailure { .. } => "commit_enumeration_failure",
            PipelineError::Ingest(_) => "ingest_failure",
            PipelineError::TreeFetchFailure { .. } => "tree_fetch_failure",
            PipelineError::Flatten(_) => "invalid_path",
            PipelineError::Sync(_) => "graph_sync_failure",
        }
    }
}

impl Serialize for PipelineError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("PipelineError", 3)?;
        state.serialize_field("stage", &self.stage())?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_stage_mapping() {
        let acquire = PipelineError::AcquireFailure {
            url: "https://github.com/a/b".to_string(),
            dest: PathBuf::from("/tmp/b"),
            reason: "network unreachable".to_string(),
        };
        assert_eq!(acquire.stage(), Stage::Acquire);

        let ingest = PipelineError::from(IngestError::IngestFailure {
            reason: "connection reset".to_string(),
            inserted: 3,
            failed: 1,
        });
        assert_eq!(ingest.stage(), Stage::Commits);

        let flatten = PipelineError::from(FlattenError::InvalidPath {
            path: String::new(),
            reason: "path is empty",
        });
        assert_eq!(flatten.stage(), Stage::Tree);
    }

    #[test]
    fn test_pipeline_error_serializes_stage_and_kind() {
        let err = PipelineError::TreeFetchFailure {
            repository: "a/b".to_string(),
            reason: "404 Not Found".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["stage"], "tree");
        assert_eq!(json["kind"], "tree_fetch_failure");
        assert!(json["message"].as_str().unwrap().contains("404"));
    }
}
