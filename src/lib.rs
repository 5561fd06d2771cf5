// RepoGraph - Repository ingestion into a containment graph and commit store
// Root library module

pub mod analysis;
pub mod commit_ingestor;
pub mod config;
pub mod error;
pub mod git;
pub mod github;
pub mod graph_sync;
pub mod http_server;
pub mod observability;
pub mod pipeline;
pub mod stores;
pub mod tree_flattener;
pub mod types;

// Re-export key types
pub use observability::{
    get_metrics, init_logging, init_logging_with_level, record_metric, with_trace_id, Counter,
};

pub use types::{
    Commit, ContainmentEdge, EntryKind, FlattenedTree, GraphNode, PathEntry, RepoCoordinates,
};

pub use error::{
    AnalysisError, CommitParseError, FlattenError, IngestError, PipelineError,
    RepositoryUrlError, Stage, SyncError,
};

pub use analysis::{SonarQubeAnalyzer, StaticAnalyzer};
pub use commit_ingestor::{
    ingest, ingest_with_progress, parse, parse_commit_line, IngestProgress, IngestResult,
    ParsedCommits,
};
pub use config::AppConfig;
pub use git::{AcquireOutcome, GitRepository, VersionControl};
pub use github::{GitHubTreeClient, TreeSource};
pub use graph_sync::{sync, SyncReport};
pub use http_server::{create_server, serve, start_server, AppState};
pub use pipeline::{
    DestinationGuard, DestinationLocks, IngestionPipeline, PipelineResult, PipelineTimeouts, StageOutcome,
    TreeReport,
};
pub use stores::{
    CommitFilter, CommitStore, GraphStore, MemoryCommitStore, MemoryGraphStore, NodeFilter,
    StoreHandles,
};
pub use tree_flattener::flatten;
