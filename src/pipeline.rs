//! Ingestion pipeline
//!
//! Runs acquire-or-update, commit ingestion and tree-to-graph sync for one
//! repository. Each stage reports its own outcome so that partial success is
//! visible to the caller. Work against one destination directory is
//! serialized through [`DestinationLocks`]; every external call is bounded by
//! a timeout.

use anyhow::Result;
use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::commit_ingestor::{self, IngestProgress, IngestResult};
use crate::config::AppConfig;
use crate::error::{IngestError, PipelineError, SyncError};
use crate::git::{AcquireOutcome, GitRepository, VersionControl};
use crate::github::{GitHubTreeClient, TreeSource};
use crate::graph_sync::{self, SyncReport};
use crate::observability::{record_metric, Counter};
use crate::stores::{CommitStore, GraphStore, StoreHandles};
use crate::tree_flattener;
use crate::types::RepoCoordinates;

/// Shared hold on one destination. Every in-flight git task keeps a clone, so
/// the lock outlives a caller that stopped waiting.
pub type DestinationGuard = Arc<OwnedMutexGuard<()>>;

/// One mutex per destination directory
#[derive(Debug, Default)]
pub struct DestinationLocks {
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl DestinationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `dest`. The guard releases on drop.
    pub async fn lock(&self, dest: &Path) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(dest.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Whether some task currently holds the lock for `dest`
    pub fn is_locked(&self, dest: &Path) -> bool {
        self.locks
            .get(dest)
            .map_or(false, |mutex| mutex.try_lock().map(drop).is_err())
    }
}

/// Upper bounds for each kind of external call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineTimeouts {
    pub git: Duration,
    pub tree: Duration,
    pub store: Duration,
}

impl Default for PipelineTimeouts {
    fn default() -> Self {
        Self {
            git: Duration::from_secs(120),
            tree: Duration::from_secs(30),
            store: Duration::from_secs(60),
        }
    }
}

impl PipelineTimeouts {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            git: config.git.timeout,
            tree: config.github.timeout,
            store: config.storage.operation_timeout,
        }
    }
}

/// Outcome of a single pipeline stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StageOutcome<T> {
    Succeeded(T),
    Failed(PipelineError),
    /// Not attempted because an earlier fatal stage failed
    Skipped,
}

impl<T> StageOutcome<T> {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, StageOutcome::Succeeded(_))
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            StageOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            StageOutcome::Succeeded(value) => Some(value),
            _ => None,
        }
    }
}

/// Tree stage summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeReport {
    pub entries: usize,
    pub nodes: usize,
    pub edges: usize,
    pub sync: SyncReport,
}

/// Structured result of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineResult {
    pub repository: String,
    pub destination: PathBuf,
    pub acquire: StageOutcome<AcquireOutcome>,
    pub commits: StageOutcome<IngestResult>,
    pub tree: StageOutcome<TreeReport>,
}

impl PipelineResult {
    /// The failure that aborted the run, if any. Commit stage failures are
    /// not fatal and are only reported through `commits`.
    pub fn fatal_error(&self) -> Option<&PipelineError> {
        self.acquire.error().or_else(|| self.tree.error())
    }

    pub fn is_success(&self) -> bool {
        self.acquire.is_succeeded() && self.commits.is_succeeded() && self.tree.is_succeeded()
    }

    /// One-line human readable summary
    pub fn summary(&self) -> String {
        if let Some(err) = self.fatal_error() {
            return format!("Ingestion of {} failed: {}", self.repository, err);
        }
        match (&self.commits, &self.tree) {
            (StageOutcome::Succeeded(commits), StageOutcome::Succeeded(tree)) => format!(
                "Repository {} ingested: {} commits inserted, {} duplicates skipped, {} nodes and {} edges synced",
                self.repository, commits.inserted, commits.skipped_duplicates, tree.nodes, tree.edges
            ),
            _ => format!(
                "Repository {} ingested with partial failures",
                self.repository
            ),
        }
    }
}

/// Await `fut` for at most `limit`, flattening both failure modes into a
/// reason string
async fn bounded<T, F>(limit: Duration, fut: F) -> std::result::Result<T, String>
where
    F: Future<Output = Result<T>>,
{
    match timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(_) => Err(format!("timed out after {limit:?}")),
    }
}

/// Run a git call as its own task holding a clone of `guard`. On timeout the
/// task is left to finish and the destination stays locked until it does.
async fn bounded_git<T, F>(
    limit: Duration,
    guard: &DestinationGuard,
    fut: F,
) -> std::result::Result<T, String>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let held = Arc::clone(guard);
    let task = tokio::spawn(async move {
        let output = fut.await;
        drop(held);
        output
    });

    match timeout(limit, task).await {
        Ok(Ok(output)) => output.map_err(|e| format!("{e:#}")),
        Ok(Err(join_err)) => Err(format!("git task failed: {join_err}")),
        Err(_) => {
            warn!(?limit, "Git call still running; destination stays locked until it finishes");
            Err(format!("timed out after {limit:?}"))
        }
    }
}

/// Orchestrates one ingestion run over injected collaborators
#[derive(Clone)]
pub struct IngestionPipeline {
    vcs: Arc<dyn VersionControl>,
    tree_source: Arc<dyn TreeSource>,
    commits: Arc<dyn CommitStore>,
    graph: Arc<dyn GraphStore>,
    locks: Arc<DestinationLocks>,
    timeouts: PipelineTimeouts,
}

impl IngestionPipeline {
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        tree_source: Arc<dyn TreeSource>,
        commits: Arc<dyn CommitStore>,
        graph: Arc<dyn GraphStore>,
    ) -> Self {
        Self {
            vcs,
            tree_source,
            commits,
            graph,
            locks: Arc::new(DestinationLocks::new()),
            timeouts: PipelineTimeouts::default(),
        }
    }

    /// Pipeline with the `git2` and GitHub adapters over the given stores
    pub fn from_config(config: &AppConfig, stores: &StoreHandles) -> Result<Self> {
        let vcs = GitRepository::new(crate::git::types::HistoryOptions {
            max_history_depth: config.git.max_history_depth,
        });
        let tree_source = GitHubTreeClient::new(&config.github)?;
        Ok(Self::new(
            Arc::new(vcs),
            Arc::new(tree_source),
            stores.commits.clone(),
            stores.graph.clone(),
        )
        .with_timeouts(PipelineTimeouts::from_config(config)))
    }

    pub fn with_timeouts(mut self, timeouts: PipelineTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_locks(mut self, locks: Arc<DestinationLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn locks(&self) -> &Arc<DestinationLocks> {
        &self.locks
    }

    pub fn timeouts(&self) -> PipelineTimeouts {
        self.timeouts
    }

    /// Acquire or update `dest` and hand back the held destination lock, for
    /// callers that need to keep working on the copy (static analysis).
    pub async fn acquire_locked(
        &self,
        repo_url: &str,
        dest: &Path,
    ) -> std::result::Result<(AcquireOutcome, DestinationGuard), PipelineError> {
        let guard = Arc::new(self.locks.lock(dest).await);
        let outcome = self.acquire(repo_url, dest, &guard).await?;
        Ok((outcome, guard))
    }

    async fn acquire(
        &self,
        repo_url: &str,
        dest: &Path,
        guard: &DestinationGuard,
    ) -> std::result::Result<AcquireOutcome, PipelineError> {
        let vcs = Arc::clone(&self.vcs);
        let url = repo_url.to_string();
        let path = dest.to_path_buf();
        let call = async move { vcs.acquire_or_update(&url, &path).await };

        bounded_git(self.timeouts.git, guard, call)
            .await
            .map_err(|reason| PipelineError::AcquireFailure {
                url: repo_url.to_string(),
                dest: dest.to_path_buf(),
                reason,
            })
    }

    /// Run every stage for `repo_url` with the working copy at `local_dest`
    #[instrument(skip(self), fields(dest = %local_dest.display()))]
    pub async fn run(&self, repo_url: &str, local_dest: &Path) -> PipelineResult {
        record_metric(Counter::PipelineRuns, 1);

        let mut result = PipelineResult {
            repository: repo_url.to_string(),
            destination: local_dest.to_path_buf(),
            acquire: StageOutcome::Skipped,
            commits: StageOutcome::Skipped,
            tree: StageOutcome::Skipped,
        };

        // Held through commit ingestion; git must never run twice on one copy.
        let guard: DestinationGuard = Arc::new(self.locks.lock(local_dest).await);
        debug!("Acquired destination lock");

        match self.acquire(repo_url, local_dest, &guard).await {
            Ok(outcome) => {
                info!(repo = %repo_url, ?outcome, "Working copy ready");
                result.acquire = StageOutcome::Succeeded(outcome);
            }
            Err(err) => {
                error!("{}", err);
                record_metric(Counter::PipelineFailures, 1);
                result.acquire = StageOutcome::Failed(err);
                return result;
            }
        }

        result.commits = self.ingest_commits(local_dest, &guard).await;
        drop(guard);

        result.tree = self.sync_tree(repo_url).await;
        if result.fatal_error().is_some() {
            record_metric(Counter::PipelineFailures, 1);
        }

        result
    }

    async fn ingest_commits(
        &self,
        dest: &Path,
        guard: &DestinationGuard,
    ) -> StageOutcome<IngestResult> {
        let vcs = Arc::clone(&self.vcs);
        let path = dest.to_path_buf();
        let call = async move { vcs.list_commits(&path).await };

        let lines = match bounded_git(self.timeouts.git, guard, call).await {
            Ok(lines) => lines,
            Err(reason) => {
                let err = PipelineError::CommitEnumerationFailure {
                    dest: dest.to_path_buf(),
                    reason,
                };
                warn!("{}; continuing with tree ingestion", err);
                return StageOutcome::Failed(err);
            }
        };

        let parsed = commit_ingestor::parse(&lines);
        let progress = IngestProgress::default();
        let ingest = commit_ingestor::ingest_with_progress(
            &parsed.commits,
            self.commits.as_ref(),
            &progress,
        );
        let outcome = match timeout(self.timeouts.store, ingest).await {
            Ok(outcome) => outcome,
            Err(_) => Err(IngestError::IngestFailure {
                reason: format!("timed out after {:?}", self.timeouts.store),
                inserted: progress.inserted(),
                failed: parsed.commits.len() - progress.processed(),
            }),
        };

        match outcome {
            Ok(mut ingested) => {
                ingested.malformed_lines = parsed.rejected.len();
                StageOutcome::Succeeded(ingested)
            }
            Err(err) => {
                warn!("{}", err);
                StageOutcome::Failed(err.into())
            }
        }
    }

    async fn sync_tree(&self, repo_url: &str) -> StageOutcome<TreeReport> {
        match self.sync_tree_inner(repo_url).await {
            Ok(report) => StageOutcome::Succeeded(report),
            Err(err) => {
                error!("{}", err);
                StageOutcome::Failed(err)
            }
        }
    }

    async fn sync_tree_inner(&self, repo_url: &str) -> std::result::Result<TreeReport, PipelineError> {
        let coords = RepoCoordinates::from_github_url(repo_url).map_err(|e| {
            PipelineError::TreeFetchFailure {
                repository: repo_url.to_string(),
                reason: e.to_string(),
            }
        })?;

        let entries = bounded(self.timeouts.tree, self.tree_source.fetch_tree(&coords))
            .await
            .map_err(|reason| PipelineError::TreeFetchFailure {
                repository: coords.slug(),
                reason,
            })?;

        let flattened = tree_flattener::flatten(&entries)?;

        let sync = graph_sync::sync(&flattened.nodes, &flattened.edges, self.graph.as_ref());
        let report = match timeout(self.timeouts.store, sync).await {
            Ok(report) => report?,
            Err(_) => {
                return Err(SyncError::StoreFailure {
                    target: format!("graph for {}", coords),
                    reason: format!("timed out after {:?}", self.timeouts.store),
                }
                .into())
            }
        };

        Ok(TreeReport {
            entries: entries.len(),
            nodes: flattened.nodes.len(),
            edges: flattened.edges.len(),
            sync: report,
        })
    }
}
