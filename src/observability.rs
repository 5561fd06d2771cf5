// Observability Infrastructure for RepoGraph
// Structured logging setup, trace-scoped operation wrappers, and process-wide
// ingestion counters.

use anyhow::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

// Global atomic counters for metrics
static OPERATION_COUNTER: AtomicU64 = AtomicU64::new(0);
static ERROR_COUNTER: AtomicU64 = AtomicU64::new(0);
static COMMITS_INSERTED: AtomicU64 = AtomicU64::new(0);
static DUPLICATES_SKIPPED: AtomicU64 = AtomicU64::new(0);
static NODES_CREATED: AtomicU64 = AtomicU64::new(0);
static EDGES_CREATED: AtomicU64 = AtomicU64::new(0);
static DANGLING_EDGES: AtomicU64 = AtomicU64::new(0);
static PIPELINE_RUNS: AtomicU64 = AtomicU64::new(0);
static PIPELINE_FAILURES: AtomicU64 = AtomicU64::new(0);

/// Initialize the logging and tracing infrastructure
/// This should be called once at application startup
pub fn init_logging() -> Result<()> {
    init_logging_with_level(false, false)
}

/// Initialize logging with configurable verbosity
pub fn init_logging_with_level(verbose: bool, quiet: bool) -> Result<()> {
    let filter_level = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("repograph=debug,info")
    } else {
        EnvFilter::new("repograph=info,warn")
    };

    // --quiet always wins over RUST_LOG
    let env_filter = if quiet {
        EnvFilter::new("error")
    } else if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or(filter_level)
    } else {
        filter_level
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(!quiet)
        .with_line_number(verbose)
        .with_file(verbose)
        .with_ansi(true);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        Ok(()) => {
            if !quiet {
                debug!("RepoGraph observability initialized");
            }
            Ok(())
        }
        Err(_) => {
            // Already initialized, which is fine in test environments
            Ok(())
        }
    }
}

/// Ingestion counters exposed through [`get_metrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    CommitsInserted,
    DuplicatesSkipped,
    NodesCreated,
    EdgesCreated,
    DanglingEdges,
    PipelineRuns,
    PipelineFailures,
}

impl Counter {
    fn cell(&self) -> &'static AtomicU64 {
        match self {
            Counter::CommitsInserted => &COMMITS_INSERTED,
            Counter::DuplicatesSkipped => &DUPLICATES_SKIPPED,
            Counter::NodesCreated => &NODES_CREATED,
            Counter::EdgesCreated => &EDGES_CREATED,
            Counter::DanglingEdges => &DANGLING_EDGES,
            Counter::PipelineRuns => &PIPELINE_RUNS,
            Counter::PipelineFailures => &PIPELINE_FAILURES,
        }
    }

    pub fn value(&self) -> u64 {
        self.cell().load(Ordering::Relaxed)
    }
}

/// Add to a process-wide counter
pub fn record_metric(counter: Counter, value: u64) {
    if value == 0 {
        return;
    }
    let total = counter.cell().fetch_add(value, Ordering::Relaxed) + value;
    debug!("metric.counter {:?} += {} (total {})", counter, value, total);
}

/// Operation context for tracing through the system
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub trace_id: Uuid,
    pub span_id: Uuid,
    pub operation: String,
    pub start_time: Instant,
}

impl OperationContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            span_id: Uuid::new_v4(),
            operation: operation.into(),
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Execute a future with a trace context
pub async fn with_trace_id<F, T>(operation: &str, f: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    let ctx = OperationContext::new(operation);
    OPERATION_COUNTER.fetch_add(1, Ordering::Relaxed);

    info!(
        trace_id = %ctx.trace_id,
        span_id = %ctx.span_id,
        "Starting operation: {}", operation
    );

    let result = f.await;
    let elapsed = ctx.elapsed();

    match &result {
        Ok(_) => {
            info!(
                trace_id = %ctx.trace_id,
                span_id = %ctx.span_id,
                elapsed_ms = elapsed.as_millis(),
                "Operation completed successfully: {}", operation
            );
        }
        Err(e) => {
            ERROR_COUNTER.fetch_add(1, Ordering::Relaxed);
            log_error_with_context(e, &ctx);
        }
    }

    result
}

/// Get current metrics snapshot
pub fn get_metrics() -> serde_json::Value {
    serde_json::json!({
        "operations": {
            "total": OPERATION_COUNTER.load(Ordering::Relaxed),
            "errors": ERROR_COUNTER.load(Ordering::Relaxed),
        },
        "ingestion": {
            "pipeline_runs": Counter::PipelineRuns.value(),
            "pipeline_failures": Counter::PipelineFailures.value(),
            "commits_inserted": Counter::CommitsInserted.value(),
            "duplicates_skipped": Counter::DuplicatesSkipped.value(),
            "nodes_created": Counter::NodesCreated.value(),
            "edges_created": Counter::EdgesCreated.value(),
            "dangling_edges": Counter::DanglingEdges.value(),
        },
        "timestamp": Utc::now().to_rfc3339(),
    })
}

/// Structured error logging with context
pub fn log_error_with_context(error: &anyhow::Error, ctx: &OperationContext) {
    let error_chain = error
        .chain()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(" -> ");

    error!(
        trace_id = %ctx.trace_id,
        span_id = %ctx.span_id,
        operation = %ctx.operation,
        elapsed_ms = ctx.elapsed().as_millis(),
        error_chain = %error_chain,
        "Operation failed"
    );
}
