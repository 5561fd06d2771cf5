// RepoGraph CLI - ingest repositories and query the stored graph
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

// Macro for conditional printing based on quiet flag
macro_rules! qprintln {
    ($quiet:expr, $($arg:tt)*) => {
        if !$quiet {
            println!($($arg)*);
        }
    };
}

use repograph::analysis::project_key_for;
use repograph::{
    init_logging_with_level, start_server, with_trace_id, AppConfig, AppState, CommitFilter,
    EntryKind, IngestionPipeline, NodeFilter, RepoCoordinates, SonarQubeAnalyzer, StaticAnalyzer,
    StoreHandles,
};

#[derive(Parser)]
#[command(name = "repograph")]
#[command(about = "Ingest git repositories into a containment graph and commit store", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose logging (DEBUG level)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors and suppress progress output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true, env = "REPOGRAPH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start HTTP REST API server
    Serve {
        /// Port to listen on; defaults to server.port from configuration
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ingest one repository: clone or update, store commits, sync the tree graph
    Ingest {
        /// GitHub repository URL
        url: String,
        /// Working copy location; defaults to <workspace>/<owner>/<repo>
        #[arg(short, long)]
        dest: Option<PathBuf>,
    },

    /// List stored commits matching every given field
    QueryCommits {
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        hash: Option<String>,
    },

    /// List stored graph nodes matching every given field
    QueryNodes {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        path: Option<String>,
        /// file or directory
        #[arg(long = "type")]
        kind: Option<EntryKind>,
        #[arg(long)]
        size: Option<u64>,
        #[arg(long)]
        sha: Option<String>,
    },

    /// Run SonarQube analysis on a repository's working copy
    Analyze {
        /// GitHub repository URL
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = init_logging_with_level(cli.verbose, cli.quiet);
    let quiet = cli.quiet;

    let config = AppConfig::load(cli.config.as_deref())?;
    let stores = StoreHandles::connect(&config.storage).await?;

    let result = with_trace_id("repograph-cli", run(cli.command, config, stores.clone(), quiet)).await;
    stores.close().await;
    result
}

async fn run(command: Commands, config: AppConfig, stores: StoreHandles, quiet: bool) -> Result<()> {
    match command {
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.server.port);
            qprintln!(quiet, "Starting RepoGraph HTTP server on port {port}");
            qprintln!(quiet, "API endpoints:");
            qprintln!(quiet, "   POST /api/fetch-repo      - Ingest a repository");
            qprintln!(quiet, "   POST /api/analyze         - Run static analysis");
            qprintln!(quiet, "   POST /api/query-commits   - Query stored commits");
            qprintln!(quiet, "   POST /api/query-metadata  - Query graph nodes");
            qprintln!(quiet, "   GET  /health              - Health check");
            qprintln!(quiet, "   GET  /stats               - Ingestion counters");

            let state = AppState::from_config(config, stores)?;
            start_server(state, port).await?;
        }

        Commands::Ingest { url, dest } => {
            let dest = match dest {
                Some(dest) => dest,
                None => config.destination_for(&RepoCoordinates::from_github_url(&url)?),
            };
            let pipeline = IngestionPipeline::from_config(&config, &stores)?;
            let result = pipeline.run(&url, &dest).await;

            qprintln!(quiet, "{}", serde_json::to_string_pretty(&result)?);
            if let Some(err) = result.fatal_error() {
                anyhow::bail!("{} stage failed: {}", err.stage().as_str(), err);
            }
            qprintln!(quiet, "{}", result.summary());
        }

        Commands::QueryCommits { author, date, hash } => {
            let filter = CommitFilter { author, date, hash };
            let commits = stores.commits.find(&filter).await?;
            println!("{}", serde_json::to_string_pretty(&commits)?);
        }

        Commands::QueryNodes {
            name,
            path,
            kind,
            size,
            sha,
        } => {
            let filter = NodeFilter {
                name,
                path,
                kind,
                size,
                content_hash: sha,
            };
            let nodes = stores.graph.find_nodes(&filter).await?;
            println!("{}", serde_json::to_string_pretty(&nodes)?);
        }

        Commands::Analyze { url } => {
            let coords = RepoCoordinates::from_github_url(&url)?;
            let dest = config.destination_for(&coords);
            let analyzer = SonarQubeAnalyzer::new(config.analysis.clone())?;
            let pipeline = IngestionPipeline::from_config(&config, &stores)?;

            let (_outcome, _guard) = pipeline.acquire_locked(&url, &dest).await?;
            let issues = analyzer.analyze(&dest, &project_key_for(&coords.repo)).await?;
            println!("{}", serde_json::to_string_pretty(&issues)?);
        }
    }

    Ok(())
}
