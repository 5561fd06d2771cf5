//! Commit history ingestion
//!
//! Parses `hash:tree:author:date:message` lines into [`Commit`] records and
//! bulk-inserts them into a [`CommitStore`] without ever duplicating a hash.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, instrument, warn};

use crate::error::{CommitParseError, IngestError};
use crate::observability::{record_metric, Counter};
use crate::stores::{CommitStore, InsertOutcome};
use crate::types::Commit;

const FIELD_COUNT: usize = 5;

/// Well-formed commits plus the lines that could not be parsed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCommits {
    pub commits: Vec<Commit>,
    pub rejected: Vec<CommitParseError>,
}

/// Counts from one ingestion batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestResult {
    pub inserted: usize,
    pub skipped_duplicates: usize,
    /// Lines rejected by the parser before reaching the store
    pub malformed_lines: usize,
}

/// Parse one raw commit line. Only the first four colons delimit fields; any
/// further colons stay in the message.
pub fn parse_commit_line(line_number: usize, line: &str) -> Result<Commit, CommitParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let fields: Vec<&str> = line.splitn(FIELD_COUNT, ':').collect();

    match fields.as_slice() {
        [hash, tree, author, date, message] if !hash.is_empty() => Ok(Commit {
            hash: hash.to_string(),
            tree: tree.to_string(),
            author: author.to_string(),
            date: date.to_string(),
            message: message.to_string(),
        }),
        _ => Err(CommitParseError::MalformedCommitLine {
            line_number,
            line: line.to_string(),
            fields: fields.len(),
        }),
    }
}

/// Parse every line, keeping well-formed commits and logging the rest.
/// Blank lines are ignored.
pub fn parse<I, S>(raw_lines: I) -> ParsedCommits
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parsed = ParsedCommits::default();

    for (index, line) in raw_lines.into_iter().enumerate() {
        let line = line.as_ref();
        if line.trim().is_empty() {
            continue;
        }
        match parse_commit_line(index + 1, line) {
            Ok(commit) => parsed.commits.push(commit),
            Err(err) => {
                warn!("Skipping commit line: {}", err);
                parsed.rejected.push(err);
            }
        }
    }

    parsed
}

/// Commits handed to one [`CommitStore::insert_many`] call
pub const INSERT_BATCH_SIZE: usize = 500;

/// Running totals of an ingestion, readable by a caller that stopped waiting
/// before the batch completed
#[derive(Debug, Default)]
pub struct IngestProgress {
    inserted: AtomicUsize,
    skipped_duplicates: AtomicUsize,
    failed: AtomicUsize,
}

impl IngestProgress {
    pub fn inserted(&self) -> usize {
        self.inserted.load(Ordering::Relaxed)
    }

    pub fn skipped_duplicates(&self) -> usize {
        self.skipped_duplicates.load(Ordering::Relaxed)
    }

    /// Commits with a final outcome so far
    pub fn processed(&self) -> usize {
        self.inserted() + self.skipped_duplicates() + self.failed.load(Ordering::Relaxed)
    }
}

/// Insert commits, treating duplicate hashes as expected and skipping them.
///
/// The unique index on `hash` is ensured first. A non-duplicate failure on any
/// document does not stop the rest of the batch, but is reported as
/// [`IngestError::IngestFailure`] once the batch completes.
pub async fn ingest<S>(commits: &[Commit], store: &S) -> Result<IngestResult, IngestError>
where
    S: CommitStore + ?Sized,
{
    ingest_with_progress(commits, store, &IngestProgress::default()).await
}

/// [`ingest`], writing in chunks of [`INSERT_BATCH_SIZE`] and publishing
/// counts to `progress` after every chunk
#[instrument(skip(commits, store, progress), fields(count = commits.len()))]
pub async fn ingest_with_progress<S>(
    commits: &[Commit],
    store: &S,
    progress: &IngestProgress,
) -> Result<IngestResult, IngestError>
where
    S: CommitStore + ?Sized,
{
    store
        .ensure_unique_index()
        .await
        .map_err(|e| IngestError::IngestFailure {
            reason: format!("failed to ensure unique index on hash: {e:#}"),
            inserted: 0,
            failed: commits.len(),
        })?;

    let mut result = IngestResult::default();
    let mut failures = Vec::new();
    let mut failed = 0;

    for chunk in commits.chunks(INSERT_BATCH_SIZE) {
        let outcomes = match store.insert_many(chunk).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(size = chunk.len(), "Commit batch failed: {:#}", e);
                failures.push(format!("batch starting at {}: {e:#}", chunk[0].hash));
                failed += chunk.len();
                progress.failed.fetch_add(chunk.len(), Ordering::Relaxed);
                continue;
            }
        };

        let (mut inserted, mut skipped) = (0, 0);
        for (commit, outcome) in chunk.iter().zip(outcomes) {
            match outcome {
                InsertOutcome::Inserted => inserted += 1,
                InsertOutcome::Duplicate => {
                    debug!(hash = %commit.hash, "Commit already stored");
                    skipped += 1;
                }
                InsertOutcome::Failed(reason) => {
                    failures.push(format!("{}: {}", commit.hash, reason));
                    failed += 1;
                    progress.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        result.inserted += inserted;
        result.skipped_duplicates += skipped;
        progress.inserted.fetch_add(inserted, Ordering::Relaxed);
        progress
            .skipped_duplicates
            .fetch_add(skipped, Ordering::Relaxed);
        record_metric(Counter::CommitsInserted, inserted as u64);
        record_metric(Counter::DuplicatesSkipped, skipped as u64);
    }

    if !failures.is_empty() {
        return Err(IngestError::IngestFailure {
            reason: failures.join("; "),
            inserted: result.inserted,
            failed,
        });
    }

    info!(
        inserted = result.inserted,
        skipped = result.skipped_duplicates,
        "Commit ingestion complete"
    );
    Ok(result)
}
