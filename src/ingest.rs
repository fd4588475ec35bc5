//! Ingestion orchestration.
//!
//! Coordinates the full run: source → normalizer → acquirer → staging →
//! (periodic) durable index. Work documents are processed concurrently by
//! a bounded set of tokio tasks. Each task owns its document and shares
//! only the staging store, so a failed or panicking task cannot disturb
//! the directories of its siblings.
//!
//! Checkpoints are taken by the collecting loop only, never from inside a
//! task, so `index.json` is written by one writer at a time.

use anyhow::{bail, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;

use vivy_ingest_core::models::{IndexRecord, WorkDocument};
use vivy_ingest_core::normalize::Normalizer;
use vivy_ingest_core::store::StagingStore;

use crate::acquire::{
    AcquirePolicy, Acquirer, InsertRequest, Outcome, UpdateOp, ALREADY_EXISTS,
};
use crate::config::Config;
use crate::db;
use crate::fetch::HttpFetcher;
use crate::index::{compile_index_and_errors, seed_staging, CheckpointStats, IndexLayout};
use crate::migrate;
use crate::progress::{IngestProgressEvent, NoProgress, ProgressMode, ProgressReporter};
use crate::source::{self, WorkSource};
use crate::staging::SqliteStagingStore;

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Process at most this many works.
    pub limit: Option<usize>,
    /// Normalize only; no downloads and no writes.
    pub dry_run: bool,
    /// Drop staged state left by an earlier run before seeding from disk.
    pub fresh: bool,
}

/// Counters for one ingest run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub works: usize,
    pub skipped_works: usize,
    pub rejected_entries: usize,
    pub candidates: usize,
    pub inserted: usize,
    pub already_present: usize,
    pub no_links: usize,
    pub failed: usize,
    pub worker_failures: usize,
    pub checkpoints: usize,
    pub last_checkpoint: Option<CheckpointStats>,
}

/// What one task did with one work document.
#[derive(Debug, Default)]
struct WorkReport {
    skipped: bool,
    rejected: usize,
    candidates: usize,
    inserted: usize,
    already_present: usize,
    no_links: usize,
    failed: usize,
}

impl IngestSummary {
    fn absorb(&mut self, report: &WorkReport) {
        if report.skipped {
            self.skipped_works += 1;
        }
        self.rejected_entries += report.rejected;
        self.candidates += report.candidates;
        self.inserted += report.inserted;
        self.already_present += report.already_present;
        self.no_links += report.no_links;
        self.failed += report.failed;
    }
}

pub struct Orchestrator {
    source: Arc<dyn WorkSource>,
    normalizer: Arc<Normalizer>,
    acquirer: Arc<Acquirer>,
    staging: Arc<dyn StagingStore>,
    layout: IndexLayout,
    workers: usize,
    checkpoint_every: usize,
    progress: Box<dyn ProgressReporter>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn WorkSource>,
        normalizer: Arc<Normalizer>,
        acquirer: Arc<Acquirer>,
        staging: Arc<dyn StagingStore>,
        layout: IndexLayout,
    ) -> Self {
        Self {
            source,
            normalizer,
            acquirer,
            staging,
            layout,
            workers: 8,
            checkpoint_every: 100,
            progress: Box::new(NoProgress),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_checkpoint_every(mut self, every: usize) -> Self {
        self.checkpoint_every = every.max(1);
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub async fn run(&self, options: &IngestOptions) -> Result<IngestSummary> {
        let source_name = self.source.name();
        self.progress.report(IngestProgressEvent::Discovering {
            source: source_name.clone(),
        });

        let mut works = self.source.fetch_works().await?;
        if let Some(limit) = options.limit {
            works.truncate(limit);
        }
        let total = works.len();
        let mut summary = IngestSummary {
            works: total,
            ..Default::default()
        };

        if options.dry_run {
            return Ok(survey_works(&self.normalizer, &works));
        }

        if options.fresh {
            self.staging.clear().await?;
        }
        let seeded = seed_staging(self.staging.as_ref(), &self.layout).await?;
        tracing::info!(
            records = seeded.records_added,
            errors = seeded.errors_added,
            works = total,
            "starting ingest from {}",
            source_name
        );

        let mut pending = works.into_iter();
        let mut tasks: JoinSet<Result<WorkReport>> = JoinSet::new();
        let mut completed = 0usize;

        loop {
            while tasks.len() < self.workers {
                let Some(doc) = pending.next() else { break };
                let normalizer = Arc::clone(&self.normalizer);
                let acquirer = Arc::clone(&self.acquirer);
                tasks.spawn(async move { process_work(&normalizer, &acquirer, doc).await });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            match joined {
                Ok(Ok(report)) => summary.absorb(&report),
                Ok(Err(err)) => {
                    summary.worker_failures += 1;
                    tracing::error!("work failed: {:#}", err);
                }
                Err(err) => {
                    summary.worker_failures += 1;
                    tracing::error!("worker task aborted: {}", err);
                }
            }

            completed += 1;
            self.progress.report(IngestProgressEvent::Ingesting {
                source: source_name.clone(),
                n: completed as u64,
                total: total as u64,
            });

            if completed % self.checkpoint_every == 0 {
                match self.checkpoint().await {
                    Ok(stats) => {
                        summary.checkpoints += 1;
                        summary.last_checkpoint = Some(stats);
                    }
                    Err(err) => tracing::error!("checkpoint failed, continuing: {:#}", err),
                }
            }
        }

        let stats = self.checkpoint().await?;
        summary.checkpoints += 1;
        summary.last_checkpoint = Some(stats);
        Ok(summary)
    }

    async fn checkpoint(&self) -> Result<CheckpointStats> {
        let stats = compile_index_and_errors(self.staging.as_ref(), &self.layout).await?;
        self.progress.report(IngestProgressEvent::Checkpoint {
            records: stats.records as u64,
            errors: stats.errors as u64,
        });
        Ok(stats)
    }
}

/// Normalize one work and insert each of its candidates in order.
async fn process_work(
    normalizer: &Normalizer,
    acquirer: &Acquirer,
    doc: WorkDocument,
) -> Result<WorkReport> {
    let normalized = normalizer.normalize(&doc);
    let label = normalized.work_id.as_deref().unwrap_or("<no id>");
    tracing::info!("--- {} ---", label);

    let mut report = WorkReport {
        rejected: normalized.rejected.len(),
        candidates: normalized.candidates.len(),
        ..Default::default()
    };
    if let Some(reason) = &normalized.skipped {
        tracing::info!(work = %label, "skipped: {}", reason);
        report.skipped = true;
        return Ok(report);
    }

    for candidate in &normalized.candidates {
        let outcome = acquirer.insert(&InsertRequest::from(candidate)).await?;
        tracing::info!(id = %outcome.id, status = outcome.status, "{}", outcome.message);
        if !outcome.status {
            report.failed += 1;
        } else if outcome.message == ALREADY_EXISTS {
            report.already_present += 1;
        } else if outcome.attempted == 0 {
            report.no_links += 1;
        } else {
            report.inserted += 1;
        }
    }
    Ok(report)
}

/// Shared wiring for commands that write through the acquirer.
pub struct Pipeline {
    pub pool: sqlx::SqlitePool,
    pub staging: Arc<dyn StagingStore>,
    pub acquirer: Arc<Acquirer>,
    pub layout: IndexLayout,
}

impl Pipeline {
    /// Connect, apply the schema, and seed staging from the durable index.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;
        let layout = IndexLayout::from_config(config);
        layout.ensure()?;
        let staging: Arc<dyn StagingStore> = Arc::new(SqliteStagingStore::new(pool.clone()));
        let fetcher = Arc::new(HttpFetcher::from_config(&config.download)?);
        let acquirer = Arc::new(Acquirer::new(
            layout.clone(),
            Arc::clone(&staging),
            fetcher,
            AcquirePolicy::from_config(config),
        ));
        Ok(Self {
            pool,
            staging,
            acquirer,
            layout,
        })
    }

    pub async fn seed(&self) -> Result<()> {
        seed_staging(self.staging.as_ref(), &self.layout).await?;
        Ok(())
    }

    pub async fn checkpoint(&self) -> Result<CheckpointStats> {
        compile_index_and_errors(self.staging.as_ref(), &self.layout).await
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Run the ingest command and print a summary.
pub async fn run_ingest(config: &Config, options: &IngestOptions, mode: ProgressMode) -> Result<()> {
    if options.dry_run {
        return run_dry(config, options.limit).await;
    }

    let pipeline = Pipeline::open(config).await?;
    let source: Arc<dyn WorkSource> =
        Arc::from(source::from_config(config, Some(&pipeline.pool))?);
    let normalizer = Arc::new(Normalizer::new(config.ingest.normalizer_settings()?));
    let source_name = source.name();

    let orchestrator = Orchestrator::new(
        source,
        normalizer,
        Arc::clone(&pipeline.acquirer),
        Arc::clone(&pipeline.staging),
        pipeline.layout.clone(),
    )
    .with_workers(config.ingest.workers)
    .with_checkpoint_every(config.ingest.checkpoint_every)
    .with_progress(mode.reporter());

    let summary = orchestrator.run(options).await?;

    println!("ingest {}", source_name);
    println!("  works: {}", summary.works);
    println!("  skipped works: {}", summary.skipped_works);
    println!("  rejected entries: {}", summary.rejected_entries);
    println!("  candidate texts: {}", summary.candidates);
    println!("  inserted: {}", summary.inserted);
    println!("  already present: {}", summary.already_present);
    println!("  no eligible links: {}", summary.no_links);
    println!("  failed: {}", summary.failed);
    if summary.worker_failures > 0 {
        println!("  worker failures: {}", summary.worker_failures);
    }
    if let Some(stats) = summary.last_checkpoint {
        println!(
            "  checkpoint: {} records, {} errors -> {}",
            stats.records,
            stats.errors,
            pipeline.layout.root().display()
        );
    }
    println!("ok");

    pipeline.close().await;
    Ok(())
}

/// Normalize the source's works and print counts. The database is opened
/// only for a SQLite source and must already exist; nothing is written.
async fn run_dry(config: &Config, limit: Option<usize>) -> Result<()> {
    let pool = match config.source.kind.as_str() {
        "sqlite" => Some(db::connect_existing(config).await?),
        _ => None,
    };
    let source = source::from_config(config, pool.as_ref())?;
    let normalizer = Normalizer::new(config.ingest.normalizer_settings()?);

    let mut works = source.fetch_works().await?;
    if let Some(limit) = limit {
        works.truncate(limit);
    }
    let summary = survey_works(&normalizer, &works);

    println!("ingest {} (dry-run)", source.name());
    println!("  works found: {}", summary.works);
    println!("  skipped works: {}", summary.skipped_works);
    println!("  rejected entries: {}", summary.rejected_entries);
    println!("  candidate texts: {}", summary.candidates);
    if let Some(pool) = pool {
        pool.close().await;
    }
    Ok(())
}

/// Normalize `works` without acquiring anything.
fn survey_works(normalizer: &Normalizer, works: &[WorkDocument]) -> IngestSummary {
    let mut summary = IngestSummary {
        works: works.len(),
        ..Default::default()
    };
    for doc in works {
        let normalized = normalizer.normalize(doc);
        summary.absorb(&WorkReport {
            skipped: normalized.skipped.is_some(),
            rejected: normalized.rejected.len(),
            candidates: normalized.candidates.len(),
            ..Default::default()
        });
    }
    summary
}

/// Write the staged state to `index.json` and the error file.
pub async fn run_checkpoint(config: &Config) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    pipeline.seed().await?;
    let stats = pipeline.checkpoint().await?;
    println!("checkpoint");
    println!("  records: {}", stats.records);
    println!("  errors: {}", stats.errors);
    println!("ok");
    pipeline.close().await;
    Ok(())
}

/// Apply update operations to one record, then checkpoint.
pub async fn run_update(config: &Config, id: &str, ops: &[UpdateOp]) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    pipeline.seed().await?;
    let outcome = pipeline.acquirer.update(id, ops).await?;
    finish_single(pipeline, "update", outcome).await
}

/// Copy a local file in as a new record, then checkpoint.
pub async fn run_copy(config: &Config, file: &Path, record: &IndexRecord) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    pipeline.seed().await?;
    let outcome = pipeline.acquirer.copy(file, record).await?;
    finish_single(pipeline, "copy", outcome).await
}

async fn finish_single(pipeline: Pipeline, command: &str, outcome: Outcome) -> Result<()> {
    let stats = pipeline.checkpoint().await?;
    pipeline.close().await;

    println!("{} {}", command, outcome.id);
    println!("  {}", outcome.message);
    println!("  index: {} records, {} errors", stats.records, stats.errors);
    if !outcome.status {
        bail!("{} failed for {}: {}", command, outcome.id, outcome.message);
    }
    println!("ok");
    Ok(())
}
