//! Sort/filter pass from a raw index into a ready index.
//!
//! For every record of the raw index (`[sort].source_root`):
//!
//! 1. If its directory holds a `.mid` or `.midi` file, the first one (by
//!    name) is copied into the target index through [`Acquirer::copy`].
//! 2. Otherwise, if it holds an `.mxl` file, the configured converter is
//!    run as `<converter> <in.mxl> -o <out.mid>` into a scratch directory,
//!    the result is copied in, and the scratch file is removed.
//! 3. Otherwise the record goes to the target error log with
//!    [`NO_SCORE_FILE`].
//!
//! The target is the configured `[storage]` root. Records are processed
//! by the same bounded worker pool as ingest; one checkpoint runs at the end.

use anyhow::{bail, Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tokio::task::JoinSet;
use walkdir::WalkDir;

use vivy_ingest_core::models::{ErrorRecord, IndexRecord};

use crate::acquire::{Acquirer, ALREADY_EXISTS};
use crate::config::{Config, SortConfig};
use crate::index::{load_records, IndexLayout};
use crate::ingest::Pipeline;

pub const NO_SCORE_FILE: &str = "No .MID, .MIDI, or .MXL file found";

const SCRATCH_DIR: &str = ".convert";

/// What a raw record directory offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortAction {
    Copy(PathBuf),
    Convert(PathBuf),
    Missing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortSummary {
    pub records: usize,
    pub copied: usize,
    pub converted: usize,
    pub already_present: usize,
    pub missing: usize,
    pub failed: usize,
}

enum Sorted {
    Copied,
    Converted,
    AlreadyPresent,
    Missing,
    Failed,
}

/// Score file patterns, matched case-insensitively against file names.
pub struct ScoreFiles {
    midi: GlobSet,
    mxl: GlobSet,
}

impl ScoreFiles {
    pub fn new() -> Result<Self> {
        Ok(Self {
            midi: build_globset(&["*.mid", "*.midi"])?,
            mxl: build_globset(&["*.mxl"])?,
        })
    }

    /// Decide what to do with one record directory. A missing directory
    /// is [`SortAction::Missing`].
    pub fn classify(&self, dir: &Path) -> Result<SortAction> {
        if !dir.is_dir() {
            return Ok(SortAction::Missing);
        }
        let mut names: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry?;
            if entry.file_type().is_file() {
                names.push(entry.into_path());
            }
        }
        names.sort();

        let file_name = |path: &PathBuf| {
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        };
        if let Some(midi) = names.iter().find(|p| self.midi.is_match(file_name(p))) {
            return Ok(SortAction::Copy(midi.clone()));
        }
        if let Some(mxl) = names.iter().find(|p| self.mxl.is_match(file_name(p))) {
            return Ok(SortAction::Convert(mxl.clone()));
        }
        Ok(SortAction::Missing)
    }
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
    }
    Ok(builder.build()?)
}

pub struct Sorter {
    acquirer: Arc<Acquirer>,
    source: IndexLayout,
    converter: Option<PathBuf>,
    files: ScoreFiles,
}

impl Sorter {
    pub fn new(acquirer: Arc<Acquirer>, source: IndexLayout, converter: Option<PathBuf>) -> Result<Self> {
        Ok(Self {
            acquirer,
            source,
            converter,
            files: ScoreFiles::new()?,
        })
    }

    /// Sort every record of the raw index. Does not checkpoint.
    pub async fn run(self: Arc<Self>, workers: usize) -> Result<SortSummary> {
        let records = load_records(&self.source.index_path())?;
        let mut summary = SortSummary {
            records: records.len(),
            ..Default::default()
        };

        let mut pending = records.into_iter();
        let mut tasks: JoinSet<Result<Sorted>> = JoinSet::new();
        loop {
            while tasks.len() < workers.max(1) {
                let Some(record) = pending.next() else { break };
                let sorter = Arc::clone(&self);
                tasks.spawn(async move { sorter.sort_record(&record).await });
            }
            let Some(joined) = tasks.join_next().await else {
                break;
            };
            match joined {
                Ok(Ok(Sorted::Copied)) => summary.copied += 1,
                Ok(Ok(Sorted::Converted)) => summary.converted += 1,
                Ok(Ok(Sorted::AlreadyPresent)) => summary.already_present += 1,
                Ok(Ok(Sorted::Missing)) => summary.missing += 1,
                Ok(Ok(Sorted::Failed)) => summary.failed += 1,
                Ok(Err(err)) => {
                    summary.failed += 1;
                    tracing::error!("sort failed: {:#}", err);
                }
                Err(err) => {
                    summary.failed += 1;
                    tracing::error!("sort task aborted: {}", err);
                }
            }
        }
        Ok(summary)
    }

    async fn sort_record(&self, record: &IndexRecord) -> Result<Sorted> {
        let dir = self.source.record_dir(&record.id);
        match self.files.classify(&dir)? {
            SortAction::Copy(midi) => {
                let outcome = self.acquirer.copy(&midi, record).await?;
                tracing::info!(id = %record.id, "{}", outcome.message);
                Ok(if !outcome.status {
                    Sorted::Failed
                } else if outcome.message == ALREADY_EXISTS {
                    Sorted::AlreadyPresent
                } else {
                    Sorted::Copied
                })
            }
            SortAction::Convert(mxl) => self.convert_and_copy(&mxl, record).await,
            SortAction::Missing => {
                tracing::warn!(id = %record.id, "{}", NO_SCORE_FILE);
                self.acquirer
                    .route_error(ErrorRecord::new(record.clone(), NO_SCORE_FILE, record.id.as_str()))
                    .await?;
                Ok(Sorted::Missing)
            }
        }
    }

    async fn convert_and_copy(&self, mxl: &Path, record: &IndexRecord) -> Result<Sorted> {
        let scratch = self
            .acquirer
            .layout()
            .root()
            .join(SCRATCH_DIR)
            .join(&record.id);
        let converted = match self.convert(mxl, &scratch).await {
            Ok(path) => path,
            Err(err) => {
                tracing::warn!(id = %record.id, "conversion failed: {:#}", err);
                self.acquirer
                    .route_error(ErrorRecord::new(
                        record.clone(),
                        format!("{:#}", err),
                        mxl.display().to_string(),
                    ))
                    .await?;
                remove_scratch(&scratch).await;
                return Ok(Sorted::Failed);
            }
        };

        let outcome = self.acquirer.copy(&converted, record).await;
        remove_scratch(&scratch).await;
        let outcome = outcome?;
        tracing::info!(id = %record.id, "{} (converted)", outcome.message);
        Ok(if !outcome.status {
            Sorted::Failed
        } else if outcome.message == ALREADY_EXISTS {
            Sorted::AlreadyPresent
        } else {
            Sorted::Converted
        })
    }

    async fn convert(&self, mxl: &Path, scratch: &Path) -> Result<PathBuf> {
        let Some(converter) = &self.converter else {
            bail!("no MXL converter configured");
        };
        let stem = mxl
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "score".to_string());
        tokio::fs::create_dir_all(scratch)
            .await
            .with_context(|| format!("Failed to create {}", scratch.display()))?;
        let output_path = scratch.join(format!("{}.mid", stem));

        let output = Command::new(converter)
            .arg(mxl)
            .arg("-o")
            .arg(&output_path)
            .output()
            .await
            .with_context(|| format!("Failed to execute '{}'", converter.display()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("converter failed: {}", stderr.trim());
        }
        if !output_path.is_file() {
            bail!("converter produced no file at {}", output_path.display());
        }
        Ok(output_path)
    }
}

async fn remove_scratch(dir: &Path) {
    if let Err(err) = tokio::fs::remove_dir_all(dir).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("failed to remove {}: {}", dir.display(), err);
        }
    }
}

/// Run the sort command and print a summary.
pub async fn run_sort(config: &Config) -> Result<()> {
    let Some(SortConfig {
        source_root,
        converter,
    }) = config.sort.clone()
    else {
        bail!("[sort] is not configured");
    };
    let source = IndexLayout::new(&source_root, &config.storage.error_file);
    if !source.index_path().exists() {
        bail!("No index at {}", source.index_path().display());
    }

    let pipeline = Pipeline::open(config).await?;
    pipeline.seed().await?;
    let sorter = Arc::new(Sorter::new(
        Arc::clone(&pipeline.acquirer),
        source,
        converter,
    )?);
    let summary = sorter.run(config.ingest.workers).await?;
    let stats = pipeline.checkpoint().await?;

    println!("sort {}", source_root.display());
    println!("  records: {}", summary.records);
    println!("  copied: {}", summary.copied);
    println!("  converted: {}", summary.converted);
    println!("  already present: {}", summary.already_present);
    println!("  no score file: {}", summary.missing);
    println!("  failed: {}", summary.failed);
    println!(
        "  checkpoint: {} records, {} errors -> {}",
        stats.records,
        stats.errors,
        pipeline.layout.root().display()
    );
    println!("ok");

    pipeline.close().await;
    Ok(())
}
