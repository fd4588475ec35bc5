//! Durable index: `index.json`, the error file, and the `data/` tree.
//!
//! ```text
//! <root>
//! ├── index.json      all committed index records
//! ├── error.json      first error per failed record id
//! └── data
//!     ├── <record id>/   downloaded files, named by remote filename
//!     └── ...
//! ```
//!
//! Both JSON files are rewritten wholesale at every checkpoint. Each write
//! goes to a sibling temp file that is synced before it replaces the old
//! snapshot, so a crash mid-checkpoint leaves the previous snapshot intact.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use vivy_ingest_core::models::{ErrorRecord, IndexRecord};
use vivy_ingest_core::store::{SeedStats, StagingStore};

use crate::config::Config;

pub const INDEX_FILE: &str = "index.json";
pub const DATA_DIR: &str = "data";

/// Paths of one durable index root.
#[derive(Debug, Clone)]
pub struct IndexLayout {
    root: PathBuf,
    error_file: String,
}

impl IndexLayout {
    pub fn new(root: impl Into<PathBuf>, error_file: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            error_file: error_file.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.storage.root, &config.storage.error_file)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    pub fn error_path(&self) -> PathBuf {
        self.root.join(&self.error_file)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    /// Absolute directory holding one record's files.
    pub fn record_dir(&self, id: &str) -> PathBuf {
        self.data_dir().join(id)
    }

    /// The `directory` value stored in a record: relative to the root.
    pub fn relative_dir(id: &str) -> String {
        format!("{}/{}", DATA_DIR, id)
    }

    /// Create the root and `data/` if missing.
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(self.data_dir()).with_context(|| {
            format!("Failed to create data directory: {}", self.data_dir().display())
        })
    }
}

/// Records and errors written by one checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointStats {
    pub records: usize,
    pub errors: usize,
}

/// Snapshot the staging store into `index.json` and the error file.
pub async fn compile_index_and_errors(
    staging: &dyn StagingStore,
    layout: &IndexLayout,
) -> Result<CheckpointStats> {
    let records = staging.records().await?;
    let errors = staging.errors().await?;
    layout.ensure()?;
    write_json_atomic(&layout.index_path(), &records)?;
    write_json_atomic(&layout.error_path(), &errors)?;
    tracing::info!(
        records = records.len(),
        errors = errors.len(),
        "checkpoint written to {}",
        layout.root().display()
    );
    Ok(CheckpointStats {
        records: records.len(),
        errors: errors.len(),
    })
}

/// Seed the staging store from the current on-disk snapshot.
pub async fn seed_staging(staging: &dyn StagingStore, layout: &IndexLayout) -> Result<SeedStats> {
    let records = load_records(&layout.index_path())?;
    let errors = load_errors(&layout.error_path())?;
    let stats = staging.seed(&records, &errors).await?;
    tracing::debug!(
        records_added = stats.records_added,
        errors_added = stats.errors_added,
        "staging seeded from {}",
        layout.root().display()
    );
    Ok(stats)
}

pub fn load_records(path: &Path) -> Result<Vec<IndexRecord>> {
    let records: Vec<IndexRecord> = load_json_array(path)?;
    Ok(dedup_by_id(records, |r| &r.id, path))
}

pub fn load_errors(path: &Path) -> Result<Vec<ErrorRecord>> {
    let errors: Vec<ErrorRecord> = load_json_array(path)?;
    Ok(dedup_by_id(errors, |e| &e.id, path))
}

/// A missing or empty file is an empty snapshot.
fn load_json_array<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Keep the first entry per id.
fn dedup_by_id<T>(items: Vec<T>, id: impl Fn(&T) -> &String, path: &Path) -> Vec<T> {
    let mut seen = HashSet::new();
    let before = items.len();
    let kept: Vec<T> = items
        .into_iter()
        .filter(|item| seen.insert(id(item).clone()))
        .collect();
    if kept.len() != before {
        tracing::warn!(
            dropped = before - kept.len(),
            "duplicate ids in {}, keeping first",
            path.display()
        );
    }
    kept
}

/// Write pretty JSON to `path` through a synced temp file and a rename.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let temp_path = path.with_extension("json.tmp");
    {
        let mut file = File::create(&temp_path)
            .with_context(|| format!("Failed to create {}", temp_path.display()))?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
