//! File acquisition: insert, update, and copy.
//!
//! Every record owns one directory under `data/`, named by its id. The
//! three operations differ in how they treat a failed file:
//!
//! | Operation | On a failed link |
//! |-----------|------------------|
//! | [`Acquirer::insert`] | remove the record directory, commit nothing, log the error |
//! | [`Acquirer::update`] | log the error, keep going, report a partial tally |
//! | [`Acquirer::copy`] | remove the record directory, commit nothing, log the error |
//!
//! Per-record problems come back as an [`Outcome`] with `status == false`.
//! `Err` is reserved for infrastructure failures (staging store, data root).

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::ffi::OsStr;
use std::io::ErrorKind;
use std::mem::discriminant;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use vivy_ingest_core::identity;
use vivy_ingest_core::models::{
    normalize_composer, normalize_title, strip_apostrophe_runs, CandidateText, ErrorRecord,
    IndexRecord, RESERVED_FIELDS,
};
use vivy_ingest_core::store::StagingStore;

use crate::config::Config;
use crate::fetch::{file_name, has_allowed_extension, Fetcher};
use crate::index::IndexLayout;

/// Message of a no-op insert or copy into an existing record directory.
pub const ALREADY_EXISTS: &str = "Files already exist";

/// Why an operation did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    NotFound,
    InvalidArguments,
    Download,
    Copy,
}

/// Result of one acquirer operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: bool,
    pub id: String,
    pub message: String,
    pub downloaded: usize,
    pub attempted: usize,
    pub failure: Option<Failure>,
}

impl Outcome {
    fn success(id: &str, message: impl Into<String>, downloaded: usize, attempted: usize) -> Self {
        Self {
            status: true,
            id: id.to_string(),
            message: message.into(),
            downloaded,
            attempted,
            failure: None,
        }
    }

    fn failed(id: &str, failure: Failure, message: impl Into<String>) -> Self {
        Self {
            status: false,
            id: id.to_string(),
            message: message.into(),
            downloaded: 0,
            attempted: 0,
            failure: Some(failure),
        }
    }
}

/// Where failed acquisitions are reported when the staging error log is
/// not the right place (for example a separate error file per run).
#[async_trait]
pub trait ErrorSink: Send + Sync {
    async fn report(&self, error: ErrorRecord) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct AcquirePolicy {
    /// Lower-case file extensions, including the dot (`.mid`).
    pub allowed_extensions: Vec<String>,
    /// `version` stamped on new records.
    pub record_version: String,
}

impl AcquirePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            allowed_extensions: config
                .download
                .allowed_extensions
                .iter()
                .map(|ext| ext.to_lowercase())
                .collect(),
            record_version: config.ingest.record_version.clone(),
        }
    }
}

/// Everything needed to create one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertRequest {
    pub method: u8,
    pub title: String,
    pub composer: String,
    pub text: String,
    pub source_url: String,
    pub links: Vec<String>,
    pub custom_id: Option<String>,
}

impl From<&CandidateText> for InsertRequest {
    fn from(candidate: &CandidateText) -> Self {
        Self {
            method: candidate.method,
            title: candidate.title.clone(),
            composer: candidate.composer.clone(),
            text: candidate.text.clone(),
            source_url: candidate.source_url.clone(),
            links: candidate.links.clone(),
            custom_id: Some(candidate.custom_id()),
        }
    }
}

/// One mutation applied by [`Acquirer::update`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    SetText(String),
    SetTitle(String),
    SetComposer(String),
    SetMethod(u8),
    SetVersion(String),
    /// Merge extra fields into the record. Keys may not shadow record fields.
    MergeAdditional(Map<String, Value>),
    /// Download `links` into the record directory. With `add == false` the
    /// directory is emptied first.
    ReplaceLinks { links: Vec<String>, add: bool },
}

/// Reject an update before anything is touched.
pub fn validate_ops(ops: &[UpdateOp]) -> std::result::Result<(), String> {
    if ops.is_empty() {
        return Err("no update options given".to_string());
    }
    for (i, op) in ops.iter().enumerate() {
        if ops[..i].iter().any(|prev| discriminant(prev) == discriminant(op)) {
            return Err(format!("option given more than once: {:?}", op));
        }
        if let UpdateOp::MergeAdditional(fields) = op {
            if let Some(key) = fields.keys().find(|k| RESERVED_FIELDS.contains(&k.as_str())) {
                return Err(format!(
                    "additional field '{}' would overwrite a record field",
                    key
                ));
            }
        }
    }
    Ok(())
}

pub struct Acquirer {
    layout: IndexLayout,
    staging: Arc<dyn StagingStore>,
    fetcher: Arc<dyn Fetcher>,
    policy: AcquirePolicy,
    error_sink: Option<Arc<dyn ErrorSink>>,
}

impl Acquirer {
    pub fn new(
        layout: IndexLayout,
        staging: Arc<dyn StagingStore>,
        fetcher: Arc<dyn Fetcher>,
        policy: AcquirePolicy,
    ) -> Self {
        Self {
            layout,
            staging,
            fetcher,
            policy,
            error_sink: None,
        }
    }

    /// Route failures to `sink` instead of the staging error log.
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.error_sink = Some(sink);
        self
    }

    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    /// Links whose file type is allowed, de-duplicated, in the given order.
    pub fn eligible_links(&self, links: &[String]) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for link in links {
            if has_allowed_extension(link, &self.policy.allowed_extensions)
                && !out.contains(link)
            {
                out.push(link.clone());
            }
        }
        out
    }

    /// Create a record and download all of its eligible links.
    ///
    /// All or nothing: the first failed link removes the record directory
    /// and the record is logged as an error instead of being staged. If the
    /// record directory already exists the call is a successful no-op.
    pub async fn insert(&self, request: &InsertRequest) -> Result<Outcome> {
        let id = identity::resolve(request.custom_id.as_deref());
        let links = self.eligible_links(&request.links);
        if links.is_empty() {
            return Ok(Outcome::success(&id, "No eligible links, nothing downloaded", 0, 0));
        }

        let dir = self.layout.record_dir(&id);
        if !self.claim_dir(&dir).await? {
            return Ok(Outcome::success(&id, ALREADY_EXISTS, 0, 0));
        }

        let record = self.build_record(&id, request);
        let total = links.len();
        for (done, link) in links.iter().enumerate() {
            if let Err(err) = self.download_into(&dir, link).await {
                self.remove_dir(&dir).await;
                self.route_error(ErrorRecord::new(record, err.to_string(), link.as_str()))
                    .await?;
                let mut outcome = Outcome::failed(
                    &id,
                    Failure::Download,
                    format!("Download failed for {}: {:#}", link, err),
                );
                outcome.downloaded = done;
                outcome.attempted = done + 1;
                return Ok(outcome);
            }
        }

        if let Err(err) = self.staging.put_record(&record).await {
            self.remove_dir(&dir).await;
            return Err(err.context(format!("Failed to stage record {}", id)));
        }

        Ok(Outcome::success(
            &id,
            format!("{}/{} files downloaded", total, total),
            total,
            total,
        ))
    }

    /// Apply `ops` to an existing record.
    ///
    /// Unlike [`insert`](Self::insert), a failed link does not undo the
    /// update: the remaining links are still tried and the tally is
    /// reported in the message.
    pub async fn update(&self, id: &str, ops: &[UpdateOp]) -> Result<Outcome> {
        if let Err(reason) = validate_ops(ops) {
            return Ok(Outcome::failed(id, Failure::InvalidArguments, reason));
        }
        let Some(mut record) = self.staging.get_record(id).await? else {
            return Ok(Outcome::failed(
                id,
                Failure::NotFound,
                format!("No record with id {}", id),
            ));
        };

        let mut changes: Vec<String> = Vec::new();
        let mut downloaded = 0usize;
        let mut attempted = 0usize;

        for op in ops {
            match op {
                UpdateOp::SetText(text) => {
                    record.text = strip_apostrophe_runs(text.trim());
                    changes.push("text updated".to_string());
                }
                UpdateOp::SetTitle(title) => {
                    record.title = normalize_title(title);
                    changes.push(format!("title set to '{}'", record.title));
                }
                UpdateOp::SetComposer(composer) => {
                    record.composer = normalize_composer(composer);
                    changes.push(format!("composer set to '{}'", record.composer));
                }
                UpdateOp::SetMethod(method) => {
                    record.method = *method;
                    changes.push(format!("method set to {}", method));
                }
                UpdateOp::SetVersion(version) => {
                    record.version = version.clone();
                    changes.push(format!("version set to {}", version));
                }
                UpdateOp::MergeAdditional(fields) => {
                    for (key, value) in fields {
                        record.additional.insert(key.clone(), value.clone());
                    }
                    changes.push(format!("{} additional fields merged", fields.len()));
                }
                UpdateOp::ReplaceLinks { links, add } => {
                    let dir = self.layout.record_dir(id);
                    if !add && dir.exists() {
                        tokio::fs::remove_dir_all(&dir).await.with_context(|| {
                            format!("Failed to clear record directory {}", dir.display())
                        })?;
                    }
                    tokio::fs::create_dir_all(&dir).await.with_context(|| {
                        format!("Failed to create record directory {}", dir.display())
                    })?;

                    let eligible = self.eligible_links(links);
                    let mut ok = 0usize;
                    for link in &eligible {
                        match self.download_into(&dir, link).await {
                            Ok(_) => ok += 1,
                            Err(err) => {
                                tracing::warn!(id = %id, link = %link, "update download failed: {:#}", err);
                                self.route_error(ErrorRecord::new(
                                    record.clone(),
                                    err.to_string(),
                                    link.as_str(),
                                ))
                                .await?;
                            }
                        }
                    }
                    downloaded += ok;
                    attempted += eligible.len();
                    changes.push(format!(
                        "{}/{} files downloaded ({})",
                        ok,
                        eligible.len(),
                        if *add { "added" } else { "replaced" }
                    ));
                }
            }
        }

        self.staging.put_record(&record).await?;
        Ok(Outcome::success(id, changes.join("; "), downloaded, attempted))
    }

    /// Create `record`'s directory, copy `source` into it, and stage the
    /// record verbatim. On failure the directory is removed and the error
    /// is logged.
    pub async fn copy(&self, source: &Path, record: &IndexRecord) -> Result<Outcome> {
        let id = record.id.as_str();
        let dir = self.layout.record_dir(id);
        if !self.claim_dir(&dir).await? {
            return Ok(Outcome::success(id, ALREADY_EXISTS, 0, 0));
        }

        let copied = match source.file_name() {
            Some(name) => tokio::fs::copy(source, dir.join(name))
                .await
                .map_err(|e| e.to_string()),
            None => Err("source path has no file name".to_string()),
        };
        if let Err(err) = copied {
            self.remove_dir(&dir).await;
            let link = source.display().to_string();
            self.route_error(ErrorRecord::new(record.clone(), err.clone(), link.as_str()))
                .await?;
            let mut outcome =
                Outcome::failed(id, Failure::Copy, format!("Copy failed for {}: {}", link, err));
            outcome.attempted = 1;
            return Ok(outcome);
        }

        if let Err(err) = self.staging.put_record(record).await {
            self.remove_dir(&dir).await;
            return Err(err.context(format!("Failed to stage record {}", id)));
        }
        Ok(Outcome::success(id, "1/1 files copied", 1, 1))
    }

    /// Report a failure through the configured sink, or the staging error log.
    pub async fn route_error(&self, error: ErrorRecord) -> Result<()> {
        match &self.error_sink {
            Some(sink) => sink.report(error).await,
            None => {
                if !self.staging.record_error(&error).await? {
                    tracing::debug!(id = %error.id, "error already recorded, dropping");
                }
                Ok(())
            }
        }
    }

    fn build_record(&self, id: &str, request: &InsertRequest) -> IndexRecord {
        IndexRecord {
            id: id.to_string(),
            title: normalize_title(&request.title),
            composer: normalize_composer(&request.composer),
            method: request.method,
            text: strip_apostrophe_runs(request.text.trim()),
            link: request.source_url.clone(),
            directory: IndexLayout::relative_dir(id),
            version: self.policy.record_version.clone(),
            additional: Map::new(),
        }
    }

    /// Create the record directory. Returns `false` if it already exists,
    /// which is how concurrent or repeated inserts of one id become no-ops.
    async fn claim_dir(&self, dir: &Path) -> Result<bool> {
        let data_dir = self.layout.data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;
        match tokio::fs::create_dir(dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to create {}", dir.display())),
        }
    }

    /// Download `link` into `dir`. A name already taken in `dir` gets a
    /// numeric suffix (`score_1.mid`), so every link lands as its own file.
    async fn download_into(&self, dir: &Path, link: &str) -> Result<PathBuf> {
        let name = file_name(link)?;
        let bytes = self.fetcher.fetch(link).await?;
        let (mut file, target) = create_unique(dir, &name).await?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;
        file.flush().await?;
        if target.file_name() != Some(OsStr::new(&name)) {
            tracing::debug!(link = %link, "file name taken, saved as {}", target.display());
        }
        Ok(target)
    }

    async fn remove_dir(&self, dir: &Path) {
        if let Err(err) = tokio::fs::remove_dir_all(dir).await {
            if err.kind() != ErrorKind::NotFound {
                tracing::error!("failed to roll back {}: {}", dir.display(), err);
            }
        }
    }
}

/// Open a new file named `name` in `dir`, or `stem_N.ext` for the first
/// free `N` if that name exists.
async fn create_unique(dir: &Path, name: &str) -> Result<(tokio::fs::File, PathBuf)> {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string());
    let extension = path.extension().map(|e| e.to_string_lossy().to_string());

    let mut candidate = name.to_string();
    let mut n = 0usize;
    loop {
        let target = dir.join(&candidate);
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
        {
            Ok(file) => return Ok((file, target)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                n += 1;
                candidate = match &extension {
                    Some(ext) => format!("{}_{}.{}", stem, n, ext),
                    None => format!("{}_{}", stem, n),
                };
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create {}", target.display()))
            }
        }
    }
}
