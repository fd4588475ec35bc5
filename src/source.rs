//! Source document store access.
//!
//! The crawl that fills the store is not part of this crate; this module
//! only reads work documents back out, filtered to those with non-empty
//! translations and non-empty download links. Two backends are provided:
//! the `works` table in SQLite and a JSON array dump on disk.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};

use vivy_ingest_core::models::WorkDocument;

use crate::config::Config;
use crate::index::write_json_atomic;

/// A store of work documents that can be queried for ingestible works.
#[async_trait]
pub trait WorkSource: Send + Sync {
    /// Short label used in logs and progress output.
    fn name(&self) -> String;

    /// All works with non-empty translations and non-empty download links.
    async fn fetch_works(&self) -> Result<Vec<WorkDocument>>;
}

/// Works stored as JSON text in the SQLite `works` table.
pub struct SqliteWorkSource {
    pool: SqlitePool,
}

impl SqliteWorkSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// SQL form of [`WorkDocument::is_ingestible`]. Mirrors the
/// `translations` → `translation` fallback.
const INGESTIBLE_FILTER: &str = r#"
    SELECT doc_json FROM works
    WHERE json_type(doc_json, '$.download_links') = 'object'
      AND EXISTS (SELECT 1 FROM json_each(doc_json, '$.download_links'))
      AND (
        (json_type(doc_json, '$.translations') = 'object'
          AND EXISTS (SELECT 1 FROM json_each(doc_json, '$.translations')))
        OR (json_type(doc_json, '$.translations') IS NULL
          AND json_type(doc_json, '$.translation') = 'object'
          AND EXISTS (SELECT 1 FROM json_each(doc_json, '$.translation')))
      )
    ORDER BY id
"#;

#[async_trait]
impl WorkSource for SqliteWorkSource {
    fn name(&self) -> String {
        "sqlite:works".to_string()
    }

    async fn fetch_works(&self) -> Result<Vec<WorkDocument>> {
        let rows: Vec<String> = sqlx::query_scalar(INGESTIBLE_FILTER)
            .fetch_all(&self.pool)
            .await?;
        let mut works = Vec::with_capacity(rows.len());
        for json in rows {
            let value: Value = serde_json::from_str(&json)?;
            works.push(WorkDocument::from_value(value)?);
        }
        Ok(works)
    }
}

/// Works read from a JSON file holding an array of documents.
pub struct JsonWorkSource {
    path: PathBuf,
}

impl JsonWorkSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl WorkSource for JsonWorkSource {
    fn name(&self) -> String {
        format!("json:{}", self.path.display())
    }

    async fn fetch_works(&self) -> Result<Vec<WorkDocument>> {
        let mut works = Vec::new();
        for (i, value) in read_documents(&self.path)?.into_iter().enumerate() {
            match WorkDocument::from_value(value) {
                Ok(doc) if doc.is_ingestible() => works.push(doc),
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!("skipping document {} of {}: {}", i, self.path.display(), err)
                }
            }
        }
        Ok(works)
    }
}

/// Build the configured source. The SQLite source shares the caller's pool.
pub fn from_config(config: &Config, pool: Option<&SqlitePool>) -> Result<Box<dyn WorkSource>> {
    match config.source.kind.as_str() {
        "sqlite" => {
            let pool = pool
                .ok_or_else(|| anyhow::anyhow!("a sqlite source needs an open database"))?;
            Ok(Box::new(SqliteWorkSource::new(pool.clone())))
        }
        "json" => {
            let path = config
                .source
                .path
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("source.path must be set for a json source"))?;
            Ok(Box::new(JsonWorkSource::new(path)))
        }
        other => bail!("Unknown source kind: '{}'", other),
    }
}

/// Read a JSON dump: either an array of documents or a single document.
fn read_documents(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(match value {
        Value::Array(items) => items,
        single => vec![single],
    })
}

/// Load a JSON dump into the `works` table, replacing documents with the
/// same id. Returns the number of documents written.
pub async fn import_works(pool: &SqlitePool, path: &Path) -> Result<usize> {
    let documents = read_documents(path)?;
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;
    let mut imported = 0usize;
    for (i, value) in documents.into_iter().enumerate() {
        let doc = match WorkDocument::from_value(value) {
            Ok(doc) => doc,
            Err(err) => {
                tracing::warn!("skipping document {}: {}", i, err);
                continue;
            }
        };
        let Some(id) = doc.id() else {
            tracing::warn!("skipping document {}: no id", i);
            continue;
        };
        sqlx::query(
            r#"
            INSERT INTO works (id, doc_json, imported_at) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                doc_json = excluded.doc_json,
                imported_at = excluded.imported_at
            "#,
        )
        .bind(&id)
        .bind(serde_json::to_string(&doc)?)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        imported += 1;
    }
    tx.commit().await?;
    Ok(imported)
}

/// Write the raw extraction (id, translations, download links) of every
/// ingestible work to `output`. Returns the number of works written.
pub async fn extract_raw(source: &dyn WorkSource, output: &Path) -> Result<usize> {
    let works = source.fetch_works().await?;
    let projected: Vec<Value> = works.iter().map(WorkDocument::raw_projection).collect();
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    write_json_atomic(output, &projected)?;
    Ok(projected.len())
}
