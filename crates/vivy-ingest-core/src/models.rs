//! Core data models for the VIVY ingestion pipeline.
//!
//! A [`WorkDocument`] is the loosely shaped record read from the source
//! store. The normalizer turns it into [`CandidateText`]s, and the acquirer
//! turns each accepted candidate into an [`IndexRecord`] (or, on failure,
//! an [`ErrorRecord`]).

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Schema version stamped on newly built index records.
pub const RECORD_VERSION: &str = "0.2";

/// Record produced by the "text after an `english` marker" policy.
pub const METHOD_MARKER_SCAN: u8 = 1;
/// Record produced by the legacy "last element only" policy.
pub const METHOD_LAST_ELEMENT: u8 = 2;
/// Record produced by the legacy "every element" policy.
pub const METHOD_ALL_ELEMENTS: u8 = 3;

/// Field names owned by [`IndexRecord`]. Extra fields may not shadow them.
pub const RESERVED_FIELDS: &[&str] = &[
    "id",
    "title",
    "composer",
    "method",
    "text",
    "link",
    "directory",
    "version",
];

/// One ingested data point, as persisted in `index.json`.
///
/// `additional` carries arbitrary extra fields merged in by updates; it is
/// flattened into the same JSON object as the fixed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: String,
    pub title: String,
    pub composer: String,
    pub method: u8,
    pub text: String,
    pub link: String,
    pub directory: String,
    pub version: String,
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

/// A failed acquisition, keyed by the id of the record it would have created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: String,
    /// The record payload that was being committed.
    pub data: IndexRecord,
    pub error: String,
    /// The link (or source path) that failed.
    pub link: String,
    pub recorded_at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(data: IndexRecord, error: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            id: data.id.clone(),
            data,
            error: error.into(),
            link: link.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// One policy-selected text paired with its work's download links.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateText {
    pub work_id: String,
    /// Position among the accepted candidates of the same work.
    pub sequence: usize,
    pub title: String,
    pub composer: String,
    pub text: String,
    pub source_url: String,
    pub links: Vec<String>,
    pub method: u8,
}

impl CandidateText {
    /// Stable identity for this candidate: `{work_id}_{sequence}`.
    pub fn custom_id(&self) -> String {
        crate::identity::compose(&self.work_id, self.sequence)
    }
}

/// Read-only view over an irregular source work document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkDocument(pub Map<String, Value>);

impl WorkDocument {
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => bail!("work document must be a JSON object, got {}", type_name(&other)),
        }
    }

    /// Source-assigned identifier. Accepts `id`, `_id`, and `{"$oid": ...}`.
    pub fn id(&self) -> Option<String> {
        let raw = self.0.get("id").or_else(|| self.0.get("_id"))?;
        scalar_id(raw)
    }

    /// Name of the translations field: `translations`, else legacy `translation`.
    pub fn translations_key(&self) -> &'static str {
        if self.0.contains_key("translations") {
            "translations"
        } else {
            "translation"
        }
    }

    /// The translations mapping, if present and non-empty.
    pub fn translations(&self) -> Option<&Map<String, Value>> {
        non_empty_object(self.0.get(self.translations_key()))
    }

    /// The download-links mapping, if present and non-empty.
    pub fn download_links(&self) -> Option<&Map<String, Value>> {
        non_empty_object(self.0.get("download_links"))
    }

    /// Source filter: non-empty translations and non-empty download links.
    pub fn is_ingestible(&self) -> bool {
        self.translations().is_some() && self.download_links().is_some()
    }

    /// Canonical title: `general_information.title[0]`, else the top-level
    /// `title` truncated at its first parenthesis.
    pub fn title(&self) -> Option<String> {
        if let Some(title) = self
            .general_information()
            .and_then(|info| info.get("title"))
            .and_then(first_string)
        {
            return Some(title);
        }
        let raw = self.0.get("title").and_then(first_string)?;
        let head = raw.split('(').next().unwrap_or_default().trim().to_string();
        Some(head)
    }

    /// Canonical composer: `general_information.composer[0]`.
    pub fn composer(&self) -> Option<String> {
        self.general_information()
            .and_then(|info| info.get("composer"))
            .and_then(first_string)
    }

    /// Source page URL, kept for traceability.
    pub fn page_url(&self) -> String {
        self.0
            .get("link")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// Raw extraction shape: id, translations and download links only.
    pub fn raw_projection(&self) -> Value {
        let mut out = Map::new();
        if let Some(id) = self.id() {
            out.insert("id".to_string(), Value::String(id));
        }
        for key in ["translations", "translation", "download_links"] {
            if let Some(value) = self.0.get(key) {
                out.insert(key.to_string(), value.clone());
            }
        }
        Value::Object(out)
    }

    fn general_information(&self) -> Option<&Map<String, Value>> {
        self.0.get("general_information").and_then(Value::as_object)
    }
}

fn scalar_id(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("$oid").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn non_empty_object(value: Option<&Value>) -> Option<&Map<String, Value>> {
    value
        .and_then(Value::as_object)
        .filter(|map| !map.is_empty())
}

/// First element of a string sequence, or the value itself if it is a string.
fn first_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Keep only alphanumerics and spaces, lower-cased and trimmed.
pub fn normalize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ')
        .collect::<String>()
        .to_lowercase()
        .trim()
        .to_string()
}

pub fn normalize_composer(composer: &str) -> String {
    composer.trim().to_lowercase()
}

/// Remove runs of two or more apostrophes (wiki markup residue).
/// Single apostrophes are kept.
pub fn strip_apostrophe_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = 0usize;
    for c in text.chars() {
        if c == '\'' {
            run += 1;
            continue;
        }
        if run == 1 {
            out.push('\'');
        }
        run = 0;
        out.push(c);
    }
    if run == 1 {
        out.push('\'');
    }
    out
}
