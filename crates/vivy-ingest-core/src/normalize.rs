//! Record normalization: work document → candidate texts.
//!
//! For each entry of a work's translations mapping the normalizer checks
//! that the entry is a flat sequence of strings, applies the configured
//! [`TextPolicy`], drops texts shorter than the minimum, cleans markup
//! residue, and pairs each survivor with the link list chosen by the
//! [`LinkSelection`] policy.
//!
//! A malformed entry is logged and skipped; it never aborts the work.

use serde_json::{Map, Value};

use crate::models::{
    normalize_composer, strip_apostrophe_runs, CandidateText, WorkDocument, METHOD_ALL_ELEMENTS,
    METHOD_LAST_ELEMENT, METHOD_MARKER_SCAN,
};

/// Texts shorter than this (after trimming) are usually just a language name.
pub const DEFAULT_MIN_TEXT_CHARS: usize = 20;

/// Which strings of a translations entry become candidate texts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextPolicy {
    /// Accept the string directly after each marker (case-insensitive,
    /// trimmed). Marker strings themselves are skipped.
    Marker { marker: String },
    /// Accept only the last string of each entry.
    LastElement,
    /// Accept every string of each entry.
    AllElements,
}

impl TextPolicy {
    pub fn english() -> Self {
        TextPolicy::Marker {
            marker: "english".to_string(),
        }
    }

    /// The `method` tag stamped on records produced by this policy.
    pub fn method(&self) -> u8 {
        match self {
            TextPolicy::Marker { .. } => METHOD_MARKER_SCAN,
            TextPolicy::LastElement => METHOD_LAST_ELEMENT,
            TextPolicy::AllElements => METHOD_ALL_ELEMENTS,
        }
    }

    fn select<'a>(&self, texts: &[&'a str]) -> Vec<&'a str> {
        match self {
            TextPolicy::Marker { marker } => {
                let marker = marker.trim().to_lowercase();
                let mut accepting = false;
                let mut out = Vec::new();
                for text in texts {
                    if text.trim().to_lowercase() == marker {
                        accepting = true;
                        continue;
                    }
                    if accepting {
                        out.push(*text);
                        accepting = false;
                    }
                }
                out
            }
            TextPolicy::LastElement => texts.last().copied().into_iter().collect(),
            TextPolicy::AllElements => texts.to_vec(),
        }
    }
}

impl Default for TextPolicy {
    fn default() -> Self {
        Self::english()
    }
}

/// Which download-link list of a work is used.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LinkSelection {
    /// The first list in document order.
    #[default]
    First,
    /// The list stored under a specific edition key.
    Key(String),
    /// Every list, concatenated in document order.
    All,
}

impl LinkSelection {
    fn select(&self, links: &Map<String, Value>) -> Vec<String> {
        let lists: Vec<&Value> = match self {
            LinkSelection::First => links.values().take(1).collect(),
            LinkSelection::Key(key) => links.get(key).into_iter().collect(),
            LinkSelection::All => links.values().collect(),
        };
        let mut out: Vec<String> = Vec::new();
        for list in lists {
            let Some(items) = list.as_array() else {
                continue;
            };
            for link in items.iter().filter_map(Value::as_str) {
                let link = link.trim();
                if !link.is_empty() && !out.iter().any(|seen| seen == link) {
                    out.push(link.to_string());
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizerSettings {
    pub text_policy: TextPolicy,
    pub link_selection: LinkSelection,
    pub min_text_chars: usize,
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        Self {
            text_policy: TextPolicy::default(),
            link_selection: LinkSelection::default(),
            min_text_chars: DEFAULT_MIN_TEXT_CHARS,
        }
    }
}

/// A translations entry that was skipped because of its shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEntry {
    pub key: String,
    pub reason: String,
}

/// Result of normalizing one work document.
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub work_id: Option<String>,
    pub candidates: Vec<CandidateText>,
    pub rejected: Vec<RejectedEntry>,
    /// Set when the whole work was disqualified.
    pub skipped: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    settings: NormalizerSettings,
}

impl Normalizer {
    pub fn new(settings: NormalizerSettings) -> Self {
        Self { settings }
    }

    pub fn normalize(&self, doc: &WorkDocument) -> Normalized {
        let mut result = Normalized {
            work_id: doc.id(),
            ..Default::default()
        };

        let Some(work_id) = result.work_id.clone() else {
            return skip(result, "work document has no id");
        };
        let Some(translations) = doc.translations() else {
            return skip(result, "no translations");
        };
        let Some(download_links) = doc.download_links() else {
            return skip(result, "no download links");
        };
        let links = self.settings.link_selection.select(download_links);
        if links.is_empty() {
            return skip(result, "selected download link list is empty");
        }
        let Some(title) = doc.title() else {
            return skip(result, "work document has no title");
        };
        let composer = doc.composer().unwrap_or_default();
        let source_url = doc.page_url();
        let method = self.settings.text_policy.method();

        for (key, entry) in translations {
            let texts = match flat_strings(entry) {
                Ok(texts) => texts,
                Err(reason) => {
                    tracing::warn!(work = %work_id, entry = %key, "skipping translations entry: {}", reason);
                    result.rejected.push(RejectedEntry {
                        key: key.clone(),
                        reason,
                    });
                    continue;
                }
            };

            for text in self.settings.text_policy.select(&texts) {
                let trimmed = text.trim();
                if trimmed.chars().count() < self.settings.min_text_chars {
                    continue;
                }
                let sequence = result.candidates.len();
                result.candidates.push(CandidateText {
                    work_id: work_id.clone(),
                    sequence,
                    title: title.clone(),
                    composer: normalize_composer(&composer),
                    text: strip_apostrophe_runs(trimmed),
                    source_url: source_url.clone(),
                    links: links.clone(),
                    method,
                });
            }
        }

        result
    }
}

fn skip(mut result: Normalized, reason: &str) -> Normalized {
    result.skipped = Some(reason.to_string());
    result
}

/// Structural guard: an entry must be an array whose elements are all strings.
fn flat_strings(entry: &Value) -> Result<Vec<&str>, String> {
    let items = entry
        .as_array()
        .ok_or_else(|| "entry is not a sequence".to_string())?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_str()
                .ok_or_else(|| format!("element {} is not a string", i))
        })
        .collect()
}
