use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use vivy_ingest_core::models::RECORD_VERSION;
use vivy_ingest_core::normalize::{
    LinkSelection, NormalizerSettings, TextPolicy, DEFAULT_MIN_TEXT_CHARS,
};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub sort: Option<SortConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
    #[serde(default = "default_error_file")]
    pub error_file: String,
}

fn default_error_file() -> String {
    "error.json".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
    #[serde(default = "default_policy")]
    pub policy: String,
    #[serde(default = "default_marker")]
    pub marker: String,
    #[serde(default = "default_link_selection")]
    pub link_selection: String,
    #[serde(default)]
    pub edition_key: Option<String>,
    #[serde(default = "default_record_version")]
    pub record_version: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            checkpoint_every: default_checkpoint_every(),
            workers: default_workers(),
            min_text_chars: default_min_text_chars(),
            policy: default_policy(),
            marker: default_marker(),
            link_selection: default_link_selection(),
            edition_key: None,
            record_version: default_record_version(),
        }
    }
}

fn default_checkpoint_every() -> usize {
    100
}
fn default_workers() -> usize {
    8
}
fn default_min_text_chars() -> usize {
    DEFAULT_MIN_TEXT_CHARS
}
fn default_policy() -> String {
    "marker".to_string()
}
fn default_marker() -> String {
    "english".to_string()
}
fn default_link_selection() -> String {
    "first".to_string()
}
fn default_record_version() -> String {
    RECORD_VERSION.to_string()
}

impl IngestConfig {
    pub fn text_policy(&self) -> Result<TextPolicy> {
        Ok(match self.policy.as_str() {
            "marker" => TextPolicy::Marker {
                marker: self.marker.clone(),
            },
            "last" => TextPolicy::LastElement,
            "all" => TextPolicy::AllElements,
            other => bail!(
                "Unknown ingest.policy: '{}'. Must be marker, last, or all.",
                other
            ),
        })
    }

    pub fn link_selection(&self) -> Result<LinkSelection> {
        Ok(match self.link_selection.as_str() {
            "first" => LinkSelection::First,
            "all" => LinkSelection::All,
            "key" => match &self.edition_key {
                Some(key) => LinkSelection::Key(key.clone()),
                None => bail!("ingest.edition_key must be set when link_selection is 'key'"),
            },
            other => bail!(
                "Unknown ingest.link_selection: '{}'. Must be first, key, or all.",
                other
            ),
        })
    }

    pub fn normalizer_settings(&self) -> Result<NormalizerSettings> {
        Ok(NormalizerSettings {
            text_policy: self.text_policy()?,
            link_selection: self.link_selection()?,
            min_text_chars: self.min_text_chars,
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            allowed_extensions: default_allowed_extensions(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    5
}
fn default_allowed_extensions() -> Vec<String> {
    vec![".mid".to_string()]
}
fn default_user_agent() -> String {
    concat!("vivy-ingest/", env!("CARGO_PKG_VERSION")).to_string()
}

impl DownloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_kind")]
    pub kind: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            path: None,
        }
    }
}

fn default_source_kind() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SortConfig {
    /// Root of the raw index whose records are sorted into `storage.root`.
    pub source_root: PathBuf,
    /// External MXL → MIDI converter, invoked as `<converter> <in.mxl> -o <out.mid>`.
    #[serde(default)]
    pub converter: Option<PathBuf>,
}

impl Config {
    /// Config rooted at `root` with every section at its default. Tests
    /// build on this instead of writing a TOML file.
    pub fn minimal(root: &Path) -> Self {
        Self {
            db: DbConfig {
                path: root.join("vivy.sqlite"),
            },
            storage: StorageConfig {
                root: root.to_path_buf(),
                error_file: default_error_file(),
            },
            ingest: IngestConfig::default(),
            download: DownloadConfig::default(),
            source: SourceConfig::default(),
            sort: None,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.ingest.checkpoint_every == 0 {
        bail!("ingest.checkpoint_every must be > 0");
    }
    if config.ingest.workers == 0 {
        bail!("ingest.workers must be > 0");
    }
    config.ingest.normalizer_settings()?;

    if config.download.timeout_secs == 0 {
        bail!("download.timeout_secs must be > 0");
    }
    if config.download.allowed_extensions.is_empty() {
        bail!("download.allowed_extensions must not be empty");
    }
    for ext in &config.download.allowed_extensions {
        if !ext.starts_with('.') || ext.len() < 2 {
            bail!(
                "download.allowed_extensions entries must look like '.mid', got '{}'",
                ext
            );
        }
    }

    if config.storage.error_file.is_empty() || config.storage.error_file == "index.json" {
        bail!("storage.error_file must be a file name other than index.json");
    }

    match config.source.kind.as_str() {
        "sqlite" => {}
        "json" => {
            if config.source.path.is_none() {
                bail!("source.path must be set when source.kind is 'json'");
            }
        }
        other => bail!(
            "Unknown source kind: '{}'. Must be sqlite or json.",
            other
        ),
    }

    Ok(())
}
