//! Network fetch contract for payload downloads.
//!
//! A plain GET per URL with a bounded timeout; the body is returned as raw
//! bytes. No content-type checks are made: which links get fetched at all
//! is decided by filename extension before this layer is reached.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::DownloadConfig;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL '{0}'")]
    InvalidUrl(String),
    #[error("URL has no file name: {0}")]
    NoFileName(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP status {status} for {url}")]
    Status { url: String, status: u16 },
}

/// Downloads one URL. Implemented over HTTP in production and by stubs in tests.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    pub fn from_config(config: &DownloadConfig) -> Result<Self, FetchError> {
        Self::new(config.timeout(), &config.user_agent)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        let response = self.client.get(parsed).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// The remote file name of a link: its last non-empty path segment.
pub fn file_name(link: &str) -> Result<String, FetchError> {
    let url = Url::parse(link).map_err(|_| FetchError::InvalidUrl(link.to_string()))?;
    let name = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .ok_or_else(|| FetchError::NoFileName(link.to_string()))?;
    if name == "." || name == ".." || name.contains('\\') {
        return Err(FetchError::NoFileName(link.to_string()));
    }
    Ok(name.to_string())
}

/// Whether a link points at a file type on the allow-list (case-insensitive).
pub fn has_allowed_extension(link: &str, allowed: &[String]) -> bool {
    match file_name(link) {
        Ok(name) => {
            let name = name.to_lowercase();
            allowed
                .iter()
                .any(|ext| name.ends_with(&ext.to_lowercase()))
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mid() -> Vec<String> {
        vec![".mid".to_string()]
    }

    #[test]
    fn test_file_name() {
        assert_eq!(
            file_name("https://www.cpdl.org/wiki/images/4/4a/Ave_maria.mid").unwrap(),
            "Ave_maria.mid"
        );
        assert_eq!(
            file_name("https://example.org/files/score.mid?download=1").unwrap(),
            "score.mid"
        );
        assert_eq!(file_name("https://example.org/dir/").unwrap(), "dir");
        assert!(file_name("https://example.org/").is_err());
        assert!(file_name("not a url").is_err());
    }

    #[test]
    fn test_extension_filter() {
        assert!(has_allowed_extension("https://example.org/a.mid", &mid()));
        assert!(has_allowed_extension("https://example.org/A.MID", &mid()));
        assert!(!has_allowed_extension("https://example.org/a.mxl", &mid()));
        assert!(!has_allowed_extension("https://example.org/a.pdf", &mid()));
        assert!(!has_allowed_extension("https://example.org/a.midi", &mid()));
        assert!(!has_allowed_extension("garbage.mid", &mid()));
        let wide = vec![".mid".to_string(), ".mxl".to_string()];
        assert!(has_allowed_extension("https://example.org/a.mxl", &wide));
    }
}
