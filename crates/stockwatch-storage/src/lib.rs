//! Document fetching and snapshot persistence for the stock monitor.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use stockwatch_core::ProductSet;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "stockwatch-storage";

pub const DEFAULT_GIST_API: &str = "https://api.github.com";
pub const DEFAULT_GIST_FILENAME: &str = "games-island-state.json";
const GITHUB_API_VERSION: &str = "2022-11-28";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Anything that can hand back the body of a listing page.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<FetchedResponse, FetchError>;
}

/// Thin wrapper over a shared `reqwest::Client`. One attempt per call; a
/// non-success status is returned as [`FetchError::HttpStatus`].
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl DocumentSource for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", url);
        async {
            let resp = self
                .client
                .get(url)
                .header(ACCEPT, "text/html")
                .send()
                .await?;
            let status = resp.status();
            let final_url = resp.url().to_string();

            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let body = resp.text().await?;
            debug!(bytes = body.len(), "fetched document");
            Ok(FetchedResponse {
                status,
                final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("state store returned http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("malformed state payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("state file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Persistence for the last seen snapshot.
///
/// `load` treats "nothing stored yet" as an empty set; `save` replaces the
/// stored snapshot wholesale.
#[async_trait]
pub trait StateStore: Send + Sync {
    fn describe(&self) -> String;
    async fn load(&self) -> Result<ProductSet, StoreError>;
    async fn save(&self, state: &ProductSet) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct GistConfig {
    pub api_base: String,
    pub gist_id: String,
    pub token: String,
    pub filename: String,
}

/// Snapshot stored as a single JSON file inside a GitHub gist.
#[derive(Debug, Clone)]
pub struct GistStateStore {
    client: reqwest::Client,
    config: GistConfig,
}

#[derive(Debug, Deserialize)]
struct GistResponse {
    #[serde(default)]
    files: Option<HashMap<String, GistFile>>,
}

#[derive(Debug, Deserialize)]
struct GistFile {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    truncated: bool,
    #[serde(default)]
    raw_url: Option<String>,
}

impl GistStateStore {
    pub fn new(client: reqwest::Client, config: GistConfig) -> Self {
        Self { client, config }
    }

    fn gist_url(&self) -> String {
        format!(
            "{}/gists/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.gist_id
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.config.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
    }

    async fn file_content(&self, file: GistFile) -> Result<Option<String>, StoreError> {
        // Large gist files come back truncated; the full body is behind raw_url.
        if file.truncated {
            if let Some(raw_url) = file.raw_url {
                let resp = self.request(reqwest::Method::GET, &raw_url).send().await?;
                if !resp.status().is_success() {
                    return Err(StoreError::HttpStatus {
                        status: resp.status().as_u16(),
                        url: raw_url,
                    });
                }
                return Ok(Some(resp.text().await?));
            }
        }
        Ok(file.content)
    }
}

#[async_trait]
impl StateStore for GistStateStore {
    fn describe(&self) -> String {
        format!("gist {} ({})", self.config.gist_id, self.config.filename)
    }

    async fn load(&self) -> Result<ProductSet, StoreError> {
        let url = self.gist_url();
        let resp = self.request(reqwest::Method::GET, &url).send().await?;
        let status = resp.status();

        if status == StatusCode::NOT_FOUND {
            info!(gist_id = %self.config.gist_id, "gist not found, starting with empty state");
            return Ok(ProductSet::new());
        }
        if !status.is_success() {
            return Err(StoreError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }

        let text = resp.text().await?;
        let gist: GistResponse = serde_json::from_str(&text)?;
        let file = gist
            .files
            .and_then(|mut files| files.remove(&self.config.filename));
        let Some(file) = file else {
            info!(filename = %self.config.filename, "state file not in gist, starting fresh");
            return Ok(ProductSet::new());
        };

        match self.file_content(file).await? {
            Some(content) if !content.trim().is_empty() => Ok(serde_json::from_str(&content)?),
            _ => {
                info!(filename = %self.config.filename, "state file is empty, starting fresh");
                Ok(ProductSet::new())
            }
        }
    }

    async fn save(&self, state: &ProductSet) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(state)?;
        let body = serde_json::json!({
            "files": {
                self.config.filename.as_str(): { "content": content }
            }
        });

        let url = self.gist_url();
        let resp = self
            .request(reqwest::Method::PATCH, &url)
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&body)?)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(StoreError::HttpStatus {
                status: resp.status().as_u16(),
                url,
            });
        }
        info!(gist_id = %self.config.gist_id, products = state.len(), "state saved to gist");
        Ok(())
    }
}

/// Snapshot stored as a pretty-printed JSON file on local disk.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Write through a temp file in the same directory, then rename over the target.
    async fn write_atomic(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| StoreError::io(&parent, e))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(|e| StoreError::io(&temp_path, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| StoreError::io(&temp_path, e))?;
        file.flush()
            .await
            .map_err(|e| StoreError::io(&temp_path, e))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::io(&self.path, err));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }

    async fn load(&self) -> Result<ProductSet, StoreError> {
        match fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => {
                info!(path = %self.path.display(), "state file is empty, starting fresh");
                Ok(ProductSet::new())
            }
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "state file not found, starting fresh");
                Ok(ProductSet::new())
            }
            Err(err) => Err(StoreError::io(&self.path, err)),
        }
    }

    async fn save(&self, state: &ProductSet) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        self.write_atomic(&bytes).await?;
        info!(path = %self.path.display(), products = state.len(), "state saved to file");
        Ok(())
    }
}
