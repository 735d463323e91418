//! CAN capture retrieval for a (VIN, timestamp) pair

use crate::config::TriggerApiConfig;
use crate::error::non_retryable;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A capture file ready to be scanned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFile {
    pub path: PathBuf,
    /// Delete after scanning
    pub temporary: bool,
}

impl CanFile {
    /// Remove the file if it was downloaded for this scan
    pub fn release(&self) {
        if !self.temporary {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("Failed to delete capture {:?}: {}", self.path, e);
        }
    }
}

#[async_trait]
pub trait CanFileSource: Send + Sync {
    async fn fetch(&self, vin: &str, timestamp: i64) -> Result<CanFile>;
}

/// Captures already on disk as `<dir>/<vin>_<timestamp>.log`
#[derive(Debug, Clone)]
pub struct LocalCanFileSource {
    dir: PathBuf,
}

impl LocalCanFileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, vin: &str, timestamp: i64) -> PathBuf {
        self.dir.join(format!("{}_{}.log", vin, timestamp))
    }
}

#[async_trait]
impl CanFileSource for LocalCanFileSource {
    async fn fetch(&self, vin: &str, timestamp: i64) -> Result<CanFile> {
        let path = self.path_for(vin, timestamp);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(non_retryable(anyhow::anyhow!("capture {:?} not found", path)));
        }
        Ok(CanFile {
            path,
            temporary: false,
        })
    }
}

#[derive(Debug, Serialize)]
struct FileRequest<'a> {
    vin: &'a str,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct FileResponse {
    #[serde(default)]
    data: Option<FileData>,
}

#[derive(Debug, Deserialize)]
struct FileData {
    #[serde(default)]
    file_info: Vec<FileInfo>,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    file_type: String,
    file_url: String,
}

/// Asks the trigger API for the capture URL, then downloads it
#[derive(Debug, Clone)]
pub struct HttpCanFileSource {
    client: reqwest::Client,
    url: String,
    method: reqwest::Method,
    download_dir: PathBuf,
}

impl HttpCanFileSource {
    pub fn new(config: &TriggerApiConfig, download_dir: &Path) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        let method = reqwest::Method::from_bytes(config.download_method.to_uppercase().as_bytes())
            .with_context(|| format!("invalid download method '{}'", config.download_method))?;

        Ok(Self {
            client,
            url: config.download_url(),
            method,
            download_dir: download_dir.to_path_buf(),
        })
    }

    async fn capture_url(&self, vin: &str, timestamp: i64) -> Result<String> {
        let response = self
            .client
            .request(self.method.clone(), &self.url)
            .json(&FileRequest { vin, timestamp })
            .send()
            .await
            .with_context(|| format!("file lookup request to {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("file lookup returned {}: {}", status, body);
        }

        let body: FileResponse = response
            .json()
            .await
            .context("failed to parse file lookup response")?;

        let entry = body
            .data
            .into_iter()
            .flat_map(|d| d.file_info)
            .find(|info| info.file_type == "can");
        match entry {
            Some(info) if !info.file_url.is_empty() => Ok(info.file_url),
            _ => Err(non_retryable(anyhow::anyhow!(
                "no CAN file listed for {} at {}",
                vin,
                timestamp
            ))),
        }
    }
}

#[async_trait]
impl CanFileSource for HttpCanFileSource {
    async fn fetch(&self, vin: &str, timestamp: i64) -> Result<CanFile> {
        let url = self.capture_url(vin, timestamp).await?;

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("download of {} failed", url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("download of {} returned {}", url, status);
        }
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("failed to read body of {}", url))?;

        let dir = self.download_dir.clone();
        let name = format!("{}_{}_", vin, timestamp);
        let size = bytes.len();
        let path = tokio::task::spawn_blocking(move || store_download(&dir, &name, &bytes))
            .await
            .context("download writer panicked")??;

        log::debug!("Downloaded {} bytes to {:?}", size, path);
        Ok(CanFile {
            path,
            temporary: true,
        })
    }
}

/// Write a downloaded capture under a unique name in `dir`
///
/// Concurrent downloads for the same record never share a file.
fn store_download(dir: &Path, prefix: &str, bytes: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {:?}", dir))?;
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".can")
        .tempfile_in(dir)
        .with_context(|| format!("failed to create a capture file in {:?}", dir))?;
    file.write_all(bytes)
        .with_context(|| format!("failed to write {:?}", file.path()))?;
    let (_, path) = file
        .keep()
        .with_context(|| format!("failed to keep capture in {:?}", dir))?;
    Ok(path)
}
