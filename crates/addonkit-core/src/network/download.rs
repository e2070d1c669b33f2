//! Artifact downloads into the shared cache directory.
//!
//! Files land at `<cache_dir>/<sha256(url)>`, written through a `.part` file
//! and renamed into place. A cached file is reused as-is. `file://` URLs are
//! copied, which is how local archives are installed.

use crate::config::NetworkConfig;
use crate::locks::{LockKey, NamedLocks};
use crate::network::client::HttpClient;
use crate::network::retry::{retry_async, RetryConfig};
use crate::{AddonkitError, Result};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Downloads package archives, one request per URL at a time.
pub struct Downloader {
    http: Arc<HttpClient>,
    locks: Arc<NamedLocks>,
    cache_dir: PathBuf,
    retry: RetryConfig,
}

impl Downloader {
    pub fn new(http: Arc<HttpClient>, locks: Arc<NamedLocks>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            http,
            locks,
            cache_dir: cache_dir.into(),
            retry: RetryConfig::new()
                .with_max_attempts(NetworkConfig::DOWNLOAD_RETRY_ATTEMPTS)
                .with_base_delay(Duration::from_secs(2)),
        }
    }

    /// Where `url` is cached.
    pub fn cache_path(&self, url: &str) -> PathBuf {
        let digest = Sha256::digest(url.as_bytes());
        self.cache_dir.join(hex::encode(digest))
    }

    /// Fetch `url` into the cache and return the local path.
    pub async fn download(&self, url: &str) -> Result<PathBuf> {
        let _guard = self.locks.acquire(LockKey::DownloadPkg(url.to_string())).await;

        let destination = self.cache_path(url);
        if destination.exists() {
            debug!("Using cached download for {}", url);
            return Ok(destination);
        }

        std::fs::create_dir_all(&self.cache_dir)
            .map_err(|e| AddonkitError::io_with_path(e, &self.cache_dir))?;

        if let Some(source) = file_url_path(url) {
            tokio::fs::copy(&source, &destination)
                .await
                .map_err(|e| AddonkitError::io_with_path(e, &source))?;
            debug!("Copied {} into cache", source.display());
            return Ok(destination);
        }

        let temp_path = PathBuf::from(format!(
            "{}{}",
            destination.display(),
            NetworkConfig::DOWNLOAD_TEMP_SUFFIX
        ));
        let (result, attempts) =
            retry_async(&self.retry, || self.fetch_to(url, &temp_path)).await;

        match result {
            Ok(bytes) => {
                std::fs::rename(&temp_path, &destination).map_err(|e| {
                    let _ = std::fs::remove_file(&temp_path);
                    AddonkitError::io_with_path(e, &destination)
                })?;
                info!(
                    "Downloaded {} bytes from {} ({} attempt(s))",
                    bytes, url, attempts
                );
                Ok(destination)
            }
            Err(e) => {
                let _ = std::fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }

    async fn fetch_to(&self, url: &str, temp_path: &Path) -> Result<u64> {
        let response = self.http.get(url, &[]).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(if HttpClient::is_retryable_status(status) {
                AddonkitError::Network {
                    message: format!("Download of {} failed with status {}", url, status),
                    source: None,
                }
            } else {
                AddonkitError::DownloadFailed {
                    url: url.to_string(),
                    message: format!("status {}", status),
                }
            });
        }

        let mut file =
            std::fs::File::create(temp_path).map_err(|e| AddonkitError::io_with_path(e, temp_path))?;
        let mut bytes_downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AddonkitError::Network {
                message: format!("Error reading download stream: {}", e),
                source: Some(e),
            })?;
            file.write_all(&chunk)
                .map_err(|e| AddonkitError::io_with_path(e, temp_path))?;
            bytes_downloaded += chunk.len() as u64;
        }
        file.flush()
            .map_err(|e| AddonkitError::io_with_path(e, temp_path))?;

        Ok(bytes_downloaded)
    }
}

/// Local path of a `file://` URL.
pub fn file_url_path(url: &str) -> Option<PathBuf> {
    url::Url::parse(url)
        .ok()
        .filter(|u| u.scheme() == "file")
        .and_then(|u| u.to_file_path().ok())
}
