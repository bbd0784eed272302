//! Per-spread illustration download with streaming, validation and retry.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Port over the illustration transport; the production adapter streams over
/// HTTP, tests substitute an in-memory fetcher.
#[async_trait]
pub trait SpreadFetcher: Send + Sync {
    /// Download `url` into `destination`, returning the byte count written.
    async fn fetch(&self, url: &str, destination: &Path) -> Result<i64, String>;
}

/// Streaming HTTP fetcher with connect/request timeouts at the transport.
pub struct HttpSpreadFetcher {
    client: reqwest::Client,
}

impl HttpSpreadFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(std::time::Duration::from_secs(30))
                .timeout(std::time::Duration::from_secs(600))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for HttpSpreadFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpreadFetcher for HttpSpreadFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<i64, String> {
        log::info!("Downloading spread to: {:?}", destination);

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Failed to create destination dir: {}", e))?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Failed to start download: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("Download failed with status: {}", response.status()));
        }

        let content_length = response.content_length();
        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| format!("Failed to create file: {}", e))?;
        let mut downloaded: u64 = 0;

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| format!("Error reading download stream: {}", e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| format!("Failed to write chunk: {}", e))?;
            downloaded += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| format!("Failed to flush file: {}", e))?;

        // Validate file size against Content-Length
        if let Some(expected) = content_length {
            if downloaded != expected {
                return Err(format!(
                    "Download incomplete: got {} bytes, expected {}",
                    downloaded, expected
                ));
            }
        }

        Ok(downloaded as i64)
    }
}

/// Download one spread with automatic retry. Partial files are removed
/// between attempts.
pub async fn download_with_retry(
    fetcher: &dyn SpreadFetcher,
    url: &str,
    destination: &PathBuf,
    cancel: &CancellationToken,
) -> Result<i64, String> {
    let backoff_delays = [2u64, 8, 30];

    for attempt in 0..3usize {
        if cancel.is_cancelled() {
            return Err("Download cancelled".to_string());
        }

        match fetcher.fetch(url, destination).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) => {
                // Clean up partial file
                let _ = tokio::fs::remove_file(&destination).await;

                if attempt < 2 {
                    let delay = backoff_delays[attempt];
                    log::warn!(
                        "Spread download attempt {} failed, retrying in {}s: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
                } else {
                    return Err(format!("Download failed after 3 attempts: {}", e));
                }
            }
        }
    }

    unreachable!()
}
