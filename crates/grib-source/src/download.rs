//! HTTP access with retry: existence probes, index fetches and
//! (optionally byte-range) file downloads.
//!
//! Downloads stream into a `.partial` file next to the target and are
//! renamed into place once every range has been written.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use grib_batch::HandleError;
use reqwest::{header, Client, StatusCode};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

/// Configuration for the download manager.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial retry delay (doubles each retry)
    pub initial_retry_delay: Duration,
    /// Maximum retry delay
    pub max_retry_delay: Duration,
    /// HTTP request timeout
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_retry_delay: Duration::from_secs(2),
            max_retry_delay: Duration::from_secs(60),
            request_timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

fn http_error(e: reqwest::Error) -> HandleError {
    HandleError::Http(e.to_string())
}

/// Shared HTTP client plus retry policy.
#[derive(Debug, Clone)]
pub struct DownloadManager {
    client: Client,
    config: DownloadConfig,
}

impl DownloadManager {
    pub fn new(config: DownloadConfig) -> Result<Self, HandleError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(4)
            .tcp_nodelay(true)
            .build()
            .map_err(http_error)?;

        Ok(Self { client, config })
    }

    /// Whether `url` exists. Any non-success status means absent; only
    /// transport failures are errors.
    pub async fn probe(&self, url: &str) -> Result<bool, HandleError> {
        let response = self.client.head(url).send().await.map_err(http_error)?;
        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "Probed");
        Ok(status.is_success())
    }

    /// GET a small text resource such as an index file.
    pub async fn fetch_text(&self, url: &str) -> Result<String, HandleError> {
        let response = self.client.get(url).send().await.map_err(http_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(HandleError::Http(format!("GET {url}: {status}")));
        }
        response.text().await.map_err(http_error)
    }

    /// Download `url` to `final_path` with automatic retry.
    ///
    /// With no `ranges` the whole file is fetched; otherwise each inclusive
    /// range is requested in turn and the parts are concatenated.
    #[instrument(skip_all, fields(url = %url, ranges = ranges.len()))]
    pub async fn download(
        &self,
        url: &str,
        ranges: &[(u64, Option<u64>)],
        final_path: &Path,
    ) -> Result<PathBuf, HandleError> {
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp_path = partial_path(final_path);

        let mut retry_count = 0;
        let mut delay = self.config.initial_retry_delay;

        loop {
            match self.download_once(url, ranges, &temp_path).await {
                Ok(bytes) => {
                    if fs::rename(&temp_path, final_path).await.is_err() {
                        // rename failed (likely cross-device), fall back to copy+delete
                        fs::copy(&temp_path, final_path).await?;
                        fs::remove_file(&temp_path).await?;
                    }

                    info!(path = %final_path.display(), bytes, "Download completed");
                    return Ok(final_path.to_path_buf());
                }
                Err(e) => {
                    retry_count += 1;

                    if retry_count > self.config.max_retries {
                        fs::remove_file(&temp_path).await.ok();
                        return Err(HandleError::Http(format!(
                            "download failed after {} retries: {}",
                            retry_count - 1,
                            e
                        )));
                    }

                    warn!(
                        error = %e,
                        retry = retry_count,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Download failed, retrying"
                    );

                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, self.config.max_retry_delay);
                }
            }
        }
    }

    /// One attempt: truncate the partial file and write every range.
    async fn download_once(
        &self,
        url: &str,
        ranges: &[(u64, Option<u64>)],
        temp_path: &Path,
    ) -> Result<u64, HandleError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(temp_path)
            .await?;

        let mut written = 0;
        if ranges.is_empty() {
            written += self.stream_range(url, None, &mut file).await?;
        } else {
            for range in ranges {
                written += self.stream_range(url, Some(*range), &mut file).await?;
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }

    /// Append one response body to `file`, checking its length.
    async fn stream_range(
        &self,
        url: &str,
        range: Option<(u64, Option<u64>)>,
        file: &mut fs::File,
    ) -> Result<u64, HandleError> {
        let mut request = self.client.get(url);
        if let Some((start, end)) = range {
            let value = match end {
                Some(end) => format!("bytes={start}-{end}"),
                None => format!("bytes={start}-"),
            };
            request = request.header(header::RANGE, value);
        }

        let response = request.send().await.map_err(http_error)?;
        match response.status() {
            StatusCode::OK if range.is_some() => {
                return Err(HandleError::Http(
                    "server ignored the byte range request".to_string(),
                ));
            }
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => {}
            status => return Err(HandleError::Http(format!("GET {url}: {status}"))),
        }

        let expected = response.content_length();
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(http_error)?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        if let Some(expected) = expected {
            if written != expected {
                return Err(HandleError::Http(format!(
                    "size mismatch: expected {expected} bytes, got {written}"
                )));
            }
        }
        Ok(written)
    }
}

fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    final_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_manager() -> DownloadManager {
        DownloadManager::new(DownloadConfig {
            max_retries: 2,
            initial_retry_delay: Duration::from_millis(10),
            max_retry_delay: Duration::from_millis(20),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/data/hrrr/20240115/a.grib2")),
            PathBuf::from("/data/hrrr/20240115/a.grib2.partial")
        );
    }

    #[tokio::test]
    async fn test_probe_reports_presence() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/present.grib2"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let manager = fast_manager();
        assert!(manager
            .probe(&format!("{}/present.grib2", server.uri()))
            .await
            .unwrap());
        assert!(!manager
            .probe(&format!("{}/absent.grib2", server.uri()))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_probe_transport_error() {
        let manager = fast_manager();
        let err = manager.probe("http://127.0.0.1:1/nothing").await.unwrap_err();
        assert!(matches!(err, HandleError::Http(_)));
    }

    #[tokio::test]
    async fn test_download_concatenates_ranges() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/f.grib2"))
            .and(header_eq("range", "bytes=0-3"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"GRIB".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/f.grib2"))
            .and(header_eq("range", "bytes=10-"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"7777".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/subset.grib2");
        let path = fast_manager()
            .download(
                &format!("{}/f.grib2", server.uri()),
                &[(0, Some(3)), (10, None)],
                &target,
            )
            .await
            .unwrap();

        assert_eq!(path, target);
        assert_eq!(std::fs::read(&target).unwrap(), b"GRIB7777");
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn test_download_gives_up_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken.grib2"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("broken.grib2");
        let err = fast_manager()
            .download(&format!("{}/broken.grib2", server.uri()), &[], &target)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("after 2 retries"));
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn test_fetch_text_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.idx"))
            .respond_with(ResponseTemplate::new(200).set_body_string("1:0:d=2024011500:TMP:surface:anl:"))
            .mount(&server)
            .await;

        let manager = fast_manager();
        let text = manager
            .fetch_text(&format!("{}/a.idx", server.uri()))
            .await
            .unwrap();
        assert!(text.starts_with("1:0:"));
        assert!(manager
            .fetch_text(&format!("{}/missing.idx", server.uri()))
            .await
            .is_err());
    }
}
