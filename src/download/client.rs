//! HTTP client wrapper for downloading videos.
//!
//! This module provides the `HttpClient` struct which streams a response body
//! into a temporary `.part` file and renames it over the destination once the
//! body is complete.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::constants::{CONNECT_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};
use super::error::FetchError;
use super::filename::partial_path;

/// User-Agent sent with every request.
const USER_AGENT: &str = concat!("sora-batch/", env!("CARGO_PKG_VERSION"));

/// HTTP client for downloading videos with streaming support.
///
/// This client is designed to be created once and shared by every worker,
/// taking advantage of connection pooling.
///
/// # Example
///
/// ```no_run
/// use sora_batch_core::download::HttpClient;
/// use std::path::Path;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new();
/// let bytes = client
///     .download_to_file(
///         "https://oscdn2.dyysy.com/MP4/abc123.mp4",
///         Path::new("./downloads/Sora_abc123.mp4"),
///         &CancellationToken::new(),
///     )
///     .await?;
/// println!("Downloaded {bytes} bytes");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default timeouts.
    ///
    /// Default configuration:
    /// - Connect timeout: 30 seconds
    /// - Total request timeout: 10 minutes (for large videos)
    /// - Gzip decompression: enabled
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::try_new(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        )
        .expect("failed to build HTTP client with static configuration")
    }

    /// Creates a new HTTP client with explicit timeouts.
    ///
    /// # Errors
    ///
    /// Returns the builder error if the TLS backend cannot be initialized.
    pub fn try_new(
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .gzip(true)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    /// Downloads `url` into `dest`, returning the number of bytes written.
    ///
    /// The body is streamed into `<dest>.part` and renamed over `dest` only
    /// after the stream ends, so an existing destination is replaced
    /// atomically and never left half-written. The partial file is removed
    /// on every failure path.
    ///
    /// The whole attempt races against `cancel`; a cancelled download
    /// returns [`FetchError::Cancelled`].
    ///
    /// # Errors
    ///
    /// - [`FetchError::NotFound`] for 404
    /// - [`FetchError::HttpStatus`] for other non-success statuses
    /// - [`FetchError::EmptyBody`] when a success response carried no bytes
    /// - [`FetchError::Network`] / [`FetchError::Timeout`] for transport failures
    /// - [`FetchError::Io`] if the file cannot be created, written or renamed
    /// - [`FetchError::Cancelled`] if `cancel` fires first
    #[instrument(skip(self, cancel), fields(url = %url, dest = %dest.display()))]
    pub async fn download_to_file(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError> {
        let part = partial_path(dest);

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(FetchError::cancelled(url)),
            result = self.fetch_into(url, &part) => result,
        };

        let result = match outcome {
            Ok(0) => Err(FetchError::empty_body(url)),
            Ok(bytes) => tokio::fs::rename(&part, dest)
                .await
                .map(|()| bytes)
                .map_err(|e| FetchError::io(dest, e)),
            Err(e) => Err(e),
        };

        match &result {
            Ok(bytes) => info!(bytes, "download complete"),
            Err(e) => {
                debug!(path = %part.display(), error = %e, "cleaning up partial file after error");
                remove_partial(&part).await;
            }
        }

        result
    }

    async fn fetch_into(&self, url: &str, part: &Path) -> Result<u64, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "non-success response");
            return Err(FetchError::from_status(url, status.as_u16()));
        }

        let mut file = File::create(part)
            .await
            .map_err(|e| FetchError::io(part, e))?;

        stream_to_file(&mut file, response, url, part).await
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

async fn remove_partial(part: &Path) {
    match tokio::fs::remove_file(part).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %part.display(), error = %e, "could not remove partial file"),
    }
}

/// Streams response body to file, returning bytes written.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, FetchError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| FetchError::network(url, e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| FetchError::io(file_path, e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| FetchError::io(file_path, e))?;

    Ok(bytes_written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    #[tokio::test]
    async fn test_http_client_download_success() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/MP4/abc.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"video bytes"))
            .mount(&mock_server)
            .await;

        let client = HttpClient::new();
        let url = format!("{}/MP4/abc.mp4", mock_server.uri());
        let dest = temp_dir.path().join("Sora_abc.mp4");

        let bytes = client
            .download_to_file(&url, &dest, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(bytes, 11);
        assert_eq!(std::fs::read(&dest).unwrap(), b"video bytes");
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_http_client_download_overwrites_existing_file() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("Sora_abc.mp4");
        std::fs::write(&dest, b"old").unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"new content"))
            .mount(&mock_server)
            .await;

        let url = format!("{}/MP4/abc.mp4", mock_server.uri());
        HttpClient::new()
            .download_to_file(&url, &dest, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"new content");
    }

    #[tokio::test]
    async fn test_http_client_download_404_error() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let url = format!("{}/MP4/z9.mp4", mock_server.uri());
        let dest = temp_dir.path().join("Sora_z9.mp4");
        let result = HttpClient::new()
            .download_to_file(&url, &dest, &CancellationToken::new())
            .await;

        assert!(
            matches!(result, Err(FetchError::NotFound { .. })),
            "got {result:?}"
        );
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_http_client_download_500_error() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let url = format!("{}/MP4/a.mp4", mock_server.uri());
        let result = HttpClient::new()
            .download_to_file(
                &url,
                &temp_dir.path().join("Sora_a.mp4"),
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            result,
            Err(FetchError::HttpStatus { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_http_client_empty_body_leaves_no_files() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let url = format!("{}/MP4/e.mp4", mock_server.uri());
        let dest = temp_dir.path().join("Sora_e.mp4");
        let result = HttpClient::new()
            .download_to_file(&url, &dest, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(FetchError::EmptyBody { .. })));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_http_client_cancelled_download_cleans_up() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"slow")
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let url = format!("{}/MP4/slow.mp4", mock_server.uri());
        let dest = temp_dir.path().join("Sora_slow.mp4");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = HttpClient::new()
            .download_to_file(&url, &dest, &cancel)
            .await;

        assert!(matches!(result, Err(FetchError::Cancelled { .. })));
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_http_client_request_timeout_is_transport() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"late")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&mock_server)
            .await;

        let client =
            HttpClient::try_new(Duration::from_secs(1), Duration::from_millis(200)).unwrap();
        let url = format!("{}/MP4/late.mp4", mock_server.uri());
        let result = client
            .download_to_file(
                &url,
                &temp_dir.path().join("Sora_late.mp4"),
                &CancellationToken::new(),
            )
            .await;

        let error = result.unwrap_err();
        assert_eq!(error.kind(), super::super::FailureKind::Transport);
    }

    #[tokio::test]
    async fn test_http_client_missing_directory_is_io_error() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data"))
            .mount(&mock_server)
            .await;

        let url = format!("{}/MP4/a.mp4", mock_server.uri());
        let dest = temp_dir.path().join("missing").join("Sora_a.mp4");
        let result = HttpClient::new()
            .download_to_file(&url, &dest, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(FetchError::Io { .. })));
    }
}
