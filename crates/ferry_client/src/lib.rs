//! # Ferry Client
//!
//! Plain HTTP(S) GET against a package content host: small text files
//! (package version, manifest hash), manifests and streaming bundle
//! downloads with byte-range resume.

use bytes::Bytes;
use ferry_core::naming;
use futures::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server returned error {0}: {1}")]
    ServerError(StatusCode, String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl ClientError {
    /// Worth another attempt. Every failure other than a cancellation is,
    /// the caller's retry budget decides.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ClientError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Main and fallback content host of one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostServers {
    pub main: String,
    pub fallback: String,
}

impl HostServers {
    pub fn new(main: impl Into<String>, fallback: impl Into<String>) -> Self {
        Self {
            main: main.into(),
            fallback: fallback.into(),
        }
    }

    pub fn main_url(&self, file_name: &str) -> String {
        naming::remote_url(&self.main, file_name)
    }

    pub fn fallback_url(&self, file_name: &str) -> String {
        naming::remote_url(&self.fallback, file_name)
    }

    /// Even attempts go to the main host, odd ones to the fallback.
    pub fn url_for_attempt(&self, file_name: &str, attempt: usize) -> String {
        if attempt % 2 == 0 {
            self.main_url(file_name)
        } else {
            self.fallback_url(file_name)
        }
    }
}

/// A streaming download into `path`.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub path: PathBuf,
    /// Bytes already present in `path`. Non-zero sends a range request.
    pub resume_from: u64,
}

#[derive(Clone)]
pub struct FerryClient {
    client: Client,
}

impl Default for FerryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FerryClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// `timeout` bounds connecting and each read, not the whole transfer.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ClientError::ServerError(status, text));
        }

        Ok(response)
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        Ok(self.get(url).await?.text().await?)
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<Bytes> {
        Ok(self.get(url).await?.bytes().await?)
    }

    /// Streams the body into the request path and returns the final file
    /// length. `progress` holds the file length as bytes arrive.
    pub async fn download_to_file(
        &self,
        request: DownloadRequest,
        progress: Arc<AtomicU64>,
        cancel: CancellationToken,
    ) -> Result<u64> {
        let mut builder = self.client.get(&request.url);
        if request.resume_from > 0 {
            builder = builder.header(RANGE, format!("bytes={}-", request.resume_from));
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            response = builder.send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ClientError::ServerError(status, text));
        }

        // A server that ignores the range sends the whole file again.
        let append = request.resume_from > 0 && status == StatusCode::PARTIAL_CONTENT;
        if let Some(parent) = request.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&request.path)
            .await?;

        let mut written = if append { request.resume_from } else { 0 };
        progress.store(written, Ordering::Relaxed);

        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            progress.store(written, Ordering::Relaxed);
        }
        file.flush().await?;

        tracing::debug!(url = %request.url, bytes = written, "Download finished");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::get;

    const BODY: &[u8] = b"0123456789abcdefghij";

    async fn ranged(headers: HeaderMap) -> (AxumStatus, Vec<u8>) {
        let start = headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|v| v.trim_end_matches('-').parse::<usize>().ok());
        match start {
            Some(start) => (AxumStatus::PARTIAL_CONTENT, BODY[start..].to_vec()),
            None => (AxumStatus::OK, BODY.to_vec()),
        }
    }

    async fn serve() -> String {
        let router = Router::new()
            .route("/file.bin", get(ranged))
            .route("/version.txt", get(|| async { "v3" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    #[test]
    fn hosts_alternate() {
        let hosts = HostServers::new("http://a/", "http://b");
        assert_eq!(hosts.url_for_attempt("x.bundle", 0), "http://a/x.bundle");
        assert_eq!(hosts.url_for_attempt("x.bundle", 1), "http://b/x.bundle");
        assert_eq!(hosts.url_for_attempt("x.bundle", 2), "http://a/x.bundle");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn text_and_missing_files() {
        let host = serve().await;
        let client = FerryClient::new();
        assert_eq!(client.fetch_text(&format!("{host}/version.txt")).await.unwrap(), "v3");

        let err = client.fetch_bytes(&format!("{host}/missing")).await.unwrap_err();
        assert!(matches!(err, ClientError::ServerError(AxumStatus::NOT_FOUND, _)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resumes_partial_file() {
        let host = serve().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.temp");
        tokio::fs::write(&path, &BODY[..8]).await.unwrap();

        let progress = Arc::new(AtomicU64::new(0));
        let length = FerryClient::new()
            .download_to_file(
                DownloadRequest { url: format!("{host}/file.bin"), path: path.clone(), resume_from: 8 },
                progress.clone(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(length, BODY.len() as u64);
        assert_eq!(progress.load(Ordering::Relaxed), BODY.len() as u64);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), BODY);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelled_before_start() {
        let host = serve().await;
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = FerryClient::new()
            .download_to_file(
                DownloadRequest { url: format!("{host}/file.bin"), path: dir.path().join("f"), resume_from: 0 },
                Arc::new(AtomicU64::new(0)),
                cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Cancelled));
    }
}
