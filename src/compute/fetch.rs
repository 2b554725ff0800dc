//! Resolves a module location into bytes.
//!
//! `http`/`https` locations go through the shared reqwest client, `file://`
//! URLs and plain paths are read from disk.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::Client;
use url::Url;

use super::loader::LoadError;

#[async_trait]
pub trait ModuleFetcher: Send + Sync {
    async fn fetch(&self, location: &str) -> Result<Bytes, LoadError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Http(Url),
    File(PathBuf),
}

fn classify(location: &str) -> Result<Source, String> {
    match Url::parse(location) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(Source::Http(url)),
            "file" => url
                .to_file_path()
                .map(Source::File)
                .map_err(|_| format!("unsupported file url: {location}")),
            // Windows drive letters parse as one-letter schemes.
            s if s.len() == 1 => Ok(Source::File(PathBuf::from(location))),
            other => Err(format!("unsupported scheme: {other}")),
        },
        Err(_) => Ok(Source::File(PathBuf::from(location))),
    }
}

#[derive(Clone)]
pub struct HttpFetcher {
    http: Client,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new(http: Client, max_bytes: usize) -> Self {
        Self { http, max_bytes }
    }

    async fn fetch_http(&self, url: Url) -> Result<Bytes, String> {
        let mut resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("http status {status}"));
        }
        if let Some(len) = resp.content_length() {
            if len > self.max_bytes as u64 {
                return Err(format!("module is {len} bytes, limit is {}", self.max_bytes));
            }
        }
        let mut body = BytesMut::new();
        while let Some(chunk) = resp.chunk().await.map_err(|e| format!("read body: {e}"))? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(format!("module exceeds limit of {} bytes", self.max_bytes));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }

    async fn fetch_file(&self, path: PathBuf) -> Result<Bytes, String> {
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| format!("stat {}: {e}", path.display()))?;
        if meta.len() > self.max_bytes as u64 {
            return Err(format!(
                "module is {} bytes, limit is {}",
                meta.len(),
                self.max_bytes
            ));
        }
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| format!("read {}: {e}", path.display()))
    }
}

#[async_trait]
impl ModuleFetcher for HttpFetcher {
    async fn fetch(&self, location: &str) -> Result<Bytes, LoadError> {
        let fail = |message: String| LoadError::Fetch {
            location: location.to_string(),
            message,
        };
        let bytes = match classify(location).map_err(fail)? {
            Source::Http(url) => self.fetch_http(url).await,
            Source::File(path) => self.fetch_file(path).await,
        }
        .map_err(fail)?;
        tracing::debug!(target: "cue_worker", location, bytes = bytes.len(), "module fetched");
        Ok(bytes)
    }
}
