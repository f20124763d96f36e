//! File Downloader
//!
//! - Streams into `<file>.part` and renames to the final path only once the
//!   body was fully received
//! - Writes a `<file>.complete.json` sentinel last; an asset without a
//!   matching sentinel is never treated as present

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::config::ZENODO_API_BASE;
use crate::error::FetchError;

const USER_AGENT: &str = "FLAMeS-Inference/0.1";

/// A downloadable file resolved from a record identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub url: String,
    pub size: Option<u64>,
}

/// Where assets come from. The pipeline only talks to this trait.
#[async_trait]
pub trait FetchSource: Send + Sync {
    /// Download `url` to `dest` and return the number of bytes written
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError>;

    /// Look up a named file inside an archive record
    async fn resolve_record_file(&self, record_id: &str, file_name: &str) -> Result<RemoteFile, FetchError>;
}

/// Completion sentinel written next to a finished download
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadStateFile {
    pub url: String,
    pub total_bytes: u64,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// In-progress download location for `dest`
pub fn part_path(dest: &Path) -> PathBuf {
    append_suffix(dest, ".part")
}

/// Sentinel location for `dest`
pub fn sentinel_path(dest: &Path) -> PathBuf {
    append_suffix(dest, ".complete.json")
}

async fn load_sentinel(dest: &Path) -> Option<DownloadStateFile> {
    let content = tokio::fs::read_to_string(sentinel_path(dest)).await.ok()?;
    serde_json::from_str(&content).ok()
}

/// Record that `dest` was completely written from `url`
async fn write_sentinel(url: &str, dest: &Path) -> Result<(), FetchError> {
    let meta = tokio::fs::metadata(dest)
        .await
        .map_err(|e| FetchError::io(url, e.to_string()))?;
    let state = DownloadStateFile {
        url: url.to_string(),
        total_bytes: meta.len(),
        completed_at: chrono::Utc::now(),
    };
    let json = serde_json::to_string_pretty(&state).map_err(|e| FetchError::io(url, e.to_string()))?;
    tokio::fs::write(sentinel_path(dest), json)
        .await
        .map_err(|e| FetchError::io(url, e.to_string()))?;
    Ok(())
}

/// Whether `dest` is a complete asset: file and sentinel agree on its size
pub async fn is_present(dest: &Path) -> bool {
    let Ok(meta) = tokio::fs::metadata(dest).await else {
        return false;
    };
    match load_sentinel(dest).await {
        Some(state) if meta.is_file() && state.total_bytes == meta.len() => true,
        Some(state) => {
            tracing::warn!(
                path = %dest.display(),
                expected = state.total_bytes,
                actual = meta.len(),
                "Asset does not match its completion record, fetching again"
            );
            false
        }
        None => false,
    }
}

/// Ensure `dest` holds a complete copy of `url`, fetching only if needed.
/// Returns whether a download happened.
pub async fn ensure_file(source: &dyn FetchSource, url: &str, dest: &Path) -> Result<bool, FetchError> {
    if is_present(dest).await {
        tracing::debug!(path = %dest.display(), "Asset present");
        return Ok(false);
    }
    download_verified(source, url, dest, None).await?;
    Ok(true)
}

/// Fetch `url` into `dest`, check the size when known, then write the sentinel
pub async fn download_verified(
    source: &dyn FetchSource,
    url: &str,
    dest: &Path,
    expected_size: Option<u64>,
) -> Result<u64, FetchError> {
    // A stale sentinel must not vouch for the new file
    let _ = tokio::fs::remove_file(sentinel_path(dest)).await;

    let bytes = source.fetch(url, dest).await?;

    if let Some(expected) = expected_size {
        if bytes != expected {
            let _ = tokio::fs::remove_file(dest).await;
            return Err(FetchError::invalid_response(
                url,
                format!("expected {} bytes, received {}", expected, bytes),
            ));
        }
    }

    write_sentinel(url, dest).await?;
    Ok(bytes)
}

/// HTTP implementation of [`FetchSource`]
pub struct HttpFetcher {
    client: Client,
    api_base: String,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_api_base(ZENODO_API_BASE)
    }

    pub fn with_api_base(api_base: impl Into<String>) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::network("", e.to_string()))?;
        Ok(Self {
            client,
            api_base: api_base.into(),
        })
    }

    async fn stream_to_part(&self, url: &str, part: &Path) -> Result<u64, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::network(url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::invalid_response(
                url,
                format!("HTTP {}: {}", status, status.canonical_reason().unwrap_or("Unknown")),
            ));
        }

        let total_bytes = response.content_length();
        let mut file = File::create(part).await.map_err(|e| FetchError::io(url, e.to_string()))?;

        let start_time = Instant::now();
        let mut last_progress_time = Instant::now();
        let mut downloaded_bytes = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| FetchError::network(url, e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::io(url, e.to_string()))?;
            downloaded_bytes += chunk.len() as u64;

            if last_progress_time.elapsed() >= Duration::from_secs(5) {
                last_progress_time = Instant::now();
                tracing::info!(url, downloaded_bytes, total_bytes = ?total_bytes, "Downloading");
            }
        }

        file.flush().await.map_err(|e| FetchError::io(url, e.to_string()))?;

        if let Some(total) = total_bytes {
            if downloaded_bytes != total {
                return Err(FetchError::network(
                    url,
                    format!("connection closed after {} of {} bytes", downloaded_bytes, total),
                ));
            }
        }

        tracing::info!(
            url,
            bytes = downloaded_bytes,
            secs = %format!("{:.1}", start_time.elapsed().as_secs_f64()),
            "Download complete"
        );
        Ok(downloaded_bytes)
    }
}

#[async_trait]
impl FetchSource for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::io(url, e.to_string()))?;
        }

        let part = part_path(dest);
        let bytes = match self.stream_to_part(url, &part).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e);
            }
        };

        tokio::fs::rename(&part, dest)
            .await
            .map_err(|e| FetchError::io(url, e.to_string()))?;
        Ok(bytes)
    }

    async fn resolve_record_file(&self, record_id: &str, file_name: &str) -> Result<RemoteFile, FetchError> {
        let url = format!("{}/{}", self.api_base, record_id);
        tracing::debug!(url = %url, file_name, "Resolving archive record");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::network(&url, e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::invalid_response(&url, format!("HTTP {}", response.status())));
        }

        let record: ZenodoRecord = response
            .json()
            .await
            .map_err(|e| FetchError::invalid_response(&url, e.to_string()))?;

        record
            .find(file_name)
            .ok_or_else(|| FetchError::invalid_response(&url, format!("record has no file '{}'", file_name)))
    }
}

#[derive(Debug, Deserialize)]
struct ZenodoRecord {
    #[serde(default)]
    files: Vec<ZenodoFile>,
}

#[derive(Debug, Deserialize)]
struct ZenodoFile {
    key: String,
    #[serde(default)]
    size: Option<u64>,
    links: ZenodoLinks,
}

#[derive(Debug, Deserialize)]
struct ZenodoLinks {
    #[serde(rename = "self")]
    download: String,
}

impl ZenodoRecord {
    fn find(&self, file_name: &str) -> Option<RemoteFile> {
        self.files.iter().find(|f| f.key == file_name).map(|f| RemoteFile {
            url: f.links.download.clone(),
            size: f.size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response per connection
    async fn serve(responses: Vec<Vec<u8>>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                socket.write_all(&response).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}", addr)
    }

    fn http_response(content_length: usize, body: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            content_length
        )
        .into_bytes();
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_suffix_paths() {
        let dest = Path::new("/cache/Dataset004_WML.zip");
        assert_eq!(part_path(dest), PathBuf::from("/cache/Dataset004_WML.zip.part"));
        assert_eq!(sentinel_path(dest), PathBuf::from("/cache/Dataset004_WML.zip.complete.json"));
    }

    #[test]
    fn test_zenodo_record_lookup() {
        let json = r#"{
            "id": 17955359,
            "files": [
                {"key": "README.md", "size": 10, "links": {"self": "https://example.org/readme"}},
                {"key": "Dataset004_WML.zip", "size": 1234, "links": {"self": "https://example.org/zip/content"}}
            ]
        }"#;
        let record: ZenodoRecord = serde_json::from_str(json).unwrap();
        let file = record.find("Dataset004_WML.zip").unwrap();
        assert_eq!(file.url, "https://example.org/zip/content");
        assert_eq!(file.size, Some(1234));
        assert!(record.find("missing.zip").is_none());
    }

    #[tokio::test]
    async fn test_http_fetch_renames_complete_body() {
        let base = serve(vec![http_response(7, b"weights")]).await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("tools/synthstrip.1.pt");

        let fetcher = HttpFetcher::with_api_base(&base).unwrap();
        let bytes = fetcher.fetch(&format!("{}/synthstrip.1.pt", base), &dest).await.unwrap();

        assert_eq!(bytes, 7);
        assert_eq!(std::fs::read(&dest).unwrap(), b"weights");
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_http_fetch_rejects_short_body() {
        let base = serve(vec![http_response(1000, b"trunc")]).await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("synthstrip.1.pt");

        let fetcher = HttpFetcher::with_api_base(&base).unwrap();
        let result = fetcher.fetch(&format!("{}/synthstrip.1.pt", base), &dest).await;

        assert!(result.is_err());
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_http_error_status_is_fatal() {
        let base = serve(vec![b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec()])
            .await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("mri_synthstrip");

        let fetcher = HttpFetcher::with_api_base(&base).unwrap();
        let err = fetcher.fetch(&format!("{}/mri_synthstrip", base), &dest).await.unwrap_err();

        assert_eq!(err.kind, crate::error::FetchErrorKind::InvalidResponse);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_resolve_record_against_local_api() {
        let body = br#"{"files":[{"key":"Dataset004_WML.zip","size":3,"links":{"self":"http://x/zip"}}]}"#;
        let base = serve(vec![http_response(body.len(), body)]).await;

        let fetcher = HttpFetcher::with_api_base(&base).unwrap();
        let file = fetcher.resolve_record_file("17955359", "Dataset004_WML.zip").await.unwrap();
        assert_eq!(file, RemoteFile { url: "http://x/zip".into(), size: Some(3) });
    }

    #[tokio::test]
    async fn test_part_file_is_never_present() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("synthstrip.1.pt");
        tokio::fs::write(part_path(&dest), b"half a file").await.unwrap();
        assert!(!is_present(&dest).await);
    }

    #[tokio::test]
    async fn test_file_without_sentinel_is_not_present() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("synthstrip.1.pt");
        tokio::fs::write(&dest, b"weights").await.unwrap();
        assert!(!is_present(&dest).await);
    }

    #[tokio::test]
    async fn test_sentinel_must_match_size() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("mri_synthstrip");
        tokio::fs::write(&dest, b"#!/usr/bin/env python\n").await.unwrap();
        write_sentinel("https://example.org/script", &dest).await.unwrap();
        assert!(is_present(&dest).await);

        // Truncate behind the sentinel's back
        tokio::fs::write(&dest, b"#!").await.unwrap();
        assert!(!is_present(&dest).await);
    }
}
