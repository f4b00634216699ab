//! Upload execution.
//!
//! [`Uploader`] is the seam between the coordinator's bookkeeping and the
//! wire: production uses [`HttpUploader`] (multipart POST with a
//! byte-counting chunk stream), tests script the trait directly.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::api::{FileRecord, USER_ID_HEADER};

/// Why an upload did not produce a file.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Cancelled cooperatively. A neutral outcome, never surfaced as an
    /// error.
    #[error("upload cancelled")]
    Cancelled,
    /// The server rejected the upload.
    #[error("server rejected upload with status {status}")]
    Rejected {
        /// HTTP status code.
        status: u16,
    },
    /// Network-level failure.
    #[error("network error: {0}")]
    Network(String),
}

/// A file staged for upload.
#[derive(Debug, Clone)]
pub struct UploadSource {
    /// File name shown to other participants.
    pub file_name: String,
    /// Raw content.
    pub data: Vec<u8>,
}

impl UploadSource {
    /// Stage an in-memory file.
    pub fn new(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            data,
        }
    }

    /// Stage a file from disk.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("file")
            .to_string();
        Ok(Self { file_name, data })
    }

    /// Size of the staged content in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Progress callback, fed the cumulative byte count handed to the wire.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Executes a single upload.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Transfer `source` into `room_slug` on behalf of `user_id`, reporting
    /// progress and honoring cooperative cancellation.
    async fn upload(
        &self,
        room_slug: &str,
        user_id: &str,
        source: UploadSource,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<FileRecord, UploadError>;
}

/// Production uploader: multipart POST to `/api/upload/:slug`.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    http: reqwest::Client,
    base_url: String,
}

/// Chunk size for the streamed multipart body. Small enough that progress
/// callbacks track the transfer, large enough not to dominate overhead.
const CHUNK_BYTES: usize = 64 * 1024;

impl HttpUploader {
    /// Create an uploader against `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(
        &self,
        room_slug: &str,
        user_id: &str,
        source: UploadSource,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<FileRecord, UploadError> {
        let total = source.size();
        let file_name = source.file_name.clone();

        // Body streamed in counted chunks; each chunk the client pulls
        // advances the progress callback.
        let sent = Arc::new(AtomicU64::new(0));
        let chunks: Vec<Vec<u8>> = source
            .data
            .chunks(CHUNK_BYTES)
            .map(|chunk| chunk.to_vec())
            .collect();
        let body_stream = futures_util::stream::iter(chunks).map(move |chunk: Vec<u8>| {
            let n = sent.fetch_add(chunk.len() as u64, Ordering::SeqCst) + chunk.len() as u64;
            progress(n);
            Ok::<Vec<u8>, std::io::Error>(chunk)
        });

        let part = reqwest::multipart::Part::stream_with_length(
            reqwest::Body::wrap_stream(body_stream),
            total,
        )
        .file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);

        let request = self
            .http
            .post(format!("{}/api/upload/{}", self.base_url, room_slug))
            .header(USER_ID_HEADER, user_id)
            .multipart(form)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            result = request => result.map_err(|e| UploadError::Network(e.to_string()))?,
        };

        if !response.status().is_success() {
            return Err(UploadError::Rejected {
                status: response.status().as_u16(),
            });
        }
        response
            .json::<FileRecord>()
            .await
            .map_err(|e| UploadError::Network(e.to_string()))
    }
}
