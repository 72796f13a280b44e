//! Server-side compression over HTTP.
//!
//! The document is posted as `multipart/form-data` to the configured
//! endpoint:
//!
//! | field     | content                                  |
//! |-----------|------------------------------------------|
//! | `file`    | the PDF, streamed in fixed-size chunks   |
//! | `level`   | `light` / `medium` / `strong`            |
//! | `dpi`     | target image resolution for the level    |
//! | `quality` | JPEG quality for the level               |
//!
//! A successful response carries the compressed PDF as its body plus
//! metadata headers: `x-original-size` and `x-compressed-size` (required),
//! `x-content-profile` (optional) and a `Content-Disposition` filename
//! (optional). The body length must match `x-compressed-size`.
//!
//! Progress bands: upload 5–40%, "Processing on server" at 45% once the last
//! chunk has been handed to the transport, download 70–95%.
//!
//! The request timeout grows with the payload: base seconds plus a fixed
//! amount per started MiB, covering connect through the end of the body.

use super::input::InputFile;
use super::Executor;
use crate::config::{remote_timeout_secs, CompressorConfig, LevelSettings, MIB};
use crate::error::{ExecutionError, RemoteProcessingError};
use crate::output::{ContentProfile, RawCompression, RawRemoteResult};
use crate::pipeline::classify::ExecutionMode;
use crate::progress::AttemptProgress;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use once_cell::sync::{Lazy, OnceCell};
use percent_encoding::percent_decode_str;
use regex::Regex;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION};
use reqwest::multipart::{Form, Part};
use reqwest::Body;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const HEADER_ORIGINAL_SIZE: &str = "x-original-size";
pub const HEADER_COMPRESSED_SIZE: &str = "x-compressed-size";
pub const HEADER_CONTENT_PROFILE: &str = "x-content-profile";

/// Longest server error text carried into an error message.
const MAX_ERROR_DETAIL: usize = 300;

static RE_FILENAME_EXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)filename\*\s*=\s*(?:UTF-8)?''([^;]+)"#).unwrap());
static RE_FILENAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)filename\s*=\s*(?:"([^"]*)"|([^;\s]+))"#).unwrap());

/// The HTTP executor.
///
/// The underlying `reqwest::Client` is built on first use and reused for
/// every later call through the same executor.
pub struct RemoteExecutor {
    endpoint: Option<String>,
    timeout_base_secs: u64,
    timeout_per_mb_secs: u64,
    chunk_bytes: usize,
    client: OnceCell<reqwest::Client>,
}

impl std::fmt::Debug for RemoteExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteExecutor")
            .field("endpoint", &self.endpoint)
            .field("timeout_base_secs", &self.timeout_base_secs)
            .field("timeout_per_mb_secs", &self.timeout_per_mb_secs)
            .field("chunk_bytes", &self.chunk_bytes)
            .field("client_ready", &self.client.get().is_some())
            .finish()
    }
}

impl RemoteExecutor {
    /// An executor with default timeouts and chunking.
    pub fn new(endpoint: Option<String>) -> Self {
        Self::from_config(&CompressorConfig {
            remote_endpoint: endpoint,
            ..CompressorConfig::default()
        })
    }

    pub fn from_config(config: &CompressorConfig) -> Self {
        Self {
            endpoint: config.remote_endpoint.clone(),
            timeout_base_secs: config.remote_timeout_base_secs,
            timeout_per_mb_secs: config.remote_timeout_per_mb_secs,
            chunk_bytes: config.upload_chunk_bytes.max(1),
            client: OnceCell::new(),
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Request timeout for a payload of `size_bytes`.
    pub fn timeout_secs(&self, size_bytes: u64) -> u64 {
        remote_timeout_secs(self.timeout_base_secs, self.timeout_per_mb_secs, size_bytes)
    }

    fn client(&self) -> Result<&reqwest::Client, RemoteProcessingError> {
        self.client.get_or_try_init(|| {
            debug!("Building HTTP client for remote compression");
            reqwest::Client::builder()
                .user_agent(concat!("convertmorph-compress/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| RemoteProcessingError::ClientBuild(e.to_string()))
        })
    }
}

#[async_trait]
impl Executor for RemoteExecutor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Remote
    }

    fn is_available(&self) -> bool {
        self.endpoint.is_some()
    }

    async fn execute(
        &self,
        file: &InputFile,
        settings: &LevelSettings,
        progress: &AttemptProgress,
    ) -> Result<RawCompression, ExecutionError> {
        let endpoint = self.endpoint.as_deref().ok_or(RemoteProcessingError::NotConfigured)?;
        let client = self.client()?;
        let size = file.size();
        let timeout = self.timeout_secs(size);

        progress.report(0, "Preparing upload");
        info!(
            "Uploading {} ({} bytes) to {} [level={}, timeout={}s]",
            file.name(),
            size,
            endpoint,
            settings.level,
            timeout
        );

        let body = upload_body(file.bytes().clone(), self.chunk_bytes, progress.clone());
        let part = Part::stream_with_length(body, size)
            .file_name(file.name().to_string())
            .mime_str(file.mime_type())
            .map_err(|e| RemoteProcessingError::InvalidRequest {
                detail: format!("MIME type '{}': {e}", file.mime_type()),
            })?;
        let form = Form::new()
            .part("file", part)
            .text("level", settings.level.as_str())
            .text("dpi", settings.target_dpi.to_string())
            .text("quality", settings.jpeg_quality.to_string());

        let response = client
            .post(endpoint)
            .multipart(form)
            .timeout(Duration::from_secs(timeout))
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RemoteProcessingError::Status {
                status: status.as_u16(),
                detail: error_detail(&text),
            }
            .into());
        }

        let headers = response.headers();
        let original_size = required_size(headers, HEADER_ORIGINAL_SIZE)?;
        let compressed_size = required_size(headers, HEADER_COMPRESSED_SIZE)?;
        let content_profile = headers
            .get(HEADER_CONTENT_PROFILE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<ContentProfile>().ok());
        let file_name = headers
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(disposition_filename);

        if original_size != size {
            warn!(
                "Server reports original size {} but {} bytes were uploaded",
                original_size, size
            );
        }

        progress.report(70, "Downloading result");
        let mut body = Vec::with_capacity(compressed_size.min(size.max(MIB)) as usize);
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| transport_error(e, timeout))?;
            body.extend_from_slice(&chunk);
            progress.report_fraction(70, 95, body.len() as u64, compressed_size, "Downloading result");
        }

        if body.len() as u64 != compressed_size {
            return Err(RemoteProcessingError::MalformedResponse {
                detail: format!(
                    "{HEADER_COMPRESSED_SIZE} is {compressed_size} but the body has {} bytes",
                    body.len()
                ),
            }
            .into());
        }

        info!(
            "Remote compression of {}: {} → {} bytes",
            file.name(),
            original_size,
            compressed_size
        );

        Ok(RawCompression::Remote(RawRemoteResult {
            body: Bytes::from(body),
            source_name: file.name().to_string(),
            file_name,
            original_size,
            compressed_size,
            content_profile,
        }))
    }
}

/// Split `data` into a chunked request body that reports upload progress as
/// each chunk is pulled by the transport.
fn upload_body(data: Bytes, chunk_bytes: usize, progress: AttemptProgress) -> Body {
    let total = data.len();
    let chunks: Vec<Bytes> = (0..total)
        .step_by(chunk_bytes.max(1))
        .map(|start| data.slice(start..(start + chunk_bytes).min(total)))
        .collect();
    let count = chunks.len();

    let mut sent = 0usize;
    let stream = futures::stream::iter(chunks.into_iter().enumerate()).map(move |(i, chunk)| {
        sent += chunk.len();
        progress.report_fraction(
            5,
            40,
            sent as u64,
            total as u64,
            format!("Uploading ({}/{} chunks)", i + 1, count),
        );
        if i + 1 == count {
            progress.report(45, "Processing on server");
        }
        Ok::<Bytes, std::io::Error>(chunk)
    });
    Body::wrap_stream(stream)
}

fn transport_error(e: reqwest::Error, timeout_secs: u64) -> RemoteProcessingError {
    if e.is_timeout() {
        RemoteProcessingError::Timeout { secs: timeout_secs }
    } else {
        RemoteProcessingError::Network { detail: e.to_string() }
    }
}

fn required_size(headers: &HeaderMap, name: &str) -> Result<u64, RemoteProcessingError> {
    let value = headers
        .get(name)
        .ok_or_else(|| RemoteProcessingError::MalformedResponse {
            detail: format!("missing {name} header"),
        })?;
    value
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .ok_or_else(|| RemoteProcessingError::MalformedResponse {
            detail: format!("{name} is not a byte count: {value:?}"),
        })
}

/// File name from a `Content-Disposition` value. `filename*` wins over `filename`.
pub fn disposition_filename(value: &str) -> Option<String> {
    let raw = RE_FILENAME_EXT
        .captures(value)
        .and_then(|c| c.get(1))
        .map(|m| percent_decode_str(m.as_str().trim()).decode_utf8_lossy().into_owned())
        .or_else(|| {
            RE_FILENAME
                .captures(value)
                .and_then(|c| c.get(1).or_else(|| c.get(2)))
                .map(|m| m.as_str().to_string())
        })?;
    // Only the last path component; never let a server pick a directory.
    let name = raw.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

/// Human-readable detail from an error body: a JSON `error`/`message` field
/// when present, else the trimmed text.
fn error_detail(body: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body).ok().and_then(|v| {
        ["error", "message", "detail"]
            .iter()
            .find_map(|k| v.get(*k).and_then(|m| m.as_str()).map(str::to_string))
    });
    let text = from_json.unwrap_or_else(|| body.trim().to_string());
    if text.chars().count() > MAX_ERROR_DETAIL {
        let mut cut: String = text.chars().take(MAX_ERROR_DETAIL).collect();
        cut.push('…');
        cut
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_grows_per_started_mib() {
        let exec = RemoteExecutor::new(Some("http://localhost/compress".into()));
        assert_eq!(exec.timeout_secs(0), 30);
        assert_eq!(exec.timeout_secs(1), 32);
        assert_eq!(exec.timeout_secs(MIB), 32);
        assert_eq!(exec.timeout_secs(25 * MIB), 80);
    }

    #[test]
    fn availability_follows_endpoint() {
        assert!(RemoteExecutor::new(Some("http://x/y".into())).is_available());
        assert!(!RemoteExecutor::new(None).is_available());
        assert_eq!(RemoteExecutor::new(None).mode(), ExecutionMode::Remote);
    }

    #[test]
    fn content_disposition_forms() {
        assert_eq!(
            disposition_filename(r#"attachment; filename="report-compressed.pdf""#).as_deref(),
            Some("report-compressed.pdf")
        );
        assert_eq!(
            disposition_filename("attachment; filename=plain.pdf").as_deref(),
            Some("plain.pdf")
        );
        assert_eq!(
            disposition_filename(r#"attachment; filename="fallback.pdf"; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf"#)
                .as_deref(),
            Some("résumé.pdf")
        );
        assert_eq!(
            disposition_filename(r#"attachment; filename="../../etc/passwd""#).as_deref(),
            Some("passwd")
        );
        assert_eq!(disposition_filename("inline"), None);
        assert_eq!(disposition_filename(r#"attachment; filename="""#), None);
    }

    #[test]
    fn extended_filename_escapes_decode_to_the_end() {
        assert_eq!(
            disposition_filename("attachment; filename*=UTF-8''scan%41").as_deref(),
            Some("scanA")
        );
        assert_eq!(
            disposition_filename("attachment; filename*=UTF-8''dir%2Fout%20file.pdf").as_deref(),
            Some("out file.pdf")
        );
        assert_eq!(
            disposition_filename("attachment; filename*=UTF-8''100%zz.pdf").as_deref(),
            Some("100%zz.pdf")
        );
    }

    #[test]
    fn error_detail_prefers_json_message() {
        assert_eq!(error_detail(r#"{"error":"file too large"}"#), "file too large");
        assert_eq!(error_detail("  Bad Gateway \n"), "Bad Gateway");
        let long = "x".repeat(1000);
        assert_eq!(error_detail(&long).chars().count(), MAX_ERROR_DETAIL + 1);
    }

    #[tokio::test]
    async fn missing_endpoint_fails_without_network() {
        let file = InputFile::pdf("a.pdf", &b"%PDF-1.4"[..]);
        let err = RemoteExecutor::new(None)
            .execute(
                &file,
                &crate::config::CompressionLevel::Light.settings(),
                &AttemptProgress::detached(ExecutionMode::Remote),
            )
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::Remote(RemoteProcessingError::NotConfigured));
    }
}
