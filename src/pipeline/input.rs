//! Input acquisition: wrap caller bytes, read a local file, or download a URL.
//!
//! An [`InputFile`] is immutable once built. Its payload is a reference-counted
//! [`Bytes`] so the local executor's blocking worker and the remote
//! executor's upload stream can share it without copying the document.
//! Loading from a path or URL checks the `%PDF` magic bytes up front so a
//! wrong file fails with a clear message instead of a parser error later.

use crate::error::CompressionError;
use bytes::Bytes;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const PDF_MIME: &str = "application/pdf";

/// A document to compress: payload plus name and declared MIME type.
#[derive(Clone)]
pub struct InputFile {
    name: String,
    mime_type: String,
    data: Bytes,
}

impl fmt::Debug for InputFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.data.len())
            .finish()
    }
}

impl InputFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// An `application/pdf` input.
    pub fn pdf(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::new(name, PDF_MIME, data)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Byte size of the payload.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// Whether the payload starts with the `%PDF` magic.
    pub fn looks_like_pdf(&self) -> bool {
        self.data.starts_with(b"%PDF")
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load an input from a local path or an HTTP(S) URL.
pub async fn load_input(input: &str, download_timeout_secs: u64) -> Result<InputFile, CompressionError> {
    if input.trim().is_empty() {
        return Err(CompressionError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, download_timeout_secs).await
    } else {
        load_local(Path::new(input)).await
    }
}

/// Read a local file, validating existence, permissions and PDF magic bytes.
pub async fn load_local(path: &Path) -> Result<InputFile, CompressionError> {
    let data = match tokio::fs::read(path).await {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(CompressionError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CompressionError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        Err(e) => {
            return Err(CompressionError::InvalidInput {
                input: format!("{} ({e})", path.display()),
            });
        }
    };

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());
    check_magic(&name, &data)?;

    debug!("Loaded local PDF: {} ({} bytes)", path.display(), data.len());
    Ok(InputFile::pdf(name, data))
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<InputFile, CompressionError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| CompressionError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            CompressionError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            CompressionError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(CompressionError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let name = filename_from_url(url);
    let data = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            CompressionError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            CompressionError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;
    check_magic(&name, &data)?;

    info!("Downloaded {} ({} bytes)", name, data.len());
    Ok(InputFile::pdf(name, data))
}

fn check_magic(name: &str, data: &[u8]) -> Result<(), CompressionError> {
    if data.starts_with(b"%PDF") {
        return Ok(());
    }
    let mut magic = [0u8; 4];
    let n = data.len().min(4);
    magic[..n].copy_from_slice(&data[..n]);
    Err(CompressionError::NotAPdf {
        name: name.to_string(),
        magic,
    })
}

/// Last path segment of the URL when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}

/// Default output path next to the input: `<dir>/<stem>-compressed.pdf`.
pub fn default_output_path(input: &str) -> PathBuf {
    let name = crate::output::compressed_file_name(input);
    if is_url(input) {
        return PathBuf::from(name);
    }
    match Path::new(input).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(name),
        _ => PathBuf::from(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_from_url_segments() {
        assert_eq!(filename_from_url("https://example.com/files/report.pdf"), "report.pdf");
        assert_eq!(filename_from_url("https://example.com/files/"), "downloaded.pdf");
        assert_eq!(filename_from_url("https://example.com/pdf/1706"), "downloaded.pdf");
    }

    #[test]
    fn input_file_accessors() {
        let f = InputFile::pdf("a.pdf", b"%PDF-1.4 tiny".to_vec());
        assert_eq!(f.name(), "a.pdf");
        assert_eq!(f.mime_type(), PDF_MIME);
        assert_eq!(f.size(), 13);
        assert!(f.looks_like_pdf());
        assert!(!InputFile::pdf("b.pdf", &b"GIF89a"[..]).looks_like_pdf());
    }

    #[test]
    fn magic_check() {
        assert!(check_magic("ok.pdf", b"%PDF-1.7\n").is_ok());
        let err = check_magic("img.png", b"\x89PNG\r\n").unwrap_err();
        assert!(matches!(err, CompressionError::NotAPdf { ref magic, .. } if magic == b"\x89PNG"));
        assert!(check_magic("short", b"%P").is_err());
    }

    #[tokio::test]
    async fn load_missing_file() {
        let err = load_input("/definitely/not/here.pdf", 5).await.unwrap_err();
        assert!(matches!(err, CompressionError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn load_empty_input_string() {
        let err = load_input("  ", 5).await.unwrap_err();
        assert!(matches!(err, CompressionError::InvalidInput { .. }));
    }

    #[test]
    fn output_path_sits_next_to_input() {
        assert_eq!(
            default_output_path("/tmp/in/scan.pdf"),
            PathBuf::from("/tmp/in/scan-compressed.pdf")
        );
        assert_eq!(default_output_path("scan.pdf"), PathBuf::from("scan-compressed.pdf"));
        assert_eq!(
            default_output_path("https://example.com/a/paper.pdf"),
            PathBuf::from("paper-compressed.pdf")
        );
    }
}
