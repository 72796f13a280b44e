//! Result types: the executors' raw outputs and the canonical result.

use crate::config::CompressionLevel;
use crate::pipeline::classify::ExecutionMode;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rough classification of what dominates a document's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentProfile {
    /// Embedded raster images make up most of the file.
    ImageHeavy,
    /// Mostly text, vector content and fonts.
    TextHeavy,
    /// Neither dominates.
    Mixed,
    /// Not determined.
    #[default]
    Unknown,
}

impl ContentProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentProfile::ImageHeavy => "image-heavy",
            ContentProfile::TextHeavy => "text-heavy",
            ContentProfile::Mixed => "mixed",
            ContentProfile::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ContentProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "image-heavy" => Ok(ContentProfile::ImageHeavy),
            "text-heavy" => Ok(ContentProfile::TextHeavy),
            "mixed" => Ok(ContentProfile::Mixed),
            "unknown" => Ok(ContentProfile::Unknown),
            other => Err(format!("unknown content profile '{other}'")),
        }
    }
}

/// What the local executor hands back.
#[derive(Debug, Clone)]
pub struct RawLocalResult {
    /// Rewritten PDF.
    pub data: Vec<u8>,
    /// Byte length of the input.
    pub original_size: u64,
    /// Suggested output file name.
    pub file_name: String,
    /// Profile measured on the parsed source document.
    pub content_profile: ContentProfile,
    /// Image XObjects found across all pages.
    pub images_total: usize,
    /// Image XObjects replaced by a smaller re-encoding.
    pub images_recompressed: usize,
    /// Pages walked.
    pub pages: usize,
}

/// What the remote executor hands back.
#[derive(Debug, Clone)]
pub struct RawRemoteResult {
    /// Response body.
    pub body: Bytes,
    /// Name of the uploaded file, used when the server names nothing.
    pub source_name: String,
    /// Name taken from `Content-Disposition`, if present.
    pub file_name: Option<String>,
    /// `x-original-size` header.
    pub original_size: u64,
    /// `x-compressed-size` header; validated against the body length upstream.
    pub compressed_size: u64,
    /// `x-content-profile` header, if the server classified the document.
    pub content_profile: Option<ContentProfile>,
}

/// Output of one successful executor attempt, before normalisation.
#[derive(Debug, Clone)]
pub enum RawCompression {
    Local(RawLocalResult),
    Remote(RawRemoteResult),
}

/// The canonical outcome of a successful compression.
///
/// `compressed_size` is always `blob.len()`, and
/// `ratio == (original_size - compressed_size) / original_size * 100`
/// (negative when the output grew).
///
/// The payload is skipped when serialising; the rest is suitable for JSON
/// reports.
#[derive(Debug, Clone, Serialize)]
pub struct CompressionResult {
    /// Compressed PDF. The caller owns it.
    #[serde(skip)]
    pub blob: Bytes,
    /// Suggested name for the compressed file.
    pub file_name: String,
    pub original_size: u64,
    pub compressed_size: u64,
    /// Percent reduction; may be negative.
    pub ratio: f64,
    /// Mode of the attempt that produced `blob`.
    pub method: ExecutionMode,
    pub level: CompressionLevel,
    /// Wall-clock time of the whole invocation, including a failed first attempt.
    pub processing_time_ms: u64,
    pub content_profile: ContentProfile,
    /// True when `blob` came from the fallback attempt.
    pub fallback_used: bool,
}

impl CompressionResult {
    /// Bytes saved; negative when the output grew.
    pub fn bytes_saved(&self) -> i64 {
        self.original_size as i64 - self.compressed_size as i64
    }
}

/// `<stem>-compressed.pdf` for an input called `<stem>.pdf`.
pub fn compressed_file_name(source: &str) -> String {
    let base = source.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(source);
    let stem = match base.rfind('.') {
        Some(i) if i > 0 => &base[..i],
        _ => base,
    };
    let stem = if stem.is_empty() { "document" } else { stem };
    format!("{stem}-compressed.pdf")
}
