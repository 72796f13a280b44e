//! Error types for the convertmorph-compress library.
//!
//! Three layers reflect three distinct failure scopes:
//!
//! * [`LocalProcessingError`] / [`RemoteProcessingError`] — a single
//!   executor attempt failed. These are **recoverable**: the dispatcher
//!   catches them and may try the other execution mode once.
//!
//! * [`ExecutionError`] — the union of the two, returned across the
//!   [`crate::pipeline::Executor`] seam so the dispatcher can handle both
//!   sides uniformly.
//!
//! * [`CompressionError`] — **terminal**: what a caller of
//!   [`crate::compress::Compressor::compress`] receives once fallback was
//!   exhausted or deemed inapplicable, or when the request was rejected up
//!   front (unsupported level, bad input, cancellation).

use crate::config::CompressionLevel;
use crate::pipeline::classify::ExecutionMode;
use std::path::PathBuf;
use thiserror::Error;

/// In-process compression failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocalProcessingError {
    /// The payload could not be parsed as a PDF document.
    #[error("could not parse PDF: {detail}")]
    Parse { detail: String },

    /// Encrypted documents cannot be rewritten in-process.
    #[error("PDF is encrypted; local recompression is not possible")]
    Encrypted,

    /// The document parsed but has no pages.
    #[error("PDF has no pages")]
    EmptyDocument,

    /// A recompressed image could not be produced or embedded.
    #[error("failed to embed recompressed image on page {page}: {detail}")]
    Embed { page: usize, detail: String },

    /// Serialising the rewritten document failed.
    #[error("failed to write compressed PDF: {detail}")]
    Write { detail: String },

    /// The invocation was aborted or abandoned while pages were being rewritten.
    #[error("local compression was cancelled")]
    Cancelled,

    /// The blocking worker panicked or was cancelled by the runtime.
    #[error("local compression task failed: {0}")]
    TaskFailed(String),
}

/// Server-side compression failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteProcessingError {
    /// No endpoint was configured for remote compression.
    #[error("remote compression endpoint is not configured\nSet it with --endpoint or CONVERTMORPH_ENDPOINT.")]
    NotConfigured,

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),

    /// The request exceeded its size-proportional timeout.
    #[error("remote compression timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Connection, TLS or transfer failure.
    #[error("network error during remote compression: {detail}")]
    Network { detail: String },

    /// The endpoint answered with a non-success status.
    #[error("remote compression failed with HTTP {status}: {detail}")]
    Status { status: u16, detail: String },

    /// The request could not be assembled (e.g. an unparsable MIME type).
    #[error("could not build compression request: {detail}")]
    InvalidRequest { detail: String },

    /// The response lacked required metadata or was internally inconsistent.
    #[error("malformed response from compression endpoint: {detail}")]
    MalformedResponse { detail: String },
}

impl RemoteProcessingError {
    /// Whether retrying the same request later could plausibly succeed.
    ///
    /// Timeouts, transport failures, 408, 429 and 5xx are transient;
    /// everything else (4xx, unsupported format, missing configuration,
    /// malformed responses) is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteProcessingError::Timeout { .. } | RemoteProcessingError::Network { .. } => true,
            RemoteProcessingError::Status { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            RemoteProcessingError::NotConfigured
            | RemoteProcessingError::ClientBuild(_)
            | RemoteProcessingError::InvalidRequest { .. }
            | RemoteProcessingError::MalformedResponse { .. } => false,
        }
    }
}

/// Failure of a single executor attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("local: {0}")]
    Local(#[from] LocalProcessingError),

    #[error("remote: {0}")]
    Remote(#[from] RemoteProcessingError),
}

impl ExecutionError {
    /// The execution mode whose attempt produced this error.
    pub fn mode(&self) -> ExecutionMode {
        match self {
            ExecutionError::Local(_) => ExecutionMode::Local,
            ExecutionError::Remote(_) => ExecutionMode::Remote,
        }
    }
}

/// All terminal errors returned by the convertmorph-compress library.
#[derive(Debug, Error)]
pub enum CompressionError {
    // ── Request validation ────────────────────────────────────────────────
    /// The level exists but is feature-gated off by the level policy.
    #[error("Compression level '{level}' is not available yet")]
    UnsupportedLevel { level: CompressionLevel },

    /// The level string is not one of light, medium, strong.
    #[error("Unknown compression level '{0}' (expected light, medium or strong)")]
    UnknownLevel(String),

    // ── Processing ────────────────────────────────────────────────────────
    /// Local compression failed and no fallback was applicable.
    #[error("Local compression failed: {0}")]
    Local(LocalProcessingError),

    /// Remote compression failed and no fallback was applicable.
    #[error("Remote compression failed: {0}")]
    Remote(RemoteProcessingError),

    /// Both the primary attempt and the fallback attempt failed.
    #[error("Compression failed in both modes.\n  first ({}): {primary}\n  fallback ({}): {fallback}", .primary.mode(), .fallback.mode())]
    FallbackExhausted {
        primary: ExecutionError,
        fallback: ExecutionError,
    },

    /// The caller aborted the operation.
    #[error("Compression cancelled{}", cancelled_suffix(.mode))]
    Cancelled { mode: Option<ExecutionMode> },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{name}'\nFirst bytes: {magic:?}")]
    NotAPdf { name: String, magic: [u8; 4] },

    /// The input string is neither a readable path nor an HTTP/HTTPS URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write the compressed output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CompressionError {
    /// Execution modes whose attempts failed, in attempt order.
    ///
    /// Empty for validation, input and cancellation errors.
    pub fn failed_modes(&self) -> Vec<ExecutionMode> {
        match self {
            CompressionError::Local(_) => vec![ExecutionMode::Local],
            CompressionError::Remote(_) => vec![ExecutionMode::Remote],
            CompressionError::FallbackExhausted { primary, fallback } => {
                vec![primary.mode(), fallback.mode()]
            }
            _ => Vec::new(),
        }
    }

    /// True when the request was rejected before any processing started.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            CompressionError::UnsupportedLevel { .. }
                | CompressionError::UnknownLevel(_)
                | CompressionError::InvalidConfig(_)
        )
    }
}

fn cancelled_suffix(mode: &Option<ExecutionMode>) -> String {
    match mode {
        Some(m) => format!(" during {m} processing"),
        None => String::new(),
    }
}

impl From<ExecutionError> for CompressionError {
    fn from(e: ExecutionError) -> Self {
        match e {
            ExecutionError::Local(e) => CompressionError::Local(e),
            ExecutionError::Remote(e) => CompressionError::Remote(e),
        }
    }
}
