//! # convertmorph-compress
//!
//! Hybrid PDF compression: small files are rewritten in-process, large ones
//! are sent to a compression endpoint, and a failure in one mode is retried
//! once in the other.
//!
//! ## Why hybrid?
//!
//! Local processing keeps a document private and costs no round-trip, but it
//! holds the whole object graph in memory and competes with the caller for
//! CPU. A server handles any size without that cost, at the price of an
//! upload. Routing by size gets the best of both, and falling back across
//! modes turns most single-side failures (an unparsable file, a flaky
//! endpoint) into a successful result.
//!
//! ## Pipeline Overview
//!
//! ```text
//! InputFile
//!  │
//!  ├─ 1. Gate      reject feature-gated levels before anything runs
//!  ├─ 2. Classify  size < threshold → local, else remote
//!  ├─ 3. Execute   local: lopdf + JPEG re-encode (spawn_blocking)
//!  │               remote: chunked multipart upload, header metadata
//!  ├─ 4. Fallback  once, into the other mode, when policy allows
//!  └─ 5. Normalize one CompressionResult, whichever side produced it
//! ```
//!
//! Progress from whichever executor is active flows through a single
//! reporter that keeps percentages monotonic per attempt, tags each event
//! with its mode, and emits exactly one 100% event on success.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use convertmorph_compress::{progress_fn, CompressionLevel, Compressor, CompressorConfig, InputFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CompressorConfig::builder()
//!         .remote_endpoint("https://convertmorph.example/api/compress-pdf")
//!         .build()?;
//!     let compressor = Compressor::new(config);
//!
//!     let file = InputFile::pdf("scan.pdf", std::fs::read("scan.pdf")?);
//!     let on_progress = progress_fn(|e| eprintln!("[{}] {:>3}% {}", e.mode, e.percent, e.message));
//!     let result = compressor
//!         .compress(&file, CompressionLevel::Medium, Some(on_progress))
//!         .await?;
//!
//!     std::fs::write(&result.file_name, &result.blob)?;
//!     eprintln!("{:.1}% smaller via {}", result.ratio, result.method);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfcompress` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! convertmorph-compress = { version = "0.3", default-features = false }
//! ```
//!
//! ## Levels
//!
//! | Level    | Image DPI | JPEG quality | Typical reduction | Available |
//! |----------|-----------|--------------|-------------------|-----------|
//! | `light`  | 150       | 80           | ~20%              | yes |
//! | `medium` | 120       | 65           | ~40%              | yes |
//! | `strong` | 96        | 50           | ~60%              | gated; enable via [`LevelPolicy`] |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod abort;
pub mod compress;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use abort::{AbortController, AbortSignal};
pub use compress::{compress, compress_path, compress_sync, compress_to_file, Compressor, DispatchState};
pub use config::{CompressionLevel, CompressorConfig, CompressorConfigBuilder, LevelPolicy, LevelSettings};
pub use error::{CompressionError, ExecutionError, LocalProcessingError, RemoteProcessingError};
pub use output::{CompressionResult, ContentProfile};
pub use pipeline::classify::{classify, ExecutionMode};
pub use pipeline::input::InputFile;
pub use pipeline::local::LocalExecutor;
pub use pipeline::remote::RemoteExecutor;
pub use pipeline::Executor;
pub use progress::{progress_fn, CompressionProgressCallback, NoopProgressCallback, ProgressCallback, ProgressEvent};
pub use stream::{compress_stream, compress_stream_with_abort, CompressionEvent, CompressionEventStream};
