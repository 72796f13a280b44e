//! The dispatcher and the library's entry points.
//!
//! [`Compressor`] owns a [`CompressorConfig`] and lazily constructed
//! executors. One call to [`Compressor::compress`] runs this state machine:
//!
//! ```text
//! Idle ──▶ Classifying ──▶ Executing(mode) ──▶ Succeeded
//!  │            │               │
//!  │            │               ├──▶ FallingBack ──▶ Executing(other) ──▶ Succeeded | Failed
//!  │            │               │
//!  └────────────┴───────────────┴──▶ Failed
//! ```
//!
//! * a gated level fails straight from `Idle`, before any executor or
//!   progress event;
//! * at most one fallback per invocation, so at most two executor attempts;
//! * fallback is skipped when disabled, when the other executor is
//!   unavailable, or when a remote attempt failed for a file above
//!   [`CompressorConfig::max_local_bytes`];
//! * an abort wins over whatever the executor is doing.
//!
//! Invocations share nothing but the executors, which are stateless per call.

use crate::abort::AbortSignal;
use crate::config::{CompressionLevel, CompressorConfig, LevelSettings};
use crate::error::{CompressionError, ExecutionError};
use crate::output::{CompressionResult, RawCompression};
use crate::pipeline::classify::{classify, ExecutionMode};
use crate::pipeline::input::{self, InputFile};
use crate::pipeline::local::LocalExecutor;
use crate::pipeline::normalize::{normalize, NormalizeContext};
use crate::pipeline::remote::RemoteExecutor;
use crate::pipeline::Executor;
use crate::progress::{NoopProgressCallback, ProgressCallback, ProgressReporter};
use futures::stream::{self, StreamExt};
use once_cell::sync::OnceCell;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Where one invocation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Classifying,
    Executing(ExecutionMode),
    FallingBack,
    Succeeded,
    Failed,
}

impl DispatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DispatchState::Succeeded | DispatchState::Failed)
    }

    /// Whether `self → next` is an edge of the dispatch state machine.
    pub fn can_transition_to(self, next: DispatchState) -> bool {
        use DispatchState::*;
        matches!(
            (self, next),
            (Idle, Classifying)
                | (Idle, Failed)
                | (Classifying, Executing(_))
                | (Classifying, Failed)
                | (Executing(_), Succeeded)
                | (Executing(_), FallingBack)
                | (Executing(_), Failed)
                | (FallingBack, Executing(_))
                | (FallingBack, Failed)
        )
    }
}

/// Tracks one invocation's state and logs each transition.
struct Dispatch<'a> {
    file: &'a str,
    state: DispatchState,
}

impl<'a> Dispatch<'a> {
    fn new(file: &'a str) -> Self {
        Self {
            file,
            state: DispatchState::Idle,
        }
    }

    fn to(&mut self, next: DispatchState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal dispatch transition {:?} → {:?}",
            self.state,
            next
        );
        debug!("{}: {:?} → {:?}", self.file, self.state, next);
        self.state = next;
    }
}

enum AttemptError {
    Failed(ExecutionError),
    Cancelled,
}

/// Hybrid local/remote PDF compressor.
///
/// Cheap to share behind an `Arc`; concurrent calls are independent.
///
/// # Example
/// ```rust,no_run
/// use convertmorph_compress::{CompressionLevel, Compressor, CompressorConfig, InputFile};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let compressor = Compressor::new(CompressorConfig::default());
/// let file = InputFile::pdf("scan.pdf", std::fs::read("scan.pdf")?);
/// let result = compressor.compress(&file, CompressionLevel::Medium, None).await?;
/// println!("{} via {}: {:.1}% smaller", result.file_name, result.method, result.ratio);
/// # Ok(())
/// # }
/// ```
pub struct Compressor {
    config: CompressorConfig,
    local: OnceCell<Arc<dyn Executor>>,
    remote: OnceCell<Arc<dyn Executor>>,
}

impl std::fmt::Debug for Compressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compressor")
            .field("config", &self.config)
            .field("local_ready", &self.local.get().is_some())
            .field("remote_ready", &self.remote.get().is_some())
            .finish()
    }
}

impl Compressor {
    pub fn new(config: CompressorConfig) -> Self {
        Self {
            config,
            local: OnceCell::new(),
            remote: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &CompressorConfig {
        &self.config
    }

    /// The executor for `mode`, constructed on first use.
    fn executor(&self, mode: ExecutionMode) -> Arc<dyn Executor> {
        let cell = match mode {
            ExecutionMode::Local => &self.local,
            ExecutionMode::Remote => &self.remote,
        };
        cell.get_or_init(|| {
            let injected = match mode {
                ExecutionMode::Local => self.config.local_executor.clone(),
                ExecutionMode::Remote => self.config.remote_executor.clone(),
            };
            injected.unwrap_or_else(|| {
                debug!("Initialising built-in {} executor", mode);
                match mode {
                    ExecutionMode::Local => Arc::new(LocalExecutor::new()),
                    ExecutionMode::Remote => Arc::new(RemoteExecutor::from_config(&self.config)),
                }
            })
        })
        .clone()
    }

    /// Compress `file` at `level`.
    ///
    /// `on_progress` overrides the config's default callback for this call.
    ///
    /// # Errors
    /// * [`CompressionError::UnsupportedLevel`] — `level` is gated off; nothing ran.
    /// * [`CompressionError::Local`] / [`CompressionError::Remote`] — the only
    ///   attempt failed and no fallback applied.
    /// * [`CompressionError::FallbackExhausted`] — both modes failed.
    pub async fn compress(
        &self,
        file: &InputFile,
        level: CompressionLevel,
        on_progress: Option<ProgressCallback>,
    ) -> Result<CompressionResult, CompressionError> {
        self.compress_with_abort(file, level, on_progress, AbortSignal::never())
            .await
    }

    /// [`Compressor::compress`] with an external abort signal.
    ///
    /// Once `abort` fires the active attempt is dropped, no further progress
    /// is forwarded and the call returns [`CompressionError::Cancelled`].
    pub async fn compress_with_abort(
        &self,
        file: &InputFile,
        level: CompressionLevel,
        on_progress: Option<ProgressCallback>,
        mut abort: AbortSignal,
    ) -> Result<CompressionResult, CompressionError> {
        let started = Instant::now();
        let mut dispatch = Dispatch::new(file.name());

        let settings = match self.config.levels.settings(level) {
            Ok(s) => s,
            Err(e) => {
                warn!("Rejecting {}: {}", file.name(), e);
                dispatch.to(DispatchState::Failed);
                return Err(e);
            }
        };

        dispatch.to(DispatchState::Classifying);
        let primary = classify(file.size(), self.config.local_threshold_bytes);
        info!(
            "Compressing {} ({} bytes, level {}) → {}",
            file.name(),
            file.size(),
            level,
            primary
        );

        if abort.is_aborted() {
            dispatch.to(DispatchState::Failed);
            return Err(CompressionError::Cancelled { mode: None });
        }

        let callback = on_progress
            .or_else(|| self.config.progress_callback.clone())
            .unwrap_or_else(|| Arc::new(NoopProgressCallback));
        let reporter = ProgressReporter::new(callback);
        // Dropping this future mid-attempt must still stop a blocking worker.
        let _close = reporter.close_on_drop();

        dispatch.to(DispatchState::Executing(primary));
        let first_error = match self
            .attempt(primary, false, file, &settings, &reporter, &mut abort)
            .await
        {
            Ok(raw) => {
                dispatch.to(DispatchState::Succeeded);
                return Ok(self.complete(raw, primary, level, started, false, &reporter));
            }
            Err(AttemptError::Cancelled) => {
                reporter.close();
                dispatch.to(DispatchState::Failed);
                info!("{}: cancelled during {} processing", file.name(), primary);
                return Err(CompressionError::Cancelled { mode: Some(primary) });
            }
            Err(AttemptError::Failed(e)) => e,
        };

        let secondary = primary.other();
        if let Some(reason) = self.fallback_blocked(primary, file.size()) {
            warn!("{} compression of {} failed: {} ({})", primary, file.name(), first_error, reason);
            reporter.close();
            dispatch.to(DispatchState::Failed);
            return Err(first_error.into());
        }
        if abort.is_aborted() {
            reporter.close();
            dispatch.to(DispatchState::Failed);
            return Err(CompressionError::Cancelled { mode: Some(primary) });
        }

        dispatch.to(DispatchState::FallingBack);
        warn!(
            "{} compression of {} failed: {}; falling back to {}",
            primary,
            file.name(),
            first_error,
            secondary
        );
        reporter.fallback(primary, secondary, &first_error.to_string());

        dispatch.to(DispatchState::Executing(secondary));
        match self
            .attempt(secondary, true, file, &settings, &reporter, &mut abort)
            .await
        {
            Ok(raw) => {
                dispatch.to(DispatchState::Succeeded);
                Ok(self.complete(raw, secondary, level, started, true, &reporter))
            }
            Err(AttemptError::Cancelled) => {
                reporter.close();
                dispatch.to(DispatchState::Failed);
                Err(CompressionError::Cancelled { mode: Some(secondary) })
            }
            Err(AttemptError::Failed(second_error)) => {
                reporter.close();
                dispatch.to(DispatchState::Failed);
                warn!("Fallback for {} failed too: {}", file.name(), second_error);
                Err(CompressionError::FallbackExhausted {
                    primary: first_error,
                    fallback: second_error,
                })
            }
        }
    }

    /// Compress several files with at most `concurrency` in flight.
    ///
    /// Each file is an independent invocation using the config's default
    /// callback; results come back in input order.
    pub async fn compress_batch(
        &self,
        files: &[InputFile],
        level: CompressionLevel,
        concurrency: usize,
    ) -> Vec<Result<CompressionResult, CompressionError>> {
        stream::iter(files.iter().map(|file| self.compress(file, level, None)))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    /// Why a fallback must not run after `failed` failed, if it must not.
    fn fallback_blocked(&self, failed: ExecutionMode, size: u64) -> Option<&'static str> {
        if !self.config.fallback {
            return Some("fallback disabled");
        }
        if failed == ExecutionMode::Remote && size > self.config.max_local_bytes {
            return Some("file exceeds the local processing limit");
        }
        if !self.executor(failed.other()).is_available() {
            return Some("no fallback executor available");
        }
        None
    }

    async fn attempt(
        &self,
        mode: ExecutionMode,
        is_fallback: bool,
        file: &InputFile,
        settings: &LevelSettings,
        reporter: &ProgressReporter,
        abort: &mut AbortSignal,
    ) -> Result<RawCompression, AttemptError> {
        let executor = self.executor(mode);
        let progress = reporter.begin_attempt(mode, is_fallback);
        tokio::select! {
            biased;
            _ = abort.aborted() => Err(AttemptError::Cancelled),
            result = executor.execute(file, settings, &progress) => result.map_err(AttemptError::Failed),
        }
    }

    fn complete(
        &self,
        raw: RawCompression,
        method: ExecutionMode,
        level: CompressionLevel,
        started: Instant,
        fallback_used: bool,
        reporter: &ProgressReporter,
    ) -> CompressionResult {
        let result = normalize(
            raw,
            NormalizeContext {
                method,
                level,
                processing_time_ms: started.elapsed().as_millis() as u64,
                fallback_used,
            },
        );
        reporter.finish(format!(
            "Compressed {} → {} bytes ({:.1}% smaller)",
            result.original_size, result.compressed_size, result.ratio
        ));
        info!(
            "{}: {} → {} bytes ({:.1}%) via {}{} in {}ms",
            result.file_name,
            result.original_size,
            result.compressed_size,
            result.ratio,
            method,
            if fallback_used { " (fallback)" } else { "" },
            result.processing_time_ms
        );
        result
    }
}

// ── Free-function entry points ───────────────────────────────────────────

/// Compress an in-memory file with a one-off [`Compressor`].
pub async fn compress(
    file: &InputFile,
    level: CompressionLevel,
    config: &CompressorConfig,
) -> Result<CompressionResult, CompressionError> {
    Compressor::new(config.clone()).compress(file, level, None).await
}

/// Load a local path or HTTP(S) URL, then compress it.
pub async fn compress_path(
    input_str: impl AsRef<str>,
    level: CompressionLevel,
    config: &CompressorConfig,
) -> Result<CompressionResult, CompressionError> {
    let file = input::load_input(input_str.as_ref(), config.download_timeout_secs).await?;
    compress(&file, level, config).await
}

/// Compress and write the result to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn compress_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    level: CompressionLevel,
    config: &CompressorConfig,
) -> Result<CompressionResult, CompressionError> {
    let result = compress_path(input_str, level, config).await?;
    write_atomic(output_path.as_ref(), &result.blob).await?;
    Ok(result)
}

/// Synchronous wrapper around [`compress_path`].
///
/// Creates a temporary tokio runtime internally.
pub fn compress_sync(
    input_str: impl AsRef<str>,
    level: CompressionLevel,
    config: &CompressorConfig,
) -> Result<CompressionResult, CompressionError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CompressionError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(compress_path(input_str, level, config))
}

/// Write `data` to a sibling temp file, then rename over `path`.
pub async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), CompressionError> {
    let fail = |e| CompressionError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(fail)?;
        }
    }
    let tmp_path = path.with_extension("pdf.tmp");
    tokio::fs::write(&tmp_path, data).await.map_err(fail)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(fail)?;
    Ok(())
}
