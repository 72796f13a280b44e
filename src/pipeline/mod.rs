//! Pipeline stages for hybrid PDF compression.
//!
//! Each submodule implements exactly one step; [`crate::compress`] wires them
//! together.
//!
//! ## Data Flow
//!
//! ```text
//!                       ┌──▶ local  ──┐
//! input ──▶ classify ───┤             ├──▶ normalize
//! (bytes)   (size)      └──▶ remote ──┘     (CompressionResult)
//!                        (fallback: the other one, once)
//! ```
//!
//! 1. [`input`]     — wrap caller bytes, or read a path / download a URL
//! 2. [`classify`]  — pick `Local` or `Remote` from the byte size alone
//! 3. [`local`]     — rewrite the PDF in-process; runs in `spawn_blocking`
//!    because parsing and JPEG encoding are CPU-bound
//! 4. [`remote`]    — multipart upload to the compression endpoint; the only
//!    stage with network I/O
//! 5. [`normalize`] — fold either raw result into one [`crate::output::CompressionResult`]
//!
//! [`encode`] and [`profile`] are helpers of the local executor.

pub mod classify;
pub mod encode;
pub mod input;
pub mod local;
pub mod normalize;
pub mod profile;
pub mod remote;

use crate::config::LevelSettings;
use crate::error::ExecutionError;
use crate::output::RawCompression;
use crate::progress::AttemptProgress;
use async_trait::async_trait;
use classify::ExecutionMode;
use input::InputFile;

/// One way of compressing a document.
///
/// Implementors: [`local::LocalExecutor`], [`remote::RemoteExecutor`], and
/// test doubles injected through
/// [`crate::config::CompressorConfigBuilder::local_executor`] /
/// [`crate::config::CompressorConfigBuilder::remote_executor`].
#[async_trait]
pub trait Executor: Send + Sync {
    /// The mode this executor implements.
    fn mode(&self) -> ExecutionMode;

    /// Whether this executor can run at all (e.g. an endpoint is configured).
    ///
    /// The dispatcher does not fall back to an unavailable executor.
    fn is_available(&self) -> bool {
        true
    }

    /// Compress `file` with `settings`, reporting through `progress`.
    ///
    /// Progress reported here is capped at 99%; the dispatcher emits the
    /// terminal event once the result has been normalised.
    async fn execute(
        &self,
        file: &InputFile,
        settings: &LevelSettings,
        progress: &AttemptProgress,
    ) -> Result<RawCompression, ExecutionError>;
}
