//! Configuration types for hybrid PDF compression.
//!
//! All dispatcher behaviour is controlled through [`CompressorConfig`], built
//! via its [`CompressorConfigBuilder`]. Every routing threshold, timeout and
//! policy switch lives here rather than at call sites, so two runs can be
//! compared by diffing their configs.
//!
//! The compression level itself is a closed enum ([`CompressionLevel`]) whose
//! per-level parameters come from a single lookup table
//! ([`CompressionLevel::settings`]). Which levels callers may request is a
//! separate policy ([`LevelPolicy`]), so gating a level on or off never touches
//! the compression code.

use crate::error::CompressionError;
use crate::pipeline::Executor;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// One mebibyte, the unit used for thresholds and timeouts.
pub const MIB: u64 = 1024 * 1024;

/// Configuration for a [`crate::compress::Compressor`].
///
/// Built via [`CompressorConfig::builder()`] or using
/// [`CompressorConfig::default()`].
///
/// # Example
/// ```rust
/// use convertmorph_compress::CompressorConfig;
///
/// let config = CompressorConfig::builder()
///     .local_threshold_bytes(10 * 1024 * 1024)
///     .remote_endpoint("https://convertmorph.example/api/compress-pdf")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct CompressorConfig {
    /// Files strictly smaller than this are compressed in-process. Default: 20 MiB.
    ///
    /// Local processing keeps the document private and avoids a network
    /// round-trip, but holds the whole document model in memory. Above this
    /// size the remote endpoint is the primary path.
    pub local_threshold_bytes: u64,

    /// Largest file the local executor is trusted with. Default: 50 MiB.
    ///
    /// When a remote attempt fails for a file above this size the local
    /// fallback is skipped and the remote error is returned directly.
    pub max_local_bytes: u64,

    /// Whether a failed first attempt may be retried once in the other mode. Default: true.
    pub fallback: bool,

    /// URL of the remote compression endpoint. Default: None (remote unavailable).
    pub remote_endpoint: Option<String>,

    /// Base remote request timeout in seconds. Default: 30.
    pub remote_timeout_base_secs: u64,

    /// Extra remote timeout per started MiB of input, in seconds. Default: 2.
    pub remote_timeout_per_mb_secs: u64,

    /// Upload chunk size; one progress event is emitted per chunk. Default: 256 KiB.
    pub upload_chunk_bytes: usize,

    /// Timeout for loading URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Which compression levels may be requested. Default: light and medium.
    pub levels: LevelPolicy,

    /// Progress callback used when a call does not pass its own.
    pub progress_callback: Option<ProgressCallback>,

    /// Pre-constructed local executor. Takes precedence over the built-in one.
    pub local_executor: Option<Arc<dyn Executor>>,

    /// Pre-constructed remote executor. Takes precedence over the built-in one.
    pub remote_executor: Option<Arc<dyn Executor>>,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            local_threshold_bytes: 20 * MIB,
            max_local_bytes: 50 * MIB,
            fallback: true,
            remote_endpoint: None,
            remote_timeout_base_secs: 30,
            remote_timeout_per_mb_secs: 2,
            upload_chunk_bytes: 256 * 1024,
            download_timeout_secs: 120,
            levels: LevelPolicy::default(),
            progress_callback: None,
            local_executor: None,
            remote_executor: None,
        }
    }
}

impl fmt::Debug for CompressorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressorConfig")
            .field("local_threshold_bytes", &self.local_threshold_bytes)
            .field("max_local_bytes", &self.max_local_bytes)
            .field("fallback", &self.fallback)
            .field("remote_endpoint", &self.remote_endpoint)
            .field("remote_timeout_base_secs", &self.remote_timeout_base_secs)
            .field("remote_timeout_per_mb_secs", &self.remote_timeout_per_mb_secs)
            .field("upload_chunk_bytes", &self.upload_chunk_bytes)
            .field("levels", &self.levels)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn CompressionProgressCallback>"),
            )
            .field("local_executor", &self.local_executor.as_ref().map(|_| "<dyn Executor>"))
            .field("remote_executor", &self.remote_executor.as_ref().map(|_| "<dyn Executor>"))
            .finish()
    }
}

impl CompressorConfig {
    /// Create a new builder for `CompressorConfig`.
    pub fn builder() -> CompressorConfigBuilder {
        CompressorConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Request timeout for a remote attempt on a file of `size_bytes`.
///
/// Grows with every started MiB so a 40 MiB upload on a slow link is not
/// cut off by a limit tuned for 2 MiB files.
pub fn remote_timeout_secs(base_secs: u64, per_mib_secs: u64, size_bytes: u64) -> u64 {
    let started_mib = size_bytes.div_ceil(MIB);
    base_secs.saturating_add(started_mib.saturating_mul(per_mib_secs))
}

/// Builder for [`CompressorConfig`].
#[derive(Debug)]
pub struct CompressorConfigBuilder {
    config: CompressorConfig,
}

impl CompressorConfigBuilder {
    pub fn local_threshold_bytes(mut self, bytes: u64) -> Self {
        self.config.local_threshold_bytes = bytes;
        self
    }

    pub fn max_local_bytes(mut self, bytes: u64) -> Self {
        self.config.max_local_bytes = bytes;
        self
    }

    pub fn fallback(mut self, enabled: bool) -> Self {
        self.config.fallback = enabled;
        self
    }

    pub fn remote_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.remote_endpoint = Some(url.into());
        self
    }

    pub fn remote_timeout_base_secs(mut self, secs: u64) -> Self {
        self.config.remote_timeout_base_secs = secs;
        self
    }

    pub fn remote_timeout_per_mb_secs(mut self, secs: u64) -> Self {
        self.config.remote_timeout_per_mb_secs = secs;
        self
    }

    pub fn upload_chunk_bytes(mut self, bytes: usize) -> Self {
        self.config.upload_chunk_bytes = bytes;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn levels(mut self, policy: LevelPolicy) -> Self {
        self.config.levels = policy;
        self
    }

    /// Lift the gate on a single level, keeping the rest of the policy.
    pub fn enable_level(mut self, level: CompressionLevel) -> Self {
        self.config.levels = self.config.levels.enable(level);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn local_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.config.local_executor = Some(executor);
        self
    }

    pub fn remote_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.config.remote_executor = Some(executor);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<CompressorConfig, CompressionError> {
        let c = &self.config;
        if c.local_threshold_bytes == 0 {
            return Err(CompressionError::InvalidConfig(
                "local threshold must be greater than 0 bytes".into(),
            ));
        }
        if c.max_local_bytes < c.local_threshold_bytes {
            return Err(CompressionError::InvalidConfig(format!(
                "max local size ({} bytes) must be at least the local threshold ({} bytes)",
                c.max_local_bytes, c.local_threshold_bytes
            )));
        }
        if c.upload_chunk_bytes < 1024 {
            return Err(CompressionError::InvalidConfig(format!(
                "upload chunk must be at least 1024 bytes, got {}",
                c.upload_chunk_bytes
            )));
        }
        if let Some(ref url) = c.remote_endpoint {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(CompressionError::InvalidConfig(format!(
                    "remote endpoint must be an http(s) URL, got '{url}'"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Levels ───────────────────────────────────────────────────────────────

/// Requested compression strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// Gentle downsampling, high JPEG quality.
    Light,
    /// Balanced size/quality trade-off.
    Medium,
    /// Aggressive downsampling; gated off by default.
    Strong,
}

impl CompressionLevel {
    pub const ALL: [CompressionLevel; 3] = [
        CompressionLevel::Light,
        CompressionLevel::Medium,
        CompressionLevel::Strong,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionLevel::Light => "light",
            CompressionLevel::Medium => "medium",
            CompressionLevel::Strong => "strong",
        }
    }

    /// Compression parameters for this level.
    pub fn settings(&self) -> LevelSettings {
        LEVEL_TABLE[*self as usize]
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionLevel {
    type Err = CompressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(CompressionLevel::Light),
            "medium" => Ok(CompressionLevel::Medium),
            "strong" => Ok(CompressionLevel::Strong),
            other => Err(CompressionError::UnknownLevel(other.to_string())),
        }
    }
}

/// Parameters applied by executors for one [`CompressionLevel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSettings {
    pub level: CompressionLevel,
    /// Raster resolution images are downsampled to, assuming a full-page placement.
    pub target_dpi: u32,
    /// JPEG re-encoding quality, 1–100.
    pub jpeg_quality: u8,
    /// Advertised size reduction in percent. Informational only.
    pub target_reduction_pct: u8,
}

// Indexed by `CompressionLevel as usize`.
const LEVEL_TABLE: [LevelSettings; 3] = [
    LevelSettings {
        level: CompressionLevel::Light,
        target_dpi: 150,
        jpeg_quality: 80,
        target_reduction_pct: 20,
    },
    LevelSettings {
        level: CompressionLevel::Medium,
        target_dpi: 120,
        jpeg_quality: 65,
        target_reduction_pct: 40,
    },
    LevelSettings {
        level: CompressionLevel::Strong,
        target_dpi: 96,
        jpeg_quality: 50,
        target_reduction_pct: 60,
    },
];

/// Which compression levels callers may request.
///
/// A lookup table rather than conditionals: the dispatcher asks
/// [`LevelPolicy::settings`] once and either gets parameters or an
/// [`CompressionError::UnsupportedLevel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelPolicy {
    enabled: [bool; 3],
}

impl Default for LevelPolicy {
    /// Light and medium; strong is "coming soon".
    fn default() -> Self {
        Self {
            enabled: [true, true, false],
        }
    }
}

impl LevelPolicy {
    /// Every level enabled.
    pub fn all() -> Self {
        Self { enabled: [true; 3] }
    }

    pub fn enable(mut self, level: CompressionLevel) -> Self {
        self.enabled[level as usize] = true;
        self
    }

    pub fn disable(mut self, level: CompressionLevel) -> Self {
        self.enabled[level as usize] = false;
        self
    }

    pub fn is_enabled(&self, level: CompressionLevel) -> bool {
        self.enabled[level as usize]
    }

    /// Levels currently enabled, in ascending strength.
    pub fn enabled_levels(&self) -> Vec<CompressionLevel> {
        CompressionLevel::ALL
            .into_iter()
            .filter(|l| self.is_enabled(*l))
            .collect()
    }

    /// Resolve the settings for `level`, rejecting gated levels.
    pub fn settings(&self, level: CompressionLevel) -> Result<LevelSettings, CompressionError> {
        if self.is_enabled(level) {
            Ok(level.settings())
        } else {
            Err(CompressionError::UnsupportedLevel { level })
        }
    }
}
