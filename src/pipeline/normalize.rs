//! Fold either executor's raw output into one [`CompressionResult`].
//!
//! Whatever the executor claims, `compressed_size` is taken from the blob
//! and the ratio is recomputed from it, so callers never see a result whose
//! numbers disagree with its payload.

use crate::config::CompressionLevel;
use crate::output::{compressed_file_name, CompressionResult, RawCompression};
use crate::pipeline::classify::ExecutionMode;
use crate::pipeline::profile;
use bytes::Bytes;

/// Invocation metadata the raw results don't carry.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext {
    pub method: ExecutionMode,
    pub level: CompressionLevel,
    pub processing_time_ms: u64,
    pub fallback_used: bool,
}

/// Percent reduction from `original` to `compressed`; 0 for an empty original.
pub fn reduction_ratio(original: u64, compressed: u64) -> f64 {
    if original == 0 {
        return 0.0;
    }
    (original as f64 - compressed as f64) / original as f64 * 100.0
}

pub fn normalize(raw: RawCompression, ctx: NormalizeContext) -> CompressionResult {
    let (blob, file_name, original_size, profile_hint) = match raw {
        RawCompression::Local(local) => (
            Bytes::from(local.data),
            local.file_name,
            local.original_size,
            Some(local.content_profile),
        ),
        RawCompression::Remote(remote) => {
            let name = remote
                .file_name
                .unwrap_or_else(|| compressed_file_name(&remote.source_name));
            (remote.body, name, remote.original_size, remote.content_profile)
        }
    };

    let compressed_size = blob.len() as u64;
    let ratio = reduction_ratio(original_size, compressed_size);
    let content_profile = profile_hint.unwrap_or_else(|| profile::from_reduction(original_size, ratio));

    CompressionResult {
        blob,
        file_name,
        original_size,
        compressed_size,
        ratio,
        method: ctx.method,
        level: ctx.level,
        processing_time_ms: ctx.processing_time_ms,
        content_profile,
        fallback_used: ctx.fallback_used,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{ContentProfile, RawLocalResult, RawRemoteResult};

    fn ctx(method: ExecutionMode) -> NormalizeContext {
        NormalizeContext {
            method,
            level: CompressionLevel::Medium,
            processing_time_ms: 42,
            fallback_used: false,
        }
    }

    #[test]
    fn ratio_formula() {
        assert_eq!(reduction_ratio(0, 0), 0.0);
        assert_eq!(reduction_ratio(200, 50), 75.0);
        assert_eq!(reduction_ratio(100, 100), 0.0);
        assert_eq!(reduction_ratio(100, 120), -20.0);
    }

    #[test]
    fn local_result_keeps_measured_profile() {
        let raw = RawCompression::Local(RawLocalResult {
            data: vec![0u8; 25],
            original_size: 100,
            file_name: "a-compressed.pdf".into(),
            content_profile: ContentProfile::Mixed,
            images_total: 3,
            images_recompressed: 2,
            pages: 1,
        });
        let r = normalize(raw, ctx(ExecutionMode::Local));
        assert_eq!(r.compressed_size, 25);
        assert_eq!(r.ratio, 75.0);
        assert_eq!(r.content_profile, ContentProfile::Mixed);
        assert_eq!(r.method, ExecutionMode::Local);
        assert_eq!(r.processing_time_ms, 42);
    }

    #[test]
    fn remote_size_comes_from_body_and_name_defaults() {
        let raw = RawCompression::Remote(RawRemoteResult {
            body: Bytes::from(vec![1u8; 400]),
            source_name: "big scan.pdf".into(),
            file_name: None,
            original_size: 1000,
            compressed_size: 400,
            content_profile: None,
        });
        let r = normalize(raw, ctx(ExecutionMode::Remote));
        assert_eq!(r.compressed_size, 400);
        assert_eq!(r.ratio, 60.0);
        assert_eq!(r.file_name, "big scan-compressed.pdf");
        assert_eq!(r.content_profile, ContentProfile::ImageHeavy);
    }

    #[test]
    fn remote_header_profile_and_name_win() {
        let raw = RawCompression::Remote(RawRemoteResult {
            body: Bytes::from_static(b"%PDF"),
            source_name: "x.pdf".into(),
            file_name: Some("server-name.pdf".into()),
            original_size: 5,
            compressed_size: 4,
            content_profile: Some(ContentProfile::TextHeavy),
        });
        let r = normalize(raw, ctx(ExecutionMode::Remote));
        assert_eq!(r.file_name, "server-name.pdf");
        assert_eq!(r.content_profile, ContentProfile::TextHeavy);
    }

    #[test]
    fn empty_original_yields_zero_ratio() {
        let raw = RawCompression::Remote(RawRemoteResult {
            body: Bytes::new(),
            source_name: "empty.pdf".into(),
            file_name: None,
            original_size: 0,
            compressed_size: 0,
            content_profile: None,
        });
        let r = normalize(raw, ctx(ExecutionMode::Remote));
        assert_eq!(r.ratio, 0.0);
        assert_eq!(r.content_profile, ContentProfile::Unknown);
    }
}
