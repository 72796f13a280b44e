//! Content profile heuristics.
//!
//! Locally the profile is measured: the share of the file taken up by image
//! XObject streams. Remotely the server usually says; when it doesn't, the
//! achieved reduction is a usable proxy because only image-heavy documents
//! shrink a lot under image recompression.

use crate::output::ContentProfile;
use crate::pipeline::encode::is_image_stream;
use lopdf::{Document, Object};

/// Image bytes at or above this share of the file → image-heavy.
pub const IMAGE_HEAVY_SHARE: f64 = 0.5;
/// Image bytes at or below this share of the file → text-heavy.
pub const TEXT_HEAVY_SHARE: f64 = 0.1;

/// Total encoded bytes and count of image XObject streams in `doc`.
pub fn image_stats(doc: &Document) -> (u64, usize) {
    doc.objects
        .values()
        .filter(|o| is_image_stream(o))
        .fold((0u64, 0usize), |(bytes, count), o| match o {
            Object::Stream(s) => (bytes + s.content.len() as u64, count + 1),
            _ => (bytes, count),
        })
}

/// Profile from image bytes relative to the whole file.
pub fn from_image_share(image_bytes: u64, file_size: u64) -> ContentProfile {
    if file_size == 0 {
        return ContentProfile::Unknown;
    }
    let share = image_bytes as f64 / file_size as f64;
    if share >= IMAGE_HEAVY_SHARE {
        ContentProfile::ImageHeavy
    } else if share <= TEXT_HEAVY_SHARE {
        ContentProfile::TextHeavy
    } else {
        ContentProfile::Mixed
    }
}

/// Measure a parsed document.
pub fn analyze(doc: &Document, file_size: u64) -> ContentProfile {
    let (image_bytes, _) = image_stats(doc);
    from_image_share(image_bytes, file_size)
}

/// Guess from the achieved reduction (percent) when nothing better is known.
pub fn from_reduction(original_size: u64, ratio: f64) -> ContentProfile {
    if original_size == 0 {
        ContentProfile::Unknown
    } else if ratio >= 30.0 {
        ContentProfile::ImageHeavy
    } else if ratio <= 5.0 {
        ContentProfile::TextHeavy
    } else {
        ContentProfile::Mixed
    }
}
