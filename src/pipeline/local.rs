//! In-process compression with lopdf.
//!
//! The document is parsed into an object graph, every image XObject reachable
//! from a page's (possibly inherited) resources is run through
//! [`super::encode::recompress_image`], unreferenced objects are pruned and
//! the remaining streams are deflated before the document is saved back to
//! memory.
//!
//! Parsing and JPEG encoding are CPU-bound, so the whole rewrite runs on
//! tokio's blocking pool; progress is reported from that worker thread.

use super::encode::{self, ImageOutcome};
use super::input::InputFile;
use super::{profile, Executor};
use crate::config::LevelSettings;
use crate::error::{ExecutionError, LocalProcessingError};
use crate::output::{compressed_file_name, RawCompression, RawLocalResult};
use crate::pipeline::classify::ExecutionMode;
use crate::progress::AttemptProgress;
use async_trait::async_trait;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::HashSet;
use tracing::{debug, info};

/// US Letter, used when a page tree carries no readable `MediaBox`.
const DEFAULT_PAGE_SIZE: (f32, f32) = (612.0, 792.0);

/// Guard against cyclic `Parent` chains in broken page trees.
const MAX_TREE_DEPTH: usize = 32;

/// The in-process executor. Stateless; one instance serves any number of
/// concurrent calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Local
    }

    async fn execute(
        &self,
        file: &InputFile,
        settings: &LevelSettings,
        progress: &AttemptProgress,
    ) -> Result<RawCompression, ExecutionError> {
        progress.report(0, "Loading PDF");

        let data = file.bytes().clone();
        let name = file.name().to_string();
        let settings = *settings;
        let progress = progress.clone();

        let result = tokio::task::spawn_blocking(move || compress_document(&data, &name, &settings, &progress))
            .await
            .map_err(|e| LocalProcessingError::TaskFailed(e.to_string()))??;

        Ok(RawCompression::Local(result))
    }
}

/// Rewrite `data` with the image parameters from `settings`.
///
/// Synchronous; call from a blocking context.
pub fn compress_document(
    data: &[u8],
    name: &str,
    settings: &LevelSettings,
    progress: &AttemptProgress,
) -> Result<RawLocalResult, LocalProcessingError> {
    progress.report(2, "Parsing document");
    let mut doc = Document::load_mem(data).map_err(|e| LocalProcessingError::Parse {
        detail: e.to_string(),
    })?;

    if doc.trailer.has(b"Encrypt") {
        return Err(LocalProcessingError::Encrypted);
    }

    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    if pages.is_empty() {
        return Err(LocalProcessingError::EmptyDocument);
    }
    let total_pages = pages.len();
    let content_profile = profile::analyze(&doc, data.len() as u64);
    debug!("Parsed {}: {} pages, profile {}", name, total_pages, content_profile);
    progress.report(10, format!("Parsed {total_pages} pages"));

    let mut seen: HashSet<ObjectId> = HashSet::new();
    let mut images_total = 0usize;
    let mut images_recompressed = 0usize;
    let mut bytes_saved = 0usize;

    for (idx, page_id) in pages.iter().enumerate() {
        let page_no = idx + 1;
        if progress.is_cancelled() {
            debug!("{}: cancelled before page {}", name, page_no);
            return Err(LocalProcessingError::Cancelled);
        }
        let (w_pt, h_pt) = page_size(&doc, *page_id);
        let bounds = encode::max_pixels_for_page(w_pt, h_pt, settings.target_dpi);

        for image_id in page_image_ids(&doc, *page_id) {
            // Shared XObjects are rewritten once, against the first page that uses them.
            if !seen.insert(image_id) {
                continue;
            }
            images_total += 1;

            let outcome = match doc.get_object(image_id) {
                Ok(Object::Stream(stream)) => {
                    encode::recompress_image(&doc, stream, bounds, settings.jpeg_quality)
                        .map_err(|detail| LocalProcessingError::Embed { page: page_no, detail })?
                }
                _ => continue,
            };

            match outcome {
                ImageOutcome::Replaced { stream, before, after } => {
                    doc.objects.insert(image_id, Object::Stream(stream));
                    images_recompressed += 1;
                    bytes_saved += before - after;
                }
                ImageOutcome::Kept(reason) => {
                    debug!("Page {}: keeping image {:?} ({})", page_no, image_id, reason);
                }
            }
        }

        progress.report_fraction(
            10,
            90,
            page_no as u64,
            total_pages as u64,
            format!("Recompressing page {page_no}/{total_pages}"),
        );
    }

    if progress.is_cancelled() {
        return Err(LocalProcessingError::Cancelled);
    }
    progress.report(92, "Finalizing");
    doc.prune_objects();
    doc.compress();

    let mut out = Vec::with_capacity(data.len());
    doc.save_to(&mut out).map_err(|e| LocalProcessingError::Write {
        detail: e.to_string(),
    })?;

    info!(
        "Local compression of {}: {} → {} bytes ({}/{} images recompressed, {} image bytes saved)",
        name,
        data.len(),
        out.len(),
        images_recompressed,
        images_total,
        bytes_saved
    );

    Ok(RawLocalResult {
        data: out,
        original_size: data.len() as u64,
        file_name: compressed_file_name(name),
        content_profile,
        images_total,
        images_recompressed,
        pages: total_pages,
    })
}

/// Walk from `page_id` up through `Parent` links, returning the first
/// dictionary that defines `key`.
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut node = doc.get_dictionary(page_id).ok();
    for _ in 0..MAX_TREE_DEPTH {
        let dict = node?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        node = dict
            .get(b"Parent")
            .and_then(|p| p.as_reference())
            .and_then(|id| doc.get_dictionary(id))
            .ok();
    }
    None
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match obj {
        Object::Dictionary(d) => Some(d),
        Object::Reference(id) => doc.get_dictionary(*id).ok(),
        _ => None,
    }
}

/// Page width and height in points.
fn page_size(doc: &Document, page_id: ObjectId) -> (f32, f32) {
    let rect = match inherited(doc, page_id, b"MediaBox") {
        Some(Object::Reference(id)) => doc.get_object(*id).ok(),
        other => other,
    };
    let Some(Object::Array(coords)) = rect else {
        return DEFAULT_PAGE_SIZE;
    };
    let nums: Vec<f32> = coords.iter().filter_map(number).collect();
    match nums.as_slice() {
        [x0, y0, x1, y1] if (x1 - x0).abs() > 0.0 && (y1 - y0).abs() > 0.0 => {
            ((x1 - x0).abs(), (y1 - y0).abs())
        }
        _ => DEFAULT_PAGE_SIZE,
    }
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// Image XObjects named in the page's `/Resources /XObject` dictionary.
fn page_image_ids(doc: &Document, page_id: ObjectId) -> Vec<ObjectId> {
    let Some(resources) = inherited(doc, page_id, b"Resources").and_then(|r| resolve_dict(doc, r)) else {
        return Vec::new();
    };
    let Some(xobjects) = resources.get(b"XObject").ok().and_then(|x| resolve_dict(doc, x)) else {
        return Vec::new();
    };
    xobjects
        .iter()
        .filter_map(|(_, obj)| obj.as_reference().ok())
        .filter(|id| {
            doc.get_object(*id)
                .map(encode::is_image_stream)
                .unwrap_or(false)
        })
        .collect()
}
