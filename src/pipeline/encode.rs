//! Image recompression: embedded image XObject → downsampled JPEG stream.
//!
//! Most of a scanned or photo-heavy PDF's bytes sit in its image XObjects,
//! so that is where the local executor spends its effort. Each image is
//! decoded (DCT, Flate or unfiltered; 8-bit Gray/RGB/CMYK), downscaled so a
//! full-page placement does not exceed the level's DPI, and re-encoded as a
//! baseline JPEG at the level's quality.
//!
//! Anything unusual is left alone rather than risk a visibly broken page:
//! images with soft masks, stencil masks, `Decode` arrays, PNG predictors,
//! filter chains, indexed colour or non-8-bit samples. A replacement is only
//! kept when it is actually smaller than the original stream.

use flate2::read::ZlibDecoder;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, Stream};
use std::io::Read;
use tracing::debug;

/// What happened to one image.
#[derive(Debug)]
pub enum ImageOutcome {
    /// A smaller stream was produced.
    Replaced {
        stream: Stream,
        before: usize,
        after: usize,
    },
    /// The original stream should stay; the reason is for logs.
    Kept(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColorModel {
    Gray,
    Rgb,
    Cmyk,
}

impl ColorModel {
    fn channels(self) -> usize {
        match self {
            ColorModel::Gray => 1,
            ColorModel::Rgb => 3,
            ColorModel::Cmyk => 4,
        }
    }
}

/// Images declaring more pixels than this are never decoded.
const MAX_IMAGE_PIXELS: u64 = 100_000_000;

/// Recompress one image XObject.
///
/// `max_size` is the largest pixel size worth keeping, in `(width, height)`.
///
/// # Errors
/// Only when JPEG encoding itself fails; undecodable images are
/// [`ImageOutcome::Kept`].
pub fn recompress_image(
    doc: &Document,
    image: &Stream,
    max_size: (u32, u32),
    quality: u8,
) -> Result<ImageOutcome, String> {
    let dict = &image.dict;

    if dict.has(b"SMask") || dict.has(b"Mask") || dict.has(b"Decode") {
        return Ok(ImageOutcome::Kept("masked or remapped image"));
    }
    if matches!(dict.get(b"ImageMask"), Ok(Object::Boolean(true))) {
        return Ok(ImageOutcome::Kept("stencil mask"));
    }

    let (width, height) = match (int_entry(dict, b"Width"), int_entry(dict, b"Height")) {
        (Some(w), Some(h)) if w > 0 && h > 0 => match (u32::try_from(w), u32::try_from(h)) {
            (Ok(w), Ok(h)) => (w, h),
            _ => return Ok(ImageOutcome::Kept("implausible dimensions")),
        },
        _ => return Ok(ImageOutcome::Kept("missing dimensions")),
    };
    if u64::from(width) * u64::from(height) > MAX_IMAGE_PIXELS {
        return Ok(ImageOutcome::Kept("implausible dimensions"));
    }
    let bits = int_entry(dict, b"BitsPerComponent").unwrap_or(8);
    if bits != 8 {
        return Ok(ImageOutcome::Kept("not 8 bits per component"));
    }
    let Some(model) = dict
        .get(b"ColorSpace")
        .ok()
        .and_then(|cs| color_model(doc, cs, 0))
    else {
        return Ok(ImageOutcome::Kept("unsupported colour space"));
    };

    let Some(needed) = sample_len(width, height, model) else {
        return Ok(ImageOutcome::Kept("implausible dimensions"));
    };

    let decoded = match single_filter(dict) {
        Err(()) => return Ok(ImageOutcome::Kept("filter chain")),
        Ok(Some(b"DCTDecode")) => {
            if model == ColorModel::Cmyk {
                return Ok(ImageOutcome::Kept("CMYK JPEG"));
            }
            match image::load_from_memory_with_format(&image.content, ImageFormat::Jpeg) {
                Ok(img) => img,
                Err(_) => return Ok(ImageOutcome::Kept("undecodable JPEG")),
            }
        }
        Ok(Some(b"FlateDecode")) => {
            if has_predictor(dict) {
                return Ok(ImageOutcome::Kept("PNG predictor"));
            }
            let mut raw = Vec::new();
            let mut inflater = ZlibDecoder::new(&image.content[..]).take(needed as u64);
            if inflater.read_to_end(&mut raw).is_err() {
                return Ok(ImageOutcome::Kept("corrupt flate data"));
            }
            match from_raw(&raw, width, height, model) {
                Some(img) => img,
                None => return Ok(ImageOutcome::Kept("short sample data")),
            }
        }
        Ok(None) => match from_raw(&image.content, width, height, model) {
            Some(img) => img,
            None => return Ok(ImageOutcome::Kept("short sample data")),
        },
        Ok(Some(_)) => return Ok(ImageOutcome::Kept("unsupported filter")),
    };

    let resized = downsample(decoded, max_size);
    let gray = model == ColorModel::Gray;
    let jpeg = encode_jpeg(&resized, gray, quality)?;

    let before = image.content.len();
    let after = jpeg.len();
    if after >= before {
        return Ok(ImageOutcome::Kept("re-encoding is not smaller"));
    }
    debug!(
        "Image {}x{} → {}x{}: {} → {} bytes",
        width,
        height,
        resized.width(),
        resized.height(),
        before,
        after
    );

    Ok(ImageOutcome::Replaced {
        stream: jpeg_stream(jpeg, resized.width(), resized.height(), gray),
        before,
        after,
    })
}

/// Largest pixel size of a full-page image on a `width_pt × height_pt`
/// page at `dpi`.
pub fn max_pixels_for_page(width_pt: f32, height_pt: f32, dpi: u32) -> (u32, u32) {
    let scale = dpi as f32 / 72.0;
    let w = (width_pt.abs() * scale).ceil().max(1.0) as u32;
    let h = (height_pt.abs() * scale).ceil().max(1.0) as u32;
    (w, h)
}

/// Shrink `img` to fit inside `max_size`, preserving aspect ratio.
fn downsample(img: DynamicImage, (max_w, max_h): (u32, u32)) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    if w <= max_w && h <= max_h {
        return img;
    }
    let scale = (max_w as f64 / w as f64).min(max_h as f64 / h as f64);
    let nw = ((w as f64 * scale).round() as u32).max(1);
    let nh = ((h as f64 * scale).round() as u32).max(1);
    img.resize_exact(nw, nh, FilterType::Triangle)
}

fn encode_jpeg(img: &DynamicImage, gray: bool, quality: u8) -> Result<Vec<u8>, String> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    let result = if gray {
        DynamicImage::ImageLuma8(img.to_luma8()).write_with_encoder(encoder)
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)
    };
    result.map_err(|e| format!("JPEG encoding failed: {e}"))?;
    Ok(buf)
}

fn jpeg_stream(jpeg: Vec<u8>, width: u32, height: u32, gray: bool) -> Stream {
    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"XObject".to_vec()));
    dict.set("Subtype", Object::Name(b"Image".to_vec()));
    dict.set("Width", Object::Integer(width as i64));
    dict.set("Height", Object::Integer(height as i64));
    let cs: &[u8] = if gray { b"DeviceGray" } else { b"DeviceRGB" };
    dict.set("ColorSpace", Object::Name(cs.to_vec()));
    dict.set("BitsPerComponent", Object::Integer(8));
    dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
    // Already entropy-coded; deflating it again only costs time.
    Stream::new(dict, jpeg).with_compression(false)
}

/// Bytes of 8-bit samples a `width × height` image needs, `None` on overflow.
fn sample_len(width: u32, height: u32, model: ColorModel) -> Option<usize> {
    usize::try_from(width)
        .ok()?
        .checked_mul(usize::try_from(height).ok()?)?
        .checked_mul(model.channels())
}

fn from_raw(data: &[u8], width: u32, height: u32, model: ColorModel) -> Option<DynamicImage> {
    let samples = data.get(..sample_len(width, height, model)?)?;
    match model {
        ColorModel::Gray => GrayImage::from_raw(width, height, samples.to_vec()).map(DynamicImage::ImageLuma8),
        ColorModel::Rgb => RgbImage::from_raw(width, height, samples.to_vec()).map(DynamicImage::ImageRgb8),
        ColorModel::Cmyk => {
            let mut rgb = Vec::with_capacity(samples.len() / 4 * 3);
            for px in samples.chunks_exact(4) {
                let k = 255 - px[3] as u32;
                for c in &px[..3] {
                    rgb.push(((255 - *c as u32) * k / 255) as u8);
                }
            }
            RgbImage::from_raw(width, height, rgb).map(DynamicImage::ImageRgb8)
        }
    }
}

// ── PDF object helpers ───────────────────────────────────────────────────

pub(crate) fn name_is(obj: &Object, name: &[u8]) -> bool {
    matches!(obj, Object::Name(n) if n.as_slice() == name)
}

/// Whether `obj` is an image XObject stream.
pub(crate) fn is_image_stream(obj: &Object) -> bool {
    match obj {
        Object::Stream(s) => s.dict.get(b"Subtype").map(|o| name_is(o, b"Image")).unwrap_or(false),
        _ => false,
    }
}

fn int_entry(dict: &Dictionary, key: &[u8]) -> Option<i64> {
    dict.get(key).ok().and_then(|o| o.as_i64().ok())
}

/// `Ok(None)` for no filter, `Ok(Some(name))` for exactly one, `Err` for a chain.
fn single_filter(dict: &Dictionary) -> Result<Option<&[u8]>, ()> {
    match dict.get(b"Filter") {
        Err(_) => Ok(None),
        Ok(Object::Name(n)) => Ok(Some(n.as_slice())),
        Ok(Object::Array(arr)) => match arr.as_slice() {
            [] => Ok(None),
            [Object::Name(n)] => Ok(Some(n.as_slice())),
            _ => Err(()),
        },
        Ok(_) => Err(()),
    }
}

fn has_predictor(dict: &Dictionary) -> bool {
    let parms = match dict.get(b"DecodeParms") {
        Ok(Object::Dictionary(d)) => Some(d),
        Ok(Object::Array(arr)) => arr.iter().find_map(|o| match o {
            Object::Dictionary(d) => Some(d),
            _ => None,
        }),
        _ => None,
    };
    parms
        .and_then(|d| int_entry(d, b"Predictor"))
        .map(|p| p > 1)
        .unwrap_or(false)
}

fn color_model(doc: &Document, cs: &Object, depth: u8) -> Option<ColorModel> {
    if depth > 4 {
        return None;
    }
    match cs {
        Object::Name(n) => match n.as_slice() {
            b"DeviceGray" | b"CalGray" | b"G" => Some(ColorModel::Gray),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Some(ColorModel::Rgb),
            b"DeviceCMYK" | b"CMYK" => Some(ColorModel::Cmyk),
            _ => None,
        },
        Object::Reference(id) => doc
            .get_object(*id)
            .ok()
            .and_then(|o| color_model(doc, o, depth + 1)),
        Object::Array(arr) => {
            let family = arr.first()?;
            if name_is(family, b"ICCBased") {
                let profile = match arr.get(1)? {
                    Object::Reference(id) => doc.get_object(*id).ok()?,
                    other => other,
                };
                let Object::Stream(s) = profile else {
                    return None;
                };
                match int_entry(&s.dict, b"N")? {
                    1 => Some(ColorModel::Gray),
                    3 => Some(ColorModel::Rgb),
                    4 => Some(ColorModel::Cmyk),
                    _ => None,
                }
            } else if name_is(family, b"CalRGB") {
                Some(ColorModel::Rgb)
            } else if name_is(family, b"CalGray") {
                Some(ColorModel::Gray)
            } else {
                None
            }
        }
        _ => None,
    }
}
